use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};

use crate::models::error::RecorderError;
use crate::models::recording_result::RecordingResult;
use crate::models::settings::RecordingSettings;
use crate::models::state::Transition;
use crate::session::recording::RecordingSession;

type Reply<T> = Sender<Result<T, RecorderError>>;

enum Command {
    Start(RecordingSettings, Reply<Transition>),
    Pause(Reply<Transition>),
    Resume(Reply<Transition>),
    Stop(Reply<Option<RecordingResult>>),
    Discard(Reply<Transition>),
    Shutdown,
}

/// The reply to a command sent to a [`Recorder`].
#[must_use = "the command runs regardless; wait to see its outcome"]
pub struct Pending<T> {
    rx: Receiver<Result<T, RecorderError>>,
}

impl<T> Pending<T> {
    /// Block until the command has run.
    pub fn wait(self) -> Result<T, RecorderError> {
        self.rx.recv().unwrap_or_else(|_| Err(control_gone()))
    }

    /// Wait up to `timeout`; `None` if the command has not finished yet.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<T, RecorderError>> {
        match self.rx.recv_timeout(timeout) {
            Ok(result) => Some(result),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(Err(control_gone())),
        }
    }
}

fn control_gone() -> RecorderError {
    RecorderError::Unknown("recorder control thread is gone".into())
}

/// Runs a [`RecordingSession`]'s lifecycle on a dedicated `recorder-control`
/// thread so callers never block on device or disk work.
///
/// Commands run in the order they were sent. Dropping the recorder stops an
/// active recording.
pub struct Recorder {
    commands: Sender<Command>,
    handle: Option<JoinHandle<()>>,
}

impl Recorder {
    pub fn new(session: RecordingSession) -> Result<Self, RecorderError> {
        let (commands, rx) = unbounded();
        let handle = thread::Builder::new()
            .name("recorder-control".into())
            .spawn(move || run(session, rx))
            .map_err(|e| {
                RecorderError::Unknown(format!("failed to spawn recorder thread: {}", e))
            })?;
        Ok(Self {
            commands,
            handle: Some(handle),
        })
    }

    pub fn start(&self, settings: RecordingSettings) -> Pending<Transition> {
        self.send(|reply| Command::Start(settings, reply))
    }

    pub fn pause(&self) -> Pending<Transition> {
        self.send(Command::Pause)
    }

    pub fn resume(&self) -> Pending<Transition> {
        self.send(Command::Resume)
    }

    pub fn stop(&self) -> Pending<Option<RecordingResult>> {
        self.send(Command::Stop)
    }

    pub fn discard(&self) -> Pending<Transition> {
        self.send(Command::Discard)
    }

    fn send<T>(&self, command: impl FnOnce(Reply<T>) -> Command) -> Pending<T> {
        let (reply, rx) = bounded(1);
        // If the thread is gone `reply` is dropped and `wait` reports it.
        let _ = self.commands.send(command(reply));
        Pending { rx }
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("recorder control thread panicked");
            }
        }
    }
}

fn run(session: RecordingSession, commands: Receiver<Command>) {
    for command in commands.iter() {
        match command {
            Command::Start(settings, reply) => {
                let _ = reply.send(session.start(settings));
            }
            Command::Pause(reply) => {
                let _ = reply.send(session.pause());
            }
            Command::Resume(reply) => {
                let _ = reply.send(session.resume());
            }
            Command::Stop(reply) => {
                let _ = reply.send(session.stop());
            }
            Command::Discard(reply) => {
                let _ = reply.send(session.discard());
            }
            Command::Shutdown => break,
        }
    }
    log::debug!("recorder control thread exiting");
    // Dropping the session stops anything still recording.
}
