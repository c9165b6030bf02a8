use std::fs::{self, File};
use std::path::Path;

use hound::{SampleFormat, WavSpec, WavWriter};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::models::audio_models::AudioFormat;
use crate::models::error::RecorderError;
use crate::models::settings::{OutputFormat, RecordingSettings};
use crate::traits::transcoder::Transcoder;

/// Fully decoded audio file.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    pub format: AudioFormat,
    /// Interleaved 16-bit samples.
    pub samples: Vec<i16>,
}

impl DecodedAudio {
    pub fn frames(&self) -> usize {
        self.samples.len() / self.format.channels.max(1) as usize
    }

    pub fn duration_secs(&self) -> f64 {
        if self.format.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.format.sample_rate as f64
    }
}

/// Decode a compressed file to interleaved 16-bit PCM.
///
/// Packets that fail to decode are skipped; a truncated tail (e.g. from
/// a crash before finalize) ends decoding instead of failing it.
pub fn decode_file(path: &Path) -> Result<DecodedAudio, RecorderError> {
    let file = File::open(path).map_err(|e| RecorderError::from_io("open intermediate file", &e))?;
    let stream = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let detected = symphonia::default::get_probe()
        .format(&hint, stream, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| RecorderError::TranscodeFailed(format!("unrecognized input: {}", e)))?;
    let mut reader = detected.format;

    let track = reader
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| RecorderError::TranscodeFailed("no audio track".into()))?;
    let track_id = track.id;
    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| RecorderError::TranscodeFailed(format!("unsupported codec: {}", e)))?;

    let mut format: Option<AudioFormat> = None;
    let mut samples: Vec<i16> = Vec::new();
    loop {
        let packet = match reader.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(RecorderError::TranscodeFailed(format!("read failed: {}", e))),
        };
        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                format.get_or_insert(AudioFormat::new(spec.rate, spec.channels.count() as u16));
                let mut buf = SampleBuffer::<i16>::new(decoded.capacity() as u64, spec);
                buf.copy_interleaved_ref(decoded);
                samples.extend_from_slice(buf.samples());
            }
            Err(SymphoniaError::DecodeError(e)) => {
                log::warn!("skipping undecodable packet: {}", e);
            }
            Err(e) => return Err(RecorderError::TranscodeFailed(format!("decode failed: {}", e))),
        }
    }

    let format = format.ok_or_else(|| RecorderError::TranscodeFailed("no decodable audio".into()))?;
    Ok(DecodedAudio { format, samples })
}

/// Write interleaved 16-bit PCM as a WAV file.
pub fn write_wav(path: &Path, audio: &DecodedAudio) -> Result<(), RecorderError> {
    let spec = WavSpec {
        channels: audio.format.channels,
        sample_rate: audio.format.sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let wav_err = |e: hound::Error| match e {
        hound::Error::IoError(io) => RecorderError::from_io("write wav", &io),
        other => RecorderError::TranscodeFailed(format!("wav writer: {}", other)),
    };

    let mut writer = WavWriter::create(path, spec).map_err(wav_err)?;
    for &sample in &audio.samples {
        writer.write_sample(sample).map_err(wav_err)?;
    }
    writer.finalize().map_err(wav_err)
}

/// Decodes the intermediate MP3 with symphonia and re-encodes it into the
/// requested container.
#[derive(Debug, Clone, Copy, Default)]
pub struct SymphoniaTranscoder;

impl Transcoder for SymphoniaTranscoder {
    fn transcode(
        &self,
        input: &Path,
        output: &Path,
        settings: &RecordingSettings,
    ) -> Result<(), RecorderError> {
        let result = match settings.format {
            OutputFormat::Wav => decode_file(input).and_then(|audio| {
                log::info!(
                    "transcoding {} → {} ({:.1}s, {})",
                    input.display(),
                    output.display(),
                    audio.duration_secs(),
                    audio.format
                );
                write_wav(output, &audio)
            }),
            OutputFormat::Mp3 => Err(RecorderError::TranscodeFailed(
                "intermediate file is already MP3".into(),
            )),
        };

        if result.is_err() && output.exists() {
            if let Err(e) = fs::remove_file(output) {
                log::warn!("failed to remove partial output {}: {}", output.display(), e);
            }
        }
        result
    }
}
