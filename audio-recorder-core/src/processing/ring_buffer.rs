/// Bounded circular buffer for interleaved audio samples.
///
/// Not synchronized on its own: the session keeps each source's buffer
/// behind the pipeline write lock.
///
/// Overflow behavior: drops the oldest whole frames so the producer never
/// blocks and channel alignment is preserved.
#[derive(Debug)]
pub struct RingBuffer<T> {
    buffer: Vec<T>,
    write_index: usize,
    read_index: usize,
    available: usize,
    capacity: usize,
    frame_size: usize,
}

impl<T: Copy + Default> RingBuffer<T> {
    /// A buffer holding `capacity` samples, dropped one sample at a time.
    pub fn new(capacity: usize) -> Self {
        Self::with_frames(capacity, 1)
    }

    /// A buffer holding `frames` frames of `frame_size` interleaved samples.
    pub fn with_frames(frames: usize, frame_size: usize) -> Self {
        let frame_size = frame_size.max(1);
        let capacity = frames.max(1) * frame_size;
        Self {
            buffer: vec![T::default(); capacity],
            write_index: 0,
            read_index: 0,
            available: 0,
            capacity,
            frame_size,
        }
    }

    /// Append samples, returning how many whole frames were dropped to make
    /// room.
    ///
    /// A trailing partial frame in `samples` is discarded. If `samples`
    /// holds more than the capacity, only its newest frames are kept.
    pub fn write(&mut self, samples: &[T]) -> usize {
        let usable = samples.len() - samples.len() % self.frame_size;
        let samples = &samples[..usable];
        if samples.is_empty() {
            return 0;
        }

        let mut dropped = 0;
        let samples = if samples.len() > self.capacity {
            dropped += (samples.len() - self.capacity) / self.frame_size;
            &samples[samples.len() - self.capacity..]
        } else {
            samples
        };

        let overflow = (self.available + samples.len()).saturating_sub(self.capacity);
        if overflow > 0 {
            self.read_index = (self.read_index + overflow) % self.capacity;
            self.available -= overflow;
            dropped += overflow / self.frame_size;
        }

        for &sample in samples {
            self.buffer[self.write_index] = sample;
            self.write_index = (self.write_index + 1) % self.capacity;
        }
        self.available += samples.len();
        dropped
    }

    /// Read and remove up to `count` samples, rounded down to whole frames.
    ///
    /// Never blocks; returns an empty vector when nothing is buffered.
    pub fn read(&mut self, count: usize) -> Vec<T> {
        let to_read = count.min(self.available);
        let to_read = to_read - to_read % self.frame_size;
        if to_read == 0 {
            return Vec::new();
        }

        let mut result = Vec::with_capacity(to_read);
        for i in 0..to_read {
            result.push(self.buffer[(self.read_index + i) % self.capacity]);
        }
        self.read_index = (self.read_index + to_read) % self.capacity;
        self.available -= to_read;
        result
    }

    pub fn drain_all(&mut self) -> Vec<T> {
        self.read(self.available)
    }

    /// Number of samples currently available for reading.
    pub fn count(&self) -> usize {
        self.available
    }

    pub fn frames(&self) -> usize {
        self.available / self.frame_size
    }

    pub fn is_empty(&self) -> bool {
        self.available == 0
    }

    /// Total capacity in samples.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }
}
