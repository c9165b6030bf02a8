pub mod conversion;
pub mod mixer;
pub mod pcm;
pub mod ring_buffer;
