pub mod capture_provider;
pub mod recorder_delegate;
pub mod stream_encoder;
pub mod transcoder;
