pub mod capture_handle;
pub mod pipeline;
pub mod recorder;
pub mod recording;
pub mod recovery;
pub mod sink;
mod ticker;
