pub mod audio_models;
pub mod error;
pub mod recording_result;
pub mod settings;
pub mod state;
