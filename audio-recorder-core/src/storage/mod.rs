pub mod metadata;
pub mod mp3_writer;
pub mod output_checks;
pub mod transcode;
