use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use sysinfo::Disks;

use crate::models::error::RecorderError;
use crate::models::settings::{RecordingSettings, INTERMEDIATE_FORMAT};

const MB: u64 = 1024 * 1024;

/// Create the output directory and verify it can take a recording.
///
/// Checks, in order: the directory exists or can be created, a file can be
/// written into it, and the volume holding it has `min_free_mb` available.
pub fn ensure_output_directory(dir: &Path, min_free_mb: u64) -> Result<(), RecorderError> {
    fs::create_dir_all(dir).map_err(|e| directory_error(dir, &e))?;
    check_writable(dir)?;

    match available_space(dir) {
        Some(available) => check_free_space(available, min_free_mb),
        None => {
            log::warn!("could not determine free space for {}; skipping check", dir.display());
            Ok(())
        }
    }
}

/// Refuse when `available_bytes` is below `required_mb`.
pub fn check_free_space(available_bytes: u64, required_mb: u64) -> Result<(), RecorderError> {
    if available_bytes < required_mb.saturating_mul(MB) {
        return Err(RecorderError::DiskFull {
            available_mb: available_bytes / MB,
            required_mb,
        });
    }
    Ok(())
}

/// Free bytes on the volume whose mount point is the longest prefix of `dir`.
pub fn available_space(dir: &Path) -> Option<u64> {
    let dir = fs::canonicalize(dir).unwrap_or_else(|_| dir.to_path_buf());
    let disks = Disks::new_with_refreshed_list();
    disks
        .list()
        .iter()
        .filter(|disk| dir.starts_with(disk.mount_point()))
        .max_by_key(|disk| disk.mount_point().as_os_str().len())
        .map(|disk| disk.available_space())
}

fn check_writable(dir: &Path) -> Result<(), RecorderError> {
    let marker = dir.join(format!(".write_check_{}", uuid::Uuid::new_v4().simple()));
    let result = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&marker)
        .and_then(|mut f| f.write_all(b"ok"));
    // Remove even when the write failed half way.
    let _ = fs::remove_file(&marker);
    result.map_err(|e| directory_error(dir, &e))
}

fn directory_error(dir: &Path, err: &io::Error) -> RecorderError {
    RecorderError::from_io(&format!("output directory {}", dir.display()), err)
}

/// `<prefix>_<YYYYMMDD_HHMMSS>_<8 hex>`, without extension.
pub fn recording_stem(prefix: &str) -> String {
    let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("{}_{}_{}", prefix, stamp, &id[..8])
}

/// Files a session writes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPaths {
    /// The MP3 the encoder streams into.
    pub intermediate: PathBuf,
    /// Where the transcoder writes; equal to `intermediate` for MP3 output.
    pub published: PathBuf,
}

impl OutputPaths {
    pub fn for_settings(settings: &RecordingSettings) -> Self {
        let stem = recording_stem(&settings.file_prefix);
        let intermediate = settings
            .output_directory
            .join(format!("{}.{}", stem, INTERMEDIATE_FORMAT.extension()));
        let published = if settings.needs_transcode() {
            settings
                .output_directory
                .join(format!("{}.{}", stem, settings.format.extension()))
        } else {
            intermediate.clone()
        };
        Self { intermediate, published }
    }
}
