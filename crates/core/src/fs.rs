//! Filesystem utilities

use std::path::{Path, PathBuf};

use log::info;

use crate::get_xdg_data_dir;

/// Check if a path is a directory
pub fn is_directory(path: &Path) -> bool {
    path.is_dir()
}

/// Last path segment of an archive key, e.g. `KOKX20150505_050152_V06.gz`
pub fn key_basename(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

/// Where a download is written before it is renamed into place
pub fn staging_path(destination: &Path) -> PathBuf {
    let mut staged = destination.as_os_str().to_owned();
    staged.push(".part");
    PathBuf::from(staged)
}

/// Look for `filename` in the application's XDG data directory
pub fn find_data_file(filename: &str) -> Option<PathBuf> {
    let candidate = get_xdg_data_dir().join(filename);
    if candidate.is_file() {
        info!("Using data file: {}", candidate.display());
        Some(candidate)
    } else {
        None
    }
}
