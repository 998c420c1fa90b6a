//! NEXRAD Archive Search Core Library
//!
//! Shared utilities for the fetcher binaries:
//! - Configuration loading (XDG-compliant)
//! - File system and archive key helpers
//! - Archive defaults

mod config;
pub mod fs;

pub use config::{find_config_file, get_xdg_data_dir, load_config, ConfigSource};
pub use fs::{find_data_file, is_directory, key_basename, staging_path};

/// Application name used for XDG paths
pub const APP_NAME: &str = "nexrad-search";

/// Public NEXRAD Level II bucket
pub const DEFAULT_BUCKET: &str = "noaa-nexrad-level2";

/// HTTP endpoint of the public NEXRAD Level II bucket
pub const DEFAULT_BUCKET_URL: &str = "https://noaa-nexrad-level2.s3.amazonaws.com";

/// Region the public bucket lives in
pub const DEFAULT_BUCKET_REGION: &str = "us-east-1";

/// Suffix of compressed archive files in the bucket
pub const DEFAULT_KEY_SUFFIX: &str = ".gz";

/// Concurrent downloads when none are configured
pub const DEFAULT_MAX_WORKERS: usize = 4;

/// Attempts made for a listing or fetch before giving up
pub const DEFAULT_RETRY_ATTEMPTS: usize = 6;

/// Fixed delay between attempts, in seconds
pub const DEFAULT_RETRY_DELAY_SECS: u64 = 5;

/// Upper bound on a single file download, in seconds
pub const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 300;
