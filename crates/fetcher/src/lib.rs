mod archive;
mod domains;
mod downloader;
mod errors;
#[cfg(feature = "s3")]
mod s3_storage;
mod stations;
mod utils;

pub use archive::*;
pub use domains::*;
pub use downloader::*;
pub use errors::*;
#[cfg(feature = "s3")]
pub use s3_storage::*;
pub use stations::*;
pub use utils::*;
