mod archive_keys;
mod asos;
mod coverage;

pub use archive_keys::*;
pub use asos::*;
pub use coverage::*;
