mod list_keys;

pub use list_keys::*;
