mod beam;
mod projection;
mod relevance;

pub use beam::*;
pub use projection::*;
pub use relevance::*;
