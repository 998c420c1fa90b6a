mod network_stations;

pub use network_stations::*;
