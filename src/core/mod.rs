pub mod indicators;
pub mod lifecycle;
pub mod risk;
pub mod sessions;
pub mod snapshot;
