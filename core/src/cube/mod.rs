pub mod flags;
pub mod ramp;
pub mod rate;

pub use ramp::{ExposureMeta, RampCube};
pub use rate::RateCube;
