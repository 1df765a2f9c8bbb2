pub mod exposure;

pub use exposure::{build_ramp_cube, build_reference_store, GeneratorConfig};
