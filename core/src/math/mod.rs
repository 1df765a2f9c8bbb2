pub mod masked;
pub mod stats;

pub use masked::Masked;
