//! Data-quality bit flags shared with the upstream calibration chain.
//!
//! Flags accumulate by bitwise OR as data moves through the stages; a stage
//! may add bits but never clears one.

/// Pixel must not contribute to downstream arithmetic.
pub const DO_NOT_USE: u32 = 1;
/// Pixel reached the saturation threshold during the ramp.
pub const SATURATED: u32 = 1 << 1;
/// Temporal discontinuity: cosmic-ray hit or clipped outlier.
pub const JUMP_DETECTED: u32 = 1 << 2;
