pub mod cds;
pub mod flagging;
pub mod refcorr;
pub mod saturation;
pub mod timeaverage;

pub use cds::RateEstimator;
pub use flagging::{OutlierConfig, OutlierFlagger};
pub use refcorr::{BackgroundConfig, BackgroundCorrector};
pub use saturation::{SaturationColumnPropagator, SaturationConfig};
pub use timeaverage::{BinningConfig, TemporalBinner};
