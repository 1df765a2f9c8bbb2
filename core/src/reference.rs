//! Calibration-map provider boundary.
//!
//! Gain converts DN to detector counts per pixel; read noise is the per-read
//! noise in DN. Retrieval is modelled as a scoped acquisition: the handle
//! exposes the maps for the duration of a stage and logs its release when
//! dropped, independent of any reference-file format.

use std::collections::HashMap;
use std::ops::Deref;

use log::debug;
use ndarray::Array2;

use crate::prelude::{StageError, StageResult};

/// Gain and read-noise maps for one detector, plus the optional scalar gain
/// correction carried in the reference metadata.
#[derive(Debug, Clone)]
pub struct CalibrationMaps {
    pub gain: Array2<f32>,
    pub readnoise: Array2<f32>,
    pub gain_factor: Option<f32>,
}

/// Keyed lookup of calibration maps by detector identity. Lookup failure is
/// fatal to the rate estimation stage.
pub trait CalibrationSource {
    fn acquire(&self, detector: &str) -> StageResult<CalibrationHandle>;
}

/// Scoped access to one detector's calibration maps.
pub struct CalibrationHandle {
    maps: CalibrationMaps,
    detector: String,
}

impl CalibrationHandle {
    pub fn new(detector: impl Into<String>, maps: CalibrationMaps) -> Self {
        Self {
            maps,
            detector: detector.into(),
        }
    }
}

impl Deref for CalibrationHandle {
    type Target = CalibrationMaps;

    fn deref(&self) -> &CalibrationMaps {
        &self.maps
    }
}

impl Drop for CalibrationHandle {
    fn drop(&mut self) {
        debug!("released calibration maps for {}", self.detector);
    }
}

/// In-memory reference store; the provider used by tests and the offline
/// driver.
#[derive(Debug, Default)]
pub struct MemoryReferenceStore {
    maps: HashMap<String, CalibrationMaps>,
}

impl MemoryReferenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, detector: impl Into<String>, maps: CalibrationMaps) {
        self.maps.insert(detector.into(), maps);
    }
}

impl CalibrationSource for MemoryReferenceStore {
    fn acquire(&self, detector: &str) -> StageResult<CalibrationHandle> {
        let maps = self.maps.get(detector).cloned().ok_or_else(|| {
            StageError::ReferenceData(format!("no calibration maps for detector {detector}"))
        })?;
        debug!("acquired calibration maps for {detector}");
        Ok(CalibrationHandle::new(detector, maps))
    }
}
