use anyhow::Context;
use log::info;
use rampcore::cube::{RampCube, RateCube};
use rampcore::processing::{
    BackgroundCorrector, OutlierFlagger, RateEstimator, SaturationColumnPropagator, TemporalBinner,
};
use rampcore::reference::CalibrationSource;
use rampcore::telemetry::MetricsRecorder;
use rampcore::PipelineStage;
use serde::Serialize;
use std::time::Instant;

use crate::workflow::config::WorkflowConfig;

/// Summary of one reduction run, serialisable as the JSON product.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub detector: String,
    pub binned_integrations: usize,
    pub rows: usize,
    pub columns: usize,
    pub flagged_fraction: f32,
    pub mean_rate: f32,
    pub stage_seconds: Vec<(String, f64)>,
}

pub struct WorkflowResult {
    pub cube: RateCube,
    pub summary: RunSummary,
}

/// Sequences the five reduction stages over one exposure, timing each one.
#[derive(Clone)]
pub struct Runner {
    config: WorkflowConfig,
}

impl Runner {
    pub fn new(config: WorkflowConfig) -> Self {
        Self { config }
    }

    fn timed<S: PipelineStage>(
        &self,
        metrics: &MetricsRecorder,
        stage: S,
        input: S::Input,
    ) -> anyhow::Result<S::Output> {
        let started = Instant::now();
        let output = match stage.execute(input) {
            Ok(output) => output,
            Err(e) => {
                metrics.record_error();
                return Err(e).with_context(|| format!("executing {} stage", stage.name()));
            }
        };
        let elapsed = started.elapsed();
        info!("{} completed in {:.2} s", stage.name(), elapsed.as_secs_f64());
        metrics.record_stage(stage.name(), elapsed);
        Ok(output)
    }

    pub fn execute(
        &self,
        ramp: RampCube,
        reference: &dyn CalibrationSource,
    ) -> anyhow::Result<WorkflowResult> {
        let metrics = MetricsRecorder::new();
        let stages = &self.config.stages;

        let ramp = self.timed(
            &metrics,
            SaturationColumnPropagator::new(stages.saturation.clone()),
            ramp,
        )?;
        let cube = self.timed(&metrics, RateEstimator::new(reference), ramp)?;
        let cube = self.timed(
            &metrics,
            BackgroundCorrector::new(stages.refcorr.clone()),
            cube,
        )?;
        let cube = self.timed(&metrics, OutlierFlagger::new(stages.flagging.clone()), cube)?;
        let cube = self.timed(
            &metrics,
            TemporalBinner::new(stages.timeaverage.clone()),
            cube,
        )?;

        let (binned, rows, columns) = cube.dims();
        let total = cube.dq.len().max(1);
        let flagged = cube.dq.iter().filter(|&&dq| dq != 0).count();
        let mut rate_sum = 0.0_f64;
        let mut rate_n = 0_usize;
        for (&v, &dq) in cube.data.iter().zip(cube.dq.iter()) {
            if dq == 0 {
                rate_sum += f64::from(v);
                rate_n += 1;
            }
        }
        let (samples, _errors) = metrics.snapshot();

        let summary = RunSummary {
            detector: cube.meta.detector.clone(),
            binned_integrations: binned,
            rows,
            columns,
            flagged_fraction: flagged as f32 / total as f32,
            mean_rate: if rate_n > 0 {
                (rate_sum / rate_n as f64) as f32
            } else {
                0.0
            },
            stage_seconds: samples
                .iter()
                .map(|s| (s.name.clone(), s.elapsed.as_secs_f64()))
                .collect(),
        };
        Ok(WorkflowResult { cube, summary })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::{build_ramp_cube, build_reference_store, GeneratorConfig};
    use approx::assert_abs_diff_eq;

    fn small_workflow() -> WorkflowConfig {
        let mut config = WorkflowConfig::default();
        config.generator = GeneratorConfig {
            integrations: 8,
            groups: 6,
            rows: 16,
            columns: 12,
            ..GeneratorConfig::default()
        };
        config.stages.timeaverage.num_ave = 4;
        config
    }

    #[test]
    fn runner_reduces_a_synthetic_exposure() {
        let config = small_workflow();
        let ramp = build_ramp_cube(&config.generator).unwrap();
        let reference = build_reference_store(&config.generator);
        let runner = Runner::new(config);
        let result = runner.execute(ramp, &reference).unwrap();

        assert_eq!(result.cube.dims(), (2, 16, 12));
        assert_eq!(result.summary.binned_integrations, 2);
        assert_eq!(result.summary.stage_seconds.len(), 5);
        assert!(result.cube.background.is_some());
    }

    #[test]
    fn reduced_cube_keeps_the_error_invariant() {
        let config = small_workflow();
        let ramp = build_ramp_cube(&config.generator).unwrap();
        let reference = build_reference_store(&config.generator);
        let runner = Runner::new(config);
        let result = runner.execute(ramp, &reference).unwrap();

        let cube = &result.cube;
        for ((idx, &e), (&p, &r)) in cube
            .err
            .indexed_iter()
            .zip(cube.var_poisson.iter().zip(cube.var_rnoise.iter()))
        {
            if cube.dq[idx] == 0 {
                assert_abs_diff_eq!(e, (p + r).sqrt(), epsilon = 1e-5);
            }
        }
    }

    #[test]
    fn missing_detector_maps_fail_the_run() {
        let config = small_workflow();
        let ramp = build_ramp_cube(&config.generator).unwrap();
        let reference = rampcore::reference::MemoryReferenceStore::new();
        let runner = Runner::new(config);
        assert!(runner.execute(ramp, &reference).is_err());
    }
}
