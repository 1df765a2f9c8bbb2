use std::sync::Mutex;
use std::time::Duration;

/// One timed stage execution.
#[derive(Debug, Clone)]
pub struct StageSample {
    pub name: String,
    pub elapsed: Duration,
}

/// Collects per-stage wall-clock timings and failure counts across a run.
pub struct MetricsRecorder {
    inner: Mutex<Metrics>,
}

struct Metrics {
    stages: Vec<StageSample>,
    errors: usize,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Metrics {
                stages: Vec::new(),
                errors: 0,
            }),
        }
    }

    pub fn record_stage(&self, name: &str, elapsed: Duration) {
        if let Ok(mut metrics) = self.inner.lock() {
            metrics.stages.push(StageSample {
                name: name.to_string(),
                elapsed,
            });
        }
    }

    pub fn record_error(&self) {
        if let Ok(mut metrics) = self.inner.lock() {
            metrics.errors += 1;
        }
    }

    pub fn snapshot(&self) -> (Vec<StageSample>, usize) {
        if let Ok(metrics) = self.inner.lock() {
            (metrics.stages.clone(), metrics.errors)
        } else {
            (Vec::new(), 0)
        }
    }
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new()
    }
}
