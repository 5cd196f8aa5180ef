//! Batch advance of independent constant-volume reactor states.
//!
//! A caller hands over a flat buffer of `n_points` initial states laid out as
//! `[T, P, Y_0 .. Y_{species_count-1}]`. Every point whose temperature reaches the
//! [`ThresholdPolicy`] is advanced by `dt` with a stiff kinetics solver and written back
//! in place; every other point is left untouched.
//!
//! Solvers are not thread-safe to construct and not reentrant, so each worker thread owns
//! exactly one [`SolverContext`] from a [`SolverContextPool`] built serially up front.
//! Points are dealt to workers round-robin (`{t, t+N, t+2N, ...}`) to spread the uneven
//! cost of low- and high-temperature trajectories without runtime load measurement.

use thiserror::Error;

mod dispatch;
pub mod kinetics;
mod pool;
#[cfg(feature = "python")]
mod python;
mod state;
mod summary;

pub use dispatch::{BatchDispatcher, BatchReport, PointFailure, WorkerStats, assignment};
pub use kinetics::ReferenceKinetics;
pub use pool::{IntegrationError, MechanismLoadError, MechanismLoader, SolverContext, SolverContextPool};
pub use state::{SimulationState, SimulationStateMut, WorkBuffer};
pub use summary::{PointSummary, summarize};

/// Number of leading non-species entries per point (`T`, `P`).
pub const STATE_HEADER: usize = 2;

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("invalid configuration: {0}")]
    Configuration(String),
    #[error("failed to load mechanism '{mechanism}'")]
    MechanismLoad {
        mechanism: String,
        #[source]
        source: MechanismLoadError,
    },
    #[error("thread pool error: {0}")]
    ThreadPool(String),
}

/// Integrator tolerances, applied once to every context before dispatch.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Tolerances {
    pub relative: f64,
    pub absolute: f64,
}

impl Default for Tolerances {
    fn default() -> Self {
        Self {
            relative: 1e-6,
            absolute: 1e-6,
        }
    }
}

impl Tolerances {
    pub fn new(relative: f64, absolute: f64) -> Self {
        Self { relative, absolute }
    }

    pub fn validate(&self) -> Result<(), BatchError> {
        let valid = |value: f64| value.is_finite() && value >= 0.0;
        if !valid(self.relative) || !valid(self.absolute) {
            return Err(BatchError::Configuration(format!(
                "tolerances must be finite and non-negative (relative={}, absolute={})",
                self.relative, self.absolute
            )));
        }
        if self.relative == 0.0 && self.absolute == 0.0 {
            return Err(BatchError::Configuration(
                "relative and absolute tolerances cannot both be zero".into(),
            ));
        }
        Ok(())
    }
}

/// Gate deciding which points get advanced.
///
/// Points below `t_criteria` pass through unchanged and are not reported as skipped
/// anywhere except in the per-worker counters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ThresholdPolicy {
    pub t_criteria: f64,
}

impl ThresholdPolicy {
    pub fn new(t_criteria: f64) -> Self {
        Self { t_criteria }
    }

    #[inline]
    pub fn admits(&self, temperature: f64) -> bool {
        temperature >= self.t_criteria
    }
}

impl Default for ThresholdPolicy {
    fn default() -> Self {
        Self::new(f64::NEG_INFINITY)
    }
}

/// Per-run parameters for [`BatchDispatcher`].
#[derive(Clone, Debug, PartialEq)]
pub struct BatchConfig {
    pub mechanism: String,
    pub dt: f64,
    pub threshold: ThresholdPolicy,
    pub tolerances: Tolerances,
    pub thread_count: usize,
}

impl BatchConfig {
    pub fn new(mechanism: impl Into<String>, dt: f64) -> Self {
        let thread_count = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            mechanism: mechanism.into(),
            dt,
            threshold: ThresholdPolicy::default(),
            tolerances: Tolerances::default(),
            thread_count,
        }
    }

    pub fn with_threshold(mut self, t_criteria: f64) -> Self {
        self.threshold = ThresholdPolicy::new(t_criteria);
        self
    }

    pub fn with_tolerances(mut self, relative: f64, absolute: f64) -> Self {
        self.tolerances = Tolerances::new(relative, absolute);
        self
    }

    pub fn with_threads(mut self, thread_count: usize) -> Self {
        self.thread_count = thread_count;
        self
    }

    pub fn validate(&self) -> Result<(), BatchError> {
        if self.thread_count == 0 {
            return Err(BatchError::Configuration(
                "thread count must be greater than zero".into(),
            ));
        }
        if !self.dt.is_finite() || self.dt <= 0.0 {
            return Err(BatchError::Configuration(format!(
                "time step must be finite and positive, got {}",
                self.dt
            )));
        }
        if self.threshold.t_criteria.is_nan() {
            return Err(BatchError::Configuration(
                "temperature criteria cannot be NaN".into(),
            ));
        }
        self.tolerances.validate()
    }
}

/// Advances every admitted point of `buffer` in place.
///
/// Shorthand for building a [`WorkBuffer`] and a [`BatchDispatcher`] over `loader`.
/// Configuration and mechanism errors fail the whole call before any point is touched;
/// per-point integration failures are collected in the returned [`BatchReport`].
pub fn run<L: MechanismLoader>(
    loader: &L,
    buffer: &mut [f64],
    n_points: usize,
    species_count: usize,
    config: &BatchConfig,
) -> Result<BatchReport, BatchError> {
    let mut work = WorkBuffer::new(buffer, n_points, species_count)?;
    BatchDispatcher::new(loader, config.clone()).run(&mut work)
}
