use std::iter::StepBy;
use std::ops::Range;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use rayon::ThreadPoolBuilder;
use rayon::prelude::*;

use crate::{
    BatchConfig, BatchError, IntegrationError, MechanismLoader, SimulationStateMut, SolverContext,
    SolverContextPool, ThresholdPolicy, WorkBuffer,
};

/// Indices handled by `worker`: `{worker, worker + thread_count, ...}` below `n_points`.
///
/// Empty when `worker` is not one of `thread_count` workers.
pub fn assignment(worker: usize, n_points: usize, thread_count: usize) -> StepBy<Range<usize>> {
    if worker >= thread_count {
        return (n_points..n_points).step_by(1);
    }
    (worker.min(n_points)..n_points).step_by(thread_count)
}

#[derive(Clone, Debug, PartialEq)]
pub struct PointFailure {
    pub index: usize,
    pub worker: usize,
    pub error: IntegrationError,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct WorkerStats {
    pub worker: usize,
    pub assigned: usize,
    pub advanced: usize,
    pub skipped: usize,
    pub failed: usize,
    pub elapsed: Duration,
}

/// Outcome of a dispatch. The buffer itself carries the advanced states.
#[derive(Clone, Debug, Default)]
pub struct BatchReport {
    /// Sorted by point index.
    pub failures: Vec<PointFailure>,
    /// One entry per worker, in worker order.
    pub workers: Vec<WorkerStats>,
    pub elapsed: Duration,
}

impl BatchReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn failed_indices(&self) -> Vec<usize> {
        self.failures.iter().map(|failure| failure.index).collect()
    }

    pub fn advanced(&self) -> usize {
        self.workers.iter().map(|w| w.advanced).sum()
    }

    pub fn skipped(&self) -> usize {
        self.workers.iter().map(|w| w.skipped).sum()
    }
}

/// Parallel driver: one context and one round-robin lane per worker.
pub struct BatchDispatcher<'l, L: ?Sized> {
    loader: &'l L,
    config: BatchConfig,
}

type Lane<'b> = Vec<(usize, SimulationStateMut<'b>)>;

impl<'l, L: MechanismLoader + ?Sized> BatchDispatcher<'l, L> {
    pub fn new(loader: &'l L, config: BatchConfig) -> Self {
        Self { loader, config }
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Builds the context pool serially, then advances every admitted point of `buffer`
    /// on `thread_count` workers.
    pub fn run(&self, buffer: &mut WorkBuffer<'_>) -> Result<BatchReport, BatchError> {
        self.config.validate()?;
        let started = Instant::now();
        let threads = self.config.thread_count;
        let n_points = buffer.n_points();

        let mut pool = SolverContextPool::build(
            self.loader,
            threads,
            &self.config.mechanism,
            buffer.species_count(),
        )?;
        pool.configure(self.config.tolerances);

        let thread_pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|idx| format!("ignition-worker-{idx}"))
            .build()
            .map_err(|e| BatchError::ThreadPool(e.to_string()))?;

        info!(
            "advancing {} points ({} species) on {} threads with mechanism '{}'",
            n_points,
            buffer.species_count(),
            threads,
            self.config.mechanism
        );

        let mut lanes: Vec<Lane<'_>> = (0..threads)
            .map(|worker| Vec::with_capacity(assignment(worker, n_points, threads).len()))
            .collect();
        for (index, slot) in buffer.slots_mut() {
            lanes[index % threads].push((index, slot));
        }

        let dt = self.config.dt;
        let threshold = self.config.threshold;
        let outcomes: Vec<(WorkerStats, Vec<PointFailure>)> = thread_pool.install(|| {
            pool.contexts_mut()
                .par_iter_mut()
                .zip(lanes.into_par_iter())
                .enumerate()
                .map(|(worker, (context, lane))| run_worker(worker, context, lane, dt, threshold))
                .collect()
        });

        let mut report = BatchReport::default();
        for (stats, failures) in outcomes {
            report.workers.push(stats);
            report.failures.extend(failures);
        }
        report.failures.sort_by_key(|failure| failure.index);
        report.elapsed = started.elapsed();

        info!(
            "advanced {} points, skipped {}, failed {} in {:.3?}",
            report.advanced(),
            report.skipped(),
            report.failures.len(),
            report.elapsed
        );
        Ok(report)
    }
}

fn run_worker<C: SolverContext>(
    worker: usize,
    context: &mut C,
    lane: Lane<'_>,
    dt: f64,
    threshold: ThresholdPolicy,
) -> (WorkerStats, Vec<PointFailure>) {
    let started = Instant::now();
    let mut stats = WorkerStats {
        worker,
        assigned: lane.len(),
        ..WorkerStats::default()
    };
    let mut failures = Vec::new();

    for (index, mut slot) in lane {
        if !threshold.admits(slot.temperature()) {
            stats.skipped += 1;
            continue;
        }
        let width = slot.as_state().as_slice().len();
        let outcome = match context.advance(slot.as_state(), dt) {
            Ok(advanced) if advanced.as_slice().len() == width => {
                slot.overwrite(advanced);
                Ok(())
            }
            Ok(advanced) => Err(IntegrationError::InvalidState(format!(
                "solver returned {} values for a {}-value point",
                advanced.as_slice().len(),
                width
            ))),
            Err(error) => Err(error),
        };
        match outcome {
            Ok(()) => stats.advanced += 1,
            Err(error) => {
                warn!("point {index} failed on worker {worker}: {error}");
                stats.failed += 1;
                failures.push(PointFailure {
                    index,
                    worker,
                    error,
                });
            }
        }
    }

    stats.elapsed = started.elapsed();
    debug!(
        "worker {} done: {} assigned, {} advanced, {} skipped, {} failed in {:.3?}",
        worker, stats.assigned, stats.advanced, stats.skipped, stats.failed, stats.elapsed
    );
    (stats, failures)
}
