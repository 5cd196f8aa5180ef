use std::ops::{Index, IndexMut};

use thiserror::Error;

use crate::{BatchError, SimulationState, Tolerances};

/// Failure advancing a single point. Scoped to that point only.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum IntegrationError {
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("non-finite solution at t={time:e}")]
    NonFinite { time: f64 },
    #[error("singular iteration matrix at t={time:e}")]
    SingularJacobian { time: f64 },
    #[error("step size {step:e} underflow at t={time:e}")]
    StepSizeUnderflow { time: f64, step: f64 },
    #[error("step limit {steps} reached at t={time:e}")]
    TooManySteps { time: f64, steps: usize },
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum MechanismLoadError {
    #[error("unknown mechanism '{0}'")]
    Unknown(String),
    #[error("invalid mechanism: {0}")]
    Invalid(String),
    #[error("mechanism '{mechanism}' defines {expected} species, buffer carries {found}")]
    SpeciesCount {
        mechanism: String,
        expected: usize,
        found: usize,
    },
}

/// One self-contained kinetics solver: thermodynamic state plus integrator.
///
/// Contexts are not reentrant; a context is bound to one point at a time and owned by
/// exactly one worker for the whole run.
pub trait SolverContext: Send {
    /// Applies integrator tolerances for all subsequent advances.
    fn configure(&mut self, tolerances: Tolerances);

    /// Sets the thermodynamic state from `state`, resets the integrator clock to zero and
    /// integrates to `dt`. The returned view borrows the context's own state and is only
    /// valid until the next call.
    fn advance(
        &mut self,
        state: SimulationState<'_>,
        dt: f64,
    ) -> Result<SimulationState<'_>, IntegrationError>;
}

/// Builds solver contexts from an opaque mechanism identifier.
///
/// Called serially, never from inside the parallel section.
pub trait MechanismLoader {
    type Context: SolverContext;

    fn load(
        &self,
        mechanism: &str,
        species_count: usize,
    ) -> Result<Self::Context, MechanismLoadError>;
}

/// Exactly one context per worker; `pool[t]` belongs to worker `t` for the whole run.
#[derive(Debug)]
pub struct SolverContextPool<C> {
    contexts: Vec<C>,
}

impl<C: SolverContext> SolverContextPool<C> {
    pub fn build<L>(
        loader: &L,
        thread_count: usize,
        mechanism: &str,
        species_count: usize,
    ) -> Result<Self, BatchError>
    where
        L: MechanismLoader<Context = C> + ?Sized,
    {
        if thread_count == 0 {
            return Err(BatchError::Configuration(
                "thread count must be greater than zero".into(),
            ));
        }
        let mut contexts = Vec::with_capacity(thread_count);
        for _ in 0..thread_count {
            let context = loader.load(mechanism, species_count).map_err(|source| {
                BatchError::MechanismLoad {
                    mechanism: mechanism.to_owned(),
                    source,
                }
            })?;
            contexts.push(context);
        }
        Ok(Self { contexts })
    }

    pub fn configure(&mut self, tolerances: Tolerances) {
        for context in &mut self.contexts {
            context.configure(tolerances);
        }
    }

    /// Runs one advance on the context owned by `worker`, outside of any dispatch.
    pub fn advance_on(
        &mut self,
        worker: usize,
        state: SimulationState<'_>,
        dt: f64,
    ) -> Option<Result<SimulationState<'_>, IntegrationError>> {
        self.contexts
            .get_mut(worker)
            .map(|context| context.advance(state, dt))
    }
}

impl<C> SolverContextPool<C> {
    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    pub fn get(&self, worker: usize) -> Option<&C> {
        self.contexts.get(worker)
    }

    pub fn get_mut(&mut self, worker: usize) -> Option<&mut C> {
        self.contexts.get_mut(worker)
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, C> {
        self.contexts.iter_mut()
    }

    pub(crate) fn contexts_mut(&mut self) -> &mut [C] {
        &mut self.contexts
    }
}

impl<C> Index<usize> for SolverContextPool<C> {
    type Output = C;

    fn index(&self, worker: usize) -> &C {
        &self.contexts[worker]
    }
}

impl<C> IndexMut<usize> for SolverContextPool<C> {
    fn index_mut(&mut self, worker: usize) -> &mut C {
        &mut self.contexts[worker]
    }
}
