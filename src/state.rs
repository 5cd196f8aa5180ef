use crate::{BatchError, STATE_HEADER};

/// Read-only view of one point: `[T, P, Y_0 ..]`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SimulationState<'a> {
    slot: &'a [f64],
}

impl<'a> SimulationState<'a> {
    /// Wraps a slot. Returns `None` when the slot cannot hold a temperature and a pressure.
    pub fn new(slot: &'a [f64]) -> Option<Self> {
        (slot.len() >= STATE_HEADER).then_some(Self { slot })
    }

    pub(crate) fn from_slot(slot: &'a [f64]) -> Self {
        debug_assert!(slot.len() >= STATE_HEADER);
        Self { slot }
    }

    #[inline]
    pub fn temperature(&self) -> f64 {
        self.slot[0]
    }

    #[inline]
    pub fn pressure(&self) -> f64 {
        self.slot[1]
    }

    #[inline]
    pub fn mass_fractions(&self) -> &'a [f64] {
        &self.slot[STATE_HEADER..]
    }

    #[inline]
    pub fn species_count(&self) -> usize {
        self.slot.len() - STATE_HEADER
    }

    #[inline]
    pub fn as_slice(&self) -> &'a [f64] {
        self.slot
    }
}

/// Mutable view of one point, aliasing the caller's buffer.
#[derive(Debug)]
pub struct SimulationStateMut<'a> {
    slot: &'a mut [f64],
}

impl<'a> SimulationStateMut<'a> {
    pub fn new(slot: &'a mut [f64]) -> Option<Self> {
        (slot.len() >= STATE_HEADER).then_some(Self { slot })
    }

    pub fn as_state(&self) -> SimulationState<'_> {
        SimulationState { slot: &*self.slot }
    }

    #[inline]
    pub fn temperature(&self) -> f64 {
        self.slot[0]
    }

    pub fn set_temperature(&mut self, temperature: f64) {
        self.slot[0] = temperature;
    }

    pub fn set_pressure(&mut self, pressure: f64) {
        self.slot[1] = pressure;
    }

    pub fn mass_fractions_mut(&mut self) -> &mut [f64] {
        &mut self.slot[STATE_HEADER..]
    }

    /// Overwrites this point with `state`. Both must carry the same species count.
    pub fn overwrite(&mut self, state: SimulationState<'_>) {
        debug_assert_eq!(self.slot.len(), state.slot.len());
        self.slot.copy_from_slice(state.slot);
    }
}

/// Checks that a buffer of `len` values holds exactly `n_points` states.
pub(crate) fn check_layout(len: usize, n_points: usize, species_count: usize) -> Result<(), BatchError> {
    if species_count == 0 {
        return Err(BatchError::Configuration(
            "species count must be greater than zero".into(),
        ));
    }
    let stride = species_count + STATE_HEADER;
    let expected = stride.checked_mul(n_points).ok_or_else(|| {
        BatchError::Configuration("buffer size exceeds allowable limits".into())
    })?;
    if len != expected {
        return Err(BatchError::Configuration(format!(
            "buffer length {} does not match {} points × {} values (expected {})",
            len, n_points, stride, expected
        )));
    }
    Ok(())
}

/// The caller-owned flat buffer of `n_points` states, validated once.
#[derive(Debug)]
pub struct WorkBuffer<'a> {
    data: &'a mut [f64],
    n_points: usize,
    species_count: usize,
}

impl<'a> WorkBuffer<'a> {
    pub fn new(data: &'a mut [f64], n_points: usize, species_count: usize) -> Result<Self, BatchError> {
        check_layout(data.len(), n_points, species_count)?;
        Ok(Self {
            data,
            n_points,
            species_count,
        })
    }

    #[inline]
    pub fn n_points(&self) -> usize {
        self.n_points
    }

    #[inline]
    pub fn species_count(&self) -> usize {
        self.species_count
    }

    /// Values per point.
    #[inline]
    pub fn stride(&self) -> usize {
        self.species_count + STATE_HEADER
    }

    pub fn state(&self, index: usize) -> Option<SimulationState<'_>> {
        let stride = self.stride();
        let start = index.checked_mul(stride)?;
        self.data
            .get(start..start.checked_add(stride)?)
            .map(|slot| SimulationState { slot })
    }

    pub fn state_mut(&mut self, index: usize) -> Option<SimulationStateMut<'_>> {
        let stride = self.stride();
        let start = index.checked_mul(stride)?;
        self.data
            .get_mut(start..start.checked_add(stride)?)
            .map(|slot| SimulationStateMut { slot })
    }

    pub fn states(&self) -> impl Iterator<Item = SimulationState<'_>> {
        self.data
            .chunks_exact(self.stride())
            .map(|slot| SimulationState { slot })
    }

    /// Splits the buffer into disjoint per-point views, in index order.
    pub fn slots_mut(&mut self) -> impl Iterator<Item = (usize, SimulationStateMut<'_>)> {
        let stride = self.stride();
        self.data
            .chunks_exact_mut(stride)
            .map(|slot| SimulationStateMut { slot })
            .enumerate()
    }

    pub fn as_slice(&self) -> &[f64] {
        &*self.data
    }
}
