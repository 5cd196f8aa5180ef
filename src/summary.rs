use crate::state::check_layout;
use crate::{BatchError, STATE_HEADER, SimulationState, WorkBuffer};

/// Final temperature and pressure of one point.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PointSummary {
    pub temperature: f64,
    pub pressure: f64,
}

impl From<SimulationState<'_>> for PointSummary {
    fn from(state: SimulationState<'_>) -> Self {
        Self {
            temperature: state.temperature(),
            pressure: state.pressure(),
        }
    }
}

/// Condenses a post-run buffer into one `(T, P)` pair per point, in index order.
///
/// Points left below the threshold come back with their initial values; nothing marks
/// them as skipped.
pub fn summarize(
    buffer: &[f64],
    n_points: usize,
    species_count: usize,
) -> Result<Vec<PointSummary>, BatchError> {
    check_layout(buffer.len(), n_points, species_count)?;
    Ok(buffer
        .chunks_exact(species_count + STATE_HEADER)
        .map(|slot| PointSummary::from(SimulationState::from_slot(slot)))
        .collect())
}

impl WorkBuffer<'_> {
    pub fn summarize(&self) -> Vec<PointSummary> {
        self.states().map(PointSummary::from).collect()
    }
}
