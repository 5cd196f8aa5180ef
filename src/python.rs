use numpy::PyReadwriteArray1;
use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;

use crate::{BatchConfig, BatchError, ReferenceKinetics, summarize};

impl From<BatchError> for PyErr {
    fn from(err: BatchError) -> Self {
        PyValueError::new_err(err.to_string())
    }
}

/// Advances `inputs` in place and returns `([(T, P), ...], failed_indices)`.
#[pyfunction(name = "run", signature = (
    inputs,
    n_points,
    species_count,
    dt,
    t_criteria,
    rtol,
    atol,
    mechanism,
    n_threads=None
))]
#[allow(clippy::too_many_arguments)]
fn run_batch(
    py: Python<'_>,
    mut inputs: PyReadwriteArray1<'_, f64>,
    n_points: usize,
    species_count: usize,
    dt: f64,
    t_criteria: f64,
    rtol: f64,
    atol: f64,
    mechanism: &str,
    n_threads: Option<usize>,
) -> PyResult<(Vec<(f64, f64)>, Vec<usize>)> {
    let mut config = BatchConfig::new(mechanism, dt)
        .with_threshold(t_criteria)
        .with_tolerances(rtol, atol);
    if let Some(n) = n_threads {
        config = config.with_threads(n);
    }
    let buffer = inputs
        .as_slice_mut()
        .map_err(|_| PyValueError::new_err("inputs must be a contiguous float64 array"))?;
    let loader = ReferenceKinetics::default();
    let report = py.detach(|| crate::run(&loader, &mut *buffer, n_points, species_count, &config))?;
    let summary = summarize(buffer, n_points, species_count)?
        .into_iter()
        .map(|point| (point.temperature, point.pressure))
        .collect();
    Ok((summary, report.failed_indices()))
}

#[pymodule]
fn ignition_batch(_py: Python<'_>, module: &Bound<'_, PyModule>) -> PyResult<()> {
    module.add_function(wrap_pyfunction!(run_batch, module)?)?;
    Ok(())
}
