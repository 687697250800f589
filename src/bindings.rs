//! Python entry points, built with the `python` feature.
#![allow(non_snake_case)]

use numpy::{PyArray1, PyArrayMethods, PyReadonlyArray1, PyReadonlyArray2};
use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;

use crate::cutpoints::CutpointGrid;
use crate::data::ExternalData;
use crate::drbart::{DrBartSettings, DrBartState};
use crate::error::DrBartError;

fn to_py(err: DrBartError) -> PyErr {
    PyValueError::new_err(err.to_string())
}

/// `StateWrapper` wraps around `DrBartState` to hold the state of the
/// sampler together with its random number generator.
///
/// This class is `unsendable`, i.e., it cannot be sent across threads safely.
#[pyclass(unsendable)]
struct StateWrapper {
    state: DrBartState,
    rng: Xoshiro256PlusPlus,
}

#[pyfunction]
#[allow(clippy::too_many_arguments)]
fn initialize(
    X: PyReadonlyArray2<f64>,
    X_precision: PyReadonlyArray2<f64>,
    y: PyReadonlyArray1<f64>,
    cutpoints: Vec<Vec<f64>>,
    precision_cutpoints: Vec<Vec<f64>>,
    truncated: Vec<bool>,
    offset: PyReadonlyArray1<f64>,
    settings: String,
    seed: u64,
) -> PyResult<StateWrapper> {
    let params = DrBartSettings::from_json(&settings).map_err(to_py)?;
    let grid = CutpointGrid::new(cutpoints).map_err(to_py)?;
    let precision_grid = CutpointGrid::new(precision_cutpoints).map_err(to_py)?;

    let data = ExternalData::new(
        y.to_owned_array(),
        X.to_owned_array(),
        X_precision.to_owned_array(),
        grid,
        precision_grid,
    )
    .and_then(|data| data.with_truncation(truncated))
    .and_then(|data| data.with_offset(offset.to_owned_array()))
    .map_err(to_py)?;

    let state = DrBartState::new(params, data).map_err(to_py)?;

    Ok(StateWrapper {
        state,
        rng: Xoshiro256PlusPlus::seed_from_u64(seed),
    })
}

#[pyfunction]
fn step<'py>(
    py: Python<'py>,
    wrapper: &mut StateWrapper,
) -> PyResult<(
    Bound<'py, PyArray1<f64>>,
    Bound<'py, PyArray1<f64>>,
    Bound<'py, PyArray1<f64>>,
)> {
    let StateWrapper { state, rng } = wrapper;
    state.step(rng).map_err(to_py)?;

    let mean = PyArray1::from_array_bound(py, &state.mean_fit().view());
    let precision = PyArray1::from_array_bound(py, &state.precision_fit().view());
    let latent = PyArray1::from_array_bound(py, &state.latent());

    Ok((mean, precision, latent))
}

#[pyfunction]
fn draw(wrapper: &StateWrapper) -> PyResult<String> {
    serde_json::to_string(&wrapper.state.draw())
        .map_err(|e| PyValueError::new_err(e.to_string()))
}

#[pymodule]
fn drbart(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(initialize, m)?)?;
    m.add_function(wrap_pyfunction!(step, m)?)?;
    m.add_function(wrap_pyfunction!(draw, m)?)?;

    Ok(())
}
