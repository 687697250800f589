//! Container for the data handed to the sampler by its caller.
#![allow(non_snake_case)]

use ndarray::{Array1, Array2};

use crate::cutpoints::CutpointGrid;
use crate::error::DrBartError;

/// Responses, covariates and cutpoint grids of one model fit.
///
/// Column 0 of both covariate matrices holds the latent covariate; its
/// values are the starting state of the chain.
#[derive(Debug, Clone)]
pub struct ExternalData {
    /// Response vector.
    pub y: Array1<f64>,
    /// Covariates for the mean ensemble.
    pub X: Array2<f64>,
    /// Covariates for the precision ensemble.
    pub X_precision: Array2<f64>,
    /// Cutpoints for the columns of `X`.
    pub grid: CutpointGrid,
    /// Cutpoints for the columns of `X_precision`.
    pub precision_grid: CutpointGrid,
    /// Marks responses that are only known to lie above the observed value.
    pub truncated: Vec<bool>,
    /// Per-observation precision multiplier.
    pub offset: Array1<f64>,
}

impl ExternalData {
    /// Creates a new `ExternalData`, checking that every array agrees on the
    /// number of observations and that each grid covers its matrix.
    pub fn new(
        y: Array1<f64>,
        X: Array2<f64>,
        X_precision: Array2<f64>,
        grid: CutpointGrid,
        precision_grid: CutpointGrid,
    ) -> Result<Self, DrBartError> {
        let n = y.len();
        if n == 0 {
            return Err(DrBartError::InvalidSettings(
                "at least one observation is required".to_string(),
            ));
        }
        if let Some(i) = y.iter().position(|v| !v.is_finite()) {
            return Err(DrBartError::InvalidSettings(format!(
                "response {i} is not finite"
            )));
        }
        check_len("X rows", n, X.nrows())?;
        check_len("X_precision rows", n, X_precision.nrows())?;
        check_len("grid covariates", X.ncols(), grid.n_covariates())?;
        check_len(
            "precision grid covariates",
            X_precision.ncols(),
            precision_grid.n_covariates(),
        )?;
        if X.ncols() == 0 || X_precision.ncols() == 0 {
            return Err(DrBartError::InvalidSettings(
                "both covariate matrices need the latent column".to_string(),
            ));
        }

        Ok(Self {
            y,
            X,
            X_precision,
            grid,
            precision_grid,
            truncated: vec![false; n],
            offset: Array1::ones(n),
        })
    }

    /// Marks the responses that are truncated from below.
    pub fn with_truncation(mut self, truncated: Vec<bool>) -> Result<Self, DrBartError> {
        check_len("truncated", self.n(), truncated.len())?;
        self.truncated = truncated;
        Ok(self)
    }

    /// Sets the per-observation precision multiplier.
    pub fn with_offset(mut self, offset: Array1<f64>) -> Result<Self, DrBartError> {
        check_len("offset", self.n(), offset.len())?;
        if let Some(i) = offset.iter().position(|&v| !(v.is_finite() && v > 0.0)) {
            return Err(DrBartError::InvalidSettings(format!(
                "offset {i} must be positive and finite"
            )));
        }
        self.offset = offset;
        Ok(self)
    }

    /// Number of observations.
    pub fn n(&self) -> usize {
        self.y.len()
    }
}

fn check_len(field: &'static str, expected: usize, actual: usize) -> Result<(), DrBartError> {
    if expected != actual {
        return Err(DrBartError::DimensionMismatch {
            field,
            expected,
            actual,
        });
    }
    Ok(())
}
