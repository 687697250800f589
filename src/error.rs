//! Error types shared across the sampler.

use rand_distr::GammaError;

use crate::tree::TreeError;

/// Errors raised while configuring or running the sampler.
#[derive(Debug, thiserror::Error)]
pub enum DrBartError {
    /// A precision-tree update produced a non-finite fitted value. The chain
    /// cannot continue past this point.
    #[error("non-finite precision fit at observation {observation} after updating tree {tree}")]
    #[allow(missing_docs)]
    NonFiniteFit { tree: usize, observation: usize },
    /// A setting is out of its valid range.
    #[error("invalid settings: {0}")]
    InvalidSettings(String),
    /// Input arrays disagree in size.
    #[error("dimension mismatch for {field}: expected {expected}, got {actual}")]
    #[allow(missing_docs)]
    DimensionMismatch {
        field: &'static str,
        expected: usize,
        actual: usize,
    },
    /// A covariate was given no thresholds.
    #[error("covariate {covariate} has no cutpoints")]
    #[allow(missing_docs)]
    EmptyCutpoints { covariate: usize },
    /// A threshold is NaN or infinite.
    #[error("covariate {covariate} has a non-finite cutpoint")]
    #[allow(missing_docs)]
    InvalidCutpoint { covariate: usize },
    /// Structural misuse of a tree or a malformed snapshot.
    #[error(transparent)]
    Tree(#[from] TreeError),
    /// Gamma leaf parameters were not positive and finite.
    #[error("invalid gamma parameters: {0}")]
    Gamma(#[from] GammaError),
    /// Settings JSON could not be read.
    #[error("failed to parse settings: {0}")]
    Settings(#[from] serde_json::Error),
}
