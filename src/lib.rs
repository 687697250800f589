//   Copyright 2024 The PyMC Developers
//
//   Licensed under the Apache License, Version 2.0 (the "License");
//   you may not use this file except in compliance with the License.
//   You may obtain a copy of the License at
//
//       http://www.apache.org/licenses/LICENSE-2.0
//
//   Unless required by applicable law or agreed to in writing, software
//   distributed under the License is distributed on an "AS IS" BASIS,
//   WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//   See the License for the specific language governing permissions and
//   limitations under the License.
#![warn(missing_docs)]

//! drbart provides a density-regression variant of Bayesian Additive
//! Regression Trees (BART). An additive ensemble of trees models the
//! conditional mean of the response and a multiplicative ensemble models
//! its conditional precision. Both ensembles may split on a latent,
//! per-observation mixing covariate, which turns the location-scale model
//! into a flexible conditional density.
//!
//! Inference is a single-chain MCMC sampler: trees are updated one at a
//! time by birth/death Metropolis-Hastings proposals with conjugate leaf
//! draws (backfitting), and the latent covariate is updated by slice
//! sampling under a leaf-occupancy constraint.

pub mod backfit;
pub mod cutpoints;
pub mod data;
pub mod drbart;
pub mod error;
pub mod latent;
pub mod math;
pub mod ops;
pub mod proposal;
pub mod slice;
pub mod snapshot;
pub mod stats;
pub mod tree;

#[cfg(feature = "python")]
mod bindings;

pub use crate::drbart::{DrBartSettings, DrBartState};
pub use crate::error::DrBartError;
