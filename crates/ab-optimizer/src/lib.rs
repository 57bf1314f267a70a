//! # ab-optimizer
//!
//! Optimizer family for the benchmark-driven configuration search loop:
//! configuration-space projection, an optional dimensionality-reducing
//! space adapter, a homogeneous random forest surrogate, acquisition
//! functions, candidate sub-optimizers, a Pareto frontier, and the three
//! concrete optimizers (Random, Grid, Bayesian) that implement the
//! shared `Optimizer` trait.

mod acquisition;
mod bayesian;
mod candidates;
mod config_space;
mod error;
mod forest;
mod grid;
mod optimizer;
mod pareto;
mod random;
mod space_adapter;

pub use acquisition::{probability_of_pareto_improvement, upper_confidence_bound_on_improvement};
pub use bayesian::{BayesianConfig, BayesianOptimizer};
pub use candidates::{CandidateSubOptimizer, GlowWormSwarmSubOptimizer, RandomNearIncumbentSubOptimizer, RandomSearchSubOptimizer};
pub use config_space::ConfigurationSpace;
pub use error::{OptResult, OptimizerError};
pub use forest::{ForestConfig, HomogeneousRandomForest, Prediction};
pub use grid::GridOptimizer;
pub use optimizer::Optimizer;
pub use pareto::{ParetoFrontier, VolumeEstimator};
pub use random::RandomOptimizer;
pub use space_adapter::{IdentityAdapter, LlamaTuneAdapter, SpaceAdapter};
