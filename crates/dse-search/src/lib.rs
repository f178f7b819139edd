//! # dse-search
//!
//! Search algorithms that walk a design space and hand out batches of design
//! points, receiving the results of each batch before producing the next.

mod algorithm;
mod exhaustive;
mod factory;

pub use algorithm::{PointMutator, SearchAlgorithm};
pub use exhaustive::ExhaustiveSearch;
pub use factory::{create_algorithm, AlgorithmConfig, ExhaustiveConfig};
