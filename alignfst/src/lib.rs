//! Training core for joint grapheme-phoneme models.
//!
//! A pronunciation dictionary is aligned many-to-many by EM over per-pair
//! log-semiring lattices; the aligned corpus (or the pruned lattices
//! themselves) then feed an external joint n-gram estimator, whose output
//! model the companion `phonetize` crate decodes with.

pub mod aligner;
pub mod corpus;
pub mod error;
pub mod pathfinder;
pub mod pruner;
pub mod semiring;
pub mod symbols;

pub use aligner::{AlignerConfig, M2MFstAligner};
pub use error::G2pError;
pub use pathfinder::{FstPathFinder, PathData};
pub use pruner::LatticePruner;
pub use symbols::SymbolConfig;
