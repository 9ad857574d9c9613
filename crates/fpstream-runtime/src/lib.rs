//! fpstream-runtime - streaming frequent-pattern mining engine
//!
//! This crate implements the FP-Stream pipeline: per-batch FP-Trees mined
//! with FP-Growth, a Pattern Tree of tilted time windows preserving
//! multi-resolution pattern history, tail-drop pruning of decayed patterns,
//! and association-rule mining over arbitrary bucket ranges of that history.

pub mod analyst;
pub mod batch;
pub mod engine;
pub mod fpgrowth;
pub mod fptree;
pub mod pattern_tree;
pub mod persistence;
pub mod rules;

use indexmap::IndexMap;
use rustc_hash::FxBuildHasher;

/// Type alias for IndexMap with FxBuildHasher: insertion-ordered iteration
/// with fast hashing, used for child maps and header tables.
pub type FxIndexMap<K, V> = IndexMap<K, V, FxBuildHasher>;

pub use analyst::{Analyst, AnalystEvent};
pub use batch::{Batch, BatchMetadata, RawTransaction};
pub use engine::{BatchOutcome, EngineConfig, FpStream, TailTieBreak};
pub use fpgrowth::{FpGrowth, PatternSink};
pub use fptree::FpTree;
pub use pattern_tree::PatternTree;
pub use persistence::StoreError;
pub use rules::{AssociationRule, ComparedRule, RuleSetComparison};
