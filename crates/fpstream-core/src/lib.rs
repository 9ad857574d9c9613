//! fpstream-core - vocabulary types for the fpstream mining engine
//!
//! This crate provides the foundational types shared by every layer of the
//! engine: interned items, tilted time windows and their definitions, and
//! item-set constraints.

pub mod constraints;
pub mod error;
pub mod item;
pub mod ttw;
pub mod ttw_def;

pub use constraints::{Constraints, ItemConstraintType};
pub use error::CoreError;
pub use item::{FrequentItemset, ItemCatalog, ItemId, ItemIdList, ItemName, SupportCount, ROOT_ITEM_ID};
pub use ttw::{TiltedTimeWindow, UNUSED};
pub use ttw_def::{Bucket, Granularity, TtwDefinition};
