//! Positive/negative item-set constraints with item-level preprocessing.

use crate::error::CoreError;
use crate::item::{ItemCatalog, ItemId, ItemName};
use rustc_hash::FxHashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemConstraintType {
    /// The itemset must intersect the group.
    Positive,
    /// The itemset must be disjoint from the group.
    Negative,
}

#[derive(Debug, Clone, Default)]
struct ConstraintGroup {
    names: FxHashSet<ItemName>,
    /// Materialized ids, grown as items get interned (`preprocess_item`).
    ids: FxHashSet<ItemId>,
}

impl ConstraintGroup {
    fn intersects(&self, itemset: &[ItemId]) -> bool {
        itemset.iter().any(|id| self.ids.contains(id))
    }

    fn intersects_names(&self, names: &[ItemName]) -> bool {
        names.iter().any(|name| self.names.contains(name))
    }
}

/// A conjunction of constraint groups. An itemset matches iff every positive
/// group intersects it and every negative group is disjoint from it. Empty
/// constraints match everything.
#[derive(Debug, Clone, Default)]
pub struct Constraints {
    positive: Vec<ConstraintGroup>,
    negative: Vec<ConstraintGroup>,
}

impl Constraints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.positive.is_empty() && self.negative.is_empty()
    }

    pub fn reset(&mut self) {
        self.positive.clear();
        self.negative.clear();
    }

    /// Appends a constraint group. Fails on an empty group.
    pub fn add_item_constraint(
        &mut self,
        group: impl IntoIterator<Item = ItemName>,
        kind: ItemConstraintType,
    ) -> Result<(), CoreError> {
        let names: FxHashSet<ItemName> = group.into_iter().collect();
        if names.is_empty() {
            return Err(CoreError::InvalidConstraint);
        }
        let group = ConstraintGroup {
            names,
            ids: FxHashSet::default(),
        };
        match kind {
            ItemConstraintType::Positive => self.positive.push(group),
            ItemConstraintType::Negative => self.negative.push(group),
        }
        Ok(())
    }

    /// Records the id of a freshly interned item in every group that names
    /// it, enabling id-level matching.
    pub fn preprocess_item(&mut self, name: &str, id: ItemId) {
        for group in self.positive.iter_mut().chain(self.negative.iter_mut()) {
            if group.names.contains(name) {
                group.ids.insert(id);
            }
        }
    }

    /// Preprocesses every item already present in `catalog`. Used when
    /// constraints are installed after interning has begun.
    pub fn preprocess_catalog(&mut self, catalog: &ItemCatalog) {
        for (id, name) in catalog.entries() {
            self.preprocess_item(name, id);
        }
    }

    /// Id-level match: every positive group intersects `itemset`, every
    /// negative group is disjoint from it.
    pub fn match_itemset(&self, itemset: &[ItemId]) -> bool {
        self.positive.iter().all(|g| g.intersects(itemset))
            && !self.negative.iter().any(|g| g.intersects(itemset))
    }

    /// Name-level match, for callers that have not interned yet.
    pub fn match_item_names(&self, names: &[ItemName]) -> bool {
        self.positive.iter().all(|g| g.intersects_names(names))
            && !self.negative.iter().any(|g| g.intersects_names(names))
    }

    /// Whether a pattern-growth prefix can still grow into a matching
    /// itemset. Negative groups must already be disjoint from the prefix;
    /// positive groups may be satisfied by the prefix or by any of the
    /// still-reachable `candidates`.
    pub fn match_itemset_extensible(&self, itemset: &[ItemId], candidates: &[ItemId]) -> bool {
        if self.negative.iter().any(|g| g.intersects(itemset)) {
            return false;
        }
        self.positive
            .iter()
            .all(|g| g.intersects(itemset) || g.intersects(candidates))
    }
}
