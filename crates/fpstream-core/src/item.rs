//! Interned items and the per-engine item catalog.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Interned item identifier. Id 0 is reserved for tree roots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub u32);

/// Sentinel id carried by the root node of FP-Trees and the Pattern Tree.
pub const ROOT_ITEM_ID: ItemId = ItemId(0);

/// Item name, shared cheaply across transactions and constraint groups.
pub type ItemName = Arc<str>;

/// A list of item ids; sorted ascending when used as a canonical itemset.
pub type ItemIdList = Vec<ItemId>;

/// Number of transactions (or events) supporting an item or itemset.
pub type SupportCount = u64;

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// An itemset together with its support.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrequentItemset {
    /// Item ids, sorted ascending.
    pub items: ItemIdList,
    pub support: SupportCount,
}

impl FrequentItemset {
    pub fn new(mut items: ItemIdList, support: SupportCount) -> Self {
        items.sort_unstable();
        Self { items, support }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl fmt::Display for FrequentItemset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, item) in self.items.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", item)?;
        }
        write!(f, "}}:{}", self.support)
    }
}

/// Bidirectional item interner owned by one engine instance.
///
/// Ids are handed out sequentially starting at 1 and are never reused or
/// renumbered. Multiple engines in one process each own their catalog.
#[derive(Debug, Clone, Default)]
pub struct ItemCatalog {
    names: Vec<ItemName>,
    ids: FxHashMap<ItemName, ItemId>,
}

impl ItemCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Interns `name`, returning its id and whether it was newly added.
    pub fn intern(&mut self, name: &str) -> (ItemId, bool) {
        if let Some(&id) = self.ids.get(name) {
            return (id, false);
        }
        let shared: ItemName = Arc::from(name);
        let id = ItemId(self.names.len() as u32 + 1);
        self.names.push(shared.clone());
        self.ids.insert(shared, id);
        (id, true)
    }

    pub fn id_of(&self, name: &str) -> Option<ItemId> {
        self.ids.get(name).copied()
    }

    pub fn name_of(&self, id: ItemId) -> Option<&ItemName> {
        if id == ROOT_ITEM_ID {
            return None;
        }
        self.names.get(id.0 as usize - 1)
    }

    /// Translates an itemset back to names. `None` if any id is unknown.
    pub fn names_for(&self, itemset: &[ItemId]) -> Option<Vec<ItemName>> {
        itemset
            .iter()
            .map(|&id| self.name_of(id).cloned())
            .collect()
    }

    /// All interned `(id, name)` pairs, in interning order.
    pub fn entries(&self) -> impl Iterator<Item = (ItemId, &ItemName)> {
        self.names
            .iter()
            .enumerate()
            .map(|(i, name)| (ItemId(i as u32 + 1), name))
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
