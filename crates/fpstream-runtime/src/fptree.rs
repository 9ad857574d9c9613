//! Per-batch FP-Tree: a prefix tree of transactions with a header table.
//!
//! Nodes live in an arena (`Vec`), with indices playing the role of the
//! parent, child, and header-sibling pointers. A tree lives for one batch
//! (or one FP-Growth conditional subproblem) and is then discarded.

use crate::FxIndexMap;
use fpstream_core::{ItemId, ItemIdList, SupportCount, ROOT_ITEM_ID};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

pub type NodeId = usize;

const ROOT: NodeId = 0;

/// A short item path, stack-allocated in the common case.
pub type ItemPath = SmallVec<[ItemId; 8]>;

#[derive(Debug)]
struct FpNode {
    item: ItemId,
    support: SupportCount,
    children: FxIndexMap<ItemId, NodeId>,
    parent: Option<NodeId>,
    /// Threads all nodes carrying the same item into the header table's
    /// sibling list.
    next_sibling: Option<NodeId>,
}

#[derive(Debug, Clone)]
pub struct HeaderEntry {
    /// Aggregate support of the item across the whole tree.
    pub support: SupportCount,
    head: Option<NodeId>,
}

/// Prefix tree over id lists, each list sorted by the batch's item ordering.
#[derive(Debug)]
pub struct FpTree {
    arena: Vec<FpNode>,
    header: FxIndexMap<ItemId, HeaderEntry>,
}

impl FpTree {
    pub fn new() -> Self {
        let root = FpNode {
            item: ROOT_ITEM_ID,
            support: 0,
            children: FxIndexMap::default(),
            parent: None,
            next_sibling: None,
        };
        Self {
            arena: vec![root],
            header: FxIndexMap::default(),
        }
    }

    /// Builds a tree from canonicalized transactions, pruning items whose
    /// support in `item_support` is below `min_support`. Transactions that
    /// are empty after pruning are rejected; the count of rejects is
    /// returned alongside the tree.
    pub fn from_transactions(
        transactions: &[ItemIdList],
        min_support: SupportCount,
        item_support: &FxHashMap<ItemId, SupportCount>,
    ) -> (Self, u64) {
        let mut tree = Self::new();
        let mut rejected = 0;
        let mut pruned: ItemPath = SmallVec::new();
        for transaction in transactions {
            pruned.clear();
            pruned.extend(
                transaction
                    .iter()
                    .filter(|id| item_support.get(id).copied().unwrap_or(0) >= min_support)
                    .copied(),
            );
            if pruned.is_empty() {
                rejected += 1;
                continue;
            }
            tree.insert(&pruned, 1);
        }
        (tree, rejected)
    }

    /// Inserts one path with the given multiplicity, creating nodes on
    /// demand and bumping supports along the way.
    pub fn insert(&mut self, path: &[ItemId], count: SupportCount) {
        let mut current = ROOT;
        for &item in path {
            let next = match self.arena[current].children.get(&item).copied() {
                Some(child) => {
                    self.arena[child].support += count;
                    child
                }
                None => {
                    let child = self.arena.len();
                    let sibling_head = match self.header.get(&item) {
                        Some(entry) => entry.head,
                        None => None,
                    };
                    self.arena.push(FpNode {
                        item,
                        support: count,
                        children: FxIndexMap::default(),
                        parent: Some(current),
                        next_sibling: sibling_head,
                    });
                    self.arena[current].children.insert(item, child);
                    self.header
                        .entry(item)
                        .or_insert(HeaderEntry {
                            support: 0,
                            head: None,
                        })
                        .head = Some(child);
                    child
                }
            };
            self.header
                .entry(item)
                .or_insert(HeaderEntry {
                    support: 0,
                    head: None,
                })
                .support += count;
            current = next;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.header.is_empty()
    }

    pub fn num_items(&self) -> usize {
        self.header.len()
    }

    pub fn item_support(&self, item: ItemId) -> SupportCount {
        self.header.get(&item).map(|e| e.support).unwrap_or(0)
    }

    /// Header items in ascending support order, ties broken by ascending
    /// item id. This is the (deterministic) FP-Growth iteration order.
    pub fn items_by_ascending_support(&self) -> Vec<ItemId> {
        let mut items: Vec<ItemId> = self.header.keys().copied().collect();
        items.sort_unstable_by_key(|&item| (self.item_support(item), item));
        items
    }

    /// All items present in the tree's header table.
    pub fn items(&self) -> impl Iterator<Item = ItemId> + '_ {
        self.header.keys().copied()
    }

    /// The prefix paths leading to every occurrence of `item`, with the
    /// occurrence's support as multiplicity. Paths are returned root-first.
    pub fn prefix_paths(&self, item: ItemId) -> Vec<(ItemPath, SupportCount)> {
        let mut paths = Vec::new();
        let mut node = self.header.get(&item).and_then(|e| e.head);
        while let Some(id) = node {
            let count = self.arena[id].support;
            let mut path: ItemPath = SmallVec::new();
            let mut cursor = self.arena[id].parent;
            while let Some(p) = cursor {
                if p == ROOT {
                    break;
                }
                path.push(self.arena[p].item);
                cursor = self.arena[p].parent;
            }
            path.reverse();
            if !path.is_empty() {
                paths.push((path, count));
            }
            node = self.arena[id].next_sibling;
        }
        paths
    }

    /// The conditional FP-Tree for `item`: its prefix paths re-inserted at
    /// their multiplicities, with sub-`min_support` items dropped.
    pub fn conditional_tree(&self, item: ItemId, min_support: SupportCount) -> FpTree {
        let paths = self.prefix_paths(item);

        let mut conditional_support: FxHashMap<ItemId, SupportCount> = FxHashMap::default();
        for (path, count) in &paths {
            for &path_item in path {
                *conditional_support.entry(path_item).or_insert(0) += count;
            }
        }

        let mut tree = FpTree::new();
        let mut pruned: ItemPath = SmallVec::new();
        for (path, count) in &paths {
            pruned.clear();
            pruned.extend(
                path.iter()
                    .filter(|id| conditional_support[id] >= min_support)
                    .copied(),
            );
            if !pruned.is_empty() {
                tree.insert(&pruned, *count);
            }
        }
        tree
    }
}

impl Default for FpTree {
    fn default() -> Self {
        Self::new()
    }
}
