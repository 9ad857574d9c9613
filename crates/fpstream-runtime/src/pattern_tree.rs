//! Pattern Tree: a prefix tree of frequent patterns, each node carrying a
//! tilted time window of the pattern's support history.
//!
//! Ownership is parent-owns-children; traversals carry the prefix instead
//! of chasing parent pointers.

use crate::FxIndexMap;
use fpstream_core::{
    Bucket, Constraints, FrequentItemset, Granularity, ItemId, SupportCount, TiltedTimeWindow,
    TtwDefinition, ROOT_ITEM_ID,
};
use std::sync::Arc;
use tracing::trace;

#[derive(Debug)]
pub struct PatternNode {
    item: ItemId,
    window: TiltedTimeWindow,
    children: FxIndexMap<ItemId, PatternNode>,
    /// Process-unique debug id, assigned in creation order.
    node_id: u64,
}

impl PatternNode {
    pub fn item(&self) -> ItemId {
        self.item
    }

    pub fn window(&self) -> &TiltedTimeWindow {
        &self.window
    }

    pub fn node_id(&self) -> u64 {
        self.node_id
    }

    fn descendants(&self) -> usize {
        self.children
            .values()
            .map(|child| 1 + child.descendants())
            .sum()
    }
}

/// Prefix tree of `(itemset, TiltedTimeWindow)`. `current_quarter` is the
/// index of the batch slot the next `add_pattern` call writes into; sparse
/// patterns are zero back-filled up to it on demand.
#[derive(Debug)]
pub struct PatternTree {
    root: PatternNode,
    def: Arc<TtwDefinition>,
    node_count: usize,
    current_quarter: u32,
    next_node_id: u64,
}

impl PatternTree {
    pub fn new(def: Arc<TtwDefinition>) -> Self {
        let root = PatternNode {
            item: ROOT_ITEM_ID,
            window: TiltedTimeWindow::new(def.clone()),
            children: FxIndexMap::default(),
            node_id: 0,
        };
        Self {
            root,
            def,
            node_count: 0,
            current_quarter: 0,
            next_node_id: 1,
        }
    }

    pub fn definition(&self) -> &Arc<TtwDefinition> {
        &self.def
    }

    /// Count of non-root nodes.
    pub fn node_count(&self) -> usize {
        self.node_count
    }

    pub fn current_quarter(&self) -> u32 {
        self.current_quarter
    }

    pub(crate) fn set_current_quarter(&mut self, quarter: u32) {
        self.current_quarter = quarter;
    }

    /// Advances to the next batch slot. No per-node mutation happens here;
    /// the next `add_pattern` touching a pattern back-fills zeros. The slot
    /// index wraps at granularity 0's capacity, matching the cycle at which
    /// windows cascade their finest granularity.
    pub fn next_quarter(&mut self) {
        self.current_quarter = (self.current_quarter + 1) % self.def.capacity_of(0);
    }

    /// Records `support` for `itemset` at the current quarter, creating the
    /// path as needed and zero-filling quarters the pattern missed.
    pub fn add_pattern(&mut self, itemset: &[ItemId], support: SupportCount, update_id: u32) {
        let mut node = &mut self.root;
        for &item in itemset {
            // Two-phase borrow dance: create first, then descend.
            if !node.children.contains_key(&item) {
                let child = PatternNode {
                    item,
                    window: TiltedTimeWindow::new(self.def.clone()),
                    children: FxIndexMap::default(),
                    node_id: self.next_node_id,
                };
                self.next_node_id += 1;
                self.node_count += 1;
                node.children.insert(item, child);
            }
            node = node.children.get_mut(&item).unwrap();
        }

        let window = &mut node.window;
        // Bring the quarters in sync before appending the real support.
        for _ in window.usage_of(0)..self.current_quarter {
            window.append(0, 0);
        }
        window.append(support, update_id);
        trace!(pattern = ?itemset, support, update_id, "pattern updated");
    }

    /// Exact lookup of a pattern's support history.
    pub fn get_pattern_support(&self, itemset: &[ItemId]) -> Option<&TiltedTimeWindow> {
        let mut node = &self.root;
        for item in itemset {
            node = node.children.get(item)?;
        }
        Some(&node.window)
    }

    pub(crate) fn get_pattern_support_mut(
        &mut self,
        itemset: &[ItemId],
    ) -> Option<&mut TiltedTimeWindow> {
        let mut node = &mut self.root;
        for item in itemset {
            node = node.children.get_mut(item)?;
        }
        Some(&mut node.window)
    }

    /// Frequent itemsets whose support over buckets `[from, to]` exceeds
    /// `min_support` and which match `constraints`, in depth-first order.
    pub fn get_frequent_itemsets_for_range(
        &self,
        min_support: SupportCount,
        constraints: &Constraints,
        from: Bucket,
        to: Bucket,
    ) -> Vec<FrequentItemset> {
        let mut found = Vec::new();
        let mut prefix = Vec::new();
        for child in self.root.children.values() {
            Self::collect_frequent(child, min_support, constraints, from, to, &mut prefix, &mut found);
        }
        found
    }

    fn collect_frequent(
        node: &PatternNode,
        min_support: SupportCount,
        constraints: &Constraints,
        from: Bucket,
        to: Bucket,
        prefix: &mut Vec<ItemId>,
        found: &mut Vec<FrequentItemset>,
    ) {
        prefix.push(node.item);
        let support = node.window.get_support_for_range(from, to);
        if support > min_support && constraints.match_itemset(prefix) {
            found.push(FrequentItemset::new(prefix.clone(), support));
        }
        for child in node.children.values() {
            Self::collect_frequent(child, min_support, constraints, from, to, prefix, found);
        }
        prefix.pop();
    }

    /// Total range-support of the patterns matching `constraints`.
    ///
    /// A node contributes its support when a descendant already matched, or
    /// failing that, when it matches on its own. A subtree whose descendants
    /// are all filtered out by a negative constraint can this way still
    /// contribute the support of its (matching) root.
    pub fn get_total_support_for_range(
        &self,
        constraints: &Constraints,
        from: Bucket,
        to: Bucket,
    ) -> SupportCount {
        let mut total = 0;
        let mut prefix = Vec::new();
        for child in self.root.children.values() {
            Self::total_support(child, constraints, from, to, &mut prefix, &mut total);
        }
        total
    }

    fn total_support(
        node: &PatternNode,
        constraints: &Constraints,
        from: Bucket,
        to: Bucket,
        prefix: &mut Vec<ItemId>,
        total: &mut SupportCount,
    ) -> bool {
        prefix.push(node.item);
        let mut matches = false;
        for child in node.children.values() {
            matches |= Self::total_support(child, constraints, from, to, prefix, total);
        }
        if !matches || node.children.is_empty() {
            matches = constraints.match_itemset(prefix);
        }
        if matches {
            *total += node.window.get_support_for_range(from, to);
        }
        prefix.pop();
        matches
    }

    /// Applies tail-drop pruning across the whole tree.
    ///
    /// `sweep` gets mutable access to each node's window (the engine uses
    /// this to zero-sync windows the batch did not touch) and names the
    /// granularity from which the tail should be dropped, or `None` to keep
    /// the window intact. Subtrees whose windows end up empty are detached;
    /// the number of removed nodes is returned.
    pub fn prune_tails<F>(&mut self, mut sweep: F) -> usize
    where
        F: FnMut(&mut TiltedTimeWindow) -> Option<Granularity>,
    {
        let before = self.node_count;
        let mut removed = 0;
        Self::prune_node(&mut self.root, &mut sweep, &mut removed);
        self.node_count -= removed;
        trace!(before, removed, "tail-drop sweep finished");
        removed
    }

    fn prune_node<F>(node: &mut PatternNode, sweep: &mut F, removed: &mut usize)
    where
        F: FnMut(&mut TiltedTimeWindow) -> Option<Granularity>,
    {
        let mut empty_children: Vec<ItemId> = Vec::new();
        for (&item, child) in node.children.iter_mut() {
            Self::prune_node(child, sweep, removed);
            if let Some(g) = sweep(&mut child.window) {
                child.window.drop_tail(g);
            }
            if child.window.is_empty() && child.children.is_empty() {
                empty_children.push(item);
            }
        }
        for item in empty_children {
            node.children.shift_remove(&item);
            *removed += 1;
        }
    }

    /// Visits every pattern in depth-first order, for serialization.
    pub fn visit_patterns<F>(&self, mut visit: F)
    where
        F: FnMut(&[ItemId], &TiltedTimeWindow),
    {
        let mut prefix = Vec::new();
        for child in self.root.children.values() {
            Self::visit_node(child, &mut prefix, &mut visit);
        }
    }

    fn visit_node<F>(node: &PatternNode, prefix: &mut Vec<ItemId>, visit: &mut F)
    where
        F: FnMut(&[ItemId], &TiltedTimeWindow),
    {
        prefix.push(node.item);
        visit(prefix, &node.window);
        for child in node.children.values() {
            Self::visit_node(child, prefix, visit);
        }
        prefix.pop();
    }

    #[cfg(test)]
    pub(crate) fn root(&self) -> &PatternNode {
        &self.root
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fpstream_core::{ItemConstraintType, ItemName, UNUSED};

    fn ids(raw: &[u32]) -> Vec<ItemId> {
        raw.iter().map(|&i| ItemId(i)).collect()
    }

    fn quarters_def() -> Arc<TtwDefinition> {
        Arc::new(TtwDefinition::parse("900:QQQQHH").unwrap())
    }

    /// The three-pattern tree used by most assertions below:
    /// {1,2,3}:1 at update 1, {1,2}:2 at updates 1 and 2, {1,4}:5 at 1.
    fn basic_tree() -> PatternTree {
        let mut tree = PatternTree::new(quarters_def());
        tree.add_pattern(&ids(&[1, 2, 3]), 1, 1);
        tree.add_pattern(&ids(&[1, 2]), 2, 1);
        tree.add_pattern(&ids(&[1, 2]), 2, 2);
        tree.add_pattern(&ids(&[1, 4]), 5, 1);
        tree
    }

    fn constraints(positive: &[(&str, u32)], negative: &[(&str, u32)]) -> Constraints {
        let mut c = Constraints::new();
        for &(name, id) in positive {
            c.add_item_constraint(vec![ItemName::from(name)], ItemConstraintType::Positive)
                .unwrap();
            c.preprocess_item(name, ItemId(id));
        }
        for &(name, id) in negative {
            c.add_item_constraint(vec![ItemName::from(name)], ItemConstraintType::Negative)
                .unwrap();
            c.preprocess_item(name, ItemId(id));
        }
        c
    }

    #[test]
    fn add_pattern_builds_shared_prefix_paths() {
        let tree = basic_tree();
        assert_eq!(tree.node_count(), 4);

        // Interior nodes exist but carry no support of their own.
        let interior = tree.get_pattern_support(&ids(&[1])).unwrap();
        assert!(interior.is_empty());
        assert_eq!(interior.last_update(), 0);

        let window = tree.get_pattern_support(&ids(&[1, 2])).unwrap();
        assert_eq!(window.get_buckets(2), vec![2, 2]);
        assert_eq!(window.last_update(), 2);

        let window = tree.get_pattern_support(&ids(&[1, 2, 3])).unwrap();
        assert_eq!(window.get_buckets(1), vec![1]);
        let window = tree.get_pattern_support(&ids(&[1, 4])).unwrap();
        assert_eq!(window.get_buckets(1), vec![5]);

        assert!(tree.get_pattern_support(&ids(&[2])).is_none());
        assert!(tree.get_pattern_support(&ids(&[1, 3])).is_none());
    }

    #[test]
    fn node_ids_follow_creation_order() {
        let tree = basic_tree();
        assert_eq!(tree.root().node_id(), 0);
        let node_1 = tree.root().children.get(&ItemId(1)).unwrap();
        assert_eq!(node_1.node_id(), 1);
        let node_12 = node_1.children.get(&ItemId(2)).unwrap();
        assert_eq!(node_12.node_id(), 2);
        let node_123 = node_12.children.get(&ItemId(3)).unwrap();
        assert_eq!(node_123.node_id(), 3);
        let node_14 = node_1.children.get(&ItemId(4)).unwrap();
        assert_eq!(node_14.node_id(), 4);
    }

    #[test]
    fn frequent_itemsets_for_range_in_depth_first_order() {
        let tree = basic_tree();
        let last = tree.definition().num_buckets() - 1;
        let none = Constraints::new();

        let expected = vec![
            FrequentItemset::new(ids(&[1, 2]), 4),
            FrequentItemset::new(ids(&[1, 2, 3]), 1),
            FrequentItemset::new(ids(&[1, 4]), 5),
        ];
        assert_eq!(tree.get_frequent_itemsets_for_range(0, &none, 0, last), expected);

        // Only the first bucket.
        let expected = vec![
            FrequentItemset::new(ids(&[1, 2]), 2),
            FrequentItemset::new(ids(&[1, 2, 3]), 1),
            FrequentItemset::new(ids(&[1, 4]), 5),
        ];
        assert_eq!(tree.get_frequent_itemsets_for_range(0, &none, 0, 0), expected);

        // Only the second bucket: just {1,2} appeared twice.
        let expected = vec![FrequentItemset::new(ids(&[1, 2]), 2)];
        assert_eq!(tree.get_frequent_itemsets_for_range(0, &none, 1, 1), expected);
    }

    #[test]
    fn frequent_itemsets_honor_constraints() {
        let tree = basic_tree();
        let last = tree.definition().num_buckets() - 1;

        let positive = constraints(&[("<2>", 2)], &[]);
        let expected = vec![
            FrequentItemset::new(ids(&[1, 2]), 4),
            FrequentItemset::new(ids(&[1, 2, 3]), 1),
        ];
        assert_eq!(
            tree.get_frequent_itemsets_for_range(0, &positive, 0, last),
            expected
        );

        let both = constraints(&[("<2>", 2)], &[("<3>", 3)]);
        let expected = vec![FrequentItemset::new(ids(&[1, 2]), 4)];
        assert_eq!(
            tree.get_frequent_itemsets_for_range(0, &both, 0, last),
            expected
        );
    }

    #[test]
    fn total_support_for_range() {
        let tree = basic_tree();
        let last = tree.definition().num_buckets() - 1;
        let none = Constraints::new();

        assert_eq!(tree.get_total_support_for_range(&none, 0, last), 10);
        assert_eq!(tree.get_total_support_for_range(&none, 0, 0), 8);
        assert_eq!(tree.get_total_support_for_range(&none, 1, 1), 2);

        let positive = constraints(&[("<2>", 2)], &[]);
        assert_eq!(tree.get_total_support_for_range(&positive, 0, last), 5);

        let both = constraints(&[("<2>", 2)], &[("<3>", 3)]);
        assert_eq!(tree.get_total_support_for_range(&both, 0, last), 4);
    }

    #[test]
    fn sparse_patterns_are_zero_back_filled() {
        let mut tree = PatternTree::new(quarters_def());
        tree.add_pattern(&ids(&[1, 2, 3]), 1, 1);
        tree.next_quarter();
        tree.add_pattern(&ids(&[1, 2, 3]), 1, 2);
        tree.add_pattern(&ids(&[4, 5]), 2, 2);

        let window = tree.get_pattern_support(&ids(&[4, 5])).unwrap();
        assert_eq!(window.get_buckets(2), vec![2, 0]);
        assert_eq!(window.usage_of(0), tree.current_quarter() + 1);

        let window = tree.get_pattern_support(&ids(&[1, 2, 3])).unwrap();
        assert_eq!(window.get_buckets(2), vec![1, 1]);
    }

    #[test]
    fn chunked_appends_fold_into_the_same_quarter() {
        let mut tree = PatternTree::new(quarters_def());
        tree.add_pattern(&ids(&[1, 2]), 2, 1);
        tree.add_pattern(&ids(&[1, 2]), 3, 1);
        let window = tree.get_pattern_support(&ids(&[1, 2])).unwrap();
        assert_eq!(window.get_buckets(2), vec![5, UNUSED]);
    }

    #[test]
    fn prune_tails_detaches_empty_subtrees() {
        let mut tree = basic_tree();
        assert_eq!(tree.node_count(), 4);

        // Drop everything: all windows empty out, the whole tree goes.
        let removed = tree.prune_tails(|_| Some(0));
        assert_eq!(removed, 4);
        assert_eq!(tree.node_count(), 0);
        assert!(tree.get_pattern_support(&ids(&[1])).is_none());
    }

    #[test]
    fn prune_tails_keeps_prefixes_of_surviving_patterns() {
        let mut tree = basic_tree();

        // Drop only the {1,4} branch.
        let target = tree.get_pattern_support(&ids(&[1, 4])).unwrap().clone();
        let removed = tree.prune_tails(|w| if *w == target { Some(0) } else { None });
        assert_eq!(removed, 1);
        assert_eq!(tree.node_count(), 3);
        assert!(tree.get_pattern_support(&ids(&[1, 4])).is_none());
        assert!(tree.get_pattern_support(&ids(&[1, 2, 3])).is_some());
        // {1} stays: it anchors the surviving {1,2} subtree.
        assert!(tree.get_pattern_support(&ids(&[1])).is_some());
    }

    #[test]
    fn visit_patterns_walks_depth_first() {
        let tree = basic_tree();
        let mut seen = Vec::new();
        tree.visit_patterns(|pattern, _| seen.push(pattern.to_vec()));
        assert_eq!(
            seen,
            vec![ids(&[1]), ids(&[1, 2]), ids(&[1, 2, 3]), ids(&[1, 4])]
        );
    }
}
