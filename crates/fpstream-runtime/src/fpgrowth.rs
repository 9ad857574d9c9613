//! FP-Growth: frequent-itemset extraction from a per-batch FP-Tree.
//!
//! Emission is a visitor (`PatternSink`) driven synchronously: each frequent
//! itemset is reported as soon as its support is known, and `branch_completed`
//! fires when a suffix item's whole conditional subproblem has been mined,
//! giving the consumer a checkpoint boundary.

use crate::fptree::FpTree;
use fpstream_core::{Constraints, FrequentItemset, ItemIdList, SupportCount};
use tracing::debug;

/// Consumer of FP-Growth results.
pub trait PatternSink {
    /// A frequent itemset and whether it matches the full constraint set.
    /// Itemsets failing the constraints are still reported so the consumer
    /// can maintain ancestors of matching patterns.
    fn frequent_itemset(&mut self, itemset: &FrequentItemset, matches_constraints: bool);

    /// The conditional subproblem rooted at `itemset` is exhausted.
    fn branch_completed(&mut self, _itemset: &[fpstream_core::ItemId]) {}
}

/// One FP-Growth run at a fixed minimum support.
pub struct FpGrowth<'a> {
    min_support: SupportCount,
    constraints: &'a Constraints,
    /// Steers pruning during expansion: prefixes that can no longer satisfy
    /// these constraints are not grown.
    constraints_to_preprocess: &'a Constraints,
}

impl<'a> FpGrowth<'a> {
    pub fn new(
        min_support: SupportCount,
        constraints: &'a Constraints,
        constraints_to_preprocess: &'a Constraints,
    ) -> Self {
        Self {
            min_support,
            constraints,
            constraints_to_preprocess,
        }
    }

    /// Mines every frequent itemset of `tree` into `sink`.
    pub fn mine(&self, tree: &FpTree, sink: &mut dyn PatternSink) {
        debug!(
            items = tree.num_items(),
            min_support = self.min_support,
            "mining batch tree"
        );
        self.mine_suffix(tree, &[], sink);
    }

    fn mine_suffix(&self, tree: &FpTree, suffix: &[fpstream_core::ItemId], sink: &mut dyn PatternSink) {
        for item in tree.items_by_ascending_support() {
            let support = tree.item_support(item);
            if support < self.min_support {
                continue;
            }

            let mut itemset: ItemIdList = suffix.to_vec();
            itemset.push(item);
            itemset.sort_unstable();

            let conditional = tree.conditional_tree(item, self.min_support);
            let candidates: ItemIdList = conditional.items().collect();

            // A prefix that can never satisfy the preprocessing constraints
            // is dead: neither it nor any extension is worth growing.
            if !self
                .constraints_to_preprocess
                .match_itemset_extensible(&itemset, &candidates)
            {
                continue;
            }

            let matches = self.constraints.match_itemset(&itemset);
            sink.frequent_itemset(&FrequentItemset::new(itemset.clone(), support), matches);

            if !conditional.is_empty() {
                self.mine_suffix(&conditional, &itemset, sink);
            }
            sink.branch_completed(&itemset);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fpstream_core::{ItemConstraintType, ItemId};
    use std::sync::Arc;

    fn ids(raw: &[u32]) -> ItemIdList {
        raw.iter().map(|&i| ItemId(i)).collect()
    }

    #[derive(Default)]
    struct Collector {
        itemsets: Vec<(ItemIdList, SupportCount, bool)>,
        branches: usize,
    }

    impl PatternSink for Collector {
        fn frequent_itemset(&mut self, itemset: &FrequentItemset, matches: bool) {
            self.itemsets
                .push((itemset.items.clone(), itemset.support, matches));
        }

        fn branch_completed(&mut self, _itemset: &[ItemId]) {
            self.branches += 1;
        }
    }

    fn mine(
        transactions: &[&[u32]],
        min_support: SupportCount,
        constraints: &Constraints,
    ) -> Collector {
        let mut tree = FpTree::new();
        for t in transactions {
            tree.insert(&ids(t), 1);
        }
        let none = Constraints::new();
        let growth = FpGrowth::new(min_support, constraints, &none);
        let mut collector = Collector::default();
        growth.mine(&tree, &mut collector);
        collector
    }

    fn supports(collector: &Collector) -> Vec<(ItemIdList, SupportCount)> {
        let mut out: Vec<_> = collector
            .itemsets
            .iter()
            .map(|(items, support, _)| (items.clone(), *support))
            .collect();
        out.sort();
        out
    }

    #[test]
    fn mines_all_frequent_itemsets() {
        // {1,2} x3, {1} x1, {2,3} x1.
        let collector = mine(&[&[1, 2], &[1, 2], &[1, 2], &[1], &[2, 3]], 2, &Constraints::new());
        assert_eq!(
            supports(&collector),
            vec![
                (ids(&[1]), 4),
                (ids(&[1, 2]), 3),
                (ids(&[2]), 4),
            ]
        );
        assert!(collector.branches >= collector.itemsets.len());
    }

    #[test]
    fn single_transaction_yields_all_subsets() {
        let collector = mine(&[&[1, 2, 3]], 1, &Constraints::new());
        assert_eq!(
            supports(&collector),
            vec![
                (ids(&[1]), 1),
                (ids(&[1, 2]), 1),
                (ids(&[1, 2, 3]), 1),
                (ids(&[1, 3]), 1),
                (ids(&[2]), 1),
                (ids(&[2, 3]), 1),
                (ids(&[3]), 1),
            ]
        );
    }

    #[test]
    fn support_threshold_filters_itemsets() {
        let collector = mine(&[&[1, 2], &[1, 2], &[1, 3]], 3, &Constraints::new());
        assert_eq!(supports(&collector), vec![(ids(&[1]), 3)]);
    }

    #[test]
    fn constraints_mark_but_do_not_suppress_itemsets() {
        let mut constraints = Constraints::new();
        constraints
            .add_item_constraint(vec![Arc::from("two")], ItemConstraintType::Positive)
            .unwrap();
        constraints.preprocess_item("two", ItemId(2));

        let collector = mine(&[&[1, 2], &[1, 2]], 1, &constraints);
        for (items, _, matches) in &collector.itemsets {
            assert_eq!(*matches, items.contains(&ItemId(2)), "itemset {items:?}");
        }
    }

    #[test]
    fn preprocess_constraints_prune_dead_branches() {
        let mut to_preprocess = Constraints::new();
        to_preprocess
            .add_item_constraint(vec![Arc::from("two")], ItemConstraintType::Positive)
            .unwrap();
        to_preprocess.preprocess_item("two", ItemId(2));

        let mut tree = FpTree::new();
        for t in [&[1u32, 2][..], &[1, 2], &[1], &[3]] {
            tree.insert(&ids(t), 1);
        }
        let none = Constraints::new();
        let growth = FpGrowth::new(1, &none, &to_preprocess);
        let mut collector = Collector::default();
        growth.mine(&tree, &mut collector);

        // {3} can never reach item 2; neither can {1}'s own branch, whose
        // conditional tree is empty. Only the branches through item 2
        // survive the pruning hint.
        assert_eq!(supports(&collector), vec![(ids(&[1, 2]), 2), (ids(&[2]), 2)]);
    }
}
