//! Association-rule mining over a Pattern Tree range snapshot.

use crate::pattern_tree::PatternTree;
use fpstream_core::{Bucket, Constraints, FrequentItemset, ItemIdList, SupportCount};
use rustc_hash::FxHashMap;
use std::fmt;
use tracing::warn;

/// `antecedent => consequent`, with the support of their union over the
/// mined range and the rule's confidence. Antecedent and consequent are
/// disjoint sorted id lists.
#[derive(Debug, Clone, PartialEq)]
pub struct AssociationRule {
    pub antecedent: ItemIdList,
    pub consequent: ItemIdList,
    pub support: SupportCount,
    pub confidence: f64,
}

impl fmt::Display for AssociationRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} => {:?} (support={}, confidence={:.3})",
            self.antecedent, self.consequent, self.support, self.confidence
        )
    }
}

/// One rule present in two ranges, with its drift between them.
#[derive(Debug, Clone)]
pub struct ComparedRule {
    pub older: AssociationRule,
    pub newer: AssociationRule,
    pub confidence_delta: f64,
    pub support_delta: i64,
    /// `supp_new / events_new - supp_old / events_old`.
    pub relative_support: f64,
}

/// Result of mining two ranges and intersecting their rule sets.
#[derive(Debug, Clone, Default)]
pub struct RuleSetComparison {
    pub intersected: Vec<ComparedRule>,
    pub older_only: Vec<AssociationRule>,
    pub newer_only: Vec<AssociationRule>,
    pub events_in_older_range: SupportCount,
    pub events_in_newer_range: SupportCount,
}

/// Itemsets beyond this size would need billions of subset candidates;
/// they are skipped with a warning instead.
const MAX_RULE_ITEMSET_LEN: usize = 24;

/// Derives association rules from the frequent itemsets of the range
/// `[from, to]`. For every itemset of at least two items, every non-empty
/// proper subset is tried as antecedent; the consequent is the complement.
/// Antecedent supports come from Pattern Tree range lookups.
pub fn mine_rules(
    pattern_tree: &PatternTree,
    frequent_itemsets: &[FrequentItemset],
    from: Bucket,
    to: Bucket,
    min_confidence: f64,
    antecedent_constraints: &Constraints,
    consequent_constraints: &Constraints,
) -> Vec<AssociationRule> {
    let mut rules = Vec::new();
    for itemset in frequent_itemsets {
        let n = itemset.items.len();
        if n < 2 {
            continue;
        }
        if n > MAX_RULE_ITEMSET_LEN {
            warn!(len = n, "skipping oversized itemset during rule mining");
            continue;
        }

        let mut antecedent = Vec::with_capacity(n - 1);
        let mut consequent = Vec::with_capacity(n - 1);
        for mask in 1..(1u32 << n) - 1 {
            antecedent.clear();
            consequent.clear();
            for (bit, &item) in itemset.items.iter().enumerate() {
                if mask & (1 << bit) != 0 {
                    antecedent.push(item);
                } else {
                    consequent.push(item);
                }
            }

            let Some(window) = pattern_tree.get_pattern_support(&antecedent) else {
                continue;
            };
            let antecedent_support = window.get_support_for_range(from, to);
            if antecedent_support == 0 {
                continue;
            }
            let confidence = itemset.support as f64 / antecedent_support as f64;
            if confidence >= min_confidence
                && antecedent_constraints.match_itemset(&antecedent)
                && consequent_constraints.match_itemset(&consequent)
            {
                rules.push(AssociationRule {
                    antecedent: antecedent.clone(),
                    consequent: consequent.clone(),
                    support: itemset.support,
                    confidence,
                });
            }
        }
    }
    rules
}

/// Intersects two mined rule sets by `(antecedent, consequent)` and reports
/// the drift of every rule present in both, plus the rules unique to either
/// range.
pub fn compare_rule_sets(
    older: Vec<AssociationRule>,
    newer: Vec<AssociationRule>,
    events_in_older_range: SupportCount,
    events_in_newer_range: SupportCount,
) -> RuleSetComparison {
    let mut newer_by_key: FxHashMap<(ItemIdList, ItemIdList), AssociationRule> = newer
        .into_iter()
        .map(|rule| ((rule.antecedent.clone(), rule.consequent.clone()), rule))
        .collect();

    let mut comparison = RuleSetComparison {
        events_in_older_range,
        events_in_newer_range,
        ..RuleSetComparison::default()
    };

    for old_rule in older {
        let key = (old_rule.antecedent.clone(), old_rule.consequent.clone());
        match newer_by_key.remove(&key) {
            Some(new_rule) => {
                let relative_old = if events_in_older_range == 0 {
                    0.0
                } else {
                    old_rule.support as f64 / events_in_older_range as f64
                };
                let relative_new = if events_in_newer_range == 0 {
                    0.0
                } else {
                    new_rule.support as f64 / events_in_newer_range as f64
                };
                comparison.intersected.push(ComparedRule {
                    confidence_delta: new_rule.confidence - old_rule.confidence,
                    support_delta: new_rule.support as i64 - old_rule.support as i64,
                    relative_support: relative_new - relative_old,
                    older: old_rule,
                    newer: new_rule,
                });
            }
            None => comparison.older_only.push(old_rule),
        }
    }

    // Whatever was not claimed by the intersection is newer-only.
    comparison.newer_only = newer_by_key.into_values().collect();
    comparison
        .newer_only
        .sort_by(|a, b| (&a.antecedent, &a.consequent).cmp(&(&b.antecedent, &b.consequent)));
    comparison
}
