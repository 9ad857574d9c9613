//! FP-Stream engine: the incremental per-batch update loop.
//!
//! For every finished batch the engine re-ranks items by their running
//! global support, canonicalizes the batch's transactions, mines them with
//! FP-Growth at the batch error threshold, merges the resulting supports
//! into the Pattern Tree, and sweeps decayed pattern tails.

use crate::batch::RawTransaction;
use crate::fpgrowth::{FpGrowth, PatternSink};
use crate::fptree::FpTree;
use crate::pattern_tree::PatternTree;
use fpstream_core::{
    Bucket, Constraints, FrequentItemset, Granularity, ItemCatalog, ItemId, ItemIdList, ItemName,
    SupportCount, TiltedTimeWindow, TtwDefinition,
};
use rustc_hash::FxHashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Behavior of the droppable-tail rule at exact equality
/// (`support == maxSupportError * events`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TailTieBreak {
    /// Equality counts as droppable.
    #[default]
    Drop,
    /// Equality keeps the granularity.
    Keep,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Minimum support as a fraction of events, in (0, 1].
    pub min_support: f64,
    /// Approximation bound epsilon of the FP-Stream paper, in [0, min_support).
    pub max_support_error: f64,
    pub tail_tie_break: TailTieBreak,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_support: 0.05,
            max_support_error: 0.01,
            tail_tie_break: TailTieBreak::default(),
        }
    }
}

/// Summary of one finished batch, folded into stats rather than propagated
/// as errors: batch-local problems never escape the batch boundary.
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    pub update_id: u32,
    pub num_transactions: u64,
    pub num_events: u64,
    /// Transactions that became empty after infrequent-item pruning.
    pub dropped_transactions: u64,
    pub frequent_itemsets: u64,
    pub patterns_pruned: u64,
    pub pattern_tree_size: usize,
    /// Items first seen in this batch, in interning order.
    pub new_items: Vec<(ItemId, ItemName)>,
}

/// Routes FP-Growth emissions into the Pattern Tree.
struct PatternTreeSink<'a> {
    tree: &'a mut PatternTree,
    update_id: u32,
    accepted: u64,
}

impl PatternSink for PatternTreeSink<'_> {
    fn frequent_itemset(&mut self, itemset: &FrequentItemset, _matches_constraints: bool) {
        // Constraint filtering happens at query time; the tree keeps every
        // mined pattern so ancestors stay available for rule denominators.
        self.tree
            .add_pattern(&itemset.items, itemset.support, self.update_id);
        self.accepted += 1;
    }
}

/// The streaming frequent-pattern engine.
pub struct FpStream {
    def: Arc<TtwDefinition>,
    config: EngineConfig,
    catalog: ItemCatalog,
    pattern_tree: PatternTree,
    transactions_per_batch: TiltedTimeWindow,
    events_per_batch: TiltedTimeWindow,

    /// Running global support per item, across the whole stream.
    item_support: FxHashMap<ItemId, SupportCount>,
    /// Item ids ordered by descending running support (ascending id on
    /// ties); recomputed at every batch boundary.
    f_list: ItemIdList,

    constraints: Constraints,
    constraints_to_preprocess: Constraints,

    total_events: u64,
    total_transactions: u64,
    current_update_id: u32,
    initial_batch_processed: bool,

    /// Transactions of the batch currently being accumulated, interned but
    /// not yet ordered.
    pending: Vec<ItemIdList>,
    pending_events: f64,
    pending_new_items: Vec<(ItemId, ItemName)>,
}

impl FpStream {
    pub fn new(def: Arc<TtwDefinition>, config: EngineConfig) -> Self {
        Self {
            pattern_tree: PatternTree::new(def.clone()),
            transactions_per_batch: TiltedTimeWindow::new(def.clone()),
            events_per_batch: TiltedTimeWindow::new(def.clone()),
            def,
            config,
            catalog: ItemCatalog::new(),
            item_support: FxHashMap::default(),
            f_list: Vec::new(),
            constraints: Constraints::new(),
            constraints_to_preprocess: Constraints::new(),
            total_events: 0,
            total_transactions: 0,
            current_update_id: 0,
            initial_batch_processed: false,
            pending: Vec::new(),
            pending_events: 0.0,
            pending_new_items: Vec::new(),
        }
    }

    pub fn definition(&self) -> &Arc<TtwDefinition> {
        &self.def
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: EngineConfig) {
        self.config = config;
    }

    pub fn catalog(&self) -> &ItemCatalog {
        &self.catalog
    }

    pub fn pattern_tree(&self) -> &PatternTree {
        &self.pattern_tree
    }

    pub fn transactions_per_batch(&self) -> &TiltedTimeWindow {
        &self.transactions_per_batch
    }

    pub fn events_per_batch(&self) -> &TiltedTimeWindow {
        &self.events_per_batch
    }

    pub fn current_update_id(&self) -> u32 {
        self.current_update_id
    }

    pub fn initial_batch_processed(&self) -> bool {
        self.initial_batch_processed
    }

    pub fn num_frequent_items(&self) -> usize {
        self.f_list.len()
    }

    pub fn num_unique_items(&self) -> usize {
        self.catalog.len()
    }

    /// Events seen since the engine started (or was last restored).
    pub fn total_events(&self) -> u64 {
        self.total_events
    }

    /// Transactions seen since the engine started (or was last restored).
    pub fn total_transactions(&self) -> u64 {
        self.total_transactions
    }

    pub fn set_constraints(&mut self, mut constraints: Constraints) {
        constraints.preprocess_catalog(&self.catalog);
        self.constraints = constraints;
    }

    pub fn constraints(&self) -> &Constraints {
        &self.constraints
    }

    pub fn set_constraints_to_preprocess(&mut self, mut constraints: Constraints) {
        constraints.preprocess_catalog(&self.catalog);
        self.constraints_to_preprocess = constraints;
    }

    /// Accepts one chunk of a batch. Transactions accumulate until the
    /// chunk flagged as last arrives, which triggers the end-of-batch
    /// cycle and yields a `BatchOutcome`.
    pub fn process_chunk(
        &mut self,
        transactions: &[RawTransaction],
        transactions_per_event: f64,
        start_new_window: bool,
        last_chunk: bool,
    ) -> Option<BatchOutcome> {
        for raw in transactions {
            let mut interned: ItemIdList = Vec::with_capacity(raw.len());
            for name in raw {
                let (id, new) = self.catalog.intern(name);
                if new {
                    self.constraints.preprocess_item(name, id);
                    self.constraints_to_preprocess.preprocess_item(name, id);
                    self.pending_new_items.push((id, name.clone()));
                }
                if !interned.contains(&id) {
                    interned.push(id);
                }
            }
            if !interned.is_empty() {
                self.pending.push(interned);
            }
        }
        let tpe = if transactions_per_event > 0.0 {
            transactions_per_event
        } else {
            1.0
        };
        self.pending_events += transactions.len() as f64 / tpe;

        if last_chunk {
            Some(self.end_of_batch(start_new_window))
        } else {
            None
        }
    }

    fn end_of_batch(&mut self, start_new_window: bool) -> BatchOutcome {
        // A batch that starts a new window closes the previous quarter and
        // gets a fresh update id; otherwise appends fold into the current
        // quarter of the windows they touch.
        if start_new_window || !self.initial_batch_processed {
            if self.initial_batch_processed {
                self.pattern_tree.next_quarter();
            }
            self.current_update_id += 1;
        }
        let update_id = self.current_update_id;

        let transactions = std::mem::take(&mut self.pending);
        let batch_events = self.pending_events.round() as u64;
        self.pending_events = 0.0;
        let new_items = std::mem::take(&mut self.pending_new_items);

        let mut outcome = BatchOutcome {
            update_id,
            num_transactions: transactions.len() as u64,
            num_events: batch_events,
            new_items,
            ..BatchOutcome::default()
        };

        // Update the running item supports and re-derive the global order.
        for transaction in &transactions {
            for &item in transaction {
                *self.item_support.entry(item).or_insert(0) += 1;
            }
        }
        self.total_events += batch_events;
        self.total_transactions += outcome.num_transactions;
        self.recompute_f_list();

        // Canonicalize: drop globally-negligible items, order the rest by
        // the fresh f_list, then re-sort ascending for the pattern tree's
        // batch-independent path order.
        let noise_floor = self.config.max_support_error * self.total_events as f64;
        let rank: FxHashMap<ItemId, usize> = self
            .f_list
            .iter()
            .enumerate()
            .map(|(i, &id)| (id, i))
            .collect();
        let mut canonical: Vec<ItemIdList> = Vec::with_capacity(transactions.len());
        for mut transaction in transactions {
            transaction.retain(|id| self.item_support[id] as f64 >= noise_floor);
            if transaction.is_empty() {
                outcome.dropped_transactions += 1;
                continue;
            }
            transaction.sort_unstable_by_key(|id| rank[id]);
            canonical.push(transaction);
        }

        // Mine the batch at the error threshold; patterns frequent in the
        // batch land in the pattern tree at the current quarter.
        let sigma_batch = (self.config.max_support_error * batch_events as f64).ceil() as SupportCount;
        let mut batch_support: FxHashMap<ItemId, SupportCount> = FxHashMap::default();
        for transaction in &canonical {
            for &item in transaction {
                *batch_support.entry(item).or_insert(0) += 1;
            }
        }
        let (batch_tree, rejected) =
            FpTree::from_transactions(&canonical, sigma_batch, &batch_support);
        outcome.dropped_transactions += rejected;

        let growth = FpGrowth::new(
            sigma_batch.max(1),
            &self.constraints,
            &self.constraints_to_preprocess,
        );
        let mut sink = PatternTreeSink {
            tree: &mut self.pattern_tree,
            update_id,
            accepted: 0,
        };
        growth.mine(&batch_tree, &mut sink);
        outcome.frequent_itemsets = sink.accepted;

        // Batch-level aggregates feed the droppable-tail rule.
        self.transactions_per_batch
            .append(outcome.num_transactions, update_id);
        self.events_per_batch.append(batch_events, update_id);

        outcome.patterns_pruned = self.sweep_tails(update_id) as u64;
        outcome.pattern_tree_size = self.pattern_tree.node_count();
        self.initial_batch_processed = true;

        info!(
            update_id,
            transactions = outcome.num_transactions,
            events = outcome.num_events,
            frequent_itemsets = outcome.frequent_itemsets,
            pruned = outcome.patterns_pruned,
            tree_size = outcome.pattern_tree_size,
            "batch processed"
        );
        outcome
    }

    /// Zero-syncs windows the batch did not touch, then drops every decayed
    /// tail and the subtrees that empty out.
    fn sweep_tails(&mut self, update_id: u32) -> usize {
        let config = self.config.clone();
        let events_per_batch = self.events_per_batch.clone();
        self.pattern_tree.prune_tails(|window| {
            if window.last_update() != update_id {
                window.append(0, update_id);
            }
            let g = Self::calculate_droppable_tail(window, &config, &events_per_batch);
            (g < window.definition().num_granularities()).then_some(g)
        })
    }

    /// The droppable-tail rule of the FP-Stream paper: scanning coarsest to
    /// finest, a granularity may go when its support stays under the
    /// approximation bound of the events it covers and every coarser
    /// granularity was droppable too. Returns the granularity from which
    /// the tail drops, or `num_granularities` when nothing drops.
    pub fn calculate_droppable_tail(
        window: &TiltedTimeWindow,
        config: &EngineConfig,
        events_per_batch: &TiltedTimeWindow,
    ) -> Granularity {
        let num_granularities = window.definition().num_granularities();
        let mut keep_from = num_granularities;
        for g in (0..num_granularities).rev() {
            let support = window.get_support_for_granularity(g) as f64;
            let bound = config.max_support_error * events_per_batch.get_support_for_granularity(g) as f64;
            let droppable = match config.tail_tie_break {
                TailTieBreak::Drop => support <= bound,
                TailTieBreak::Keep => support < bound,
            };
            if droppable {
                keep_from = g;
            } else {
                break;
            }
        }
        keep_from
    }

    /// The minimum support a pattern needs over `[from, to]` to count as
    /// frequent there, derived from the events the range covers.
    pub fn min_support_for_range(&self, from: Bucket, to: Bucket) -> SupportCount {
        let events = self.events_per_batch.get_support_for_range(from, to);
        (self.config.min_support * events as f64).ceil() as SupportCount
    }

    pub fn events_in_range(&self, from: Bucket, to: Bucket) -> SupportCount {
        self.events_per_batch.get_support_for_range(from, to)
    }

    pub fn transactions_in_range(&self, from: Bucket, to: Bucket) -> SupportCount {
        self.transactions_per_batch.get_support_for_range(from, to)
    }

    /// Frequent itemsets over a bucket range, at the range-derived minimum
    /// support and under the engine's itemset constraints.
    pub fn frequent_itemsets_for_range(&self, from: Bucket, to: Bucket) -> Vec<FrequentItemset> {
        let min_support = self.min_support_for_range(from, to);
        self.pattern_tree
            .get_frequent_itemsets_for_range(min_support, &self.constraints, from, to)
    }

    fn recompute_f_list(&mut self) {
        self.f_list = self.item_support.keys().copied().collect();
        let support = &self.item_support;
        self.f_list
            .sort_unstable_by_key(|&id| (std::cmp::Reverse(support[&id]), id));
        debug!(frequent_items = self.f_list.len(), "f_list recomputed");
    }

    /// Installs restored state; used by persistence once a load has fully
    /// succeeded (a failed load never mutates the engine).
    pub(crate) fn restore(
        &mut self,
        catalog: ItemCatalog,
        pattern_tree: PatternTree,
        transactions_per_batch: TiltedTimeWindow,
        events_per_batch: TiltedTimeWindow,
    ) {
        let update_id = events_per_batch.last_update();
        self.def = pattern_tree.definition().clone();
        self.catalog = catalog;
        self.pattern_tree = pattern_tree;
        self.transactions_per_batch = transactions_per_batch;
        self.events_per_batch = events_per_batch;
        self.current_update_id = update_id;
        self.initial_batch_processed = update_id != 0;
        self.item_support.clear();
        self.f_list.clear();
        self.total_events = 0;
        self.total_transactions = 0;
        self.pending.clear();
        self.pending_events = 0.0;
        self.pending_new_items.clear();
        self.constraints.preprocess_catalog(&self.catalog);
        self.constraints_to_preprocess.preprocess_catalog(&self.catalog);
    }
}
