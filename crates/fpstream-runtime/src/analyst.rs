//! Analyst: the outward-facing facade over the FP-Stream engine.
//!
//! Owns the engine, the rule-mining configuration, and the constraint sets,
//! and reports progress through an event channel. The
//! `ProcessedChunkOfBatch` event doubles as the backpressure contract: a
//! producer must wait for it before sending the next chunk.

use crate::batch::{Batch, RawTransaction};
use crate::engine::{EngineConfig, FpStream};
use crate::persistence::{self, StoreError};
use crate::rules::{self, AssociationRule, RuleSetComparison};
use chrono::{DateTime, Utc};
use fpstream_core::{
    Bucket, Constraints, CoreError, ItemConstraintType, ItemId, ItemName, SupportCount,
    TtwDefinition,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::warn;

/// Progress and result events for UIs and drivers.
#[derive(Debug, Clone)]
pub enum AnalystEvent {
    /// Batch analysis started (`active`) or finished (`!active`).
    Analyzing {
        active: bool,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        events: u64,
        transactions: u64,
    },
    /// Per-batch statistics, emitted after every finished batch.
    Stats {
        duration_ms: u64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        events: u64,
        transactions: u64,
        unique_items: u64,
        frequent_items: u64,
        pattern_tree_size: u64,
    },
    MinedRules {
        from: Bucket,
        to: Bucket,
        rules: Vec<AssociationRule>,
        events_in_range: SupportCount,
    },
    ComparedRules {
        from_older: Bucket,
        to_older: Bucket,
        from_newer: Bucket,
        to_newer: Bucket,
        comparison: RuleSetComparison,
    },
    /// Acknowledges one accepted chunk; `last` marks the batch boundary.
    ProcessedChunkOfBatch { last: bool },
    /// Items first seen in the latest batch.
    NewItemsEncountered { items: Vec<(ItemId, ItemName)> },
    Saved { success: bool },
    Loaded { success: bool },
}

pub struct Analyst {
    engine: FpStream,
    min_confidence: f64,

    frequent_itemset_constraints: Constraints,
    rule_antecedent_constraints: Constraints,
    rule_consequent_constraints: Constraints,

    event_tx: mpsc::UnboundedSender<AnalystEvent>,

    // Running stats across all batches, for the UI.
    all_batches_events: u64,
    all_batches_transactions: u64,
    current_batch_start: Option<DateTime<Utc>>,
}

impl Analyst {
    /// Creates an analyst and the receiving end of its event stream.
    pub fn new(
        def: Arc<TtwDefinition>,
        min_support: f64,
        max_support_error: f64,
        min_confidence: f64,
    ) -> (Self, mpsc::UnboundedReceiver<AnalystEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let config = EngineConfig {
            min_support,
            max_support_error,
            ..EngineConfig::default()
        };
        let analyst = Self {
            engine: FpStream::new(def, config),
            min_confidence,
            frequent_itemset_constraints: Constraints::new(),
            rule_antecedent_constraints: Constraints::new(),
            rule_consequent_constraints: Constraints::new(),
            event_tx,
            all_batches_events: 0,
            all_batches_transactions: 0,
            current_batch_start: None,
        };
        (analyst, event_rx)
    }

    pub fn engine(&self) -> &FpStream {
        &self.engine
    }

    pub fn pattern_tree_size(&self) -> usize {
        self.engine.pattern_tree().node_count()
    }

    pub fn set_parameters(&mut self, min_support: f64, max_support_error: f64, min_confidence: f64) {
        let mut config = self.engine.config().clone();
        config.min_support = min_support;
        config.max_support_error = max_support_error;
        self.engine.set_config(config);
        self.min_confidence = min_confidence;
    }

    /// Translates an itemset back to names, skipping ids that are unknown.
    pub fn item_ids_to_names(&self, itemset: &[ItemId]) -> Vec<ItemName> {
        itemset
            .iter()
            .filter_map(|&id| self.engine.catalog().name_of(id).cloned())
            .collect()
    }

    // ------------------------------------------------------------------
    // Constraint API.

    pub fn add_frequent_itemset_item_constraint(
        &mut self,
        group: impl IntoIterator<Item = ItemName>,
        kind: ItemConstraintType,
    ) -> Result<(), CoreError> {
        self.frequent_itemset_constraints
            .add_item_constraint(group, kind)?;
        let mut constraints = self.frequent_itemset_constraints.clone();
        constraints.preprocess_catalog(self.engine.catalog());
        self.frequent_itemset_constraints = constraints.clone();
        self.engine.set_constraints(constraints);
        Ok(())
    }

    pub fn add_rule_antecedent_item_constraint(
        &mut self,
        group: impl IntoIterator<Item = ItemName>,
        kind: ItemConstraintType,
    ) -> Result<(), CoreError> {
        self.rule_antecedent_constraints
            .add_item_constraint(group, kind)?;
        self.rule_antecedent_constraints
            .preprocess_catalog(self.engine.catalog());
        Ok(())
    }

    pub fn add_rule_consequent_item_constraint(
        &mut self,
        group: impl IntoIterator<Item = ItemName>,
        kind: ItemConstraintType,
    ) -> Result<(), CoreError> {
        self.rule_consequent_constraints
            .add_item_constraint(group, kind)?;
        self.rule_consequent_constraints
            .preprocess_catalog(self.engine.catalog());
        Ok(())
    }

    pub fn reset_constraints(&mut self) {
        self.frequent_itemset_constraints.reset();
        self.rule_antecedent_constraints.reset();
        self.rule_consequent_constraints.reset();
        self.engine.set_constraints(Constraints::new());
        self.engine.set_constraints_to_preprocess(Constraints::new());
    }

    // ------------------------------------------------------------------
    // Batch input.

    /// Accepts one chunk of a batch from the upstream parser. Emits
    /// `ProcessedChunkOfBatch` as the acknowledgment the producer must wait
    /// for, plus `Analyzing`/`Stats`/`NewItemsEncountered` around finished
    /// batches.
    pub fn accept_chunk_of_batch(
        &mut self,
        chunk: Batch<RawTransaction>,
        transactions_per_event: f64,
        start_new_window: bool,
    ) {
        let is_last = chunk.meta.is_last_chunk;
        if self.current_batch_start.is_none() {
            self.current_batch_start = Some(chunk.meta.start_time);
            self.emit(AnalystEvent::Analyzing {
                active: true,
                start: chunk.meta.start_time,
                end: chunk.meta.end_time,
                events: chunk.meta.num_events,
                transactions: chunk.meta.num_transactions,
            });
        }

        let started = Instant::now();
        let outcome =
            self.engine
                .process_chunk(&chunk.data, transactions_per_event, start_new_window, is_last);

        if let Some(outcome) = outcome {
            let duration_ms = started.elapsed().as_millis() as u64;
            self.all_batches_events += outcome.num_events;
            self.all_batches_transactions += outcome.num_transactions;
            let batch_start = self.current_batch_start.take().unwrap_or(chunk.meta.start_time);

            if !outcome.new_items.is_empty() {
                self.emit(AnalystEvent::NewItemsEncountered {
                    items: outcome.new_items.clone(),
                });
            }
            self.emit(AnalystEvent::Analyzing {
                active: false,
                start: batch_start,
                end: chunk.meta.end_time,
                events: outcome.num_events,
                transactions: outcome.num_transactions,
            });
            self.emit(AnalystEvent::Stats {
                duration_ms,
                start: batch_start,
                end: chunk.meta.end_time,
                events: self.all_batches_events,
                transactions: self.all_batches_transactions,
                unique_items: self.engine.num_unique_items() as u64,
                frequent_items: self.engine.num_frequent_items() as u64,
                pattern_tree_size: outcome.pattern_tree_size as u64,
            });
        }
        self.emit(AnalystEvent::ProcessedChunkOfBatch { last: is_last });
    }

    // ------------------------------------------------------------------
    // Query API.

    /// Mines association rules over the bucket range `[from, to]`.
    pub fn mine_rules(&mut self, from: Bucket, to: Bucket) -> (Vec<AssociationRule>, SupportCount) {
        // Items interned since the constraints were installed need their ids
        // materialized before matching.
        self.rule_antecedent_constraints
            .preprocess_catalog(self.engine.catalog());
        self.rule_consequent_constraints
            .preprocess_catalog(self.engine.catalog());

        let itemsets = self.engine.frequent_itemsets_for_range(from, to);
        let rules = rules::mine_rules(
            self.engine.pattern_tree(),
            &itemsets,
            from,
            to,
            self.min_confidence,
            &self.rule_antecedent_constraints,
            &self.rule_consequent_constraints,
        );
        let events_in_range = self.engine.events_in_range(from, to);
        self.emit(AnalystEvent::MinedRules {
            from,
            to,
            rules: rules.clone(),
            events_in_range,
        });
        (rules, events_in_range)
    }

    /// Mines two ranges and reports the drift of the rules they share.
    pub fn mine_and_compare_rules(
        &mut self,
        from_older: Bucket,
        to_older: Bucket,
        from_newer: Bucket,
        to_newer: Bucket,
    ) -> RuleSetComparison {
        let (older, events_older) = self.mine_rules(from_older, to_older);
        let (newer, events_newer) = self.mine_rules(from_newer, to_newer);
        let comparison = rules::compare_rule_sets(older, newer, events_older, events_newer);
        self.emit(AnalystEvent::ComparedRules {
            from_older,
            to_older,
            from_newer,
            to_newer,
            comparison: comparison.clone(),
        });
        comparison
    }

    // ------------------------------------------------------------------
    // Persistence.

    pub fn save(&mut self, path: &Path) -> Result<(), StoreError> {
        let result = persistence::save(&self.engine, path);
        self.emit(AnalystEvent::Saved {
            success: result.is_ok(),
        });
        result
    }

    pub fn load(&mut self, path: &Path) -> Result<(), StoreError> {
        let result = persistence::load(&mut self.engine, path);
        self.emit(AnalystEvent::Loaded {
            success: result.is_ok(),
        });
        result
    }

    fn emit(&self, event: AnalystEvent) {
        if self.event_tx.send(event).is_err() {
            // Nobody is listening anymore; keep processing regardless.
            warn!("event receiver dropped");
        }
    }
}
