//! Batch input types handed to the engine by the upstream parser.

use chrono::{DateTime, Utc};
use fpstream_core::ItemName;
use serde::{Deserialize, Serialize};

/// Unordered set of item names observed in one sample. Converted to a
/// sorted id list at the batch boundary, once the batch's item ordering is
/// known.
pub type RawTransaction = Vec<ItemName>;

/// Metadata accompanying one chunk of a batch. A batch may arrive in
/// several chunks sharing a `batch_id`; only the chunk flagged
/// `is_last_chunk` triggers end-of-batch work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchMetadata {
    pub batch_id: u32,
    pub is_last_chunk: bool,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Events (e.g. page views) covered by this chunk; one event may map to
    /// several transactions.
    pub num_events: u64,
    pub num_transactions: u64,
}

/// A chunk of data plus its metadata.
#[derive(Debug, Clone)]
pub struct Batch<T> {
    pub meta: BatchMetadata,
    pub data: Vec<T>,
}

impl<T> Batch<T> {
    pub fn new(meta: BatchMetadata, data: Vec<T>) -> Self {
        Self { meta, data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
