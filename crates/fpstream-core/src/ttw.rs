//! Tilted time window: a fixed-size multi-resolution time series.
//!
//! Recent data is kept at the finest granularity; each time a granularity
//! fills up, its buckets are aggregated into a single value that cascades
//! into the next coarser granularity. Data falling off the coarsest
//! granularity is lost, which makes the whole structure a sliding window
//! over the stream's lifetime.

use crate::error::CoreError;
use crate::item::SupportCount;
use crate::ttw_def::{Bucket, Granularity, TtwDefinition};
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;

/// Sentinel marking a slot that holds no data. Serialized as -1.
pub const UNUSED: SupportCount = SupportCount::MAX;

/// Per-series compressed history. All windows of one engine share the same
/// `TtwDefinition` through an `Arc`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TiltedTimeWindow {
    def: Arc<TtwDefinition>,
    buckets: Vec<SupportCount>,
    /// Per-granularity count of slots holding real data. Used slots are
    /// always a contiguous prefix of the granularity's range.
    usage: Vec<Bucket>,
    last_update: u32,
    /// Highest bucket index ever filled, -1 if none. Not rewound when fine
    /// buckets cascade away; `drop_tail` clamps it to the kept region.
    oldest_filled: i64,
}

impl TiltedTimeWindow {
    pub fn new(def: Arc<TtwDefinition>) -> Self {
        let num_buckets = def.num_buckets() as usize;
        let num_granularities = def.num_granularities();
        Self {
            def,
            buckets: vec![UNUSED; num_buckets],
            usage: vec![0; num_granularities],
            last_update: 0,
            oldest_filled: -1,
        }
    }

    pub fn definition(&self) -> &Arc<TtwDefinition> {
        &self.def
    }

    pub fn last_update(&self) -> u32 {
        self.last_update
    }

    pub fn usage_of(&self, g: Granularity) -> Bucket {
        self.usage[g]
    }

    /// True when no granularity holds any data.
    pub fn is_empty(&self) -> bool {
        self.usage.iter().all(|&used| used == 0)
    }

    /// Highest bucket index currently (or previously) filled; 0 if the
    /// window never held data. Monotonically non-decreasing across appends.
    pub fn oldest_bucket_filled(&self) -> Bucket {
        self.oldest_filled.max(0) as Bucket
    }

    pub fn get(&self, bucket: Bucket) -> SupportCount {
        self.buckets[bucket as usize]
    }

    /// The first `n` slot values, `UNUSED` sentinel included.
    pub fn get_buckets(&self, n: usize) -> Vec<SupportCount> {
        self.buckets[..n].to_vec()
    }

    /// Appends one batch worth of support.
    ///
    /// When `update_id` equals the id of the previous append, the support is
    /// folded into the current slot instead of advancing the window; this is
    /// how multiple chunks of one batch accumulate. Update id 0 is reserved
    /// for quarter-sync zero fills and always advances.
    pub fn append(&mut self, support: SupportCount, update_id: u32) {
        if update_id != 0 && update_id == self.last_update {
            if self.usage[0] == 0 {
                self.buckets[0] = support;
                self.usage[0] = 1;
                self.oldest_filled = self.oldest_filled.max(0);
            } else {
                self.buckets[0] += support;
            }
            return;
        }
        self.last_update = update_id;
        self.shift(0, support);
    }

    /// Resets every granularity at index >= `g`. `last_update` is kept.
    pub fn drop_tail(&mut self, g: Granularity) {
        if g >= self.def.num_granularities() {
            return;
        }
        for gi in g..self.def.num_granularities() {
            let offset = self.def.offset_of(gi) as usize;
            let capacity = self.def.capacity_of(gi) as usize;
            for slot in &mut self.buckets[offset..offset + capacity] {
                *slot = UNUSED;
            }
            self.usage[gi] = 0;
        }
        let boundary = if g == 0 {
            -1
        } else {
            self.def.offset_of(g) as i64 - 1
        };
        self.oldest_filled = self.oldest_filled.min(boundary);
    }

    /// Sum of the values stored in buckets `[from, to]`, `UNUSED` as 0.
    pub fn get_support_for_range(&self, from: Bucket, to: Bucket) -> SupportCount {
        let to = to.min(self.def.num_buckets().saturating_sub(1));
        if from > to {
            return 0;
        }
        self.buckets[from as usize..=to as usize]
            .iter()
            .filter(|&&v| v != UNUSED)
            .sum()
    }

    /// Sum of the values stored in one granularity's buckets.
    pub fn get_support_for_granularity(&self, g: Granularity) -> SupportCount {
        let offset = self.def.offset_of(g);
        let capacity = self.def.capacity_of(g);
        self.get_support_for_range(offset, offset + capacity - 1)
    }

    fn shift(&mut self, g: Granularity, value: SupportCount) {
        // Data cascading past the coarsest granularity slides out.
        if g >= self.def.num_granularities() {
            return;
        }
        let offset = self.def.offset_of(g) as usize;
        let capacity = self.def.capacity_of(g) as usize;

        if self.usage[g] as usize == capacity {
            let aggregate = self.buckets[offset..offset + capacity].iter().sum();
            for slot in &mut self.buckets[offset..offset + capacity] {
                *slot = UNUSED;
            }
            self.usage[g] = 0;
            self.shift(g + 1, aggregate);
        }

        // Newest value lives at the granularity's first slot; older values
        // move one slot towards the granularity's end.
        let used = self.usage[g] as usize;
        for i in (offset + 1..=offset + used).rev() {
            self.buckets[i] = self.buckets[i - 1];
        }
        self.buckets[offset] = value;
        self.usage[g] += 1;
        let extent = (offset + self.usage[g] as usize - 1) as i64;
        self.oldest_filled = self.oldest_filled.max(extent);
    }

    /// Serializes the window into a JSON object with `lastUpdate`, the
    /// per-granularity `oldestBucketFilled` markers, and the raw `buckets`
    /// array (`UNUSED` as -1).
    pub fn to_variant_map(&self) -> Value {
        let oldest_per_granularity: Vec<i64> = (0..self.def.num_granularities())
            .map(|g| {
                if self.usage[g] == 0 {
                    -1
                } else {
                    (self.def.offset_of(g) + self.usage[g] - 1) as i64
                }
            })
            .collect();
        let buckets: Vec<i64> = self
            .buckets
            .iter()
            .map(|&v| if v == UNUSED { -1 } else { v as i64 })
            .collect();
        json!({
            "lastUpdate": self.last_update,
            "oldestBucketFilled": oldest_per_granularity,
            "buckets": buckets,
        })
    }

    /// Rebuilds a window from `to_variant_map` output.
    pub fn from_variant_map(def: Arc<TtwDefinition>, map: &Value) -> Result<Self, CoreError> {
        let malformed = |reason: &str| CoreError::Deserialization(format!("tilted time window: {reason}"));

        let obj = map.as_object().ok_or_else(|| malformed("not an object"))?;
        let last_update = obj
            .get("lastUpdate")
            .and_then(Value::as_u64)
            .ok_or_else(|| malformed("missing lastUpdate"))? as u32;
        let oldest = obj
            .get("oldestBucketFilled")
            .and_then(Value::as_array)
            .ok_or_else(|| malformed("missing oldestBucketFilled"))?;
        let raw_buckets = obj
            .get("buckets")
            .and_then(Value::as_array)
            .ok_or_else(|| malformed("missing buckets"))?;

        if oldest.len() != def.num_granularities() {
            return Err(malformed("granularity count mismatch"));
        }
        if raw_buckets.len() != def.num_buckets() as usize {
            return Err(malformed("bucket count mismatch"));
        }

        let mut window = TiltedTimeWindow::new(def.clone());
        window.last_update = last_update;
        for (i, value) in raw_buckets.iter().enumerate() {
            let v = value.as_i64().ok_or_else(|| malformed("non-integer bucket"))?;
            window.buckets[i] = if v < 0 { UNUSED } else { v as SupportCount };
        }
        for (g, marker) in oldest.iter().enumerate() {
            let m = marker
                .as_i64()
                .ok_or_else(|| malformed("non-integer oldestBucketFilled"))?;
            let used = if m < 0 {
                0
            } else {
                let offset = def.offset_of(g) as i64;
                let capacity = def.capacity_of(g) as i64;
                if m < offset || m >= offset + capacity {
                    return Err(malformed("oldestBucketFilled outside granularity"));
                }
                (m - offset + 1) as Bucket
            };
            window.usage[g] = used;
            window.oldest_filled = window.oldest_filled.max(m);
        }
        Ok(window)
    }
}

impl fmt::Display for TiltedTimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        let mut first = true;
        for g in 0..self.def.num_granularities() {
            if self.usage[g] == 0 {
                continue;
            }
            if !first {
                write!(f, ", ")?;
            }
            first = false;
            let offset = self.def.offset_of(g) as usize;
            let used = self.usage[g] as usize;
            write!(f, "{}={:?}", self.def.tag_of(g), &self.buckets[offset..offset + used])?;
        }
        write!(f, "}} (lastUpdate={})", self.last_update)
    }
}
