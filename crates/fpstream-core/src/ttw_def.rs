//! Declarative description of a tilted time window's granularities.

use crate::error::CoreError;
use std::fmt;
use std::str::FromStr;

/// Index of one storage slot across all granularities of a window.
pub type Bucket = u32;

/// Index of one resolution level, 0 being the finest.
pub type Granularity = usize;

/// An ordered list of granularities, finest first, each with a one-letter
/// tag and a bucket capacity. `sec_per_window` is the real time covered by
/// one bucket of granularity 0.
///
/// Serialized as `"<secPerWindow>:<granularityChars>"`, e.g. `"900:QQQQHH"`
/// for four quarter buckets followed by two hour buckets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TtwDefinition {
    sec_per_window: u64,
    bucket_count: Vec<Bucket>,
    bucket_offset: Vec<Bucket>,
    granularity_char: Vec<char>,
    num_buckets: Bucket,
}

impl TtwDefinition {
    /// Parses the `"<secPerWindow>:<granularityChars>"` form. Granularities
    /// must be contiguous runs of one character; a tag reappearing after a
    /// different tag is rejected.
    pub fn parse(serialized: &str) -> Result<Self, CoreError> {
        let invalid = |reason: &str| {
            CoreError::InvalidTtwDefinition(format!("{reason} in {serialized:?}"))
        };

        let (secs, chars) = serialized
            .split_once(':')
            .ok_or_else(|| invalid("missing ':' separator"))?;
        let sec_per_window: u64 = secs
            .parse()
            .map_err(|_| invalid("seconds-per-window is not an integer"))?;
        if sec_per_window == 0 {
            return Err(invalid("seconds-per-window must be positive"));
        }
        if chars.is_empty() {
            return Err(invalid("no granularities"));
        }

        let mut bucket_count: Vec<Bucket> = Vec::new();
        let mut granularity_char: Vec<char> = Vec::new();
        for c in chars.chars() {
            match granularity_char.last() {
                Some(&last) if last == c => *bucket_count.last_mut().unwrap() += 1,
                _ => {
                    if granularity_char.contains(&c) {
                        return Err(invalid("granularity tags must form contiguous runs"));
                    }
                    granularity_char.push(c);
                    bucket_count.push(1);
                }
            }
        }

        let mut bucket_offset = Vec::with_capacity(bucket_count.len());
        let mut offset = 0;
        for &count in &bucket_count {
            bucket_offset.push(offset);
            offset += count;
        }

        Ok(Self {
            sec_per_window,
            bucket_count,
            bucket_offset,
            granularity_char,
            num_buckets: offset,
        })
    }

    pub fn serialize(&self) -> String {
        let mut out = format!("{}:", self.sec_per_window);
        for (g, &count) in self.bucket_count.iter().enumerate() {
            for _ in 0..count {
                out.push(self.granularity_char[g]);
            }
        }
        out
    }

    pub fn sec_per_window(&self) -> u64 {
        self.sec_per_window
    }

    pub fn num_granularities(&self) -> usize {
        self.bucket_count.len()
    }

    pub fn num_buckets(&self) -> Bucket {
        self.num_buckets
    }

    pub fn capacity_of(&self, g: Granularity) -> Bucket {
        self.bucket_count[g]
    }

    pub fn offset_of(&self, g: Granularity) -> Bucket {
        self.bucket_offset[g]
    }

    pub fn tag_of(&self, g: Granularity) -> char {
        self.granularity_char[g]
    }

    pub fn exists(&self, bucket: Bucket) -> bool {
        bucket < self.num_buckets
    }

    pub fn bucket_is_before_granularity(&self, bucket: Bucket, g: Granularity) -> bool {
        bucket < self.bucket_offset[g]
    }

    /// The granularity containing `bucket`. Panics if the bucket does not
    /// exist.
    pub fn granularity_of(&self, bucket: Bucket) -> Granularity {
        assert!(self.exists(bucket), "bucket {bucket} out of range");
        self.bucket_offset
            .iter()
            .rposition(|&offset| offset <= bucket)
            .unwrap()
    }

    /// The lowest granularity whose buckets all lie strictly after `bucket`,
    /// or `num_granularities()` if there is none.
    pub fn find_lowest_granularity_after_bucket(&self, bucket: Bucket) -> Granularity {
        self.bucket_offset
            .iter()
            .position(|&offset| offset > bucket)
            .unwrap_or_else(|| self.num_granularities())
    }

    /// Real-time offset of `bucket`'s newest edge, or of its oldest edge
    /// when `include_itself` is set.
    pub fn seconds_to_bucket(&self, bucket: Bucket, include_itself: bool) -> u64 {
        assert!(self.exists(bucket), "bucket {bucket} out of range");
        let mut seconds = 0;
        let mut duration = self.sec_per_window;
        for g in 0..self.num_granularities() {
            let offset = self.bucket_offset[g];
            if bucket < offset {
                break;
            }
            let in_granularity = bucket.saturating_sub(offset).min(self.bucket_count[g]);
            let mut covered = in_granularity as u64;
            if include_itself && self.granularity_of(bucket) == g {
                covered += 1;
            }
            seconds += covered * duration;
            duration *= self.bucket_count[g] as u64;
        }
        seconds
    }

    /// Smallest batch-boundary time strictly greater than `time`.
    pub fn time_of_next_bucket(&self, time: u64) -> u64 {
        (time / self.sec_per_window + 1) * self.sec_per_window
    }
}

impl FromStr for TtwDefinition {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for TtwDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.serialize())
    }
}
