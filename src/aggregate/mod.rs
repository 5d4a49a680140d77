use std::collections::btree_map;
use std::collections::BTreeMap;

use thiserror::Error;
use tracing::{debug, warn};

use crate::drain::Batches;

/// Per-topic aggregation failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AggregateError {
    #[error("topic has {distinct} distinct values, limit is {limit}")]
    CardinalityExceeded { distinct: usize, limit: usize },
}

/// Occurrence count per distinct payload value of one topic.
///
/// Values iterate in lexicographic order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrequencyDistribution {
    counts: BTreeMap<String, u64>,
}

impl FrequencyDistribution {
    /// Creates an empty distribution.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one occurrence of `value`.
    pub fn record(&mut self, value: &str) {
        match self.counts.get_mut(value) {
            Some(count) => *count += 1,
            None => {
                self.counts.insert(value.to_string(), 1);
            }
        }
    }

    /// Returns the count for `value`, zero if never seen.
    pub fn get(&self, value: &str) -> u64 {
        self.counts.get(value).copied().unwrap_or(0)
    }

    /// Sum of all counts.
    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    /// Number of distinct values.
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Iterates `(value, count)` pairs in value order.
    pub fn iter(&self) -> btree_map::Iter<'_, String, u64> {
        self.counts.iter()
    }
}

impl<'a> FromIterator<&'a str> for FrequencyDistribution {
    fn from_iter<I: IntoIterator<Item = &'a str>>(iter: I) -> Self {
        let mut dist = Self::new();
        for value in iter {
            dist.record(value);
        }
        dist
    }
}

impl<'a> IntoIterator for &'a FrequencyDistribution {
    type Item = (&'a String, &'a u64);
    type IntoIter = btree_map::Iter<'a, String, u64>;

    fn into_iter(self) -> Self::IntoIter {
        self.counts.iter()
    }
}

/// Topic name to distribution for one pipeline run.
///
/// Only topics with at least one observed message are present.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregatedSnapshot {
    distributions: BTreeMap<String, FrequencyDistribution>,
}

impl AggregatedSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a distribution. Empty distributions are ignored.
    pub fn insert(&mut self, topic: impl Into<String>, dist: FrequencyDistribution) {
        if dist.is_empty() {
            return;
        }
        self.distributions.insert(topic.into(), dist);
    }

    pub fn get(&self, topic: &str) -> Option<&FrequencyDistribution> {
        self.distributions.get(topic)
    }

    pub fn contains(&self, topic: &str) -> bool {
        self.distributions.contains_key(topic)
    }

    /// Number of topics.
    pub fn len(&self) -> usize {
        self.distributions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.distributions.is_empty()
    }

    /// Iterates topic names in order.
    pub fn topics(&self) -> impl Iterator<Item = &str> {
        self.distributions.keys().map(String::as_str)
    }

    /// Iterates `(topic, distribution)` pairs in topic order.
    pub fn iter(&self) -> btree_map::Iter<'_, String, FrequencyDistribution> {
        self.distributions.iter()
    }
}

/// Result of aggregating one drain's batches.
#[derive(Debug, Default)]
pub struct Aggregation {
    pub snapshot: AggregatedSnapshot,
    /// Topics left out of the snapshot, with the reason.
    pub failed: Vec<(String, AggregateError)>,
}

/// Counts payload values per topic.
pub struct Aggregator {
    max_distinct_values: usize,
}

impl Aggregator {
    /// Creates an aggregator. `max_distinct_values == 0` disables the cap.
    pub fn new(max_distinct_values: usize) -> Self {
        Self {
            max_distinct_values,
        }
    }

    /// Aggregates every topic independently; a failing topic does not affect the rest.
    pub fn aggregate(&self, batches: &Batches) -> Aggregation {
        let mut out = Aggregation::default();

        for (topic, batch) in batches {
            if batch.is_empty() {
                continue;
            }

            match self.aggregate_topic(batch) {
                Ok(dist) => {
                    debug!(
                        topic = %topic,
                        messages = batch.len(),
                        distinct = dist.len(),
                        "aggregated topic",
                    );
                    out.snapshot.insert(topic.clone(), dist);
                }
                Err(e) => {
                    warn!(topic = %topic, error = %e, "topic aggregation failed, skipping");
                    out.failed.push((topic.clone(), e));
                }
            }
        }

        out
    }

    /// Builds the distribution for a single batch.
    pub fn aggregate_topic(&self, batch: &[String]) -> Result<FrequencyDistribution, AggregateError> {
        let dist: FrequencyDistribution = batch.iter().map(String::as_str).collect();

        if self.max_distinct_values > 0 && dist.len() > self.max_distinct_values {
            return Err(AggregateError::CardinalityExceeded {
                distinct: dist.len(),
                limit: self.max_distinct_values,
            });
        }

        Ok(dist)
    }
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new(0)
    }
}
