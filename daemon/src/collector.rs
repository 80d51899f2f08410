//! Latency aggregation
//!
//! Accumulates probe durations into per-key histograms and tracks the
//! per-cycle error counters.
//!
//! Histogram counts live for the whole process; error counters are zeroed at
//! the start of every cycle. The two tables are independent: resetting
//! errors never touches a histogram.

use crate::types::*;
use anyhow::{bail, Result};
use log::debug;
use std::collections::BTreeMap;

/// Latency and error aggregator
///
/// Owned exclusively by the scheduler, so it needs no interior locking.
#[derive(Debug, Clone)]
pub struct LatencyAggregator {
    /// Sorted, deduplicated thresholds (seconds)
    thresholds: Vec<f64>,
    /// Which thresholds an observation increments
    rule: CountingRule,
    /// Cumulative latency counts, per key
    histograms: BTreeMap<BucketKey, LatencyBuckets>,
    /// Failures in the current cycle, per key
    errors: BTreeMap<BucketKey, u64>,
}

impl LatencyAggregator {
    /// Create an aggregator with no registered keys
    ///
    /// # Arguments
    ///
    /// * `thresholds` - Histogram thresholds in seconds (any order)
    /// * `rule` - Counting rule applied by [`observe`](Self::observe)
    ///
    /// # Returns
    ///
    /// Error if the threshold set is empty or contains a non-finite value
    pub fn new(thresholds: &[f64], rule: CountingRule) -> Result<Self> {
        if thresholds.is_empty() {
            bail!("At least one latency threshold is required");
        }
        if let Some(bad) = thresholds.iter().find(|t| !t.is_finite()) {
            bail!("Latency threshold must be finite, got {}", bad);
        }

        let mut sorted = thresholds.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));
        sorted.dedup();

        Ok(Self {
            thresholds: sorted,
            rule,
            histograms: BTreeMap::new(),
            errors: BTreeMap::new(),
        })
    }

    /// Create an aggregator with the startup key set registered
    ///
    /// Registers `Total/all` and `{Auth, Read, Write}` for every profile;
    /// `Revoke` keys are added only when `revoke_enabled` is set.
    pub fn for_profiles<'a>(
        thresholds: &[f64],
        rule: CountingRule,
        profiles: impl IntoIterator<Item = &'a str>,
        revoke_enabled: bool,
    ) -> Result<Self> {
        let mut aggregator = Self::new(thresholds, rule)?;
        aggregator.register(BucketKey::total());

        for profile in profiles {
            for kind in BucketKind::PER_PROFILE {
                aggregator.register(BucketKey::new(kind, profile));
            }
            if revoke_enabled {
                aggregator.register(BucketKey::new(BucketKind::Revoke, profile));
            }
        }

        Ok(aggregator)
    }

    /// Register a key with zeroed histogram and error counter
    ///
    /// Registering an existing key is a no-op.
    pub fn register(&mut self, key: BucketKey) {
        let thresholds = &self.thresholds;
        self.histograms
            .entry(key.clone())
            .or_insert_with(|| LatencyBuckets::new(thresholds));
        self.errors.entry(key).or_insert(0);
    }

    /// Record a duration (seconds) under a key
    ///
    /// Unregistered keys are registered on first use.
    pub fn observe(&mut self, key: &BucketKey, duration: f64) {
        if !self.histograms.contains_key(key) {
            self.register(key.clone());
        }
        let rule = self.rule;
        if let Some(buckets) = self.histograms.get_mut(key) {
            let incremented = buckets.add_sample(duration, rule);
            debug!("{} = {:.6}s ({} thresholds incremented)", key, duration, incremented);
        }
    }

    /// Increment the error counter of a key
    pub fn record_error(&mut self, key: &BucketKey) {
        *self.errors.entry(key.clone()).or_insert(0) += 1;
    }

    /// Zero the error counter of a key (histograms are untouched)
    pub fn reset(&mut self, key: &BucketKey) {
        if let Some(count) = self.errors.get_mut(key) {
            *count = 0;
        }
    }

    /// Zero every error counter (histograms are untouched)
    pub fn reset_errors(&mut self) {
        for count in self.errors.values_mut() {
            *count = 0;
        }
    }

    /// Current error count of a key
    pub fn error_count(&self, key: &BucketKey) -> Option<u64> {
        self.errors.get(key).copied()
    }

    /// Histogram of a key
    pub fn histogram(&self, key: &BucketKey) -> Option<&LatencyBuckets> {
        self.histograms.get(key)
    }

    /// Registered keys, in report order
    pub fn keys(&self) -> impl Iterator<Item = &BucketKey> {
        self.histograms.keys()
    }

    /// Threshold set in use
    pub fn thresholds(&self) -> &[f64] {
        &self.thresholds
    }

    /// Counting rule in use
    pub fn rule(&self) -> CountingRule {
        self.rule
    }

    /// Copy histograms and error counters into a snapshot
    pub fn snapshot(&self, scrape: ScrapeStats) -> MetricsSnapshot {
        MetricsSnapshot {
            scrape,
            histograms: self
                .histograms
                .iter()
                .map(|(key, buckets)| HistogramSample {
                    key: key.clone(),
                    buckets: buckets.clone(),
                })
                .collect(),
            errors: self
                .errors
                .iter()
                .map(|(key, &count)| ErrorSample {
                    key: key.clone(),
                    count,
                })
                .collect(),
        }
    }
}
