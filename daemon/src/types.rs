//! Probe and snapshot type definitions
//!
//! Defines the data structures produced by the probe executor and handed
//! from the scheduler to the publisher.
//!
//! ## Organization
//!
//! - **Probe Types**: per-step outcomes, ephemeral within one cycle
//! - **Aggregate Types**: histograms, error counters and scrape bookkeeping
//!   assembled into a [`MetricsSnapshot`] at the end of a cycle

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use reliability_common::{BucketKey, BucketKind, CountingRule};

// ============================================================================
// Probe Types
// ============================================================================

/// Result of one timed probe step
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ProbeOutcome {
    /// Step category
    pub bucket: BucketKind,
    /// Profile the step ran for
    pub profile: String,
    /// Wall-clock duration of the backend call, in seconds
    pub duration: f64,
    /// Whether the backend call succeeded
    pub success: bool,
    /// Error message when the step failed
    pub error: Option<String>,
}

impl ProbeOutcome {
    pub fn succeeded(bucket: BucketKind, profile: &str, duration: f64) -> Self {
        Self {
            bucket,
            profile: profile.to_string(),
            duration,
            success: true,
            error: None,
        }
    }

    pub fn failed(bucket: BucketKind, profile: &str, duration: f64, error: String) -> Self {
        Self {
            bucket,
            profile: profile.to_string(),
            duration,
            success: false,
            error: Some(error),
        }
    }

    /// Key of the histogram and error counter this outcome feeds
    pub fn key(&self) -> BucketKey {
        BucketKey::new(self.bucket, self.profile.clone())
    }
}

/// Everything one profile produced during a cycle
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ProfileReport {
    /// Profile name
    pub profile: String,
    /// Outcomes in execution order
    pub outcomes: Vec<ProbeOutcome>,
    /// Time spent probing this profile, in seconds (no delay sleep)
    pub elapsed: f64,
}

impl ProfileReport {
    /// Whether at least one step failed
    pub fn has_failure(&self) -> bool {
        self.outcomes.iter().any(|o| !o.success)
    }

    /// Outcomes of a single category
    pub fn outcomes_for(&self, bucket: BucketKind) -> impl Iterator<Item = &ProbeOutcome> {
        self.outcomes.iter().filter(move |o| o.bucket == bucket)
    }
}

// ============================================================================
// Aggregate Types
// ============================================================================

/// Threshold-indexed observation counts for one bucket key
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LatencyBuckets {
    /// `(threshold seconds, count)` pairs, sorted by threshold
    pub counts: Vec<(f64, u64)>,
}

impl LatencyBuckets {
    /// Create zeroed buckets for a sorted threshold set
    pub fn new(thresholds: &[f64]) -> Self {
        Self {
            counts: thresholds.iter().map(|&le| (le, 0)).collect(),
        }
    }

    /// Increment every threshold the rule matches
    ///
    /// # Returns
    ///
    /// Number of thresholds incremented
    pub fn add_sample(&mut self, duration: f64, rule: CountingRule) -> usize {
        let mut incremented = 0;
        for (le, count) in self.counts.iter_mut() {
            if rule.counts(duration, *le) {
                *count += 1;
                incremented += 1;
            }
        }
        incremented
    }

    /// Count of the threshold equal to `le`, if present
    pub fn count_at(&self, le: f64) -> Option<u64> {
        self.counts
            .iter()
            .find(|(threshold, _)| *threshold == le)
            .map(|(_, count)| *count)
    }
}

/// Process-wide scrape bookkeeping
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ScrapeStats {
    /// Number of cycles started since process start
    pub total_scrapes: u64,
    /// When the last cycle started
    pub last_scrape_time: Option<DateTime<Utc>>,
    /// Sum of per-profile probe durations of the last cycle, in seconds
    pub last_scrape_duration_seconds: f64,
}

impl Default for ScrapeStats {
    fn default() -> Self {
        Self {
            total_scrapes: 0,
            last_scrape_time: None,
            last_scrape_duration_seconds: 0.0,
        }
    }
}

/// Histogram of one bucket key
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct HistogramSample {
    pub key: BucketKey,
    pub buckets: LatencyBuckets,
}

/// Error count of one bucket key for the last cycle
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ErrorSample {
    pub key: BucketKey,
    pub count: u64,
}

/// Consistent view handed to the publisher at the end of a cycle
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MetricsSnapshot {
    /// Scrape bookkeeping
    pub scrape: ScrapeStats,
    /// Latency histograms, ordered by key
    pub histograms: Vec<HistogramSample>,
    /// Error counters, ordered by key
    pub errors: Vec<ErrorSample>,
}

impl MetricsSnapshot {
    /// Error count for a key, if it is registered
    pub fn error_count(&self, key: &BucketKey) -> Option<u64> {
        self.errors.iter().find(|e| &e.key == key).map(|e| e.count)
    }

    /// Histogram for a key, if it is registered
    pub fn histogram(&self, key: &BucketKey) -> Option<&LatencyBuckets> {
        self.histograms
            .iter()
            .find(|h| &h.key == key)
            .map(|h| &h.buckets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_sample_at_least() {
        let mut buckets = LatencyBuckets::new(&[0.1, 0.5, 1.0]);
        assert_eq!(buckets.add_sample(0.5, CountingRule::AtLeast), 2);
        assert_eq!(buckets.count_at(0.1), Some(1));
        assert_eq!(buckets.count_at(0.5), Some(1));
        assert_eq!(buckets.count_at(1.0), Some(0));
    }

    #[test]
    fn test_add_sample_at_most() {
        let mut buckets = LatencyBuckets::new(&[0.1, 0.5, 1.0]);
        assert_eq!(buckets.add_sample(0.5, CountingRule::AtMost), 2);
        assert_eq!(buckets.count_at(0.1), Some(0));
        assert_eq!(buckets.count_at(0.5), Some(1));
        assert_eq!(buckets.count_at(1.0), Some(1));
    }

    #[test]
    fn test_report_failure_detection() {
        let report = ProfileReport {
            profile: "p".to_string(),
            outcomes: vec![
                ProbeOutcome::succeeded(BucketKind::Auth, "p", 0.01),
                ProbeOutcome::failed(BucketKind::Write, "p", 0.02, "denied".to_string()),
            ],
            elapsed: 0.03,
        };

        assert!(report.has_failure());
        assert_eq!(report.outcomes_for(BucketKind::Write).count(), 1);
        assert_eq!(report.outcomes_for(BucketKind::Read).count(), 0);
    }
}
