//! Shared key types for latency buckets and error counters
//!
//! Buckets are addressed by a composite [`BucketKey`] rather than by
//! concatenated strings, so labels never have to be parsed back apart.

use core::fmt;
use serde::{Deserialize, Serialize};

use crate::constants::ALL_PROFILES_KEY;

/// Probe step category
///
/// The derived ordering is the order buckets are reported in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BucketKind {
    /// Whole cycle, keyed by [`ALL_PROFILES_KEY`]
    Total,
    /// Authentication / login
    Auth,
    /// Secret read-back
    Read,
    /// Secret write
    Write,
    /// Self token revocation
    Revoke,
}

impl BucketKind {
    /// Categories registered for every profile
    pub const PER_PROFILE: [BucketKind; 3] = [BucketKind::Auth, BucketKind::Read, BucketKind::Write];

    /// Label value used in exported metrics (`type="..."`)
    pub fn as_str(&self) -> &'static str {
        match self {
            BucketKind::Total => "total",
            BucketKind::Auth => "auth",
            BucketKind::Read => "read",
            BucketKind::Write => "write",
            BucketKind::Revoke => "revoke",
        }
    }
}

impl fmt::Display for BucketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Composite key of a latency histogram or error counter
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BucketKey {
    /// Step category
    pub kind: BucketKind,
    /// Profile name, or [`ALL_PROFILES_KEY`] for cycle-wide buckets
    pub profile: String,
}

impl BucketKey {
    pub fn new(kind: BucketKind, profile: impl Into<String>) -> Self {
        Self {
            kind,
            profile: profile.into(),
        }
    }

    /// The `Total/all` key
    pub fn total() -> Self {
        Self::new(BucketKind::Total, ALL_PROFILES_KEY)
    }
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.profile)
    }
}

/// Rule deciding which thresholds an observation increments
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CountingRule {
    /// Threshold `t` counts the observation when `duration >= t`
    /// ("at least this slow"). Counts decrease as thresholds grow.
    #[default]
    AtLeast,
    /// Threshold `t` counts the observation when `duration <= t`,
    /// the conventional cumulative histogram.
    AtMost,
}

impl CountingRule {
    /// Whether an observation of `duration` seconds lands in threshold `le`
    pub fn counts(&self, duration: f64, le: f64) -> bool {
        match self {
            CountingRule::AtLeast => duration >= le,
            CountingRule::AtMost => duration <= le,
        }
    }
}
