//! Probe execution
//!
//! Runs one profile's step sequence against the backend:
//! auth, then write/read when a secret path is set, then revoke when
//! enabled. Every step is timed around its single backend call.

use crate::{
    config::Profile,
    error::ProbeError,
    session::SessionFactory,
    types::{BucketKind, ProbeOutcome, ProfileReport},
};
use log::{debug, error};
use std::{future::Future, sync::Arc};
use tokio::time::Instant;

/// Await a future and measure it, in seconds
async fn timed<F: Future>(f: F) -> (F::Output, f64) {
    let start = Instant::now();
    let output = f.await;
    (output, start.elapsed().as_secs_f64())
}

/// Executes profile probes through a session factory
pub struct ProbeExecutor {
    factory: Arc<dyn SessionFactory>,
}

impl ProbeExecutor {
    /// Create a new executor
    ///
    /// # Arguments
    ///
    /// * `factory` - Opens authenticated backend sessions
    pub fn new(factory: Arc<dyn SessionFactory>) -> Self {
        Self { factory }
    }

    /// Probe one profile
    ///
    /// Failure is fail-fast within the profile: a failed auth skips every
    /// other step and a failed write skips the read. Revocation runs
    /// whenever auth succeeded, regardless of write/read results.
    ///
    /// # Returns
    ///
    /// Ordered outcomes and the time spent on this profile
    pub async fn run_profile(&self, profile: &Profile) -> ProfileReport {
        let started = Instant::now();
        let name = profile.name.as_str();
        let mut outcomes = Vec::with_capacity(4);

        let (opened, duration) = timed(self.factory.open(profile)).await;
        let session = match opened {
            Ok(session) => {
                outcomes.push(ProbeOutcome::succeeded(BucketKind::Auth, name, duration));
                session
            }
            Err(source) => {
                let err = ProbeError::Auth {
                    profile: name.to_string(),
                    source,
                };
                outcomes.push(record_failure(err, duration));
                return report(profile, outcomes, started);
            }
        };

        if !profile.secret_path.is_empty() {
            let path = profile.secret_path.as_str();

            let (written, duration) = timed(session.write(path, &profile.secret_data)).await;
            match written {
                Ok(()) => {
                    outcomes.push(ProbeOutcome::succeeded(BucketKind::Write, name, duration));

                    let (read, duration) = timed(session.read(path)).await;
                    match read {
                        Ok(_) => {
                            outcomes.push(ProbeOutcome::succeeded(BucketKind::Read, name, duration))
                        }
                        Err(source) => {
                            let err = ProbeError::Read {
                                profile: name.to_string(),
                                path: path.to_string(),
                                source,
                            };
                            outcomes.push(record_failure(err, duration));
                        }
                    }
                }
                Err(source) => {
                    let err = ProbeError::Write {
                        profile: name.to_string(),
                        path: path.to_string(),
                        source,
                    };
                    outcomes.push(record_failure(err, duration));
                }
            }
        }

        if profile.revoke_token {
            let (revoked, duration) = timed(session.revoke_self()).await;
            match revoked {
                Ok(()) => outcomes.push(ProbeOutcome::succeeded(BucketKind::Revoke, name, duration)),
                Err(source) => {
                    let err = ProbeError::Revoke {
                        profile: name.to_string(),
                        source,
                    };
                    outcomes.push(record_failure(err, duration));
                }
            }
        }

        report(profile, outcomes, started)
    }
}

fn record_failure(err: ProbeError, duration: f64) -> ProbeOutcome {
    error!("{}", err);
    let profile = match &err {
        ProbeError::Auth { profile, .. }
        | ProbeError::Write { profile, .. }
        | ProbeError::Read { profile, .. }
        | ProbeError::Revoke { profile, .. } => profile.clone(),
    };
    ProbeOutcome::failed(err.bucket(), &profile, duration, err.to_string())
}

fn report(profile: &Profile, outcomes: Vec<ProbeOutcome>, started: Instant) -> ProfileReport {
    let elapsed = started.elapsed().as_secs_f64();
    debug!(
        "Profile {} probed in {:.6}s ({} steps)",
        profile.name,
        elapsed,
        outcomes.len()
    );
    ProfileReport {
        profile: profile.name.clone(),
        outcomes,
        elapsed,
    }
}
