//! Vault Reliability Exporter Library
//!
//! Probes a Vault cluster on a fixed interval with a set of credential
//! profiles, aggregates step latencies and failures into threshold
//! counters and publishes them as Prometheus metrics.

pub mod collector;
pub mod config;
pub mod duration;
pub mod error;
pub mod executor;
pub mod exporter;
pub mod scheduler;
pub mod server;
pub mod session;
pub mod types;
pub mod vault;

pub use collector::LatencyAggregator;
pub use config::{Config, CredentialResolver, KubernetesJwtResolver, Profile};
pub use error::{ProbeError, PublishError, SessionError};
pub use executor::ProbeExecutor;
pub use exporter::{ExporterMetrics, MetricsPublisher, PrometheusPublisher, Pushgateway};
pub use scheduler::{ProbeScheduler, SchedulerSettings, SchedulerState};
pub use session::{Session, SessionFactory};
pub use types::*;
pub use vault::VaultSessionFactory;
