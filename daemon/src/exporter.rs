//! Metrics publishing
//!
//! Applies cycle snapshots to a Prometheus registry and pushes the registry
//! to a Pushgateway.
//!
//! ## Exported metrics
//!
//! All names carry the configured namespace prefix and constant labels.
//!
//! - `execution_time_bucket{le,type,profile}` - latency threshold counts
//! - `errors_total{type,profile}` - failures in the last cycle
//! - `scrape_time` - start of the last cycle (unix seconds)
//! - `scrapes_total` - cycles since process start
//! - `last_scrape_duration_seconds` - probe time of the last cycle
//! - `build_info{version}` - always 1

use crate::{
    config::{BasicAuth, PushgatewayOptions},
    error::PublishError,
    types::MetricsSnapshot,
};
use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use log::{debug, info};
use prometheus::{Encoder, Gauge, GaugeVec, IntCounter, Opts, Registry, TextEncoder, TEXT_FORMAT};
use reqwest::{header::CONTENT_TYPE, Client, Url};
use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
    time::Duration,
};

/// Trait for snapshot sinks
#[async_trait]
pub trait MetricsPublisher: Send + Sync {
    /// Publish a snapshot
    ///
    /// Delivery is best effort: a failed snapshot is not retried or kept.
    async fn publish(&self, snapshot: &MetricsSnapshot) -> Result<(), PublishError>;
}

/// Registry holding the exporter's metric families
pub struct ExporterMetrics {
    registry: Registry,
    execution_time: GaugeVec,
    errors: GaugeVec,
    scrape_time: Gauge,
    scrapes_total: IntCounter,
    last_scrape_duration: Gauge,
}

impl ExporterMetrics {
    /// Create and register every metric family
    ///
    /// # Arguments
    ///
    /// * `namespace` - Metric name prefix
    /// * `labels` - Constant labels attached to every metric
    pub fn new(namespace: &str, labels: &BTreeMap<String, String>) -> Result<Self, PublishError> {
        let opts = |name: &str, help: &str| metric_opts(namespace, labels, name, help);

        let execution_time = GaugeVec::new(
            opts("execution_time_bucket", "Execution time."),
            &["le", "type", "profile"],
        )?;
        let errors = GaugeVec::new(opts("errors_total", "Current total errors."), &["type", "profile"])?;
        let scrape_time = Gauge::with_opts(opts("scrape_time", "The last scrape time."))?;
        let scrapes_total =
            IntCounter::with_opts(opts("scrapes_total", "Current total vault scrapes."))?;
        let last_scrape_duration = Gauge::with_opts(opts(
            "last_scrape_duration_seconds",
            "The last scrape duration.",
        ))?;

        let registry = Registry::new();
        registry.register(Box::new(build_info(namespace, labels)?))?;
        registry.register(Box::new(execution_time.clone()))?;
        registry.register(Box::new(errors.clone()))?;
        registry.register(Box::new(scrape_time.clone()))?;
        registry.register(Box::new(scrapes_total.clone()))?;
        registry.register(Box::new(last_scrape_duration.clone()))?;

        Ok(Self {
            registry,
            execution_time,
            errors,
            scrape_time,
            scrapes_total,
            last_scrape_duration,
        })
    }

    /// Copy a snapshot into the registry
    pub fn apply(&self, snapshot: &MetricsSnapshot) {
        for sample in &snapshot.histograms {
            for (le, count) in &sample.buckets.counts {
                let le = le.to_string();
                self.execution_time
                    .with_label_values(&[&le, sample.key.kind.as_str(), &sample.key.profile])
                    .set(*count as f64);
            }
        }

        for sample in &snapshot.errors {
            self.errors
                .with_label_values(&[sample.key.kind.as_str(), &sample.key.profile])
                .set(sample.count as f64);
        }

        let scrape = &snapshot.scrape;
        if let Some(at) = scrape.last_scrape_time {
            self.scrape_time.set(at.timestamp_millis() as f64 / 1000.0);
        }
        let current = self.scrapes_total.get();
        if scrape.total_scrapes > current {
            self.scrapes_total.inc_by(scrape.total_scrapes - current);
        }
        self.last_scrape_duration
            .set(scrape.last_scrape_duration_seconds);
    }

    /// Encode the registry in the text exposition format
    pub fn encode(&self) -> Result<String, PublishError> {
        encode_registry(&self.registry)
    }

    /// Handle to the registry, for the local scrape endpoint
    pub fn registry(&self) -> Registry {
        self.registry.clone()
    }
}

fn metric_opts(namespace: &str, labels: &BTreeMap<String, String>, name: &str, help: &str) -> Opts {
    let const_labels: HashMap<String, String> =
        labels.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    Opts::new(name, help)
        .namespace(namespace)
        .const_labels(const_labels)
}

fn build_info(namespace: &str, labels: &BTreeMap<String, String>) -> Result<GaugeVec, PublishError> {
    let info = GaugeVec::new(
        metric_opts(namespace, labels, "build_info", "Exporter build information."),
        &["version"],
    )?;
    info.with_label_values(&[env!("CARGO_PKG_VERSION")]).set(1.0);
    Ok(info)
}

/// Registry with only `build_info`, served when exporter metrics stay off the
/// local endpoint
pub fn build_info_registry(
    namespace: &str,
    labels: &BTreeMap<String, String>,
) -> Result<Registry, PublishError> {
    let registry = Registry::new();
    registry.register(Box::new(build_info(namespace, labels)?))?;
    Ok(registry)
}

/// Encode a registry in the text exposition format
pub fn encode_registry(registry: &Registry) -> Result<String, PublishError> {
    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&registry.gather(), &mut buffer)
        .map_err(|e| PublishError::Encode(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| PublishError::Encode(e.to_string()))
}

/// Hostname used as the `instance` grouping key when none is configured
pub fn default_instance() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .or_else(|| std::fs::read_to_string("/etc/hostname").ok())
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

/// Pushgateway target
pub struct Pushgateway {
    client: Client,
    url: Url,
    basic_auth: Option<BasicAuth>,
}

impl Pushgateway {
    /// Create a push target from the Pushgateway options
    pub fn new(options: &PushgatewayOptions) -> anyhow::Result<Self> {
        let instance = if options.instance.is_empty() {
            default_instance()
        } else {
            options.instance.clone()
        };
        Self::with_grouping(
            &options.url,
            &options.job,
            &instance,
            options.timeout,
            options.basic_auth.clone(),
        )
    }

    /// Create a push target for an explicit `job`/`instance` group
    pub fn with_grouping(
        address: &str,
        job: &str,
        instance: &str,
        timeout: Duration,
        basic_auth: Option<BasicAuth>,
    ) -> anyhow::Result<Self> {
        let base = if address.contains("://") {
            address.to_string()
        } else {
            format!("http://{}", address)
        };
        let mut url = Url::parse(&base)?;
        let (job_label, job) = grouping_segment("job", job);
        let (instance_label, instance) = grouping_segment("instance", instance);
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("Pushgateway URL cannot be a base: {}", base))?
            .pop_if_empty()
            .extend([
                "metrics",
                job_label.as_str(),
                job.as_str(),
                instance_label.as_str(),
                instance.as_str(),
            ]);

        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            url,
            basic_auth,
        })
    }

    /// Replace the group with `body` (HTTP PUT)
    pub async fn push(&self, body: String) -> Result<(), PublishError> {
        let mut request = self
            .client
            .put(self.url.clone())
            .header(CONTENT_TYPE, TEXT_FORMAT)
            .body(body);
        if let Some(auth) = &self.basic_auth {
            request = request.basic_auth(&auth.username, Some(&auth.password));
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PublishError::Status {
                status: status.as_u16(),
                body,
            });
        }
        debug!("Pushed metrics to {}", self.url);
        Ok(())
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

/// Label and value path segments of one grouping key
///
/// The Pushgateway rejects `%2F` in a grouping value, so values holding a
/// `/` (and empty values) use the `<label>@base64/<url-safe base64>` form.
fn grouping_segment(label: &str, value: &str) -> (String, String) {
    if value.is_empty() {
        (format!("{}@base64", label), "=".to_string())
    } else if value.contains('/') {
        (format!("{}@base64", label), URL_SAFE_NO_PAD.encode(value))
    } else {
        (label.to_string(), value.to_string())
    }
}

/// Publisher feeding the registry and, optionally, a Pushgateway
pub struct PrometheusPublisher {
    metrics: Arc<ExporterMetrics>,
    push: Option<Pushgateway>,
}

impl PrometheusPublisher {
    /// Create a new publisher
    ///
    /// # Arguments
    ///
    /// * `metrics` - Registry shared with the local scrape endpoint
    /// * `push` - Pushgateway target, `None` to only update the registry
    pub fn new(metrics: Arc<ExporterMetrics>, push: Option<Pushgateway>) -> Self {
        if let Some(target) = &push {
            info!("Pushing metrics to {}", target.url());
        }
        Self { metrics, push }
    }
}

#[async_trait]
impl MetricsPublisher for PrometheusPublisher {
    async fn publish(&self, snapshot: &MetricsSnapshot) -> Result<(), PublishError> {
        self.metrics.apply(snapshot);
        match &self.push {
            Some(target) => target.push(self.metrics.encode()?).await,
            None => Ok(()),
        }
    }
}
