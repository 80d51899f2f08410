//! Vault Reliability Exporter
//!
//! Periodically authenticates against Vault with every configured profile,
//! writes and reads a probe secret, optionally revokes the token, and
//! exports the latency and error counters to Prometheus.
//!
//! ## Usage
//!
//! ```bash
//! # Validate a configuration file
//! vault-reliability-exporter --config config.yaml --check
//!
//! # Run with JSON logs and a local scrape endpoint
//! vault-reliability-exporter --config config.yaml --log-format json --web.listen-address :9356
//! ```

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use log::{error, info};
use reliability_common::{DEFAULT_CONFIG_PATH, DEFAULT_LISTEN_ADDRESS, DEFAULT_METRICS_PATH};
use std::{io::Write, path::PathBuf, sync::Arc};
use tokio::signal;
use vault_reliability_exporter::{
    duration::format_duration,
    exporter::{build_info_registry, ExporterMetrics, PrometheusPublisher, Pushgateway},
    server, Config, LatencyAggregator, ProbeExecutor, ProbeScheduler, SchedulerSettings,
    VaultSessionFactory,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Txt,
    Json,
}

/// Vault reliability prober and Prometheus exporter
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Path to the YAML configuration
    #[clap(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Print the resolved configuration and exit
    #[clap(long)]
    check: bool,

    /// Debug logging
    #[clap(short, long)]
    debug: bool,

    /// Log line format
    #[clap(long, value_enum, default_value = "txt")]
    log_format: LogFormat,

    /// Address of the local scrape endpoint
    #[clap(long = "web.listen-address", default_value = DEFAULT_LISTEN_ADDRESS)]
    listen_address: String,

    /// Path of the local scrape endpoint
    #[clap(long = "web.telemetry-path", default_value = DEFAULT_METRICS_PATH)]
    telemetry_path: String,
}

fn init_logging(args: &Args) {
    let mut builder = env_logger::Builder::from_default_env();
    if args.debug {
        builder.filter_level(log::LevelFilter::Debug);
    } else if std::env::var_os("RUST_LOG").is_none() {
        builder.filter_level(log::LevelFilter::Info);
    }

    if args.log_format == LogFormat::Json {
        builder.format(|buf, record| {
            let line = serde_json::json!({
                "ts": chrono::Utc::now().to_rfc3339(),
                "level": record.level().to_string(),
                "target": record.target(),
                "msg": record.args().to_string(),
            });
            writeln!(buf, "{}", line)
        });
    }

    builder.init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args);

    let config = Config::load(&args.config)?;

    if args.check {
        print!("{}", config.to_redacted_yaml()?);
        return Ok(());
    }

    info!("Starting vault-reliability-exporter {}", env!("CARGO_PKG_VERSION"));
    info!("   Vault: {}", config.vault.url);
    info!("   Profiles: {}", config.vault.profiles.len());
    info!("   Interval: {}", format_duration(config.repeat_interval));
    info!("   Delay: {}", format_duration(config.delay));
    info!("   Counting rule: {:?}", config.telemetry.bucket_rule);

    let metrics = Arc::new(
        ExporterMetrics::new(&config.pgw.namespace, &config.pgw.labels)
            .context("Failed to register metrics")?,
    );

    let push = if config.telemetry.pushgateway_enabled() {
        Some(Pushgateway::new(&config.pgw).context("Invalid Pushgateway configuration")?)
    } else {
        info!("Pushgateway disabled");
        None
    };
    let publisher = Arc::new(PrometheusPublisher::new(Arc::clone(&metrics), push));

    // Exporter metrics reach the local endpoint only when http_enabled;
    // build_info is always served.
    let scraped = if config.telemetry.http_enabled() {
        metrics.registry()
    } else {
        build_info_registry(&config.pgw.namespace, &config.pgw.labels)
            .context("Failed to register build info")?
    };
    let address = args.listen_address.clone();
    let path = args.telemetry_path.clone();
    tokio::spawn(async move {
        if let Err(e) = server::serve(&address, &path, scraped).await {
            error!("Metrics server error: {:#}", e);
        }
    });

    let factory = VaultSessionFactory::new(
        &config.vault.url,
        config.vault.timeout,
        config.vault.max_retries(),
    )
    .context("Failed to create Vault client")?;

    let aggregator = LatencyAggregator::for_profiles(
        &config.telemetry.thresholds(),
        config.telemetry.bucket_rule,
        config.vault.profiles.iter().map(|p| p.name.as_str()),
        config.revoke_enabled(),
    )?;

    let mut scheduler = ProbeScheduler::new(
        SchedulerSettings {
            interval: config.repeat_interval,
            delay: config.delay,
        },
        config.vault.profiles.clone(),
        ProbeExecutor::new(Arc::new(factory)),
        aggregator,
        publisher,
    );

    tokio::select! {
        _ = scheduler.run() => {}
        _ = signal::ctrl_c() => {
            info!("Interrupted, shutting down...");
        }
    }

    info!(
        "Completed {} probe cycle(s)",
        scheduler.scrape().total_scrapes
    );

    Ok(())
}
