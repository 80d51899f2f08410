//! Shared constants for the reliability exporter
//!
//! These constants are used by the configuration layer, the aggregator and
//! the publisher so that defaults stay consistent across the workspace.

// ============================================================================
// Latency Thresholds (in seconds)
// ============================================================================

/// Default histogram thresholds, in seconds
///
/// Every bucket key is created with this threshold set unless the
/// configuration overrides it.
pub const DEFAULT_LATENCY_THRESHOLDS: [f64; 15] = [
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 20.0, 30.0, 40.0, 50.0,
];

/// Profile key used for cycle-wide (`Total`) buckets
pub const ALL_PROFILES_KEY: &str = "all";

// ============================================================================
// Scheduler Defaults
// ============================================================================

/// Default interval between two probe cycles (milliseconds)
pub const DEFAULT_REPEAT_INTERVAL_MS: u64 = 1_000;

// ============================================================================
// Pushgateway Defaults
// ============================================================================

/// Default Pushgateway address
pub const DEFAULT_PGW_ADDR: &str = "127.0.0.1:9091";

/// Default metric namespace (prefix of every metric name)
pub const DEFAULT_PGW_NAMESPACE: &str = "vault_reliability_exporter";

/// Default Pushgateway job name
pub const DEFAULT_PGW_JOB: &str = "vault_reliability_job";

/// Default Pushgateway request timeout (milliseconds)
pub const DEFAULT_PGW_TIMEOUT_MS: u64 = 30_000;

// ============================================================================
// Vault Defaults
// ============================================================================

/// Default Vault address
pub const DEFAULT_VAULT_ADDR: &str = "https://127.0.0.1:8200";

/// Default Vault client timeout (milliseconds)
pub const DEFAULT_VAULT_TIMEOUT_MS: u64 = 30_000;

/// Default number of extra attempts for retryable Vault requests
pub const DEFAULT_VAULT_MAX_RETRIES: u32 = 2;

/// Backoff between two Vault request attempts (milliseconds)
pub const VAULT_RETRY_BACKOFF_MS: u64 = 1_000;

/// Auth path of the profile created when none is configured
pub const DEFAULT_PROFILE_AUTH_PATH: &str = "auth/userpass/login/guest";

/// Password of the profile created when none is configured
pub const DEFAULT_PROFILE_PASSWORD: &str = "guest";

// ============================================================================
// Credentials
// ============================================================================

/// Prefix of per-profile environment overrides (`VRE_PROFILE_<NAME>_...`)
pub const ENV_PREFIX: &str = "VRE";

/// Auth data key eligible for service-account token injection
pub const JWT_AUTH_KEY: &str = "jwt";

/// Placeholder value replaced by the service-account token
pub const JWT_PLACEHOLDER: &str = "%jwt%";

/// Location of the Kubernetes service-account token
pub const KUBERNETES_JWT_TOKEN_PATH: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";

// ============================================================================
// Local Telemetry
// ============================================================================

/// Default configuration file location
pub const DEFAULT_CONFIG_PATH: &str = "/etc/vault-reliability-exporter/config.yaml";

/// Default listen address of the local scrape endpoint
pub const DEFAULT_LISTEN_ADDRESS: &str = ":9356";

/// Default path of the local scrape endpoint
pub const DEFAULT_METRICS_PATH: &str = "/metrics";
