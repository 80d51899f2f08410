//! Configuration loading
//!
//! Reads the YAML configuration, applies defaults and per-profile
//! environment overrides, resolves credential placeholders and validates
//! the result. Any error here is fatal at startup.

use crate::duration::serde_format;
use anyhow::{bail, Context, Result};
use log::{debug, info};
use reliability_common::*;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{
    collections::{BTreeMap, HashSet},
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

const REDACTED: &str = "<redacted>";

/// Root configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Pushgateway settings
    #[serde(rename = "pgw_config")]
    pub pgw: PushgatewayOptions,
    /// Vault settings and probe profiles
    #[serde(rename = "vault_config")]
    pub vault: VaultOptions,
    /// Interval between two probe cycles
    #[serde(with = "serde_format")]
    pub repeat_interval: Duration,
    /// Pause between two consecutive profiles of one cycle
    #[serde(with = "serde_format")]
    pub delay: Duration,
    /// Publishing toggles and histogram layout
    #[serde(rename = "telemetry_config")]
    pub telemetry: TelemetryOptions,
}

/// Publishing toggles and histogram layout
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryOptions {
    /// Push snapshots to the Pushgateway (default: true)
    pub pushgateway_enabled: Option<bool>,
    /// Expose exporter metrics on the local scrape endpoint (default: false)
    pub http_enabled: Option<bool>,
    /// Threshold counting rule
    pub bucket_rule: CountingRule,
    /// Histogram thresholds in seconds, replacing the defaults
    pub buckets: Option<Vec<f64>>,
}

impl TelemetryOptions {
    pub fn pushgateway_enabled(&self) -> bool {
        self.pushgateway_enabled.unwrap_or(true)
    }

    pub fn http_enabled(&self) -> bool {
        self.http_enabled.unwrap_or(false)
    }

    /// Thresholds in effect
    pub fn thresholds(&self) -> Vec<f64> {
        self.buckets
            .clone()
            .unwrap_or_else(|| DEFAULT_LATENCY_THRESHOLDS.to_vec())
    }

    fn set_defaults(&mut self) {
        self.pushgateway_enabled.get_or_insert(true);
        self.http_enabled.get_or_insert(false);
    }
}

/// Pushgateway settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PushgatewayOptions {
    /// Pushgateway address (`http://` is assumed when no scheme is given)
    pub url: String,
    #[serde(with = "serde_format")]
    pub timeout: Duration,
    pub basic_auth: Option<BasicAuth>,
    /// Prefix of every metric name
    pub namespace: String,
    /// `instance` grouping key; the hostname when empty
    pub instance: String,
    /// `job` grouping key
    pub job: String,
    /// Constant labels attached to every metric
    pub labels: BTreeMap<String, String>,
}

impl PushgatewayOptions {
    fn set_defaults(&mut self) {
        if self.url.is_empty() {
            self.url = DEFAULT_PGW_ADDR.to_string();
        }
        if self.namespace.is_empty() {
            self.namespace = DEFAULT_PGW_NAMESPACE.to_string();
        }
        if self.job.is_empty() {
            self.job = DEFAULT_PGW_JOB.to_string();
        }
        if self.timeout.is_zero() {
            self.timeout = Duration::from_millis(DEFAULT_PGW_TIMEOUT_MS);
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BasicAuth {
    pub username: String,
    pub password: String,
}

/// Vault settings and probe profiles
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultOptions {
    pub url: String,
    #[serde(with = "serde_format")]
    pub timeout: Duration,
    /// Extra attempts for retryable requests (default: 2)
    pub max_retries: Option<u32>,
    pub profiles: Vec<Profile>,
}

impl VaultOptions {
    pub fn max_retries(&self) -> u32 {
        self.max_retries.unwrap_or(DEFAULT_VAULT_MAX_RETRIES)
    }

    fn set_defaults<F>(&mut self, env: &F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if self.url.is_empty() {
            self.url = DEFAULT_VAULT_ADDR.to_string();
        }
        if self.timeout.is_zero() {
            self.timeout = Duration::from_millis(DEFAULT_VAULT_TIMEOUT_MS);
        }
        self.max_retries.get_or_insert(DEFAULT_VAULT_MAX_RETRIES);
        if self.profiles.is_empty() {
            self.profiles.push(Profile::guest());
        }
        for (i, profile) in self.profiles.iter_mut().enumerate() {
            if profile.name.is_empty() {
                profile.name = format!("profile{}", i);
            }
            profile.apply_env_overrides(env);
            profile.set_defaults();
        }
    }
}

/// One independent probe target
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Profile {
    /// Unique profile name
    pub name: String,
    /// Login path, e.g. `auth/approle/login`
    pub auth_path: String,
    /// Login request body
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub auth_data: Map<String, Value>,
    /// Static token; skips the login call
    #[serde(skip_serializing_if = "String::is_empty")]
    pub auth_token: String,
    /// Revoke the session token after probing
    pub revoke_token: bool,
    /// Secret written then read back; write/read are skipped when empty
    pub secret_path: String,
    /// Payload written to `secret_path`
    pub secret_data: Map<String, Value>,
}

impl Profile {
    /// Profile probed when none is configured
    fn guest() -> Self {
        let mut auth_data = Map::new();
        auth_data.insert(
            "password".to_string(),
            Value::String(DEFAULT_PROFILE_PASSWORD.to_string()),
        );
        Self {
            auth_path: DEFAULT_PROFILE_AUTH_PATH.to_string(),
            auth_data,
            ..Self::default()
        }
    }

    fn env_key(&self, suffix: &str) -> String {
        format!(
            "{}_PROFILE_{}_{}",
            ENV_PREFIX,
            self.name.to_uppercase(),
            suffix
        )
    }

    /// Apply `VRE_PROFILE_<NAME>_{AUTH_DATA,AUTH_TOKEN,AUTH_PATH}`
    ///
    /// An `AUTH_DATA` value that is not a JSON object is ignored.
    pub fn apply_env_overrides<F>(&mut self, env: &F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = env(&self.env_key("AUTH_DATA")) {
            match serde_json::from_str::<Map<String, Value>>(&raw) {
                Ok(data) => self.auth_data = data,
                Err(e) => debug!("Ignoring auth data override for {}: {}", self.name, e),
            }
        }
        if let Some(token) = env(&self.env_key("AUTH_TOKEN")) {
            self.auth_token = token;
        }
        if let Some(path) = env(&self.env_key("AUTH_PATH")) {
            self.auth_path = path;
        }
    }

    fn set_defaults(&mut self) {
        if self.secret_data.is_empty() {
            self.secret_data
                .insert("foo".to_string(), Value::String("bar".to_string()));
        }
        if !self.auth_token.is_empty() {
            self.auth_data.clear();
        }
        if !self.auth_data.is_empty() {
            self.auth_token.clear();
        }
    }

    /// Replace placeholder credentials through a resolver
    pub fn resolve_credentials(&mut self, resolver: &dyn CredentialResolver) -> Result<()> {
        for (key, value) in self.auth_data.iter_mut() {
            if let Some(resolved) = resolver
                .resolve(key, value)
                .with_context(|| format!("Failed to resolve {:?} for profile {}", key, self.name))?
            {
                *value = resolved;
            }
        }
        Ok(())
    }

    fn redacted(&self) -> Self {
        let mut profile = self.clone();
        for value in profile.auth_data.values_mut() {
            *value = Value::String(REDACTED.to_string());
        }
        if !profile.auth_token.is_empty() {
            profile.auth_token = REDACTED.to_string();
        }
        profile
    }
}

/// Resolves placeholder credential values before profiles reach the scheduler
pub trait CredentialResolver {
    /// Return a replacement for `value`, or `None` to keep it
    fn resolve(&self, key: &str, value: &Value) -> Result<Option<Value>>;
}

/// Whether an auth data entry asks for the service-account token
pub fn is_jwt_shortcut(key: &str, value: &Value) -> bool {
    if !key.eq_ignore_ascii_case(JWT_AUTH_KEY) {
        return false;
    }
    matches!(value, Value::String(s) if s.eq_ignore_ascii_case(JWT_PLACEHOLDER))
}

/// Injects the Kubernetes service-account token for `jwt: "%jwt%"` entries
pub struct KubernetesJwtResolver {
    token_path: PathBuf,
}

impl KubernetesJwtResolver {
    pub fn new(token_path: impl Into<PathBuf>) -> Self {
        Self {
            token_path: token_path.into(),
        }
    }
}

impl Default for KubernetesJwtResolver {
    fn default() -> Self {
        Self::new(KUBERNETES_JWT_TOKEN_PATH)
    }
}

impl CredentialResolver for KubernetesJwtResolver {
    fn resolve(&self, key: &str, value: &Value) -> Result<Option<Value>> {
        if !is_jwt_shortcut(key, value) {
            return Ok(None);
        }
        let token = fs::read_to_string(&self.token_path)
            .with_context(|| format!("Failed to read service account token: {:?}", self.token_path))?;
        Ok(Some(Value::String(token)))
    }
}

impl Config {
    /// Load, default, resolve and validate a configuration file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the YAML configuration
    pub fn load(path: &Path) -> Result<Self> {
        info!("Loading configuration from: {:?}", path);

        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file: {:?}", path))?;
        let mut config = Self::parse(&raw)
            .with_context(|| format!("Failed to parse configuration file: {:?}", path))?;
        config.prepare(&|key: &str| std::env::var(key).ok(), &KubernetesJwtResolver::default())?;

        Ok(config)
    }

    /// Parse YAML without applying defaults
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(raw)?)
    }

    /// Apply defaults and overrides, resolve credentials, validate
    pub fn prepare<F>(&mut self, env: &F, resolver: &dyn CredentialResolver) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        self.set_defaults(env);
        for profile in self.vault.profiles.iter_mut() {
            profile.resolve_credentials(resolver)?;
        }
        self.validate()
    }

    fn set_defaults<F>(&mut self, env: &F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if self.repeat_interval.is_zero() {
            self.repeat_interval = Duration::from_millis(DEFAULT_REPEAT_INTERVAL_MS);
        }
        self.pgw.set_defaults();
        self.vault.set_defaults(env);
        self.telemetry.set_defaults();
    }

    /// Check invariants the probe engine relies on
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for profile in &self.vault.profiles {
            if profile.name.is_empty() {
                bail!("Profile name must not be empty");
            }
            if !seen.insert(profile.name.as_str()) {
                bail!("Duplicate profile name: {}", profile.name);
            }
            if profile.auth_token.is_empty() && profile.auth_path.is_empty() {
                bail!("Profile {} needs either auth_token or auth_path", profile.name);
            }
        }

        let thresholds = self.telemetry.thresholds();
        if thresholds.is_empty() {
            bail!("telemetry_config.buckets must not be empty");
        }
        if thresholds.iter().any(|t| !t.is_finite() || *t < 0.0) {
            bail!("telemetry_config.buckets must be finite, non-negative seconds");
        }
        Ok(())
    }

    /// Whether any profile revokes its token
    pub fn revoke_enabled(&self) -> bool {
        self.vault.profiles.iter().any(|p| p.revoke_token)
    }

    /// YAML rendering with credentials masked
    pub fn to_redacted_yaml(&self) -> Result<String> {
        let mut shown = self.clone();
        shown.vault.profiles = self.vault.profiles.iter().map(Profile::redacted).collect();
        if let Some(auth) = shown.pgw.basic_auth.as_mut() {
            auth.password = REDACTED.to_string();
        }
        Ok(serde_yaml::to_string(&shown)?)
    }
}
