//! Configuration Management
//!
//! Loads, validates, and applies environment overrides to every tunable
//! knob the other components read at startup: token TTLs, rate-limit
//! classes, registry preferences, launch deadlines, and the capability
//! broker's authorization table.
//!
//! Loads TOML first, then applies environment overrides, then runs a
//! validation pass that rejects the whole config on the first inconsistency
//! rather than starting the host in a half-sane state.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;

use crate::broker::BrokerConfig as BrokerRuntimeConfig;
use crate::handshake::HandshakeConfig as HandshakeRuntimeConfig;
use crate::launch::ProcessLaunchConfig;
use crate::rate_limit::RateLimitPolicy;
use crate::selection::SelectionStrategy;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub token: TokenConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub launch: LaunchConfig,
    #[serde(default)]
    pub handshake: HandshakeConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub request_timeout_secs: u64,
    pub cors_allowed_origins: Vec<String>,
    /// URL path prefix the Service Router (§4.9) is mounted under, e.g. `/mediate`.
    pub mediation_root: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            request_timeout_secs: 30,
            cors_allowed_origins: vec!["*".to_string()],
            mediation_root: "/mediate".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    pub runtime_token_ttl_secs: i64,
    pub sweep_interval_secs: u64,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            runtime_token_ttl_secs: 86_400,
            sweep_interval_secs: 60,
        }
    }
}

impl TokenConfig {
    pub fn runtime_token_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.runtime_token_ttl_secs)
    }

    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sweep_interval_secs)
    }
}

/// One endpoint class's token-bucket policy (§6: `rate_limits[key]`).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RateLimitClass {
    pub rate_per_second: f64,
    pub burst: f64,
}

impl RateLimitClass {
    pub fn as_policy(&self) -> RateLimitPolicy {
        RateLimitPolicy {
            rate_per_second: self.rate_per_second,
            burst: self.burst,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub handshake: RateLimitClass,
    pub register: RateLimitClass,
    pub capability: RateLimitClass,
    pub routed: RateLimitClass,
    pub idle_bucket_timeout_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            handshake: RateLimitClass { rate_per_second: 2.0, burst: 5.0 },
            register: RateLimitClass { rate_per_second: 10.0, burst: 20.0 },
            capability: RateLimitClass { rate_per_second: 10.0, burst: 20.0 },
            routed: RateLimitClass { rate_per_second: 100.0, burst: 200.0 },
            idle_bucket_timeout_secs: 300,
        }
    }
}

impl RateLimitConfig {
    pub fn idle_bucket_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.idle_bucket_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Resolves the `DiscoverService` HEALTHY/DEGRADED Open Question (SPEC_FULL.md §9):
    /// prefer HEALTHY, fall back to DEGRADED only if no HEALTHY candidate exists.
    pub prefer_healthy: bool,
    pub default_selection_strategy: SelectionStrategy,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            prefer_healthy: true,
            default_selection_strategy: SelectionStrategy::RoundRobin,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LaunchConfig {
    pub admit_deadline_secs: u64,
    pub drain_grace_secs: u64,
    pub readiness_timeout_secs: u64,
    pub stop_grace_secs: u64,
    pub poll_interval_millis: u64,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            admit_deadline_secs: 30,
            drain_grace_secs: 5,
            readiness_timeout_secs: 10,
            stop_grace_secs: 5,
            poll_interval_millis: 200,
        }
    }
}

impl LaunchConfig {
    pub fn admit_deadline(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.admit_deadline_secs)
    }

    pub fn drain_grace(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.drain_grace_secs)
    }

    pub fn poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.poll_interval_millis)
    }

    pub fn as_process_launch_config(&self, host_url: Option<String>) -> ProcessLaunchConfig {
        ProcessLaunchConfig {
            readiness_timeout: std::time::Duration::from_secs(self.readiness_timeout_secs),
            stop_grace: std::time::Duration::from_secs(self.stop_grace_secs),
            host_url,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HandshakeConfig {
    pub core_protocol_version: String,
    /// Shared secret every plugin must present at handshake time (§4.4).
    /// No default: an empty cookie would accept any plugin, so `validate()`
    /// rejects it.
    pub magic_cookie: String,
    pub allow_concurrent_instances: bool,
    /// `self_id → capability types that self_id may request`.
    pub capability_authorizations: HashMap<String, Vec<String>>,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            core_protocol_version: "1.0".to_string(),
            magic_cookie: String::new(),
            allow_concurrent_instances: false,
            capability_authorizations: HashMap::new(),
        }
    }
}

impl HandshakeConfig {
    pub fn as_runtime_config(&self, runtime_token_ttl: chrono::Duration) -> HandshakeRuntimeConfig {
        HandshakeRuntimeConfig {
            core_protocol_version: self.core_protocol_version.clone(),
            magic_cookie: self.magic_cookie.clone(),
            runtime_token_ttl,
            allow_concurrent_instances: self.allow_concurrent_instances,
            capability_authorizations: self.capability_authorizations.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub default_ttl_secs: i64,
    /// `capability_type → runtime_ids allowed to request it`.
    pub authorizations: HashMap<String, Vec<String>>,
    /// `capability_type → host-local endpoint path`.
    pub endpoints: HashMap<String, String>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: 1_800,
            authorizations: HashMap::new(),
            endpoints: HashMap::new(),
        }
    }
}

impl BrokerConfig {
    pub fn as_runtime_config(&self) -> BrokerRuntimeConfig {
        BrokerRuntimeConfig {
            default_ttl: chrono::Duration::seconds(self.default_ttl_secs),
            authorizations: self
                .authorizations
                .iter()
                .map(|(k, v)| (k.clone(), v.iter().cloned().collect()))
                .collect(),
            endpoints: self.endpoints.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Json,
    Pretty,
}

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

impl Default for RateLimitClass {
    fn default() -> Self {
        Self { rate_per_second: 10.0, burst: 20.0 }
    }
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            token: TokenConfig::default(),
            rate_limit: RateLimitConfig::default(),
            registry: RegistryConfig::default(),
            launch: LaunchConfig::default(),
            handshake: HandshakeConfig::default(),
            broker: BrokerConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl PlatformConfig {
    /// Loads a TOML file at `path`, applies environment overrides, then validates.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read config file '{path}': {e}"))?;
        let mut config: PlatformConfig = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("failed to parse config file '{path}': {e}"))?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// `HOSTCORE_*` overrides, applied after the TOML file and before validation.
    pub fn apply_env_overrides(&mut self) -> anyhow::Result<()> {
        if let Ok(host) = env::var("HOSTCORE_SERVER_HOST") {
            if !host.is_empty() {
                self.server.host = host;
            }
        }
        if let Ok(raw) = env::var("HOSTCORE_SERVER_PORT") {
            self.server.port = raw
                .parse()
                .map_err(|_| anyhow::anyhow!("invalid HOSTCORE_SERVER_PORT: '{raw}'"))?;
        }
        if let Ok(raw) = env::var("HOSTCORE_MEDIATION_ROOT") {
            self.server.mediation_root = raw;
        }
        if let Ok(raw) = env::var("HOSTCORE_LOG_LEVEL") {
            if !VALID_LOG_LEVELS.contains(&raw.as_str()) {
                return Err(anyhow::anyhow!(
                    "invalid HOSTCORE_LOG_LEVEL '{raw}', expected one of {VALID_LOG_LEVELS:?}"
                ));
            }
            self.logging.level = raw;
        }
        if let Ok(raw) = env::var("HOSTCORE_MAGIC_COOKIE") {
            self.handshake.magic_cookie = raw;
        }
        if let Ok(raw) = env::var("HOSTCORE_RUNTIME_TOKEN_TTL_SECS") {
            self.token.runtime_token_ttl_secs = raw
                .parse()
                .map_err(|_| anyhow::anyhow!("invalid HOSTCORE_RUNTIME_TOKEN_TTL_SECS: '{raw}'"))?;
        }
        if let Ok(raw) = env::var("HOSTCORE_CAPABILITY_GRANT_TTL_SECS") {
            self.broker.default_ttl_secs = raw
                .parse()
                .map_err(|_| anyhow::anyhow!("invalid HOSTCORE_CAPABILITY_GRANT_TTL_SECS: '{raw}'"))?;
        }
        if let Ok(raw) = env::var("HOSTCORE_ADMIT_DEADLINE_SECS") {
            self.launch.admit_deadline_secs = raw
                .parse()
                .map_err(|_| anyhow::anyhow!("invalid HOSTCORE_ADMIT_DEADLINE_SECS: '{raw}'"))?;
        }
        if let Ok(raw) = env::var("HOSTCORE_DRAIN_GRACE_SECS") {
            self.launch.drain_grace_secs = raw
                .parse()
                .map_err(|_| anyhow::anyhow!("invalid HOSTCORE_DRAIN_GRACE_SECS: '{raw}'"))?;
        }
        if let Ok(raw) = env::var("HOSTCORE_PREFER_HEALTHY") {
            self.registry.prefer_healthy = raw
                .parse()
                .map_err(|_| anyhow::anyhow!("invalid HOSTCORE_PREFER_HEALTHY: '{raw}'"))?;
        }
        Ok(())
    }

    /// Rejects the whole config on the first inconsistency via a per-section
    /// `validate_*` sweep.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.validate_server()?;
        self.validate_token()?;
        self.validate_rate_limit()?;
        self.validate_launch()?;
        self.validate_handshake()?;
        self.validate_broker()?;
        self.validate_logging()?;
        Ok(())
    }

    fn validate_server(&self) -> anyhow::Result<()> {
        if self.server.host.is_empty() {
            return Err(anyhow::anyhow!("server.host cannot be empty"));
        }
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("server.port must be nonzero"));
        }
        if self.server.request_timeout_secs == 0 {
            return Err(anyhow::anyhow!("server.request_timeout_secs cannot be 0"));
        }
        if !self.server.mediation_root.starts_with('/') {
            return Err(anyhow::anyhow!("server.mediation_root must start with '/'"));
        }
        Ok(())
    }

    fn validate_token(&self) -> anyhow::Result<()> {
        if self.token.runtime_token_ttl_secs <= 0 {
            return Err(anyhow::anyhow!("token.runtime_token_ttl_secs must be > 0"));
        }
        if self.token.sweep_interval_secs == 0 {
            return Err(anyhow::anyhow!("token.sweep_interval_secs cannot be 0"));
        }
        Ok(())
    }

    fn validate_rate_limit(&self) -> anyhow::Result<()> {
        for (name, class) in [
            ("handshake", &self.rate_limit.handshake),
            ("register", &self.rate_limit.register),
            ("capability", &self.rate_limit.capability),
            ("routed", &self.rate_limit.routed),
        ] {
            if class.rate_per_second <= 0.0 {
                return Err(anyhow::anyhow!("rate_limit.{name}.rate_per_second must be > 0"));
            }
            if class.burst <= 0.0 {
                return Err(anyhow::anyhow!("rate_limit.{name}.burst must be > 0"));
            }
        }
        Ok(())
    }

    fn validate_launch(&self) -> anyhow::Result<()> {
        if self.launch.admit_deadline_secs == 0 {
            return Err(anyhow::anyhow!("launch.admit_deadline_secs cannot be 0"));
        }
        let poll_secs = self.launch.poll_interval_millis / 1000;
        if poll_secs >= self.launch.admit_deadline_secs && self.launch.poll_interval_millis > 0 {
            return Err(anyhow::anyhow!(
                "launch.poll_interval_millis must be smaller than launch.admit_deadline_secs"
            ));
        }
        if self.launch.readiness_timeout_secs == 0 {
            return Err(anyhow::anyhow!("launch.readiness_timeout_secs cannot be 0"));
        }
        Ok(())
    }

    fn validate_handshake(&self) -> anyhow::Result<()> {
        if self.handshake.magic_cookie.is_empty() {
            return Err(anyhow::anyhow!(
                "handshake.magic_cookie cannot be empty (would admit any plugin)"
            ));
        }
        if self.handshake.core_protocol_version.is_empty() {
            return Err(anyhow::anyhow!("handshake.core_protocol_version cannot be empty"));
        }
        Ok(())
    }

    fn validate_broker(&self) -> anyhow::Result<()> {
        if self.broker.default_ttl_secs <= 0 {
            return Err(anyhow::anyhow!("broker.default_ttl_secs must be > 0"));
        }
        for capability_type in self.broker.authorizations.keys() {
            if !self.broker.endpoints.contains_key(capability_type) {
                return Err(anyhow::anyhow!(
                    "broker.authorizations references capability '{capability_type}' with no matching broker.endpoints entry"
                ));
            }
        }
        Ok(())
    }

    fn validate_logging(&self) -> anyhow::Result<()> {
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            return Err(anyhow::anyhow!(
                "logging.level must be one of {VALID_LOG_LEVELS:?}, got '{}'",
                self.logging.level
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> PlatformConfig {
        let mut config = PlatformConfig::default();
        config.handshake.magic_cookie = "test-cookie".to_string();
        config
    }

    #[test]
    fn default_config_with_a_cookie_validates() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn empty_magic_cookie_is_rejected() {
        let config = PlatformConfig::default();
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_port_is_rejected() {
        let mut config = valid_config();
        config.server.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn nonpositive_rate_limit_is_rejected() {
        let mut config = valid_config();
        config.rate_limit.routed.rate_per_second = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn env_override_changes_port() {
        let mut config = valid_config();
        // SAFETY: test-only, no other test in this process reads this var concurrently.
        unsafe {
            env::set_var("HOSTCORE_SERVER_PORT", "9999");
        }
        config.apply_env_overrides().unwrap();
        assert_eq!(config.server.port, 9999);
        unsafe {
            env::remove_var("HOSTCORE_SERVER_PORT");
        }
    }

    #[test]
    fn broker_authorization_without_endpoint_is_rejected() {
        let mut config = valid_config();
        config
            .broker
            .authorizations
            .insert("storage".to_string(), vec!["logger".to_string()]);
        assert!(config.validate().is_err());
    }
}
