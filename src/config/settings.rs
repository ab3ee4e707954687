use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::{
    collections::{BTreeMap, HashSet},
    path::Path,
    time::Duration,
};
use thiserror::Error;
use tokio::fs;

use super::types::LoadBalancerKind;
use crate::shared_types::ServiceInstance;

// -----------------------------------------------------------------------------
// ----- GatewaySettings -------------------------------------------------------

/// Everything the gateway reads from `crabgate.toml`.
#[derive(Debug, Clone)]
pub struct GatewaySettings {
    pub server: ServerSettings,
    pub auth: AuthSettings,
    pub workers: WorkerSettings,
    pub upstream: UpstreamSettings,
    pub registry: RegistrySettings,
    pub push: PushSettings,
    pub services: Vec<StaticService>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerSettings {
    #[serde(deserialize_with = "de_duration")]
    pub idle_timeout: Duration,
    pub max_frame_size: usize,
}

#[derive(Debug, Clone)]
pub struct AuthSettings {
    pub secret: SecretString,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkerSettings {
    pub threads: usize,
    pub queue_capacity: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UpstreamSettings {
    #[serde(deserialize_with = "de_duration")]
    pub connect_timeout: Duration,

    #[serde(deserialize_with = "de_duration")]
    pub retry_backoff: Duration,

    #[serde(deserialize_with = "de_duration")]
    pub max_retry_backoff: Duration,

    pub max_retries_per_incident: u32,
    pub max_retries_total: u64,

    /// Zero disables the per-request timeout.
    #[serde(deserialize_with = "de_duration")]
    pub request_timeout: Duration,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RegistrySettings {
    pub load_balancer: LoadBalancerKind,
    pub health_check_enabled: bool,

    #[serde(deserialize_with = "de_duration")]
    pub health_check_interval: Duration,

    #[serde(deserialize_with = "de_duration")]
    pub health_check_timeout: Duration,

    pub unhealthy_threshold: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PushSettings {
    #[serde(deserialize_with = "de_duration")]
    pub ack_timeout: Duration,
}

/// A `[[services]]` entry: one instance serving one bizType.
#[derive(Debug, Clone)]
pub struct StaticService {
    pub biz_type: String,
    pub instance: ServiceInstance,
}

// -----------------------------------------------------------------------------
// ----- Defaults --------------------------------------------------------------

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(90),
            max_frame_size: 16 * 1024 * 1024,
        }
    }
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            threads: 8,
            queue_capacity: 1024,
        }
    }
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(3),
            retry_backoff: Duration::from_secs(1),
            max_retry_backoff: Duration::from_secs(30),
            max_retries_per_incident: 5,
            max_retries_total: 100,
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            load_balancer: LoadBalancerKind::RoundRobin,
            health_check_enabled: true,
            health_check_interval: Duration::from_secs(10),
            health_check_timeout: Duration::from_secs(2),
            unhealthy_threshold: 3,
        }
    }
}

impl Default for PushSettings {
    fn default() -> Self {
        Self {
            ack_timeout: Duration::from_secs(10),
        }
    }
}

// -----------------------------------------------------------------------------
// ----- GatewaySettings: Static -----------------------------------------------

impl GatewaySettings {
    /// Defaults everywhere, no static services. Handy for embedding and tests.
    pub fn with_secret(secret: &str) -> Self {
        Self {
            server: ServerSettings::default(),
            auth: AuthSettings {
                secret: SecretString::new(secret.to_owned().into_boxed_str()),
            },
            workers: WorkerSettings::default(),
            upstream: UpstreamSettings::default(),
            registry: RegistrySettings::default(),
            push: PushSettings::default(),
            services: Vec::new(),
        }
    }

    pub async fn from_file_async(path: &Path) -> Result<GatewaySettings, ConfigError> {
        let raw = fs::read_to_string(path).await.map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<GatewaySettings, ConfigError> {
        let mut doc: GatewayFile =
            toml::from_str(raw).map_err(|e| ConfigError::Toml { source: e })?;

        if doc.auth.secret.is_empty() {
            return Err(ConfigError::InvalidField("auth.secret".into()));
        }

        validate_workers(&doc.workers)?;
        validate_upstream(&doc.upstream)?;

        let mut seen = HashSet::with_capacity(doc.services.len());
        let mut services = Vec::with_capacity(doc.services.len());

        for entry in doc.services.drain(..) {
            validate_service(&entry)?;

            let mut instance = ServiceInstance::new(entry.host, entry.port)
                .with_weight(entry.weight)
                .with_enabled(entry.enabled);
            instance.metadata = entry.metadata;

            if !seen.insert((entry.biz_type.clone(), instance.clone())) {
                return Err(ConfigError::DuplicateService {
                    biz_type: entry.biz_type,
                    instance: instance.to_string(),
                });
            }

            services.push(StaticService {
                biz_type: entry.biz_type,
                instance,
            });
        }

        Ok(GatewaySettings {
            server: doc.server,
            auth: AuthSettings {
                secret: SecretString::new(doc.auth.secret.into_boxed_str()),
            },
            workers: doc.workers,
            upstream: doc.upstream,
            registry: doc.registry,
            push: doc.push,
            services,
        })
    }
}

// -----------------------------------------------------------------------------
// ----- AuthSettings: Public --------------------------------------------------

impl AuthSettings {
    pub fn matches(&self, supplied: &str) -> bool {
        self.secret.expose_secret() == supplied
    }
}

// -----------------------------------------------------------------------------
// ----- UpstreamSettings: Public ----------------------------------------------

impl UpstreamSettings {
    pub fn request_timeout(&self) -> Option<Duration> {
        (!self.request_timeout.is_zero()).then_some(self.request_timeout)
    }

    /// Exponential backoff for the `attempt`-th retry (1-based), capped.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        self.retry_backoff
            .saturating_mul(1u32 << shift)
            .min(self.max_retry_backoff)
    }
}

// -----------------------------------------------------------------------------
// ----- Internal: On-disk format ----------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct GatewayFile {
    #[serde(default)]
    server: ServerSettings,

    auth: AuthFileEntry,

    #[serde(default)]
    workers: WorkerSettings,

    #[serde(default)]
    upstream: UpstreamSettings,

    #[serde(default)]
    registry: RegistrySettings,

    #[serde(default)]
    push: PushSettings,

    #[serde(default)]
    services: Vec<ServiceFileEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct AuthFileEntry {
    secret: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ServiceFileEntry {
    biz_type: String,
    host: String,
    port: u16,

    #[serde(default = "default_weight")]
    weight: f64,

    #[serde(default = "default_enabled")]
    enabled: bool,

    #[serde(default)]
    metadata: BTreeMap<String, String>,
}

fn default_weight() -> f64 {
    1.0
}

fn default_enabled() -> bool {
    true
}

// -----------------------------------------------------------------------------
// ----- Internal: Helpers -----------------------------------------------------

fn validate_workers(w: &WorkerSettings) -> Result<(), ConfigError> {
    if w.threads == 0 {
        return Err(ConfigError::InvalidField("workers.threads".into()));
    }
    if w.queue_capacity == 0 {
        return Err(ConfigError::InvalidField("workers.queue_capacity".into()));
    }
    Ok(())
}

fn validate_upstream(u: &UpstreamSettings) -> Result<(), ConfigError> {
    if u.max_retries_per_incident == 0 {
        return Err(ConfigError::InvalidField(
            "upstream.max_retries_per_incident".into(),
        ));
    }
    if u.max_retries_total < u64::from(u.max_retries_per_incident) {
        return Err(ConfigError::InvalidField(
            "upstream.max_retries_total (must be >= max_retries_per_incident)".into(),
        ));
    }
    Ok(())
}

fn validate_service(s: &ServiceFileEntry) -> Result<(), ConfigError> {
    if s.biz_type.trim().is_empty() {
        return Err(ConfigError::InvalidField("services.biz_type".into()));
    }
    if s.host.trim().is_empty() {
        return Err(ConfigError::InvalidField("services.host".into()));
    }
    if !s.weight.is_finite() || s.weight < 0.0 {
        return Err(ConfigError::InvalidField("services.weight".into()));
    }
    Ok(())
}

/// Accepts integer milliseconds (`30000`) or a humantime string (`"30s"`).
fn de_duration<'de, D>(d: D) -> Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::{Error, Unexpected, Visitor};
    use std::fmt;

    struct DurationVisitor;

    impl<'de> Visitor<'de> for DurationVisitor {
        type Value = Duration;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("integer milliseconds (e.g., 30000) or a duration string (e.g., \"30s\")")
        }

        fn visit_u64<E: Error>(self, v: u64) -> Result<Self::Value, E> {
            Ok(Duration::from_millis(v))
        }

        fn visit_i64<E: Error>(self, v: i64) -> Result<Self::Value, E> {
            if v < 0 {
                return Err(E::invalid_value(Unexpected::Signed(v), &self));
            }
            Ok(Duration::from_millis(v as u64))
        }

        fn visit_str<E: Error>(self, v: &str) -> Result<Self::Value, E> {
            humantime::parse_duration(v).map_err(|_| E::invalid_value(Unexpected::Str(v), &self))
        }
    }

    d.deserialize_any(DurationVisitor)
}

// -----------------------------------------------------------------------------
// ----- Errors ----------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("duplicate [[services]] entry for '{biz_type}' at {instance}")]
    DuplicateService { biz_type: String, instance: String },

    #[error("invalid or missing field '{0}'")]
    InvalidField(String),

    #[error("read error for {path:?}: {source}")]
    Io {
        path: std::path::PathBuf,
        source: std::io::Error,
    },

    #[error("toml parse error: {source}")]
    Toml { source: toml::de::Error },
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_tmp(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[tokio::test]
    async fn parse_full_file() {
        let toml = r#"
            [server]
            idle_timeout = "45s"
            max_frame_size = 65536

            [auth]
            secret = "hunter2"

            [workers]
            threads = 4
            queue_capacity = 16

            [upstream]
            connect_timeout = 1500
            retry_backoff = "200ms"
            max_retry_backoff = "5s"
            max_retries_per_incident = 3
            max_retries_total = 9
            request_timeout = "0s"

            [registry]
            load_balancer = "weighted"
            health_check_interval = "1m"
            unhealthy_threshold = 2

            [[services]]
            biz_type = "user.login"
            host = "10.0.0.1"
            port = 8080
            weight = 3.0
            metadata = { zone = "a" }

            [[services]]
            biz_type = "user.login"
            host = "10.0.0.1"
            port = 8080
            metadata = { zone = "b" }
            enabled = false
        "#;

        let tmp = write_tmp(toml);
        let settings = GatewaySettings::from_file_async(tmp.path()).await.unwrap();

        assert_eq!(settings.server.idle_timeout, Duration::from_secs(45));
        assert_eq!(settings.server.max_frame_size, 65536);
        assert!(settings.auth.matches("hunter2"));
        assert!(!settings.auth.matches("hunter3"));
        assert_eq!(settings.workers.threads, 4);
        assert_eq!(settings.upstream.connect_timeout, Duration::from_millis(1500));
        assert_eq!(settings.upstream.retry_backoff, Duration::from_millis(200));
        assert_eq!(settings.upstream.request_timeout(), None);
        assert_eq!(settings.registry.load_balancer, LoadBalancerKind::Weighted);
        assert_eq!(settings.registry.health_check_interval, Duration::from_secs(60));
        assert_eq!(settings.registry.health_check_timeout, Duration::from_secs(2));
        assert_eq!(settings.push.ack_timeout, Duration::from_secs(10));

        assert_eq!(settings.services.len(), 2);
        assert_eq!(settings.services[0].instance.weight, 3.0);
        assert!(settings.services[0].instance.enabled);
        assert!(!settings.services[1].instance.enabled);
        assert_ne!(settings.services[0].instance, settings.services[1].instance);
    }

    #[test]
    fn defaults_apply_when_sections_are_missing() {
        let settings = GatewaySettings::parse("[auth]\nsecret = \"s\"\n").unwrap();
        assert_eq!(settings.server.idle_timeout, Duration::from_secs(90));
        assert_eq!(settings.upstream.max_retries_per_incident, 5);
        assert_eq!(
            settings.upstream.request_timeout(),
            Some(Duration::from_secs(30))
        );
        assert!(settings.services.is_empty());
    }

    #[test]
    fn duplicate_service_is_rejected() {
        let toml = r#"
            [auth]
            secret = "s"

            [[services]]
            biz_type = "a"
            host = "h"
            port = 1

            [[services]]
            biz_type = "a"
            host = "h"
            port = 1
            weight = 2.0
        "#;

        let err = GatewaySettings::parse(toml).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateService { .. }));
    }

    #[test]
    fn empty_secret_and_bad_caps_are_rejected() {
        let err = GatewaySettings::parse("[auth]\nsecret = \"\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidField(f) if f == "auth.secret"));

        let toml = r#"
            [auth]
            secret = "s"

            [upstream]
            max_retries_per_incident = 10
            max_retries_total = 3
        "#;
        let err = GatewaySettings::parse(toml).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidField(_)));
    }

    #[test]
    fn bad_duration_string_is_a_toml_error() {
        let err = GatewaySettings::parse("[auth]\nsecret = \"s\"\n[server]\nidle_timeout = \"soon\"\n")
            .unwrap_err();
        assert!(matches!(err, ConfigError::Toml { .. }));
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let upstream = UpstreamSettings {
            retry_backoff: Duration::from_millis(100),
            max_retry_backoff: Duration::from_millis(350),
            ..UpstreamSettings::default()
        };
        assert_eq!(upstream.backoff_for(1), Duration::from_millis(100));
        assert_eq!(upstream.backoff_for(2), Duration::from_millis(200));
        assert_eq!(upstream.backoff_for(3), Duration::from_millis(350));
        assert_eq!(upstream.backoff_for(40), Duration::from_millis(350));
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
