use crate::error::Result;
use crate::handlers::health::{HealthCheckOptions, DEFAULT_HEALTH_PATH};
use crate::handlers::metadata::{MetadataOptions, MetadataVersion, DEFAULT_METADATA_PATH};
use crate::health::{
    CachedHealthCheckProperties, HealthCheckBuilder, HealthCheckProperties, HttpHealthCheckProperties,
};
use crate::middleware::gate::BeforeInvoke;
use crate::middleware::insights::{RequestInsights, DEFAULT_INSIGHTS_PATH};
use chrono::{DateTime, Utc};
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub health: HealthConfig,
    pub metadata: MetadataConfig,
    #[serde(default)]
    pub insights: InsightsConfig,
    #[serde(default)]
    pub checks: Vec<CheckConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    pub path: String,
    pub indent_json: bool,
    pub string_enum: bool,
    pub parallel_execution: bool,
    pub local_only: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataConfig {
    pub path: String,
    pub indent_json: bool,
    pub include_null_properties: bool,
    pub name: Option<String>,
    pub environment: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InsightsConfig {
    pub enabled: bool,
    pub path: String,
}

/// A check declared in configuration, tagged by `kind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum CheckConfig {
    Http(HttpCheckConfig),
    Sql(SqlCheckConfig),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpCheckConfig {
    pub name: String,
    pub url: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_true")]
    pub ensure_success: bool,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub cache_seconds: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqlCheckConfig {
    pub name: String,
    /// sqlite connection URL, e.g. `sqlite://data.db`
    pub url: String,
    #[serde(default)]
    pub sql: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub cache_seconds: Option<u64>,
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_true() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            path: DEFAULT_HEALTH_PATH.to_string(),
            indent_json: true,
            string_enum: true,
            parallel_execution: true,
            local_only: false,
        }
    }
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            path: DEFAULT_METADATA_PATH.to_string(),
            indent_json: true,
            include_null_properties: false,
            name: None,
            environment: None,
        }
    }
}

impl Default for InsightsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: DEFAULT_INSIGHTS_PATH.to_string(),
        }
    }
}

impl InsightsConfig {
    /// `None` unless enabled.
    pub fn insights(&self) -> Option<RequestInsights> {
        self.enabled.then(|| RequestInsights::new(&self.path))
    }
}

impl HealthConfig {
    pub fn options(&self) -> HealthCheckOptions {
        HealthCheckOptions {
            path: self.path.clone(),
            indent_json: self.indent_json,
            string_enum: self.string_enum,
            parallel_execution: self.parallel_execution,
            before_invoke: self.local_only.then(BeforeInvoke::local_only),
            before_serialization: None,
        }
    }
}

impl MetadataConfig {
    pub fn options(
        &self,
        started_on: DateTime<Utc>,
        version: Option<MetadataVersion>,
    ) -> MetadataOptions {
        MetadataOptions {
            path: self.path.clone(),
            indent_json: self.indent_json,
            include_null_properties: self.include_null_properties,
            name: self.name.clone(),
            environment: self.environment.clone(),
            started_on: Some(started_on),
            version,
            before_invoke: None,
        }
    }
}

impl CheckConfig {
    pub fn name(&self) -> &str {
        match self {
            CheckConfig::Http(check) => &check.name,
            CheckConfig::Sql(check) => &check.name,
        }
    }

    fn cache_seconds(&self) -> Option<u64> {
        match self {
            CheckConfig::Http(check) => check.cache_seconds,
            CheckConfig::Sql(check) => check.cache_seconds,
        }
    }

    /// Adds this check to `builder`, behind a cache when `cache_seconds` is set.
    pub fn register(&self, builder: HealthCheckBuilder) -> Result<HealthCheckBuilder> {
        match self.cache_seconds() {
            Some(seconds) => {
                let cached = CachedHealthCheckProperties::new(Duration::from_secs(seconds))?;
                builder.add_cached(cached, |inner| self.register_direct(inner))
            }
            None => self.register_direct(builder),
        }
    }

    fn register_direct(&self, builder: HealthCheckBuilder) -> Result<HealthCheckBuilder> {
        match self {
            CheckConfig::Http(check) => {
                let properties = HealthCheckProperties::new(check.name.as_str())?
                    .required(check.required)
                    .with_tags(check.tags.iter().cloned());
                let properties = HttpHealthCheckProperties::new(properties, &check.url)?
                    .with_timeout(Duration::from_millis(check.timeout_ms))?
                    .ensure_successful_status(check.ensure_success);
                builder.add_http(properties)
            }
            CheckConfig::Sql(check) => {
                let properties = HealthCheckProperties::new(check.name.as_str())?
                    .required(check.required)
                    .with_tags(check.tags.iter().cloned());
                builder.add_sql_url::<SqliteConnection>(properties, &check.url, check.sql.as_deref())
            }
        }
    }
}

impl AppConfig {
    pub fn load() -> std::result::Result<Self, ConfigError> {
        Self::load_from(Path::new("config.toml"))
    }

    /// Defaults, then `path` when it exists, then `APP_`-prefixed
    /// environment variables (`APP_HEALTH__LOCAL_ONLY=true`).
    pub fn load_from(path: &Path) -> std::result::Result<Self, ConfigError> {
        let mut builder = Config::builder().add_source(Config::try_from(&AppConfig::default())?);

        if path.exists() {
            builder = builder.add_source(File::from(path));
        }

        builder = builder.add_source(
            Environment::with_prefix("APP")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        let app_config: AppConfig = config.try_deserialize()?;

        app_config.validate()?;

        Ok(app_config)
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::Message("Server port cannot be 0".to_string()));
        }

        let mut paths = vec![("health", &self.health.path), ("metadata", &self.metadata.path)];
        if self.insights.enabled {
            paths.push(("insights", &self.insights.path));
        }

        for (i, (section, path)) in paths.iter().enumerate() {
            if !path.starts_with('/') {
                return Err(ConfigError::Message(format!(
                    "{} path '{}' must start with '/'",
                    section, path
                )));
            }
            if let Some((other, _)) = paths[..i].iter().find(|(_, earlier)| earlier == path) {
                return Err(ConfigError::Message(format!(
                    "{} and {} endpoints cannot share a path",
                    other, section
                )));
            }
        }

        self.health_check_builder()
            .map_err(|e| ConfigError::Message(e.to_string()))?;

        Ok(())
    }

    /// A builder holding every declared check, in declaration order.
    pub fn health_check_builder(&self) -> Result<HealthCheckBuilder> {
        self.checks
            .iter()
            .try_fold(HealthCheckBuilder::new(), |builder, check| check.register(builder))
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::Lifetime;
    use std::io::Write;

    fn http_check(name: &str, url: &str) -> CheckConfig {
        CheckConfig::Http(HttpCheckConfig {
            name: name.to_string(),
            url: url.to_string(),
            timeout_ms: default_timeout_ms(),
            ensure_success: true,
            required: false,
            tags: vec![],
            cache_seconds: None,
        })
    }

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.health.path, "/api/_health");
        assert_eq!(config.metadata.path, "/api/_meta");
        assert!(config.health.indent_json);
        assert!(config.health.string_enum);
        assert!(config.health.parallel_execution);
        assert!(!config.health.local_only);
        assert!(config.checks.is_empty());
        assert!(config.insights.insights().is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.health.path = "health".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.metadata.path = config.health.path.clone();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.checks = vec![http_check("api", "not a url")];
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.insights.path = config.health.path.clone();
        assert!(config.validate().is_ok());
        config.insights.enabled = true;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.checks = vec![http_check("api", "http://a/"), http_check("api", "http://b/")];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bind_address() {
        let mut config = AppConfig::default();
        assert_eq!(config.bind_address(), "127.0.0.1:3000");

        config.server.host = "0.0.0.0".to_string();
        config.server.port = 8080;
        assert_eq!(config.bind_address(), "0.0.0.0:8080");
    }

    #[test]
    fn test_load_from_file_with_checks() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        write!(
            file,
            r#"
[server]
port = 8081

[health]
parallel_execution = false
local_only = true

[metadata]
name = "orders"

[insights]
enabled = true
path = "/ops/_insights"

[[checks]]
kind = "http"
name = "payments"
url = "http://payments.internal/health"
required = true
tags = ["external"]
cache_seconds = 30

[[checks]]
kind = "sql"
name = "orders-db"
url = "sqlite::memory:"
sql = "SELECT 1"
"#
        )
        .unwrap();

        let config = AppConfig::load_from(file.path()).unwrap();

        assert_eq!(config.server.port, 8081);
        assert!(!config.health.parallel_execution);
        assert!(config.health.local_only);
        assert!(config.health.options().before_invoke.is_some());
        assert_eq!(config.metadata.name.as_deref(), Some("orders"));
        assert_eq!(config.insights.insights().unwrap().path(), "/ops/_insights");
        assert_eq!(config.checks.len(), 2);

        match &config.checks[0] {
            CheckConfig::Http(check) => {
                assert_eq!(check.timeout_ms, 5000);
                assert!(check.ensure_success);
                assert!(check.required);
                assert_eq!(check.cache_seconds, Some(30));
            }
            other => panic!("expected http check, got {:?}", other),
        }
        assert_eq!(config.checks[1].name(), "orders-db");
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = AppConfig::load_from(Path::new("does-not-exist.toml")).unwrap();
        assert_eq!(config.health.path, "/api/_health");
    }

    #[test]
    fn test_declared_checks_register_in_order() {
        let mut cached = http_check("payments", "https://payments.internal/health");
        if let CheckConfig::Http(check) = &mut cached {
            check.cache_seconds = Some(10);
        }
        let config = AppConfig {
            checks: vec![
                cached,
                CheckConfig::Sql(SqlCheckConfig {
                    name: "db".to_string(),
                    url: "sqlite::memory:".to_string(),
                    sql: None,
                    required: true,
                    tags: vec![],
                    cache_seconds: None,
                }),
            ],
            ..AppConfig::default()
        };

        let builder = config.health_check_builder().unwrap();
        let descriptors = builder.descriptors();

        assert_eq!(descriptors.len(), 2);
        assert_eq!(descriptors[0].name(), "payments");
        assert_eq!(descriptors[0].lifetime(), Lifetime::Singleton);
        assert_eq!(descriptors[1].name(), "db");
    }
}
