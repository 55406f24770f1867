use crate::error::{AppError, Result};
use crate::rate_limit::RateLimitSettings;
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Environment variable prefix, e.g. `PINCART_RATE_LIMIT__ENABLED=false`
pub const ENV_PREFIX: &str = "PINCART";

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limit: RateLimitSettings,
    /// Shared store configuration
    #[serde(default)]
    pub store: StoreConfig,
    /// Result cache configuration
    #[serde(default)]
    pub cache: CacheConfig,
    /// External fetch collaborators
    #[serde(default)]
    pub sources: SourcesConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,
    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Origin allowed by CORS
    #[serde(default = "default_frontend_url")]
    pub frontend_url: String,
}

/// Shared store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Connection string; `memory://` selects the in-process store
    #[serde(default = "default_store_url")]
    pub url: Secret<String>,
    /// Upper bound for a single store call in milliseconds
    #[serde(default = "default_store_timeout_ms")]
    pub timeout_ms: u64,
}

/// Result cache configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// TTL used when a caller does not pick one
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,
    /// TTL for trend discovery results
    #[serde(default = "default_discover_ttl_secs")]
    pub discover_ttl_secs: u64,
    /// Upper bound for a single external fetch
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    /// Coalesce concurrent misses for the same key into one fetch
    #[serde(default = "default_true")]
    pub single_flight: bool,
}

/// Endpoints of the external fetch collaborators
#[derive(Debug, Clone, Deserialize, Default)]
pub struct SourcesConfig {
    /// Scraper sidecar returning trending pins
    #[serde(default)]
    pub scraper_url: Option<String>,
    /// Supplier search service
    #[serde(default)]
    pub supplier_url: Option<String>,
}

fn default_true() -> bool {
    true
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_frontend_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_store_url() -> Secret<String> {
    Secret::new("redis://localhost:6379/0".to_string())
}

fn default_store_timeout_ms() -> u64 {
    500
}

fn default_ttl_secs() -> u64 {
    24 * 3600
}

fn default_discover_ttl_secs() -> u64 {
    4 * 3600
}

fn default_fetch_timeout_secs() -> u64 {
    30
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            frontend_url: default_frontend_url(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: default_store_url(),
            timeout_ms: default_store_timeout_ms(),
        }
    }
}

impl StoreConfig {
    /// In-process store, used by tests and single-instance deployments
    pub fn memory() -> Self {
        Self {
            url: Secret::new("memory://".to_string()),
            ..Default::default()
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Whether the URL selects the in-process store
    pub fn is_memory(&self) -> bool {
        self.url.expose_secret().starts_with("memory://")
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: default_ttl_secs(),
            discover_ttl_secs: default_discover_ttl_secs(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            single_flight: true,
        }
    }
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    pub fn discover_ttl(&self) -> Duration {
        Duration::from_secs(self.discover_ttl_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

impl AppConfig {
    /// Load configuration from an optional YAML file layered under
    /// `PINCART_*` environment variables
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Yaml)
                    .required(true),
            );
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("rate_limit.exempt_paths"),
            )
            .build()
            .map_err(|e| AppError::Config(format!("Failed to load config: {}", e)))?;

        settings
            .try_deserialize()
            .map_err(|e| AppError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Parse configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.rate_limit.requests_per_minute == 0 {
            return Err(AppError::Config(
                "rate_limit.requests_per_minute must be > 0".to_string(),
            ));
        }
        if self.rate_limit.window_secs == 0 {
            return Err(AppError::Config(
                "rate_limit.window_secs must be > 0".to_string(),
            ));
        }
        if self.rate_limit.fallback_max_identities == 0 {
            return Err(AppError::Config(
                "rate_limit.fallback_max_identities must be > 0".to_string(),
            ));
        }
        if self.store.timeout_ms == 0 {
            return Err(AppError::Config("store.timeout_ms must be > 0".to_string()));
        }
        if self.cache.default_ttl_secs == 0 || self.cache.discover_ttl_secs == 0 {
            return Err(AppError::Config("cache TTLs must be > 0".to_string()));
        }
        if self.cache.fetch_timeout_secs == 0 {
            return Err(AppError::Config(
                "cache.fetch_timeout_secs must be > 0".to_string(),
            ));
        }

        let url = self.store.url.expose_secret();
        if !(url.starts_with("redis://")
            || url.starts_with("rediss://")
            || url.starts_with("memory://"))
        {
            return Err(AppError::Config(
                "store.url must use redis://, rediss:// or memory://".to_string(),
            ));
        }

        for source in [&self.sources.scraper_url, &self.sources.supplier_url]
            .into_iter()
            .flatten()
        {
            url::Url::parse(source)
                .map_err(|e| AppError::Config(format!("Invalid source URL {}: {}", source, e)))?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_values() {
        let config = AppConfig::from_yaml("{}").unwrap();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8000);
        assert!(config.rate_limit.enabled);
        assert_eq!(config.rate_limit.requests_per_minute, 30);
        assert_eq!(config.rate_limit.window_secs, 60);
        assert_eq!(config.cache.default_ttl_secs, 86400);
        assert_eq!(config.cache.discover_ttl_secs, 14400);
        assert_eq!(
            config.store.url.expose_secret(),
            "redis://localhost:6379/0"
        );
        assert!(config.rate_limit.exempt_paths.contains(&"/health".to_string()));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_valid_config() {
        let yaml = r#"
server:
  host: "127.0.0.1"
  port: 9000

rate_limit:
  enabled: false
  requests_per_minute: 3

store:
  url: "memory://"
  timeout_ms: 250

cache:
  default_ttl_secs: 600
  single_flight: false

sources:
  scraper_url: "http://localhost:4000/pins"
"#;

        let config = AppConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.server.port, 9000);
        assert!(!config.rate_limit.enabled);
        assert_eq!(config.rate_limit.requests_per_minute, 3);
        assert!(config.store.is_memory());
        assert_eq!(config.store.timeout(), Duration::from_millis(250));
        assert_eq!(config.cache.default_ttl(), Duration::from_secs(600));
        assert!(!config.cache.single_flight);
        assert_eq!(
            config.sources.scraper_url.as_deref(),
            Some("http://localhost:4000/pins")
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_zero_limit() {
        let mut config = AppConfig::default();
        config.rate_limit.requests_per_minute = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_zero_ttl() {
        let mut config = AppConfig::default();
        config.cache.default_ttl_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_invalid_store_url() {
        let mut config = AppConfig::default();
        config.store.url = Secret::new("postgres://localhost/db".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_invalid_source_url() {
        let mut config = AppConfig::default();
        config.sources.supplier_url = Some("not a url".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "rate_limit:\n  requests_per_minute: 7\nstore:\n  url: \"memory://\""
        )
        .unwrap();

        let config = AppConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.rate_limit.requests_per_minute, 7);
        assert!(config.store.is_memory());
    }
}
