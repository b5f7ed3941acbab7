//! Layered configuration: compiled-in defaults, then an optional config
//! file, then bare-named environment variables (§10, §6).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipeworksConfig {
    /// Backing store endpoint. `memory://` selects the in-memory backend;
    /// anything else is treated as a path/host to derive a `redb` file
    /// from.
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default = "default_worker_poll_interval")]
    pub worker_poll_interval: f64,
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_worker_poll_interval() -> f64 {
    1.0
}

impl Default for PipeworksConfig {
    fn default() -> Self {
        Self {
            redis_url: default_redis_url(),
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            worker_poll_interval: default_worker_poll_interval(),
        }
    }
}

impl PipeworksConfig {
    /// Layering, lowest to highest precedence: compiled-in defaults,
    /// `pipeworks.yaml` in the working directory, then bare-named
    /// environment variables (`REDIS_URL`, `HOST`, `PORT`, `LOG_LEVEL`,
    /// `WORKER_POLL_INTERVAL`) — no prefix, no separator, unlike the
    /// reference crate's `JACKDAW__`-prefixed layering, so the struct
    /// fields map directly onto the names §6 specifies.
    pub fn load() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::Config::try_from(&PipeworksConfig::default())?)
            .add_source(
                config::File::with_name("pipeworks")
                    .format(config::FileFormat::Yaml)
                    .required(false),
            )
            .add_source(config::Environment::default().try_parsing(true))
            .build()?
            .try_deserialize()
    }

    /// Resolves `redis_url` into a `StateStore`/`TaskQueue` backend
    /// selector: `memory://` picks the in-memory backend, anything else
    /// picks a `redb` file path derived from the URL.
    #[must_use]
    pub fn backend(&self) -> Backend {
        if self.redis_url.starts_with("memory://") {
            Backend::Memory
        } else {
            Backend::Redb(redb_path_from_url(&self.redis_url))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    Memory,
    Redb(std::path::PathBuf),
}

fn redb_path_from_url(url: &str) -> std::path::PathBuf {
    let stripped = url
        .split_once("://")
        .map_or(url, |(_, rest)| rest)
        .trim_matches('/');
    let sanitized: String = stripped
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
        .collect();
    std::path::PathBuf::from(format!("{sanitized}.redb"))
}
