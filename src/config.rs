use crate::admission::RateSettings;
use crate::backends::BackendKind;
use crate::mail::Envelope;
use envconfig::Envconfig;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Envconfig, Clone)]
pub struct Config {
    /// Server bind address
    #[envconfig(from = "BIND_ADDR", default = "127.0.0.1:3000")]
    pub bind_addr: SocketAddr,

    /// Route that accepts form submissions
    #[envconfig(from = "ENDPOINT_PATH", default = "/contact")]
    pub endpoint_path: String,

    /// Submissions allowed per client per window
    #[envconfig(from = "RATE_LIMIT", default = "5")]
    pub rate_limit: u32,

    /// Window length in seconds
    #[envconfig(from = "RATE_WINDOW_SECS", default = "60")]
    pub rate_window_secs: u64,

    /// Where rate windows live: redis, memory or file
    #[envconfig(from = "RATE_BACKEND", default = "memory")]
    pub rate_backend: BackendKind,

    /// Redis connection URL
    #[envconfig(from = "REDIS_URL", default = "redis://127.0.0.1:6379")]
    pub redis_url: String,

    /// Directory for the file backend
    #[envconfig(from = "RATE_LIMIT_DIR", default = "var/rate-limits")]
    pub rate_limit_dir: PathBuf,

    /// Connect/operation timeout for backend calls
    #[envconfig(from = "BACKEND_TIMEOUT_MS", default = "1500")]
    pub backend_timeout_ms: u64,

    /// Expired window cleanup interval in seconds
    #[envconfig(from = "CLEANUP_INTERVAL", default = "300")]
    pub cleanup_interval_secs: u64,

    /// JSON document with field rules
    #[envconfig(from = "RULES_FILE")]
    pub rules_file: Option<PathBuf>,

    #[envconfig(from = "MAIL_FROM", default = "")]
    pub mail_from: String,

    #[envconfig(from = "MAIL_TO", default = "")]
    pub mail_to: String,

    #[envconfig(from = "LOG_LEVEL", default = "info")]
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, envconfig::Error> {
        Config::init_from_env()
    }

    /// Load configuration from an explicit map, falling back to defaults.
    pub fn from_map(vars: &HashMap<String, String>) -> Result<Self, envconfig::Error> {
        Config::init_from_hashmap(vars)
    }

    pub fn backend_timeout(&self) -> Duration {
        Duration::from_millis(self.backend_timeout_ms)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    pub fn rate_settings(&self) -> RateSettings {
        RateSettings::new(self.rate_limit).per_window(self.rate_window_secs)
    }

    pub fn envelope(&self) -> Envelope {
        Envelope {
            from: self.mail_from.clone(),
            to: self.mail_to.clone(),
        }
    }
}
