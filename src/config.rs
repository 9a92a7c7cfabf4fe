//! Process configuration, read from flags or the environment.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

/// Upstream API every proxied request is forwarded to.
pub const DEFAULT_UPSTREAM: &str = "https://www.swiggy.com";

/// Caching reverse proxy for a single upstream API
#[derive(Parser, Debug, Clone)]
#[command(name = "rttp-proxy")]
#[command(about = "Caching reverse proxy for a single upstream API")]
#[command(version)]
pub struct Config {
    /// Interface to listen on
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on
    #[arg(long, env = "PORT", default_value_t = 5000)]
    pub port: u16,

    /// Base URL of the upstream API
    #[arg(long, env = "UPSTREAM_URL", default_value = DEFAULT_UPSTREAM)]
    pub upstream: String,

    /// How long a successful upstream response stays cached, in seconds
    #[arg(long, env = "CACHE_TTL_SECS", default_value_t = 300)]
    pub cache_ttl_secs: u64,

    /// Upper bound on a single upstream request, in seconds
    #[arg(long, env = "UPSTREAM_TIMEOUT_SECS", default_value_t = 10)]
    pub upstream_timeout_secs: u64,

    /// Directory holding the single-page app shell (`index.html`)
    #[arg(long, env = "STATIC_DIR", default_value = "dist")]
    pub static_dir: PathBuf,
}

impl Config {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout_secs)
    }
}
