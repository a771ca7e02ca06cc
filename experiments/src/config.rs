use std::net::SocketAddr;
use std::time::Duration;

use envconfig::Envconfig;

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(default = "127.0.0.1:3400")]
    pub address: SocketAddr,

    #[envconfig(default = "http://localhost:9200")]
    pub remote_url: String,

    #[envconfig(default = "5000")]
    pub remote_timeout_ms: u64,

    #[envconfig(default = "300")]
    pub refresh_interval_secs: u64,

    /// Deployment reference forwarded to the remote, folded into
    /// configuration stamps.
    #[envconfig(default = "local")]
    pub app_reference: String,

    #[envconfig(default = "xpr.config")]
    pub cookie_name: String,

    #[envconfig(default = "900")]
    pub cookie_max_age_secs: u64,
}

impl Config {
    pub fn remote_timeout(&self) -> Duration {
        Duration::from_millis(self.remote_timeout_ms)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }
}
