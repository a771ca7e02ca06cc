use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::{routing::get, routing::post, Json, Router};
use once_cell::sync::Lazy;
use reqwest::header::{COOKIE, SET_COOKIE};
use tokio::net::TcpListener;
use tokio::sync::Notify;

use experiments::config::Config;
use experiments::remote::RemoteConfig;
use experiments::server::serve;

pub static DEFAULT_CONFIG: Lazy<Config> = Lazy::new(|| Config {
    address: SocketAddr::from_str("127.0.0.1:0").unwrap(),
    remote_url: "http://127.0.0.1:9".to_string(), // overridden per test
    remote_timeout_ms: 1000,
    refresh_interval_secs: 300,
    app_reference: "test-ref".to_string(),
    cookie_name: "xpr.config".to_string(),
    cookie_max_age_secs: 900,
});

/// Minimal stand-in for the experiments server: serves one fixed
/// configuration and counts how often it gets asked.
pub struct MockRemote {
    pub base_url: String,
    hits: Arc<AtomicUsize>,
    shutdown: Arc<Notify>,
}

impl MockRemote {
    pub async fn with_config(config: RemoteConfig) -> MockRemote {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let notify = Arc::new(Notify::new());
        let shutdown = notify.clone();
        let hits = Arc::new(AtomicUsize::new(0));

        let load_config = config.clone();
        let load_hits = hits.clone();
        let announce_config = config;
        let announce_hits = hits.clone();

        let app = Router::new()
            .route(
                "/config",
                get(move || {
                    let config = load_config.clone();
                    let hits = load_hits.clone();
                    async move {
                        hits.fetch_add(1, Ordering::SeqCst);
                        Json(config)
                    }
                }),
            )
            .route(
                "/announce",
                post(move |_declared: Json<RemoteConfig>| {
                    let config = announce_config.clone();
                    let hits = announce_hits.clone();
                    async move {
                        hits.fetch_add(1, Ordering::SeqCst);
                        Json(config)
                    }
                }),
            );

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { notify.notified().await })
                .await
                .unwrap()
        });

        MockRemote {
            base_url: format!("http://{}", addr),
            hits,
            shutdown,
        }
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

impl Drop for MockRemote {
    fn drop(&mut self) {
        self.shutdown.notify_one()
    }
}

pub struct ServerHandle {
    pub addr: SocketAddr,
    shutdown: Arc<Notify>,
}

impl ServerHandle {
    pub async fn for_config(config: Config) -> ServerHandle {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let notify = Arc::new(Notify::new());
        let shutdown = notify.clone();

        tokio::spawn(async move {
            serve(config, listener, async move { notify.notified().await }).await
        });
        ServerHandle { addr, shutdown }
    }

    pub async fn get(&self, path: &str, cookie: Option<&str>) -> reqwest::Response {
        let client = reqwest::Client::new();
        let mut request = client.get(format!("http://{}{}", self.addr, path));
        if let Some(cookie) = cookie {
            request = request.header(COOKIE, cookie);
        }
        request.send().await.expect("failed to send request")
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.shutdown.notify_one()
    }
}

/// The `name=value` pair of the first experiment cookie set on a response,
/// ignoring cookie attributes.
pub fn experiment_cookie(response: &reqwest::Response) -> Option<String> {
    response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter(|v| v.starts_with("xpr.config=") && !v.contains("Max-Age=0"))
        .map(|v| v.split(';').next().unwrap_or_default().to_string())
        .next()
}
