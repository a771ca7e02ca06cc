use std::future::Future;
use std::sync::Arc;

use tokio::net::TcpListener;

use crate::config::Config;
use crate::config_cache::ConfigCache;
use crate::remote::HttpRemoteClient;
use crate::resolver::CookieUserStore;
use crate::router;

pub async fn serve<F>(config: Config, listener: TcpListener, shutdown: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    let remote = match HttpRemoteClient::new(
        &config.remote_url,
        &config.app_reference,
        config.remote_timeout(),
    ) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            tracing::error!(
                "failed to create remote client for {}: {}",
                config.remote_url,
                e
            );
            return;
        }
    };

    let cache = Arc::new(ConfigCache::new());

    // Announce our declarations once, then keep the configuration fresh in
    // the background. Requests read whatever the cache currently holds, so
    // neither call blocks serving.
    cache.announce(remote.as_ref()).await;
    tokio::spawn(refresh_loop(
        cache.clone(),
        remote.clone(),
        config.refresh_interval(),
    ));

    let user_store = Arc::new(CookieUserStore::new(
        config.cookie_name.clone(),
        config.cookie_max_age_secs,
    ));

    let app = router::router(cache, user_store);

    tracing::info!("listening on {:?}", listener.local_addr().unwrap());
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown)
        .await
        .unwrap()
}

async fn refresh_loop(
    cache: Arc<ConfigCache>,
    remote: Arc<HttpRemoteClient>,
    interval: std::time::Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await; // immediate first tick, announce already covered it
    loop {
        ticker.tick().await;
        cache.refresh(remote.as_ref()).await;
        tracing::debug!(fetched = cache.fetched(), "refreshed experiment configuration");
    }
}
