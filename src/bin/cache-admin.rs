//! Standalone admin surface for the cache: stats and invalidation over HTTP.

use std::net::SocketAddr;

use savings_cache::{CacheConfig, CacheService, admin};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const DEFAULT_ADDR: &str = "127.0.0.1:8080";

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("CACHE_LOG_FORMAT")
        .map(|f| f.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() {
    init_tracing();

    let addr: SocketAddr = match std::env::var("CACHE_ADMIN_ADDR")
        .unwrap_or_else(|_| DEFAULT_ADDR.to_owned())
        .parse()
    {
        Ok(addr) => addr,
        Err(e) => {
            error!("Invalid CACHE_ADMIN_ADDR: {}", e);
            std::process::exit(2);
        }
    };

    let service = CacheService::init(CacheConfig::from_env()).await;
    let app = admin::router(service.admin_state());

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind {}: {}", addr, e);
            service.shutdown();
            std::process::exit(1);
        }
    };
    info!("Cache admin listening on {}", addr);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
            }
        })
        .await;

    if let Err(e) = served {
        error!("Admin server error: {}", e);
    }
    service.shutdown();
}
