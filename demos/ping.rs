//! Serves `/cache_ping` through the page cache a few times and prints what
//! the client would see.
//!
//! ```text
//! RUST_LOG=rttp_cache=debug cargo run --example ping
//! ```

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rttp_cache::cache::{CacheConfig, ResponseCache};
use rttp_cache::context::Context;
use rttp_cache::middleware::LoggerMiddleware;
use rttp_cache::{Request, Router, StatusCode};
use tracing_subscriber::EnvFilter;

async fn ping(mut ctx: Context) -> Context {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    if let Err(err) = ctx.string(StatusCode::Ok, format!("pong {nanos}")).await {
        tracing::warn!(error = %err, "failed to answer ping");
    }
    ctx
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = CacheConfig::from_json(
        r#"{ "default_expiration_secs": 60, "backend": { "kind": "memory", "janitor_interval_secs": 30 } }"#,
    )?;
    let cache = ResponseCache::from_config(&config).await?;

    let mut router = Router::new();
    router.layer(LoggerMiddleware);
    router.get_with("/cache_ping", cache.page(Duration::from_secs(1)), ping);

    for round in 1..=2 {
        let response = router.route(Request::get("/cache_ping")).await;
        println!("#{round} {} {}", response.status(), response.text());
    }

    tokio::time::sleep(Duration::from_millis(1100)).await;
    let response = router.route(Request::get("/cache_ping")).await;
    println!("#3 {} {} (after expiry)", response.status(), response.text());

    Ok(())
}
