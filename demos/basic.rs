//! Basic example: a rate-limited, cached product lookup.
//!
//! A single in-process store backs both the limiter and the cache. The
//! example serves a burst of requests from two callers, then performs a write
//! and shows the cache being refilled.
//!
//! Run with `RUST_LOG=cache_throttle=debug` to see every hit, miss and
//! rejection.

use cache_throttle::{
    CacheAsideGateway, CacheKey, MemoryStore, Metrics, RequestShield, ShieldError, Ttl,
    WindowPolicy, WindowRateLimiter,
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Product {
    id: u64,
    name: String,
    price_cents: u64,
}

/// Stand-in for a slow database query.
async fn fetch_from_db(id: u64, queries: &AtomicUsize) -> Result<Product, String> {
    queries.fetch_add(1, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(20)).await;
    Ok(Product {
        id,
        name: format!("Widget #{}", id),
        price_cents: 1999,
    })
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let store = Arc::new(MemoryStore::new());
    let metrics = Metrics::new();

    let limiter = WindowRateLimiter::builder(Arc::clone(&store))
        .with_metrics(metrics.clone())
        .build();
    let gateway = CacheAsideGateway::builder(store)
        .with_metrics(metrics.clone())
        .build();

    // 10 requests per caller per minute
    let window = WindowPolicy::new(60, 10).expect("valid window");
    let shield = RequestShield::new(limiter, gateway, window);

    let key = CacheKey::new("product", 42).expect("valid key");
    let ttl = Ttl::from_secs(3600).expect("valid ttl");
    let queries = AtomicUsize::new(0);

    println!("=== Cache-Aside + Rate Limiting Example ===\n");
    println!("Policy: 10 requests per 60s window, cache ttl 1h\n");

    for caller in ["ip:1.2.3.4", "ip:5.6.7.8"] {
        println!("Caller {} sends 12 requests:", caller);
        for i in 1..=12 {
            match shield
                .serve(caller, &key, ttl, || fetch_from_db(42, &queries))
                .await
            {
                Ok(product) => println!("  #{:>2} ok: {}", i, product.name),
                Err(ShieldError::RateLimited { retry_after }) => {
                    println!("  #{:>2} 429, retry after {}s", i, retry_after.as_secs())
                }
                Err(e) => println!("  #{:>2} error: {}", i, e),
            }
        }
        println!();
    }

    println!("Updating product 42, then invalidating its cache entry");
    shield
        .on_write(&[key.clone()], async { Ok::<_, String>(()) })
        .await
        .expect("write succeeds");

    let refreshed: Result<Product, ShieldError<String>> = shield
        .serve("ip:9.9.9.9", &key, ttl, || fetch_from_db(42, &queries))
        .await;
    println!("After write: {:?}\n", refreshed.map(|p| p.name));

    let snapshot = metrics.snapshot();
    println!("=== Metrics ===");
    println!("Database queries:  {}", queries.load(Ordering::SeqCst));
    println!("Cache hits:        {}", snapshot.cache_hits);
    println!("Cache misses:      {}", snapshot.cache_misses);
    println!("Hit rate:          {:.1}%", snapshot.hit_rate() * 100.0);
    println!("Requests admitted: {}", snapshot.requests_admitted);
    println!("Requests rejected: {}", snapshot.requests_rejected);
}
