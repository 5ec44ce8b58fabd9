//! Redis example: two limiter instances sharing one counter.
//!
//! Requires a Redis server at `redis://127.0.0.1/` (override with
//! `REDIS_URL`). Run with:
//!
//! ```text
//! cargo run --example redis --features redis-store
//! ```

use cache_throttle::{
    CacheAsideGateway, CacheKey, CircuitBreaker, FailurePolicy, Namespace, RedisStore,
    RedisStoreConfig, Ttl, WindowPolicy, WindowRateLimiter,
};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1/".to_string());
    let config = RedisStoreConfig {
        key_prefix: "demo:".to_string(),
        operation_timeout: Duration::from_millis(200),
        ..Default::default()
    };

    // Two connections stand in for two application instances
    let store_a = RedisStore::connect_with_config(&url, config.clone()).await?;
    let store_b = RedisStore::connect_with_config(&url, config).await?;

    let window = WindowPolicy::new(10, 5)?;
    let breaker = Arc::new(CircuitBreaker::new());

    let instance_a = WindowRateLimiter::builder(store_a.clone())
        .with_failure_policy(FailurePolicy::fail_closed_for(&window))
        .with_circuit_breaker(Arc::clone(&breaker))
        .build();
    let instance_b = WindowRateLimiter::builder(store_b)
        .with_failure_policy(FailurePolicy::fail_closed_for(&window))
        .with_circuit_breaker(breaker)
        .build();

    println!("=== Shared Rate Limit Example ===\n");
    println!("Policy: 5 requests per 10s, fail closed\n");

    for i in 1..=8 {
        let (name, limiter) = if i % 2 == 0 {
            ("b", &instance_b)
        } else {
            ("a", &instance_a)
        };
        let decision = limiter.allow("api-key:demo", &window).await?;
        println!("  request {} via instance {}: {:?}", i, name, decision);
    }

    println!("\n=== Shared Cache ===\n");

    let gateway = CacheAsideGateway::new(store_a);
    let key = CacheKey::new("report", "daily")?;
    let ttl = Ttl::from_secs(60)?;

    for _ in 0..2 {
        let lookup = gateway
            .lookup(&key, ttl, || async {
                Ok::<_, String>("expensive report".to_string())
            })
            .await?;
        println!("  {:?}: {}", lookup.source, lookup.value);
    }

    let outcome = gateway
        .invalidate_prefix(&Namespace::new("report")?)
        .await;
    println!("  invalidated reports: {:?}", outcome);

    Ok(())
}
