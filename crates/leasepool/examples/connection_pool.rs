//! Connection pooling with metrics example.
//!
//! This example demonstrates the pool, the registry and the lazy proxy
//! against in-memory mock connections, and how to monitor pool health
//! through status and metrics.
//!
//! # Running
//!
//! ```bash
//! RUST_LOG=leasepool=debug cargo run -p leasepool --example connection_pool
//! ```

// Allow common patterns in example code
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use leasepool::{BoxError, Context, Pool, PoolConfig, PoolRegistry};
use leasepool_testing::{MockConnection, MockController};

fn main() -> Result<(), BoxError> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    println!("=== Connection Pool with Metrics Example ===\n");

    let pool_config = PoolConfig::new()
        .min_connections(2)
        .max_connections(4)
        .idle_timeout(Duration::from_secs(300))
        .clean_interval(50);

    println!("Pool configuration:");
    println!("  Min connections: {}", pool_config.min_size());
    println!("  Max connections: {}", pool_config.max_size());
    println!("  Idle timeout: {:?}", pool_config.idle_timeout);
    println!("  Clean interval: {} releases", pool_config.clean_interval);
    println!();

    let users = MockController::new();
    let audit = MockController::new();

    let mut registry: PoolRegistry<MockConnection> = PoolRegistry::new();
    registry.register("users", pool_config.clone(), users.factory())?;
    registry.register("audit", PoolConfig::new().max_connections(1), audit.factory())?;
    let registry = Arc::new(registry);

    // Example 1: Basic pool usage
    println!("1. Basic pool usage:");
    {
        let mut conn = registry.lease("users")?;
        conn.execute("SELECT 1")?;
        println!("  Leased connection {} from `users`", conn.id());
        // Connection is automatically returned to pool when dropped
    }
    print_pool_status(registry.get("users")?);

    // Example 2: Transactions through the proxy
    println!("\n2. Transaction pinning through a proxy:");
    let proxy = registry.proxy("users")?;
    let mut ctx = Context::new();
    proxy.invoke(&mut ctx, |c| -> Result<(), BoxError> { Ok(c.begin()?) })?;
    println!("  After BEGIN, pinned: {}", ctx.is_pinned(&proxy));
    proxy.invoke(&mut ctx, |c| -> Result<(), BoxError> {
        Ok(c.execute("UPDATE users SET active = 1")?)
    })?;
    proxy.invoke(&mut ctx, |c| -> Result<(), BoxError> { Ok(c.commit()?) })?;
    println!("  After COMMIT, pinned: {}", ctx.is_pinned(&proxy));

    // Example 3: Concurrent usage
    println!("\n3. Concurrent pool usage (8 threads x 100 operations):");
    let start = Instant::now();
    let handles: Vec<_> = (0..8)
        .map(|i| {
            let registry = Arc::clone(&registry);
            std::thread::spawn(move || {
                let proxy = registry.proxy("users").expect("registered");
                let mut ctx = Context::new();
                let mut refused = 0;
                for _ in 0..100 {
                    let result = proxy.invoke(&mut ctx, |c| -> Result<(), BoxError> {
                        Ok(c.execute(&format!("SELECT {i}"))?)
                    });
                    if result.is_err() {
                        refused += 1;
                    }
                }
                refused
            })
        })
        .collect();

    let mut refused = 0;
    for handle in handles {
        refused += handle.join().expect("worker panicked");
    }
    println!(
        "  Completed in {:?}, {} operations refused at capacity",
        start.elapsed(),
        refused
    );
    print_pool_metrics(registry.get("users")?);

    // Example 4: Monitor pool health
    println!("\n4. Pool health monitoring:");
    let held: Vec<_> = (0..3).map(|_| registry.lease("users")).collect::<Result<_, _>>()?;
    let status = registry.get("users")?.status();
    let utilization = status.utilization();
    let health_status = if utilization < 70.0 {
        "HEALTHY"
    } else if utilization < 90.0 {
        "WARNING"
    } else {
        "CRITICAL"
    };
    println!("  Pool health: {}", health_status);
    println!("  Utilization: {:.1}%", utilization);
    drop(held);

    // Example 5: Idle eviction
    println!("\n5. Idle eviction:");
    users.set_idle(Some(Duration::from_secs(600)));
    let evicted = registry.get("users")?.evict_idle();
    println!("  Evicted {} stale connections", evicted);
    print_pool_status(registry.get("users")?);

    // Graceful shutdown
    println!("\n6. Graceful shutdown:");
    registry.close_all();
    println!(
        "  Pools closed ({} mock connections closed).",
        users.closes() + audit.closes()
    );

    Ok(())
}

fn print_pool_status(pool: &Pool<MockConnection>) {
    let status = pool.status();
    println!(
        "  Status: {}/{} connections in use, {} idle ({:.1}% utilization)",
        status.in_use,
        status.total,
        status.available,
        status.utilization()
    );
}

fn print_pool_metrics(pool: &Pool<MockConnection>) {
    let metrics = pool.metrics();
    println!("  Metrics:");
    println!("    Connections created: {}", metrics.connections_created);
    println!("    Connections closed: {}", metrics.connections_closed);
    println!(
        "    Lease success rate: {:.2}%",
        metrics.lease_success_rate() * 100.0
    );
    println!(
        "    Pings failed: {}, resets failed: {}",
        metrics.pings_failed, metrics.resets_failed
    );
}
