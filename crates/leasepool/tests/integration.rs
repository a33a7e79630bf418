//! Connection pool integration tests.
//!
//! These run against the in-memory mock connection from `leasepool-testing`,
//! so no external service is required:
//!
//! ```bash
//! RUST_LOG=leasepool=trace cargo test -p leasepool --test integration
//! ```

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use leasepool::{BoxError, Context, Cooperative, PoolConfig, PoolError, PoolRegistry, Proxy};
use leasepool_testing::{MockConnection, MockController, MockPool, init_tracing};

fn mock_pool(config: PoolConfig) -> MockPool {
    init_tracing();
    MockPool::new(config).expect("valid pool config")
}

// =============================================================================
// Basic Pool Tests
// =============================================================================

#[test]
fn test_pool_create_and_close() {
    let MockPool { pool, ctl } = mock_pool(PoolConfig::new().max_connections(5));

    assert!(!pool.is_closed());
    let status = pool.status();
    assert_eq!(status.max, 5);
    assert_eq!(status.in_use, 0);
    assert_eq!(status.total, 0, "connections are created lazily");

    drop(pool.lease().unwrap());
    pool.close();
    assert!(pool.is_closed());
    assert_eq!(ctl.closes(), 1);
    assert!(matches!(pool.lease(), Err(PoolError::PoolClosed)));
}

#[test]
fn test_pool_status_tracking() {
    let MockPool { pool, .. } = mock_pool(PoolConfig::new().max_connections(5));

    let conn1 = pool.lease().unwrap();
    let status = pool.status();
    assert_eq!(status.in_use, 1);
    assert_eq!(status.total, 1);

    let conn2 = pool.lease().unwrap();
    assert_eq!(pool.status().in_use, 2);

    drop(conn1);
    let status = pool.status();
    assert_eq!(status.in_use, 1);
    assert_eq!(status.available, 1);

    conn2.release();
    let status = pool.status();
    assert_eq!(status.in_use, 0);
    assert_eq!(status.available, 2);
}

#[test]
fn test_capacity_scenario() {
    let config = PoolConfig::new()
        .min_connections(1)
        .max_connections(2)
        .idle_timeout(Duration::from_secs(10));
    let MockPool { pool, ctl } = mock_pool(config);

    let a = pool.lease().unwrap();
    let b = pool.lease().unwrap();
    let a_id = a.id();
    assert!(pool.status().is_at_capacity());

    let err = pool.lease().unwrap_err();
    assert!(matches!(err, PoolError::Exhausted { max: 2 }));

    a.release();
    let status = pool.status();
    assert_eq!((status.available, status.in_use), (1, 1));

    let again = pool.lease().unwrap();
    assert_eq!(again.id(), a_id, "the idle connection should be reused");
    assert_eq!(ctl.created(), 2, "no new connection should be created");
    drop(b);
}

#[test]
fn test_release_then_lease_returns_same_connection() {
    let MockPool { pool, .. } = mock_pool(PoolConfig::new().max_connections(3));

    let first = pool.lease().unwrap();
    let id = first.id();
    drop(first);

    let second = pool.lease().unwrap();
    assert_eq!(second.id(), id);
    assert_eq!(second.metadata().checkout_count, 2);
}

#[test]
fn test_freshest_connection_is_preferred() {
    let MockPool { pool, .. } = mock_pool(PoolConfig::new().max_connections(3));

    let mut stale = pool.lease().unwrap();
    let mut warm = pool.lease().unwrap();
    stale.set_idle(Duration::from_secs(50));
    warm.set_idle(Duration::from_secs(1));
    let warm_id = warm.id();

    drop(warm);
    drop(stale);

    assert_eq!(pool.lease().unwrap().id(), warm_id);
}

#[test]
fn test_dead_idle_connection_is_reconnected() {
    let MockPool { pool, ctl } = mock_pool(PoolConfig::new().max_connections(1));
    drop(pool.lease().unwrap());

    ctl.fail_ping(true);
    let conn = pool.lease().unwrap();
    assert_eq!(conn.id(), 1);
    assert_eq!(ctl.connects(), 2);
    assert_eq!(pool.metrics().pings_failed, 1);
}

#[test]
fn test_reconnect_failure_is_reported_and_slot_freed() {
    let MockPool { pool, ctl } = mock_pool(PoolConfig::new().max_connections(1));
    drop(pool.lease().unwrap());

    ctl.fail_ping(true);
    ctl.fail_connect(true);
    let err = pool.lease().unwrap_err();
    assert!(matches!(err, PoolError::Reconnect(_)));

    let status = pool.status();
    assert_eq!(status.total, 0, "broken connection must not stay in the pool");
    assert_eq!(ctl.closes(), 1);

    ctl.fail_ping(false);
    ctl.fail_connect(false);
    let fresh = pool.lease().unwrap();
    assert_eq!(fresh.id(), 2, "capacity should be available again");
}

#[test]
fn test_connection_creation_failure() {
    let MockPool { pool, ctl } = mock_pool(PoolConfig::new().max_connections(1));

    ctl.fail_connect(true);
    assert!(matches!(pool.lease(), Err(PoolError::ConnectionCreation(_))));
    assert_eq!(pool.status().total, 0);

    ctl.fail_connect(false);
    assert!(pool.lease().is_ok());
}

#[test]
fn test_reset_failure_drops_connection() {
    let MockPool { pool, ctl } = mock_pool(PoolConfig::new().max_connections(2));

    let mut conn = pool.lease().unwrap();
    conn.begin().unwrap();
    ctl.fail_reset(true);
    drop(conn);

    let status = pool.status();
    assert_eq!(status.total, 0);
    assert_eq!(ctl.closes(), 1);
    assert_eq!(pool.metrics().resets_failed, 1);
}

#[test]
fn test_discard_broken_connection() {
    let MockPool { pool, ctl } = mock_pool(PoolConfig::new().max_connections(2));

    let conn = pool.lease().unwrap();
    conn.discard();

    assert_eq!(pool.status().total, 0);
    assert_eq!(ctl.closes(), 1);
    assert_eq!(ctl.resets(), 0, "discarded connections are not reset");
}

#[test]
fn test_lease_released_on_panic() {
    let MockPool { pool, .. } = mock_pool(PoolConfig::new().max_connections(1));

    let result = catch_unwind(AssertUnwindSafe(|| {
        let _conn = pool.lease().unwrap();
        panic!("handler blew up");
    }));
    assert!(result.is_err());

    let status = pool.status();
    assert_eq!(status.in_use, 0);
    assert_eq!(status.available, 1);
}

#[test]
fn test_dropping_pool_closes_idle_connections() {
    let MockPool { pool, ctl } = mock_pool(PoolConfig::new().max_connections(3));
    let a = pool.lease().unwrap();
    let b = pool.lease().unwrap();
    drop((a, b));

    drop(pool);
    assert_eq!(ctl.closes(), 2);
}

// =============================================================================
// Eviction Tests
// =============================================================================

#[test]
fn test_eviction_runs_every_clean_interval() {
    let config = PoolConfig::new()
        .min_connections(1)
        .max_connections(3)
        .idle_timeout(Duration::from_secs(10))
        .clean_interval(3);
    let MockPool { pool, ctl } = mock_pool(config);

    let mut a = pool.lease().unwrap();
    let mut b = pool.lease().unwrap();
    let mut c = pool.lease().unwrap();
    a.set_idle(Duration::from_secs(60));
    b.set_idle(Duration::from_secs(60));
    c.set_idle(Duration::from_secs(1));
    let fresh = c.id();

    drop(a);
    drop(b);
    assert_eq!(pool.status().total, 3, "no pass before the interval");
    drop(c);

    let status = pool.status();
    assert_eq!(status.total, 1);
    assert_eq!(ctl.closes(), 2);
    assert_eq!(pool.lease().unwrap().id(), fresh);

    let metrics = pool.metrics();
    assert_eq!(metrics.connections_evicted, 2);
    assert_eq!(metrics.eviction_passes, 1);
}

#[test]
fn test_eviction_never_shrinks_below_min() {
    let config = PoolConfig::new()
        .min_connections(2)
        .max_connections(3)
        .idle_timeout(Duration::from_secs(10));
    let MockPool { pool, ctl } = mock_pool(config);

    let held: Vec<_> = (0..3).map(|_| pool.lease().unwrap()).collect();
    drop(held);
    ctl.set_idle(Some(Duration::from_secs(600)));

    assert_eq!(pool.evict_idle(), 1);
    assert_eq!(pool.status().total, 2);
    assert_eq!(pool.evict_idle(), 0);
}

#[test]
fn test_eviction_budget_counts_leased_connections() {
    let config = PoolConfig::new()
        .min_connections(2)
        .max_connections(4)
        .idle_timeout(Duration::from_secs(10));
    let MockPool { pool, ctl } = mock_pool(config);

    let held: Vec<_> = (0..2).map(|_| pool.lease().unwrap()).collect();
    let idle: Vec<_> = (0..2).map(|_| pool.lease().unwrap()).collect();
    drop(idle);
    ctl.set_idle(Some(Duration::from_secs(600)));

    // total 4, floor 2: both idle connections may go even though two are leased.
    assert_eq!(pool.evict_idle(), 2);
    let status = pool.status();
    assert_eq!((status.available, status.in_use), (0, 2));
    drop(held);
}

#[test]
fn test_fresh_connections_survive_eviction() {
    let config = PoolConfig::new()
        .min_connections(0)
        .max_connections(3)
        .idle_timeout(Duration::from_secs(10));
    let MockPool { pool, .. } = mock_pool(config);

    let mut stale = pool.lease().unwrap();
    let mut fresh = pool.lease().unwrap();
    stale.set_idle(Duration::from_secs(11));
    fresh.set_idle(Duration::from_secs(9));
    let fresh_id = fresh.id();
    drop((stale, fresh));

    assert_eq!(pool.evict_idle(), 1);
    assert_eq!(pool.status().available, 1);
    assert_eq!(pool.lease().unwrap().id(), fresh_id);
}

#[test]
fn test_eviction_tolerates_close_failures() {
    let config = PoolConfig::new()
        .min_connections(0)
        .max_connections(2)
        .idle_timeout(Duration::from_secs(1));
    let MockPool { pool, ctl } = mock_pool(config);

    let held: Vec<_> = (0..2).map(|_| pool.lease().unwrap()).collect();
    drop(held);
    ctl.set_idle(Some(Duration::from_secs(5)));
    ctl.fail_close(true);

    assert_eq!(pool.evict_idle(), 2);
    assert_eq!(ctl.closes(), 2);
    assert_eq!(pool.status().total, 0);
}

// =============================================================================
// Proxy Tests
// =============================================================================

#[test]
fn test_proxy_pins_transaction_to_context() {
    let MockPool { pool, .. } = mock_pool(PoolConfig::new().max_connections(2));
    let proxy = Proxy::new(pool.clone());
    let mut ctx = Context::new();

    proxy
        .invoke(&mut ctx, |c| -> Result<(), BoxError> { Ok(c.begin()?) })
        .unwrap();
    let pinned = ctx.pinned(&proxy).unwrap().id();
    let in_use = pool.status().in_use;

    let seen = proxy
        .invoke(&mut ctx, |c| -> Result<u64, BoxError> {
            c.execute("UPDATE accounts SET balance = 0")?;
            Ok(c.id())
        })
        .unwrap();
    assert_eq!(seen, pinned);
    assert_eq!(pool.status().in_use, in_use);

    proxy
        .invoke(&mut ctx, |c| -> Result<(), BoxError> { Ok(c.commit()?) })
        .unwrap();
    assert!(!ctx.is_pinned(&proxy));
    assert_eq!(pool.status().in_use, 0);
}

#[test]
fn test_proxy_contexts_are_isolated() {
    let MockPool { pool, .. } = mock_pool(PoolConfig::new().max_connections(2));
    let proxy = Proxy::new(pool.clone());
    let mut alice = Context::new();
    let mut bob = Context::new();

    let a = proxy
        .invoke(&mut alice, |c| -> Result<u64, BoxError> {
            c.begin()?;
            Ok(c.id())
        })
        .unwrap();
    let b = proxy
        .invoke(&mut bob, |c| -> Result<u64, BoxError> {
            c.begin()?;
            Ok(c.id())
        })
        .unwrap();

    assert_ne!(a, b);
    assert_eq!(pool.status().in_use, 2);
}

#[test]
fn test_proxy_pins_per_pool_not_per_name() {
    let MockPool { pool: pool_a, .. } = mock_pool(PoolConfig::new().max_connections(1));
    let MockPool { pool: pool_b, ctl: ctl_b } = mock_pool(PoolConfig::new().max_connections(1));
    assert_eq!(pool_a.name(), pool_b.name());

    let a = Proxy::new(pool_a.clone());
    let b = Proxy::new(pool_b.clone());
    let mut ctx = Context::new();

    a.invoke(&mut ctx, |c| -> Result<(), BoxError> { Ok(c.begin()?) })
        .unwrap();
    b.invoke(&mut ctx, |c| -> Result<(), BoxError> {
        Ok(c.execute("INSERT INTO b VALUES (1)")?)
    })
    .unwrap();

    assert_eq!(ctl_b.created(), 1, "pool b must serve its own proxy");
    assert_eq!(pool_a.status().in_use, 1);
    assert_eq!(pool_b.status().in_use, 0);
    let pinned_a = ctx.pinned(&a).unwrap();
    assert_eq!(pinned_a.statements(), ["BEGIN"]);
    assert!(!ctx.is_pinned(&b));
}

#[test]
fn test_proxy_propagates_operation_error_unchanged() {
    let MockPool { pool, .. } = mock_pool(PoolConfig::new().max_connections(1));
    let proxy = Proxy::new(pool.clone());
    let mut ctx = Context::new();

    let err = proxy
        .invoke(&mut ctx, |c| -> Result<(), BoxError> { Ok(c.execute("FAIL: bad sql")?) })
        .unwrap_err();
    assert_eq!(err.to_string(), "statement failed: FAIL: bad sql");
    assert_eq!(pool.status().in_use, 0, "reusable connection is released after errors too");
}

#[test]
fn test_proxy_reports_exhaustion() {
    let MockPool { pool, .. } = mock_pool(PoolConfig::new().max_connections(1));
    let proxy = Proxy::new(pool.clone());
    let _held = pool.lease().unwrap();
    let mut ctx = Context::new();

    let err = proxy
        .invoke(&mut ctx, |c| -> Result<(), BoxError> { Ok(c.execute("SELECT 1")?) })
        .unwrap_err();
    let pool_err = err.downcast_ref::<PoolError>().expect("pool error");
    assert!(pool_err.is_exhausted());
}

#[test]
fn test_proxy_releases_on_panic() {
    let MockPool { pool, .. } = mock_pool(PoolConfig::new().max_connections(1));
    let proxy = Proxy::new(pool.clone());
    let mut ctx = Context::new();

    let result = catch_unwind(AssertUnwindSafe(|| {
        proxy.invoke(&mut ctx, |_c| -> Result<(), BoxError> { panic!("op blew up") })
    }));
    assert!(result.is_err());
    assert_eq!(ctx.pinned_count(), 0);
    assert_eq!(pool.status().in_use, 0);
}

#[test]
fn test_context_drop_rolls_back_open_transaction() {
    let MockPool { pool, ctl } = mock_pool(PoolConfig::new().max_connections(1));
    let proxy = Proxy::new(pool.clone());

    {
        let mut ctx = Context::new();
        proxy
            .invoke(&mut ctx, |c| -> Result<(), BoxError> { Ok(c.begin()?) })
            .unwrap();
    }

    assert_eq!(ctl.resets(), 1);
    let conn = pool.lease().unwrap();
    assert!(!conn.in_transaction());
}

// =============================================================================
// Registry Tests
// =============================================================================

#[test]
fn test_registry_lookup() {
    init_tracing();
    let users = MockController::new();
    let audit = MockController::new();

    let mut registry: PoolRegistry<MockConnection> = PoolRegistry::new();
    registry
        .register("users", PoolConfig::new().max_connections(2), users.factory())
        .unwrap();
    registry
        .register("audit", PoolConfig::new().max_connections(1), audit.factory())
        .unwrap();

    drop(registry.lease("users").unwrap());
    assert_eq!(users.created(), 1);
    assert_eq!(audit.created(), 0);

    let err = registry.get("billing").unwrap_err();
    assert!(matches!(err, PoolError::Configuration(_)));

    let proxy = registry.proxy("audit").unwrap();
    assert_eq!(proxy.name(), "audit");
}

// =============================================================================
// Concurrent Access Tests
// =============================================================================

#[test]
fn test_pool_concurrent_access() {
    let MockPool { pool, ctl } = mock_pool(PoolConfig::new().min_connections(1).max_connections(4));

    let leased = AtomicU32::new(0);
    let exhausted = AtomicU32::new(0);

    std::thread::scope(|s| {
        for _ in 0..8 {
            s.spawn(|| {
                for i in 0..200 {
                    match pool.lease() {
                        Ok(mut conn) => {
                            conn.execute(&format!("SELECT {i}")).unwrap();
                            let status = pool.status();
                            assert!(status.total <= status.max);
                            leased.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) => {
                            assert!(e.is_exhausted(), "unexpected error: {e}");
                            exhausted.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
            });
        }
    });

    let leased = leased.load(Ordering::Relaxed);
    let exhausted = exhausted.load(Ordering::Relaxed);
    assert_eq!(leased + exhausted, 1600);

    let status = pool.status();
    assert_eq!(status.in_use, 0);
    assert!(status.total <= 4);
    assert!(ctl.created() <= 4);

    let metrics = pool.metrics();
    assert_eq!(metrics.leases_successful, u64::from(leased));
    assert_eq!(metrics.leases_exhausted, u64::from(exhausted));
}

#[test]
fn test_registry_shared_across_threads() {
    init_tracing();
    let ctl = MockController::new();
    let mut registry: PoolRegistry<MockConnection> = PoolRegistry::new();
    registry
        .register("main", PoolConfig::new().max_connections(8), ctl.factory())
        .unwrap();
    let registry = Arc::new(registry);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let registry = Arc::clone(&registry);
            std::thread::spawn(move || {
                let proxy = registry.proxy("main").unwrap();
                let mut ctx = Context::new();
                for _ in 0..50 {
                    proxy
                        .invoke(&mut ctx, |c| -> Result<(), BoxError> {
                            c.begin()?;
                            Ok(())
                        })
                        .unwrap();
                    proxy
                        .invoke(&mut ctx, |c| -> Result<(), BoxError> {
                            c.execute("INSERT INTO log VALUES (1)")?;
                            Ok(c.commit()?)
                        })
                        .unwrap();
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("worker panicked");
    }

    let status = registry.get("main").unwrap().status();
    assert_eq!(status.in_use, 0);
    assert!(status.total <= 8);
}

// =============================================================================
// Cooperative Mode Tests
// =============================================================================

async fn run_job(proxy: Proxy<MockConnection, Cooperative>) -> Result<(), BoxError> {
    let mut ctx = Context::new();
    proxy.invoke(&mut ctx, |c| -> Result<(), BoxError> { Ok(c.begin()?) })?;
    tokio::task::yield_now().await;
    proxy.invoke(&mut ctx, |c| -> Result<(), BoxError> {
        c.execute("UPDATE jobs SET done = 1")?;
        Ok(c.commit()?)
    })
}

#[tokio::test(flavor = "current_thread")]
async fn test_cooperative_pool_on_local_set() {
    init_tracing();
    let MockPool { pool, ctl } = MockPool::local(PoolConfig::new().max_connections(2)).unwrap();
    let local = tokio::task::LocalSet::new();

    let outcomes = local
        .run_until(async {
            let tasks: Vec<_> = (0..4)
                .map(|_| tokio::task::spawn_local(run_job(Proxy::new(pool.clone()))))
                .collect();

            let mut outcomes = Vec::new();
            for task in tasks {
                outcomes.push(task.await.expect("task panicked"));
            }
            outcomes
        })
        .await;

    let succeeded = outcomes.iter().filter(|r| r.is_ok()).count();
    assert!(succeeded >= 2);
    for err in outcomes.iter().filter_map(|r| r.as_ref().err()) {
        let pool_err = err.downcast_ref::<PoolError>().expect("pool error");
        assert!(pool_err.is_exhausted());
    }

    let status = pool.status();
    assert_eq!(status.in_use, 0);
    assert!(status.total <= 2);
    assert!(ctl.created() <= 2);
}
