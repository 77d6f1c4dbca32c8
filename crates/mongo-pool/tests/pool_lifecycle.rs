//! Pool lifecycle tests driven through a scripted connector.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use mongo_pool::{
    CapacityMode, Connector, Pool, PoolConfig, PoolError, ShutdownPolicy,
};
use parking_lot::Mutex;

/// In-memory stand-in for a client session.
#[derive(Clone)]
struct TestConn {
    serial: u64,
    healthy: Arc<AtomicBool>,
}

/// Scripted connector: connections are plain counters whose health and
/// teardown behavior the tests control.
#[derive(Default)]
struct TestConnector {
    serial: AtomicU64,
    fail_connect: AtomicBool,
    fail_disconnect: AtomicBool,
    disconnected: AtomicU64,
    opened: Mutex<Vec<TestConn>>,
}

impl TestConnector {
    fn poison(&self, serial: u64) {
        for conn in self.opened.lock().iter() {
            if conn.serial == serial {
                conn.healthy.store(false, Ordering::SeqCst);
            }
        }
    }
}

fn scripted_error(message: &'static str) -> PoolError {
    PoolError::Connection(mongodb::error::Error::custom(message))
}

#[async_trait]
impl Connector for Arc<TestConnector> {
    type Conn = TestConn;

    async fn connect(&self) -> Result<TestConn, PoolError> {
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(scripted_error("connect refused"));
        }
        let conn = TestConn {
            serial: self.serial.fetch_add(1, Ordering::SeqCst) + 1,
            healthy: Arc::new(AtomicBool::new(true)),
        };
        self.opened.lock().push(conn.clone());
        Ok(conn)
    }

    async fn probe(&self, conn: &TestConn) -> Result<(), PoolError> {
        if conn.healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(scripted_error("connection poisoned"))
        }
    }

    async fn disconnect(&self, _conn: TestConn) -> Result<(), PoolError> {
        if self.fail_disconnect.load(Ordering::SeqCst) {
            return Err(scripted_error("disconnect refused"));
        }
        self.disconnected.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn test_config(max: u32) -> PoolConfig {
    PoolConfig::new()
        .max_pool_size(max)
        .acquire_timeout(Duration::from_millis(100))
}

fn test_pool(
    config: PoolConfig,
) -> (
    Pool<Arc<TestConnector>>,
    mongo_pool::ErrorStream,
    Arc<TestConnector>,
) {
    let connector = Arc::new(TestConnector::default());
    let (pool, errors) =
        Pool::with_connector(config, Arc::clone(&connector)).expect("valid test config");
    (pool, errors, connector)
}

#[tokio::test]
async fn creates_up_to_capacity_then_overflows() {
    let (pool, _errors, _connector) = test_pool(test_config(2));

    let mut first = pool.acquire().await.unwrap();
    let mut second = pool.acquire().await.unwrap();
    assert_ne!(first.id(), second.id());
    assert!(first.is_accounted());
    assert!(second.is_accounted());

    // Capacity is spent and nothing is idle, so the wait budget elapses
    // and an unaccounted overflow connection is opened.
    let mut third = pool.acquire().await.unwrap();
    assert!(!third.is_accounted());

    let metrics = pool.metrics();
    assert_eq!(metrics.created_accounted, 2);
    assert_eq!(metrics.created_fallback, 1);
    assert_eq!(pool.status().created, 2);

    pool.release(&mut first).await.unwrap();
    pool.release(&mut second).await.unwrap();
    // The store only holds two; the overflow handle is discarded.
    pool.release(&mut third).await.unwrap();

    assert_eq!(pool.status().idle, 2);
    assert_eq!(pool.metrics().deposits_discarded, 1);
}

#[tokio::test]
async fn hard_capacity_refuses_overflow() {
    let (pool, _errors, _connector) = test_pool(test_config(1).capacity(CapacityMode::Hard));

    let _held = pool.acquire().await.unwrap();
    let denied = pool.acquire().await;
    assert!(matches!(denied, Err(PoolError::Acquisition(_))));

    let metrics = pool.metrics();
    assert_eq!(metrics.created_accounted, 1);
    assert_eq!(metrics.created_fallback, 0);
    assert_eq!(metrics.checkouts_failed, 1);
}

#[tokio::test]
async fn release_then_acquire_reuses_the_same_handle() {
    let (pool, _errors, _connector) = test_pool(test_config(4));

    let mut conn = pool.acquire().await.unwrap();
    let id = conn.id();
    pool.release(&mut conn).await.unwrap();

    let again = pool.acquire().await.unwrap();
    assert_eq!(again.id(), id);
    assert_eq!(pool.metrics().created_accounted, 1);
}

#[tokio::test]
async fn releasing_a_dead_handle_fails_and_discards() {
    let (pool, _errors, connector) = test_pool(test_config(2));

    let mut conn = pool.acquire().await.unwrap();
    connector.poison(1);

    let result = pool.release(&mut conn).await;
    assert!(matches!(result, Err(PoolError::Connection(_))));
    assert_eq!(pool.status().idle, 0);

    // The guard gave its connection up; releasing again has nothing to act on.
    let again = pool.release(&mut conn).await;
    assert!(matches!(again, Err(PoolError::InvalidHandle)));
}

#[tokio::test]
async fn acquire_skips_unhealthy_idle_handles() {
    let (pool, _errors, connector) = test_pool(test_config(2));

    let mut first = pool.acquire().await.unwrap();
    let mut second = pool.acquire().await.unwrap();
    let survivor = second.id();
    pool.release(&mut first).await.unwrap();
    pool.release(&mut second).await.unwrap();

    connector.poison(1);

    let healthy = pool.acquire().await.unwrap();
    assert_eq!(healthy.id(), survivor);
    assert_eq!(pool.metrics().probes_failed, 1);
    assert_eq!(pool.status().idle, 0);
}

#[tokio::test]
async fn shutdown_of_unused_pool_is_clean() {
    let (pool, _errors, connector) = test_pool(test_config(4));

    pool.close_all().await.unwrap();
    assert!(pool.is_closed());
    assert_eq!(pool.status().idle, 0);
    assert_eq!(connector.disconnected.load(Ordering::SeqCst), 0);

    // Idempotent.
    pool.close_all().await.unwrap();
}

#[tokio::test]
async fn shutdown_disconnects_every_idle_handle() {
    let (pool, _errors, connector) = test_pool(test_config(2));

    let mut first = pool.acquire().await.unwrap();
    let mut second = pool.acquire().await.unwrap();
    pool.release(&mut first).await.unwrap();
    pool.release(&mut second).await.unwrap();

    pool.close_all().await.unwrap();
    assert_eq!(connector.disconnected.load(Ordering::SeqCst), 2);
    assert_eq!(pool.status().idle, 0);
}

#[tokio::test]
async fn shutdown_aggregates_every_drain_failure() {
    let (pool, _errors, connector) = test_pool(test_config(2));

    let mut first = pool.acquire().await.unwrap();
    let mut second = pool.acquire().await.unwrap();
    pool.release(&mut first).await.unwrap();
    pool.release(&mut second).await.unwrap();

    connector.fail_disconnect.store(true, Ordering::SeqCst);

    match pool.close_all().await {
        Err(PoolError::Disconnect { errors }) => assert_eq!(errors.len(), 2),
        other => panic!("expected aggregate disconnect error, got {other:?}"),
    }
    assert_eq!(pool.status().idle, 0);
}

#[tokio::test]
async fn fail_fast_shutdown_stops_at_first_failure() {
    let (pool, _errors, connector) =
        test_pool(test_config(2).shutdown(ShutdownPolicy::FailFast));

    let mut first = pool.acquire().await.unwrap();
    let mut second = pool.acquire().await.unwrap();
    pool.release(&mut first).await.unwrap();
    pool.release(&mut second).await.unwrap();

    connector.fail_disconnect.store(true, Ordering::SeqCst);

    match pool.close_all().await {
        Err(PoolError::Disconnect { errors }) => assert_eq!(errors.len(), 1),
        other => panic!("expected aggregate disconnect error, got {other:?}"),
    }
    // The second handle was never drained.
    assert_eq!(pool.status().idle, 1);
}

#[tokio::test]
async fn release_after_shutdown_fails() {
    let (pool, _errors, _connector) = test_pool(test_config(2));

    let mut conn = pool.acquire().await.unwrap();
    pool.close_all().await.unwrap();

    let result = pool.release(&mut conn).await;
    assert!(matches!(result, Err(PoolError::PoolClosed)));
}

#[tokio::test]
async fn acquire_after_shutdown_fails() {
    let (pool, _errors, _connector) = test_pool(test_config(2));

    pool.close_all().await.unwrap();
    assert!(matches!(pool.acquire().await, Err(PoolError::PoolClosed)));
}

#[tokio::test]
async fn zero_capacity_is_normalized_to_one() {
    let (pool, _errors, _connector) = test_pool(test_config(0));

    assert_eq!(pool.status().max, 1);
    let conn = pool.acquire().await.unwrap();
    assert!(conn.is_accounted());
    assert_eq!(pool.status().created, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 3)]
async fn concurrent_acquires_never_exceed_accounted_capacity() {
    let (pool, _errors, _connector) = test_pool(test_config(2));
    let barrier = Arc::new(tokio::sync::Barrier::new(3));

    let mut tasks = Vec::new();
    for _ in 0..3 {
        let pool = pool.clone();
        let barrier = Arc::clone(&barrier);
        tasks.push(tokio::spawn(async move {
            let mut conn = pool.acquire().await.unwrap();
            let id = conn.id();
            // Hold the connection until everyone has one.
            barrier.wait().await;
            pool.release(&mut conn).await.unwrap();
            id
        }));
    }

    let mut ids = Vec::new();
    for task in tasks {
        ids.push(task.await.unwrap());
    }
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 3, "every caller got a distinct handle");

    let metrics = pool.metrics();
    assert_eq!(metrics.created_accounted, 2);
    assert_eq!(metrics.created_fallback, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn blocked_acquire_wakes_on_release() {
    let config = test_config(1)
        .acquire_timeout(Duration::from_secs(2))
        .capacity(CapacityMode::Hard);
    let (pool, _errors, _connector) = test_pool(config);

    let mut held = pool.acquire().await.unwrap();
    let id = held.id();

    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move {
            let conn = pool.acquire().await.unwrap();
            conn.id()
        })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    pool.release(&mut held).await.unwrap();

    assert_eq!(waiter.await.unwrap(), id);
    assert_eq!(pool.metrics().created_accounted, 1);
}

#[tokio::test]
async fn runner_reports_a_failing_task_exactly_once() {
    let (pool, mut errors, _connector) = test_pool(test_config(1));

    let result = pool
        .run_with(|_conn, _reporter| async {
            Err::<(), PoolError>(PoolError::Acquisition("task failed".to_string()))
        })
        .await;
    assert!(matches!(result, Err(PoolError::Acquisition(_))));

    assert!(matches!(errors.try_recv(), Some(PoolError::Acquisition(_))));
    assert!(errors.try_recv().is_none(), "exactly one error reported");
    // The handle was healthy and went back to the store.
    assert_eq!(pool.status().idle, 1);
}

#[tokio::test]
async fn runner_releases_after_success() {
    let (pool, mut errors, _connector) = test_pool(test_config(1));

    let serial = pool
        .run_with(|conn, _reporter| async move { Ok::<u64, PoolError>(conn.serial) })
        .await
        .unwrap();
    assert_eq!(serial, 1);
    assert_eq!(pool.status().idle, 1);
    assert!(errors.try_recv().is_none());
}

#[tokio::test]
async fn runner_reports_acquisition_failures() {
    let (pool, mut errors, connector) = test_pool(test_config(1));
    connector.fail_connect.store(true, Ordering::SeqCst);

    let result = pool
        .run_with(|_conn, _reporter| async { Ok::<(), PoolError>(()) })
        .await;
    assert!(matches!(result, Err(PoolError::Connection(_))));
    assert!(matches!(errors.try_recv(), Some(PoolError::Connection(_))));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn spawned_task_signals_completion_and_reports() {
    let (pool, mut errors, _connector) = test_pool(test_config(1));

    let done = pool.spawn_with(|_conn, _reporter| async {
        Err(PoolError::Acquisition("background failure".to_string()))
    });
    done.await.unwrap();

    assert!(matches!(errors.try_recv(), Some(PoolError::Acquisition(_))));
    assert_eq!(pool.status().idle, 1);
}

#[tokio::test]
async fn try_acquire_takes_only_idle_handles() {
    let (pool, _errors, _connector) = test_pool(test_config(2));

    // Nothing idle yet, and try_acquire never creates.
    assert!(pool.try_acquire().await.unwrap().is_none());

    let mut conn = pool.acquire().await.unwrap();
    let id = conn.id();
    pool.release(&mut conn).await.unwrap();

    let taken = pool.try_acquire().await.unwrap().expect("idle handle");
    assert_eq!(taken.id(), id);
}

#[tokio::test]
async fn detached_handles_leave_pool_management() {
    let (pool, _errors, _connector) = test_pool(test_config(2));

    let conn = pool.acquire().await.unwrap();
    let raw = conn.detach().expect("guard held a connection");
    assert_eq!(raw.serial, 1);
    assert_eq!(pool.status().idle, 0);

    // Capacity accounting is unaffected; the next acquire opens a new handle.
    let next = pool.acquire().await.unwrap();
    assert!(next.is_accounted());
    assert_eq!(pool.metrics().created_accounted, 2);
    assert_eq!(pool.metrics().guards_dropped, 0);
}

#[tokio::test]
async fn dropped_guard_is_metered() {
    let (pool, _errors, _connector) = test_pool(test_config(2));

    let conn = pool.acquire().await.unwrap();
    drop(conn);

    assert_eq!(pool.metrics().guards_dropped, 1);
    assert_eq!(pool.status().idle, 0);
}
