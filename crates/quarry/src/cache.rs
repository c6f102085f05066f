//! The concurrent schema cache.
//!
//! Holds at most one live [`Snapshot`] behind a read-biased cell:
//! readers clone an `Arc` under a read lock and are never blocked by an
//! in-flight reload, which publishes a brand-new snapshot with a single
//! pointer swap. A reader observes either the old or the new snapshot,
//! never a partial one.

use crate::error::{Error, IntrospectError};
use crate::introspect::Introspector;
use quarry_schema::Snapshot;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::watch;

/// Produces fresh snapshots for the cache.
///
/// The production source is [`PoolSource`]: an [`Introspector`] run
/// over a pooled connection. Object-safe so tests can substitute a
/// counting fake.
pub trait SnapshotSource: Send + Sync {
    /// Build a fresh snapshot.
    fn load<'a>(
        &'a self,
    ) -> Pin<Box<dyn Future<Output = Result<Snapshot, IntrospectError>> + Send + 'a>>;
}

/// A [`SnapshotSource`] backed by a connection pool.
pub struct PoolSource {
    pool: deadpool_postgres::Pool,
    introspector: Introspector,
}

impl PoolSource {
    pub fn new(pool: deadpool_postgres::Pool, introspector: Introspector) -> Self {
        Self { pool, introspector }
    }
}

impl SnapshotSource for PoolSource {
    fn load<'a>(
        &'a self,
    ) -> Pin<Box<dyn Future<Output = Result<Snapshot, IntrospectError>> + Send + 'a>> {
        Box::pin(async move {
            let conn = self.pool.get().await?;
            self.introspector.snapshot(&conn).await
        })
    }
}

/// The concurrent schema cache.
pub struct SchemaCache {
    source: Arc<dyn SnapshotSource>,
    current: RwLock<Option<Arc<Snapshot>>>,
    /// Reentrancy guard: set while an introspection+publish is in
    /// flight, so concurrent reloads collapse into one pass.
    reloading: AtomicBool,
    ready_tx: watch::Sender<bool>,
    ready_rx: watch::Receiver<bool>,
}

impl SchemaCache {
    /// Create a cache over the given snapshot source. The cache starts
    /// empty; call [`SchemaCache::reload`] (or run a watcher) to fill it.
    pub fn new(source: Arc<dyn SnapshotSource>) -> Self {
        let (ready_tx, ready_rx) = watch::channel(false);
        Self {
            source,
            current: RwLock::new(None),
            reloading: AtomicBool::new(false),
            ready_tx,
            ready_rx,
        }
    }

    /// Get the current snapshot, or `None` before the first successful
    /// load. Never blocks on a reload.
    pub fn get(&self) -> Option<Arc<Snapshot>> {
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Like [`SchemaCache::get`], but mapping "not ready" to an error.
    pub fn snapshot(&self) -> Result<Arc<Snapshot>, Error> {
        self.get().ok_or(Error::NotReady)
    }

    /// Rebuild and publish a fresh snapshot.
    ///
    /// At most one introspection pass is in flight at a time: a call
    /// arriving while another reload is active returns `Ok(())`
    /// immediately without queueing, so callers cannot assume their
    /// specific call caused a reload. On failure the prior snapshot
    /// stays in effect and the error propagates to this caller only.
    pub async fn reload(&self) -> Result<(), IntrospectError> {
        if self
            .reloading
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(());
        }

        let result = self.source.load().await;
        let outcome = match result {
            Ok(snapshot) => {
                let snapshot = Arc::new(snapshot);
                *self
                    .current
                    .write()
                    .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(snapshot);
                // First successful load flips readiness, exactly once.
                self.ready_tx.send_replace(true);
                Ok(())
            }
            Err(e) => Err(e),
        };
        self.reloading.store(false, Ordering::Release);
        outcome
    }

    /// Wait until the cache has completed its first successful load.
    ///
    /// Lets a server startup path hold off accepting traffic until real
    /// schema data is available. Returns immediately once ready, for
    /// every caller, forever after.
    pub async fn ready(&self) {
        let mut rx = self.ready_rx.clone();
        // An error here would mean the sender is gone, but the cache
        // owns it for as long as `self` lives.
        let _ = rx.wait_for(|ready| *ready).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::sync::Notify;

    /// Counts introspection passes; optionally blocks until released.
    struct FakeSource {
        loads: AtomicUsize,
        gate: Option<Arc<Notify>>,
        fail: AtomicBool,
    }

    impl FakeSource {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                loads: AtomicUsize::new(0),
                gate: None,
                fail: AtomicBool::new(false),
            })
        }

        fn gated(gate: Arc<Notify>) -> Arc<Self> {
            Arc::new(Self {
                loads: AtomicUsize::new(0),
                gate: Some(gate),
                fail: AtomicBool::new(false),
            })
        }

        fn loads(&self) -> usize {
            self.loads.load(Ordering::SeqCst)
        }
    }

    impl SnapshotSource for FakeSource {
        fn load<'a>(
            &'a self,
        ) -> Pin<Box<dyn Future<Output = Result<Snapshot, IntrospectError>> + Send + 'a>>
        {
            Box::pin(async move {
                self.loads.fetch_add(1, Ordering::SeqCst);
                if let Some(gate) = &self.gate {
                    gate.notified().await;
                }
                if self.fail.load(Ordering::SeqCst) {
                    return Err(IntrospectError::Catalog {
                        step: "tables",
                        source: fake_pg_error().await,
                    });
                }
                Ok(Snapshot::default())
            })
        }
    }

    /// Manufacture a real tokio_postgres::Error by failing to connect.
    async fn fake_pg_error() -> tokio_postgres::Error {
        let result =
            tokio_postgres::connect("host=127.0.0.1 port=1 connect_timeout=1", tokio_postgres::NoTls)
                .await;
        match result {
            Ok(_) => panic!("connection to a closed port must not succeed"),
            Err(e) => e,
        }
    }

    #[tokio::test]
    async fn test_get_before_first_load_is_none() {
        let cache = SchemaCache::new(FakeSource::new());
        assert!(cache.get().is_none());
        assert!(matches!(cache.snapshot(), Err(Error::NotReady)));
    }

    #[tokio::test]
    async fn test_reload_publishes() {
        let source = FakeSource::new();
        let cache = SchemaCache::new(source.clone());
        cache.reload().await.unwrap();
        assert!(cache.get().is_some());
        assert_eq!(source.loads(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_reloads_collapse_to_one_pass() {
        let gate = Arc::new(Notify::new());
        let source = FakeSource::gated(gate.clone());
        let cache = Arc::new(SchemaCache::new(source.clone()));

        // First reload blocks inside the source.
        let first = tokio::spawn({
            let cache = cache.clone();
            async move { cache.reload().await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(source.loads(), 1);

        // Reloads arriving while one is in flight are no-ops.
        for _ in 0..10 {
            cache.reload().await.unwrap();
        }
        assert_eq!(source.loads(), 1);

        gate.notify_one();
        first.await.unwrap().unwrap();
        assert_eq!(source.loads(), 1);
        assert!(cache.get().is_some());
    }

    #[tokio::test]
    async fn test_failed_reload_keeps_prior_snapshot() {
        let source = FakeSource::new();
        let cache = SchemaCache::new(source.clone());
        cache.reload().await.unwrap();
        let before = cache.get().unwrap();

        source.fail.store(true, Ordering::SeqCst);
        assert!(cache.reload().await.is_err());

        let after = cache.get().unwrap();
        assert!(Arc::ptr_eq(&before, &after));
    }

    #[tokio::test]
    async fn test_snapshot_reference_is_immutable_across_reload() {
        let source = FakeSource::new();
        let cache = SchemaCache::new(source.clone());
        cache.reload().await.unwrap();

        let held = cache.get().unwrap();
        let built_at = held.built_at;

        cache.reload().await.unwrap();
        let fresh = cache.get().unwrap();

        // The held reference is the old snapshot, untouched; the cache
        // now serves a different one.
        assert_eq!(held.built_at, built_at);
        assert!(!Arc::ptr_eq(&held, &fresh));
    }

    #[tokio::test]
    async fn test_ready_resolves_after_first_load() {
        let source = FakeSource::new();
        let cache = Arc::new(SchemaCache::new(source));

        let waiter = tokio::spawn({
            let cache = cache.clone();
            async move { cache.ready().await }
        });

        cache.reload().await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("ready must resolve after the first load")
            .unwrap();

        // And it keeps resolving immediately afterwards.
        tokio::time::timeout(Duration::from_secs(1), cache.ready())
            .await
            .expect("ready must stay resolved");
    }

    #[tokio::test]
    async fn test_failed_first_load_does_not_signal_ready() {
        let source = FakeSource::new();
        source.fail.store(true, Ordering::SeqCst);
        let cache = SchemaCache::new(source.clone());

        assert!(cache.reload().await.is_err());
        assert!(
            tokio::time::timeout(Duration::from_millis(50), cache.ready())
                .await
                .is_err(),
            "ready must not resolve after a failed load"
        );
    }
}
