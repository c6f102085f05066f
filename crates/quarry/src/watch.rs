//! Background schema watcher.
//!
//! Keeps the [`SchemaCache`] fresh. Two mutually exclusive modes,
//! chosen once at startup and fixed for the process lifetime:
//!
//! - **notify mode** (preferred): a [`ChangeFeed`] subscription to one
//!   named channel. Wake-ups (re)arm a single shared debounce deadline,
//!   so a burst of schema changes collapses into at most one reload per
//!   window. On subscription loss the watcher resubscribes after a
//!   fixed backoff and performs one unconditional reload to cover
//!   whatever happened while disconnected, forever until canceled.
//! - **poll mode** (fallback, entered only when the initial subscribe
//!   fails, e.g. for lack of privilege): a fixed-interval ticker
//!   triggers an unconditional reload each tick.

use crate::cache::SchemaCache;
use crate::error::FeedError;
use quarry_sql::quote_ident;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// A change-notification primitive: subscribe to a named channel and
/// receive async wake-ups. Optional; without one the watcher can only
/// poll.
pub trait ChangeFeed: Send + Sync {
    /// Open a subscription. An error here means notifications cannot be
    /// installed at all and the watcher falls back to polling.
    fn subscribe<'a>(
        &'a self,
        channel: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Box<dyn ChangeEvents>, FeedError>> + Send + 'a>>;
}

/// An open change subscription.
pub trait ChangeEvents: Send {
    /// Wait up to `timeout` for a wake-up.
    ///
    /// `Ok(true)` means a notification arrived, `Ok(false)` that the
    /// timeout elapsed (the bound exists only so the caller can check
    /// for cancellation and keep the connection warm), `Err` that the
    /// subscription is lost. Must be cancel-safe: a wake-up must not be
    /// consumed by a wait future that was dropped before completing.
    fn wait<'a>(
        &'a mut self,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<bool, FeedError>> + Send + 'a>>;
}

/// Watcher configuration.
#[derive(Debug, Clone)]
pub struct WatcherOptions {
    /// Notification channel to subscribe to.
    pub channel: String,
    /// Debounce window: notifications within it collapse into one
    /// reload.
    pub debounce: Duration,
    /// Bound on each notification wait, purely for cancellation checks.
    pub wait_timeout: Duration,
    /// Reload interval in poll mode.
    pub poll_interval: Duration,
    /// Fixed backoff between resubscribe attempts.
    pub reconnect_backoff: Duration,
}

impl Default for WatcherOptions {
    fn default() -> Self {
        Self {
            channel: "quarry_schema_changed".to_string(),
            debounce: Duration::from_millis(200),
            wait_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_secs(30),
            reconnect_backoff: Duration::from_secs(5),
        }
    }
}

/// The background watcher task.
pub struct Watcher {
    cache: Arc<SchemaCache>,
    feed: Option<Arc<dyn ChangeFeed>>,
    options: WatcherOptions,
}

impl Watcher {
    /// Create a watcher. Passing `None` for the feed forces poll mode.
    pub fn new(
        cache: Arc<SchemaCache>,
        feed: Option<Arc<dyn ChangeFeed>>,
        options: WatcherOptions,
    ) -> Self {
        Self { cache, feed, options }
    }

    /// Run until `cancel` flips to true. An in-flight reload is allowed
    /// to finish.
    pub async fn run(self, mut cancel: watch::Receiver<bool>) {
        if *cancel.borrow() {
            return;
        }

        // Mode is decided exactly once: if the initial subscribe fails,
        // the watcher polls for the rest of the process lifetime.
        if let Some(feed) = self.feed.clone() {
            match feed.subscribe(&self.options.channel).await {
                Ok(events) => {
                    info!(channel = %self.options.channel, "schema watcher in notify mode");
                    self.notify_loop(feed, events, &mut cancel).await;
                    return;
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        "could not install schema change notifications, falling back to polling"
                    );
                }
            }
        }

        info!(interval = ?self.options.poll_interval, "schema watcher in poll mode");
        self.poll_loop(&mut cancel).await;
    }

    /// Spawn the watcher onto the runtime, returning its handle.
    pub fn spawn(self, cancel: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }

    async fn notify_loop(
        &self,
        feed: Arc<dyn ChangeFeed>,
        mut events: Box<dyn ChangeEvents>,
        cancel: &mut watch::Receiver<bool>,
    ) {
        // Single-slot debounce: rearming replaces the pending deadline,
        // bounding the reload rate to one per window under bursts.
        let mut deadline: Option<Instant> = None;

        loop {
            tokio::select! {
                _ = cancel.changed() => return,
                _ = sleep_until_opt(deadline) => {
                    deadline = None;
                    if let Err(e) = self.cache.reload().await {
                        warn!(error = %e, "schema reload failed");
                    }
                }
                result = events.wait(self.options.wait_timeout) => match result {
                    Ok(true) => {
                        debug!("schema change notification received");
                        deadline = Some(Instant::now() + self.options.debounce);
                    }
                    Ok(false) => {
                        // Timeout: nothing to do, the bound only exists so
                        // this loop can observe cancellation.
                    }
                    Err(e) => {
                        warn!(error = %e, "schema notification connection lost");
                        deadline = None;
                        events = match self.resubscribe(&feed, cancel).await {
                            Some(events) => events,
                            None => return,
                        };
                        // Catch up on anything missed while disconnected.
                        if let Err(e) = self.cache.reload().await {
                            warn!(error = %e, "schema reload failed");
                        }
                    }
                },
            }
        }
    }

    /// Reconnect with a fixed backoff, forever, until canceled.
    async fn resubscribe(
        &self,
        feed: &Arc<dyn ChangeFeed>,
        cancel: &mut watch::Receiver<bool>,
    ) -> Option<Box<dyn ChangeEvents>> {
        loop {
            tokio::select! {
                _ = cancel.changed() => return None,
                _ = tokio::time::sleep(self.options.reconnect_backoff) => {}
            }
            match feed.subscribe(&self.options.channel).await {
                Ok(events) => {
                    info!(channel = %self.options.channel, "schema notifications restored");
                    return Some(events);
                }
                Err(e) => {
                    warn!(error = %e, "schema notification resubscribe failed");
                }
            }
        }
    }

    async fn poll_loop(&self, cancel: &mut watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.options.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.changed() => return,
                _ = ticker.tick() => {
                    if let Err(e) = self.cache.reload().await {
                        warn!(error = %e, "schema reload failed");
                    }
                }
            }
        }
    }
}

/// Sleep until the deadline, or forever when there is none.
async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// A [`ChangeFeed`] over LISTEN/NOTIFY.
///
/// Each subscription gets a dedicated long-lived connection whose
/// driver task forwards notifications into a channel; dropping the
/// subscription closes the connection.
pub struct PgChangeFeed {
    config: tokio_postgres::Config,
}

impl PgChangeFeed {
    pub fn new(config: tokio_postgres::Config) -> Self {
        Self { config }
    }
}

impl ChangeFeed for PgChangeFeed {
    fn subscribe<'a>(
        &'a self,
        channel: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Box<dyn ChangeEvents>, FeedError>> + Send + 'a>> {
        Box::pin(async move {
            let (client, mut connection) =
                self.config.connect(tokio_postgres::NoTls).await?;

            let (tx, rx) = mpsc::channel(16);
            tokio::spawn(async move {
                loop {
                    let message =
                        std::future::poll_fn(|cx| connection.poll_message(cx)).await;
                    match message {
                        Some(Ok(tokio_postgres::AsyncMessage::Notification(n))) => {
                            debug!(channel = %n.channel(), "notification received");
                            if tx.send(()).await.is_err() {
                                return;
                            }
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            debug!(error = %e, "notification connection error");
                            return;
                        }
                        None => return,
                    }
                }
            });

            client
                .batch_execute(&format!("LISTEN {}", quote_ident(channel)))
                .await?;

            Ok(Box::new(PgChangeEvents {
                _client: client,
                rx,
            }) as Box<dyn ChangeEvents>)
        })
    }
}

struct PgChangeEvents {
    /// Keeps the LISTEN connection alive for the subscription's life.
    _client: tokio_postgres::Client,
    rx: mpsc::Receiver<()>,
}

impl ChangeEvents for PgChangeEvents {
    fn wait<'a>(
        &'a mut self,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<bool, FeedError>> + Send + 'a>> {
        Box::pin(async move {
            match tokio::time::timeout(timeout, self.rx.recv()).await {
                Ok(Some(())) => Ok(true),
                Ok(None) => Err(FeedError::Closed),
                Err(_) => Ok(false),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::SnapshotSource;
    use crate::error::IntrospectError;
    use quarry_schema::Snapshot;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSource {
        loads: AtomicUsize,
    }

    impl CountingSource {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                loads: AtomicUsize::new(0),
            })
        }

        fn loads(&self) -> usize {
            self.loads.load(Ordering::SeqCst)
        }
    }

    impl SnapshotSource for CountingSource {
        fn load<'a>(
            &'a self,
        ) -> Pin<Box<dyn Future<Output = Result<Snapshot, IntrospectError>> + Send + 'a>>
        {
            Box::pin(async move {
                self.loads.fetch_add(1, Ordering::SeqCst);
                Ok(Snapshot::default())
            })
        }
    }

    /// Poll the load counter under the paused clock until it reaches
    /// `n`; each sleep lets virtual time advance past pending timers.
    async fn wait_for_loads(source: &CountingSource, n: usize) {
        for _ in 0..1000 {
            if source.loads() >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        panic!("timed out waiting for {n} loads (got {})", source.loads());
    }

    /// Let the watcher task run up to its first subscription.
    async fn wait_for_subscription(feed: &FakeFeed, n: usize) {
        for _ in 0..100 {
            if feed.subscriptions() >= n {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("watcher never subscribed");
    }

    /// A scriptable feed: hands out subscriptions fed by mpsc senders.
    struct FakeFeed {
        /// Sender sides for each subscription handed out, in order.
        taps: Mutex<Vec<mpsc::Sender<Result<(), ()>>>>,
        /// When true, subscribe() fails (forcing poll mode).
        refuse: bool,
    }

    impl FakeFeed {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                taps: Mutex::new(vec![]),
                refuse: false,
            })
        }

        fn refusing() -> Arc<Self> {
            Arc::new(Self {
                taps: Mutex::new(vec![]),
                refuse: true,
            })
        }

        fn tap(&self, idx: usize) -> mpsc::Sender<Result<(), ()>> {
            self.taps.lock().unwrap()[idx].clone()
        }

        fn subscriptions(&self) -> usize {
            self.taps.lock().unwrap().len()
        }
    }

    impl ChangeFeed for FakeFeed {
        fn subscribe<'a>(
            &'a self,
            _channel: &'a str,
        ) -> Pin<Box<dyn Future<Output = Result<Box<dyn ChangeEvents>, FeedError>> + Send + 'a>>
        {
            Box::pin(async move {
                if self.refuse {
                    return Err(FeedError::Closed);
                }
                let (tx, rx) = mpsc::channel(16);
                self.taps.lock().unwrap().push(tx);
                Ok(Box::new(FakeEvents { rx }) as Box<dyn ChangeEvents>)
            })
        }
    }

    struct FakeEvents {
        rx: mpsc::Receiver<Result<(), ()>>,
    }

    impl ChangeEvents for FakeEvents {
        fn wait<'a>(
            &'a mut self,
            timeout: Duration,
        ) -> Pin<Box<dyn Future<Output = Result<bool, FeedError>> + Send + 'a>> {
            Box::pin(async move {
                match tokio::time::timeout(timeout, self.rx.recv()).await {
                    Ok(Some(Ok(()))) => Ok(true),
                    Ok(Some(Err(()))) | Ok(None) => Err(FeedError::Closed),
                    Err(_) => Ok(false),
                }
            })
        }
    }

    fn options() -> WatcherOptions {
        WatcherOptions {
            debounce: Duration::from_millis(200),
            wait_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_secs(30),
            reconnect_backoff: Duration::from_millis(100),
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_notification_burst_collapses_to_one_reload() {
        let source = CountingSource::new();
        let cache = Arc::new(SchemaCache::new(source.clone()));
        let feed = FakeFeed::new();
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let watcher = Watcher::new(cache, Some(feed.clone() as Arc<dyn ChangeFeed>), options());
        let handle = watcher.spawn(cancel_rx);
        wait_for_subscription(&feed, 1).await;

        // A burst of notifications within the debounce window.
        let tap = feed.tap(0);
        for _ in 0..5 {
            tap.send(Ok(())).await.unwrap();
        }

        // Wait out the debounce window (paused clock auto-advances):
        // the burst collapses into exactly one reload.
        wait_for_loads(&source, 1).await;
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(source.loads(), 1);

        // A fresh notification after the window triggers another reload.
        tap.send(Ok(())).await.unwrap();
        wait_for_loads(&source, 2).await;

        cancel_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_connection_loss_resubscribes_and_reloads() {
        let source = CountingSource::new();
        let cache = Arc::new(SchemaCache::new(source.clone()));
        let feed = FakeFeed::new();
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let watcher = Watcher::new(cache, Some(feed.clone() as Arc<dyn ChangeFeed>), options());
        let handle = watcher.spawn(cancel_rx);
        wait_for_subscription(&feed, 1).await;

        // Kill the subscription; no notification was ever delivered.
        feed.tap(0).send(Err(())).await.unwrap();

        // The watcher reconnects after the backoff and reloads once,
        // unconditionally, to cover the gap.
        wait_for_loads(&source, 1).await;
        assert_eq!(feed.subscriptions(), 2);
        assert_eq!(source.loads(), 1);

        cancel_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_mode_when_subscribe_fails() {
        let source = CountingSource::new();
        let cache = Arc::new(SchemaCache::new(source.clone()));
        let feed = FakeFeed::refusing();
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let watcher = Watcher::new(cache, Some(feed as Arc<dyn ChangeFeed>), options());
        let handle = watcher.spawn(cancel_rx);

        // First tick fires immediately, then once per interval.
        wait_for_loads(&source, 1).await;
        wait_for_loads(&source, 2).await;

        cancel_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_notify_mode() {
        let source = CountingSource::new();
        let cache = Arc::new(SchemaCache::new(source));
        let feed = FakeFeed::new();
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let watcher = Watcher::new(cache, Some(feed.clone() as Arc<dyn ChangeFeed>), options());
        let handle = watcher.spawn(cancel_rx);
        tokio::task::yield_now().await;

        cancel_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("watcher must stop on cancel")
            .unwrap();
    }
}
