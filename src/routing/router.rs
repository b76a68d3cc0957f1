//! Router
//!
//! Per-node orchestrator of heartbeat emission and routing table
//! maintenance.
//!
//! ## Lifecycle
//!
//! ```text
//! Uninitialized ──bootstrap()──> Relaying ──close()──> Closed
//! ```
//!
//! Defaults (clock, table, instance ID, announce channel) are filled in
//! lazily, exactly once, by whichever method needs them first. The first
//! `bootstrap()` joins the relay, installs the validator and starts two
//! background loops:
//!
//! - **clock loop**: advances the table on every tick and requests an
//!   announcement roughly every `ttl/2` (jittered in `[3ttl/8, 5ttl/8)`).
//! - **heartbeat loop**: publishes a fresh heartbeat per request,
//!   retrying failed publishes with exponential backoff.
//!
//! Both loops exit when the router is closed or the clock is stopped.

use crate::adapters::outbound::SystemClock;
use crate::domain::entities::{Heartbeat, RecordRef};
use crate::domain::ports::{Clock, NoopPreparer, PrepareError, Preparer, RelayHandle, Topic, TopicError};
use crate::domain::value_objects::InstanceId;
use crate::infrastructure::backoff::Backoff;
use crate::infrastructure::shutdown::ShutdownController;
use crate::routing::codec::{self, CodecError};
use crate::routing::config::{ConfigError, RouterConfig};
use crate::routing::query::{Constraint, Iter, Query, QueryError, Selector};
use crate::routing::table::RoutingTable;
use crate::routing::validator::Validator;
use parking_lot::Mutex;
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::{Duration, SystemTime};
use tokio::sync::{broadcast, mpsc};

/// How long `close()` waits for the background loops to exit.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Router errors.
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    /// The router (or its clock) has been closed.
    #[error("router closed")]
    Closed,
    #[error(transparent)]
    Topic(#[from] TopicError),
    #[error("invalid router config: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Prepare(#[from] PrepareError),
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Builder for [`Router`]. Every component except the topic is optional.
pub struct RouterBuilder {
    topic: Arc<dyn Topic>,
    clock: Option<Arc<dyn Clock>>,
    table: Option<Arc<RoutingTable>>,
    preparer: Option<Arc<dyn Preparer>>,
    instance: Option<InstanceId>,
    config: RouterConfig,
}

impl RouterBuilder {
    /// Clock driving table eviction and announcements (default: system clock).
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Table to maintain (default: a fresh table at the clock's current time).
    pub fn table(mut self, table: Arc<RoutingTable>) -> Self {
        self.table = Some(table);
        self
    }

    /// Heartbeat hook (default: no-op).
    pub fn preparer(mut self, preparer: Arc<dyn Preparer>) -> Self {
        self.preparer = Some(preparer);
        self
    }

    /// Fixed instance ID (default: random).
    pub fn instance(mut self, id: InstanceId) -> Self {
        self.instance = Some(id);
        self
    }

    pub fn config(mut self, config: RouterConfig) -> Self {
        self.config = config;
        self
    }

    /// Shorthand for overriding only the heartbeat TTL.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.config.ttl = ttl;
        self
    }

    pub fn build(self) -> Result<Router, RouterError> {
        self.config.validate()?;
        Ok(Router {
            topic: self.topic,
            options: Mutex::new(Some(Options {
                clock: self.clock,
                table: self.table,
                preparer: self.preparer,
                instance: self.instance,
            })),
            config: self.config,
            state: OnceLock::new(),
            relay: Mutex::new(None),
            shutdown: ShutdownController::new(),
            closed: AtomicBool::new(false),
            view: Mutex::new(Weak::new()),
        })
    }
}

/// Caller-supplied components, consumed on initialization.
struct Options {
    clock: Option<Arc<dyn Clock>>,
    table: Option<Arc<RoutingTable>>,
    preparer: Option<Arc<dyn Preparer>>,
    instance: Option<InstanceId>,
}

/// Components fixed at initialization.
struct Runtime {
    instance: InstanceId,
    clock: Arc<dyn Clock>,
    table: Arc<RoutingTable>,
    preparer: Arc<dyn Preparer>,
    announce: mpsc::Sender<()>,
    requests: Mutex<Option<mpsc::Receiver<()>>>,
}

/// Heartbeat emitter and routing table owner for one node.
pub struct Router {
    topic: Arc<dyn Topic>,
    options: Mutex<Option<Options>>,
    config: RouterConfig,
    state: OnceLock<Runtime>,
    relay: Mutex<Option<RelayHandle>>,
    shutdown: ShutdownController,
    closed: AtomicBool,
    view: Mutex<Weak<View>>,
}

impl Router {
    pub fn builder(topic: Arc<dyn Topic>) -> RouterBuilder {
        RouterBuilder {
            topic,
            clock: None,
            table: None,
            preparer: None,
            instance: None,
            config: RouterConfig::default(),
        }
    }

    /// Fill in defaults for every component not supplied to the builder.
    /// Runs once; later calls return the same state.
    fn ensure_initialized(&self) -> &Runtime {
        self.state.get_or_init(|| {
            let opts = self.options.lock().take().unwrap_or(Options {
                clock: None,
                table: None,
                preparer: None,
                instance: None,
            });

            let clock: Arc<dyn Clock> = match opts.clock {
                Some(clock) => clock,
                None => Arc::new(SystemClock::new(self.config.tick_interval)),
            };
            let preparer: Arc<dyn Preparer> = match opts.preparer {
                Some(preparer) => preparer,
                None => Arc::new(NoopPreparer),
            };
            let table = opts
                .table
                .unwrap_or_else(|| Arc::new(RoutingTable::new(clock.now())));
            let (announce, requests) = mpsc::channel(1);

            Runtime {
                instance: opts.instance.unwrap_or_else(InstanceId::random),
                clock,
                table,
                preparer,
                announce,
                requests: Mutex::new(Some(requests)),
            }
        })
    }

    /// This process run's instance ID.
    pub fn instance_id(&self) -> InstanceId {
        self.ensure_initialized().instance
    }

    pub fn table(&self) -> Arc<RoutingTable> {
        self.ensure_initialized().table.clone()
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn is_relaying(&self) -> bool {
        self.relay.lock().is_some()
    }

    /// Start relaying (first call only) and request a heartbeat.
    ///
    /// Blocks until the request is queued. Returns [`RouterError::Closed`]
    /// if the router or its clock closes first.
    pub async fn bootstrap(&self) -> Result<(), RouterError> {
        if self.is_closed() {
            return Err(RouterError::Closed);
        }
        let rt = self.ensure_initialized();
        let done = rt.clock.done();
        if done.is_shutdown() {
            return Err(RouterError::Closed);
        }
        self.start(rt)?;

        tokio::select! {
            sent = rt.announce.send(()) => sent.map_err(|_| RouterError::Closed),
            _ = self.shutdown.cancelled() => Err(RouterError::Closed),
            _ = done.cancelled() => Err(RouterError::Closed),
        }
    }

    fn start(&self, rt: &Runtime) -> Result<(), RouterError> {
        let mut relay = self.relay.lock();
        if relay.is_some() {
            return Ok(());
        }
        // The request receiver is taken by the first successful start.
        let Some(requests) = rt.requests.lock().take() else {
            return Err(RouterError::Closed);
        };
        if self.is_closed() {
            return Err(RouterError::Closed);
        }

        let mut handle = match self.topic.relay() {
            Ok(handle) => handle,
            Err(e) => {
                *rt.requests.lock() = Some(requests);
                return Err(e.into());
            }
        };
        if let Err(e) = self
            .topic
            .register_validator(Arc::new(Validator::new(rt.table.clone())))
        {
            handle.cancel();
            *rt.requests.lock() = Some(requests);
            return Err(e.into());
        }

        // Count both loops as running before they are first polled.
        let clock_loop = run_clock(
            rt.clock.clone(),
            rt.table.clone(),
            rt.announce.clone(),
            self.config.ttl,
            self.shutdown.clone(),
        );
        let guard = self.shutdown.task_guard();
        tokio::spawn(async move {
            let _guard = guard;
            clock_loop.await
        });

        let heartbeat_loop = run_heartbeat(
            Emitter {
                topic: self.topic.clone(),
                preparer: rt.preparer.clone(),
                instance: rt.instance,
                ttl: self.config.ttl,
            },
            requests,
            rt.clock.done(),
            Backoff::new(self.config.min_backoff(), self.config.max_backoff),
            self.shutdown.clone(),
        );
        let guard = self.shutdown.task_guard();
        tokio::spawn(async move {
            let _guard = guard;
            heartbeat_loop.await
        });

        tracing::info!(
            "router relaying on topic {} (instance={}, ttl={:?})",
            self.topic.name(),
            rt.instance,
            self.config.ttl
        );
        *relay = Some(handle);
        Ok(())
    }

    /// Stop relaying, unregister the validator and wait for the
    /// background loops to exit. Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let relay = self.relay.lock().take();
        if let Some(mut relay) = relay {
            relay.cancel();
            self.topic.unregister_validator();
        }
        self.shutdown.shutdown();
        if let Some(rt) = self.state.get() {
            rt.clock.stop();
        }

        if !self.shutdown.wait_for_drain(DRAIN_TIMEOUT).await {
            tracing::warn!("router closed with background loops still running");
        }
        tracing::info!("router closed");
    }

    /// Read-only view of the routing table.
    ///
    /// Repeated calls return the same view while any caller still holds it.
    pub fn view(&self) -> Arc<View> {
        let mut cached = self.view.lock();
        if let Some(view) = cached.upgrade() {
            return view;
        }
        let view = Arc::new(View::new(self.table()));
        *cached = Arc::downgrade(&view);
        view
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("topic", &self.topic.name())
            .field("config", &self.config)
            .field("relaying", &self.is_relaying())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Delay until the next announcement, uniform in `[3ttl/8, 5ttl/8)`.
fn announce_interval(ttl: Duration) -> Duration {
    let lo = ttl * 3 / 8;
    let hi = ttl * 5 / 8;
    if hi <= lo {
        return lo;
    }
    rand::thread_rng().gen_range(lo..hi)
}

#[cfg_attr(coverage_nightly, coverage(off))]
async fn run_clock(
    clock: Arc<dyn Clock>,
    table: Arc<RoutingTable>,
    announce: mpsc::Sender<()>,
    ttl: Duration,
    shutdown: ShutdownController,
) {
    let done = clock.done();
    let mut ticks = clock.subscribe();
    let mut next_announce = clock.now() + announce_interval(ttl);

    loop {
        let t = tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = done.cancelled() => break,
            tick = ticks.recv() => match tick {
                Ok(t) => t,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::debug!("clock loop skipped {} ticks", n);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        };

        table.advance(t);
        if t >= next_announce {
            // A full channel means an announcement is already pending.
            if let Err(mpsc::error::TrySendError::Closed(_)) = announce.try_send(()) {
                break;
            }
            next_announce = t + announce_interval(ttl);
        }
    }
    tracing::debug!("clock loop stopped");
}

/// Everything needed to build and publish one heartbeat.
struct Emitter {
    topic: Arc<dyn Topic>,
    preparer: Arc<dyn Preparer>,
    instance: InstanceId,
    ttl: Duration,
}

impl Emitter {
    async fn emit(&self) -> Result<(), RouterError> {
        let mut hb = Heartbeat::new(self.ttl, self.instance);
        self.preparer.prepare(&mut hb)?;
        let data = codec::encode(&hb)?;
        self.topic.publish(data).await?;
        tracing::debug!("heartbeat published (instance={})", self.instance);
        Ok(())
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
async fn run_heartbeat(
    emitter: Emitter,
    mut requests: mpsc::Receiver<()>,
    done: ShutdownController,
    mut backoff: Backoff,
    shutdown: ShutdownController,
) {
    'requests: loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = done.cancelled() => break,
            req = requests.recv() => if req.is_none() { break },
        }

        loop {
            let result = tokio::select! {
                _ = shutdown.cancelled() => break 'requests,
                _ = done.cancelled() => break 'requests,
                result = emitter.emit() => result,
            };

            match result {
                Ok(()) => {
                    backoff.reset();
                    break;
                }
                Err(RouterError::Topic(TopicError::Closed)) => {
                    tracing::debug!("topic closed, heartbeat loop exiting");
                    break 'requests;
                }
                Err(e) => {
                    let delay = backoff.next_delay();
                    tracing::warn!("heartbeat failed: {}, retrying in {:?}", e, delay);
                    tokio::select! {
                        _ = shutdown.cancelled() => break 'requests,
                        _ = done.cancelled() => break 'requests,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }
    tracing::debug!("heartbeat loop stopped");
}

/// Read-only façade over a routing table.
///
/// Every query runs against a fresh snapshot.
pub struct View {
    table: Arc<RoutingTable>,
}

impl View {
    pub fn new(table: Arc<RoutingTable>) -> Self {
        Self { table }
    }

    /// Query over the table as it is now.
    pub fn query(&self) -> Query {
        Query::new(Arc::new(self.table.snapshot()))
    }

    /// Same as [`View::query`], with scan directions flipped.
    pub fn reverse(&self) -> Query {
        self.query().reverse()
    }

    pub fn iter(&self, selector: Selector, constraints: &[Constraint]) -> Result<Iter, QueryError> {
        self.query().iter(selector, constraints)
    }

    pub fn lookup(
        &self,
        selector: Selector,
        constraints: &[Constraint],
    ) -> Result<Option<RecordRef>, QueryError> {
        self.query().lookup(selector, constraints)
    }

    /// Number of live records.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Time of the table's last clock advance.
    pub fn now(&self) -> SystemTime {
        self.table.now()
    }
}

impl std::fmt::Debug for View {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("View").field("len", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::outbound::{ManualClock, MemoryNetwork};
    use crate::domain::ports::MessageValidator;
    use crate::domain::value_objects::PeerId;
    use crate::routing::index::Index;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::time::UNIX_EPOCH;
    use tokio::sync::Notify;
    use tokio_test::{assert_pending, assert_ready};

    fn manual_clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(UNIX_EPOCH + Duration::from_secs(1_000)))
    }

    fn router(topic: Arc<dyn Topic>, clock: Arc<ManualClock>) -> Router {
        Router::builder(topic)
            .clock(clock)
            .ttl(Duration::from_secs(3600))
            .build()
            .unwrap()
    }

    /// Topic whose publishes block until released.
    #[derive(Default)]
    struct Stalled {
        release: Notify,
    }

    #[async_trait]
    impl Topic for Stalled {
        fn name(&self) -> &str {
            "stalled"
        }
        async fn publish(&self, _data: Bytes) -> Result<(), TopicError> {
            self.release.notified().await;
            Ok(())
        }
        fn relay(&self) -> Result<RelayHandle, TopicError> {
            Ok(RelayHandle::new(|| {}))
        }
        fn register_validator(&self, _v: Arc<dyn MessageValidator>) -> Result<(), TopicError> {
            Ok(())
        }
        fn unregister_validator(&self) {}
    }

    // ===== Construction =====

    #[test]
    fn test_build_rejects_invalid_config() {
        let net = MemoryNetwork::new();
        let topic = Arc::new(net.join("casm", PeerId::new("a")));
        let result = Router::builder(topic).ttl(Duration::ZERO).build();
        assert!(matches!(result, Err(RouterError::Config(ConfigError::ZeroTtl))));
    }

    #[test]
    fn test_lazy_defaults_are_stable() {
        let net = MemoryNetwork::new();
        let r = router(Arc::new(net.join("casm", PeerId::new("a"))), manual_clock());

        let id = r.instance_id();
        assert_eq!(r.instance_id(), id);
        assert!(Arc::ptr_eq(&r.table(), &r.table()));
        assert_eq!(r.table().now(), UNIX_EPOCH + Duration::from_secs(1_000));
    }

    #[test]
    fn test_fixed_instance_and_table() {
        let net = MemoryNetwork::new();
        let table = Arc::new(RoutingTable::new(UNIX_EPOCH));
        let r = Router::builder(Arc::new(net.join("casm", PeerId::new("a"))))
            .clock(manual_clock())
            .table(table.clone())
            .instance(InstanceId::new(9))
            .build()
            .unwrap();

        assert_eq!(r.instance_id(), InstanceId::new(9));
        assert!(Arc::ptr_eq(&r.table(), &table));
    }

    // ===== Bootstrap =====

    #[tokio::test]
    async fn test_bootstrap_announces_self() {
        let net = MemoryNetwork::new();
        let topic = Arc::new(net.join("casm", PeerId::new("QmSelf")));
        let r = router(topic.clone(), manual_clock());

        r.bootstrap().await.unwrap();
        assert!(r.is_relaying());
        assert!(topic.is_relaying());

        // own heartbeat loops back through our validator
        let mut tries = 0;
        while r.view().is_empty() && tries < 100 {
            tokio::time::sleep(Duration::from_millis(5)).await;
            tries += 1;
        }
        let rec = r
            .view()
            .lookup(Selector::select(Index::peer(&PeerId::new("QmSelf"))), &[])
            .unwrap()
            .expect("own record");
        assert_eq!(rec.server(), r.instance_id());
        assert_eq!(rec.seq(), 1);

        r.close().await;
    }

    #[tokio::test]
    async fn test_bootstrap_blocks_until_queued() {
        let topic = Arc::new(Stalled::default());
        let r = router(topic.clone(), manual_clock());

        // First request is taken by the loop, which stalls publishing it;
        // the second fills the queue.
        r.bootstrap().await.unwrap();
        r.bootstrap().await.unwrap();

        let mut third = tokio_test::task::spawn(r.bootstrap());
        assert_pending!(third.poll());

        topic.release.notify_one();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(third.is_woken());
        assert_ready!(third.poll()).unwrap();

        drop(third);
        r.close().await;
    }

    #[tokio::test]
    async fn test_bootstrap_unblocked_by_close() {
        let topic = Arc::new(Stalled::default());
        let r = Arc::new(router(topic, manual_clock()));
        r.bootstrap().await.unwrap();
        r.bootstrap().await.unwrap();

        let waiter = {
            let r = r.clone();
            tokio::spawn(async move { r.bootstrap().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        r.close().await;

        let result = tokio::time::timeout(Duration::from_secs(1), waiter).await;
        assert!(matches!(result, Ok(Ok(Err(RouterError::Closed)))));
    }

    #[tokio::test]
    async fn test_bootstrap_after_close_fails() {
        let net = MemoryNetwork::new();
        let r = router(Arc::new(net.join("casm", PeerId::new("a"))), manual_clock());
        r.close().await;
        assert!(matches!(r.bootstrap().await, Err(RouterError::Closed)));
    }

    #[tokio::test]
    async fn test_bootstrap_surfaces_relay_error() {
        let net = MemoryNetwork::new();
        let topic = Arc::new(net.join("casm", PeerId::new("a")));
        let _taken = topic.relay().unwrap();
        let r = router(topic.clone(), manual_clock());

        assert!(matches!(
            r.bootstrap().await,
            Err(RouterError::Topic(TopicError::AlreadyRelaying))
        ));
        assert!(!r.is_relaying());
    }

    // ===== Close =====

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let net = MemoryNetwork::new();
        let topic = Arc::new(net.join("casm", PeerId::new("a")));
        let clock = manual_clock();
        let r = router(topic.clone(), clock.clone());
        r.bootstrap().await.unwrap();

        r.close().await;
        r.close().await;

        assert!(r.is_closed());
        assert!(!r.is_relaying());
        assert!(!topic.is_relaying());
        assert!(clock.done().is_shutdown());
        // validator slot is free again
        assert!(topic.register_validator(Arc::new(Validator::new(r.table()))).is_ok());
    }

    #[tokio::test]
    async fn test_view_after_close_is_frozen() {
        let net = MemoryNetwork::new();
        let a = Arc::new(net.join("casm", PeerId::new("a")));
        let b = Arc::new(net.join("casm", PeerId::new("b")));
        let ra = router(a, manual_clock());
        let rb = router(b.clone(), manual_clock());

        rb.bootstrap().await.unwrap();
        rb.close().await;
        let view = rb.view();
        let before = view.len();

        ra.bootstrap().await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(view.len(), before);
        ra.close().await;
    }

    // ===== View =====

    #[test]
    fn test_view_is_cached_while_alive() {
        let net = MemoryNetwork::new();
        let r = router(Arc::new(net.join("casm", PeerId::new("a"))), manual_clock());

        let first = r.view();
        let second = r.view();
        assert!(Arc::ptr_eq(&first, &second));

        let weak = Arc::downgrade(&first);
        drop(first);
        drop(second);
        assert!(weak.upgrade().is_none());
        let _fresh = r.view();
    }

    #[test]
    fn test_view_reverse() {
        let net = MemoryNetwork::new();
        let r = router(Arc::new(net.join("casm", PeerId::new("a"))), manual_clock());
        let view = r.view();
        assert!(!view.query().is_reversed());
        assert!(view.reverse().is_reversed());
    }

    // ===== Heartbeat loop =====

    #[tokio::test]
    async fn test_publish_failure_backs_off_then_recovers() {
        let net = MemoryNetwork::new();
        let topic = Arc::new(net.join("casm", PeerId::new("a")));
        let mut observed = topic.subscribe();
        topic.fail_next(2);

        let r = Router::builder(topic.clone())
            .clock(manual_clock())
            .config(
                RouterConfig::new()
                    .ttl(Duration::from_millis(20))
                    .max_backoff(Duration::from_millis(40)),
            )
            .build()
            .unwrap();
        r.bootstrap().await.unwrap();

        let msg = tokio::time::timeout(Duration::from_secs(2), observed.recv())
            .await
            .expect("heartbeat after retries")
            .unwrap();
        assert_eq!(msg.from, PeerId::new("a"));
        // failed publishes consume no seqno
        assert_eq!(msg.seqno.as_ref(), &1u64.to_be_bytes());

        r.close().await;
    }

    #[tokio::test]
    async fn test_clock_ticks_advance_table_and_announce() {
        let net = MemoryNetwork::new();
        let topic = Arc::new(net.join("casm", PeerId::new("a")));
        let mut observed = topic.subscribe();
        let clock = manual_clock();
        let r = Router::builder(topic.clone())
            .clock(clock.clone())
            .ttl(Duration::from_secs(8))
            .build()
            .unwrap();

        r.bootstrap().await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), observed.recv())
            .await
            .unwrap()
            .unwrap();

        // let the clock loop subscribe before ticking
        tokio::time::sleep(Duration::from_millis(10)).await;

        // past the announce window (at most 5s) but inside the TTL
        let t = clock.advance(Duration::from_secs(6));
        let second = tokio::time::timeout(Duration::from_secs(1), observed.recv())
            .await
            .expect("scheduled announcement")
            .unwrap();
        assert_eq!(second.seqno.as_ref(), &2u64.to_be_bytes());

        let mut tries = 0;
        while r.table().now() < t && tries < 100 {
            tokio::time::sleep(Duration::from_millis(5)).await;
            tries += 1;
        }
        assert_eq!(r.table().now(), t);

        r.close().await;
    }

    #[tokio::test]
    async fn test_stopping_clock_stops_loops() {
        let net = MemoryNetwork::new();
        let clock = manual_clock();
        let r = router(Arc::new(net.join("casm", PeerId::new("a"))), clock.clone());
        r.bootstrap().await.unwrap();

        clock.stop();
        assert!(r.shutdown.wait_for_drain(Duration::from_secs(1)).await);
        assert!(matches!(r.bootstrap().await, Err(RouterError::Closed)));
        r.close().await;
    }

    #[test]
    fn test_announce_interval_bounds() {
        let ttl = Duration::from_secs(8);
        for _ in 0..100 {
            let d = announce_interval(ttl);
            assert!(d >= Duration::from_secs(3) && d < Duration::from_secs(5), "{:?}", d);
        }
        assert_eq!(announce_interval(Duration::ZERO), Duration::ZERO);
    }
}
