use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use crate::config::{BootstrapOptions, Options};
use crate::events::Event;
use crate::listener::{EventListener, ListenerId, ListenerRegistry};
use crate::member::Change;
use crate::protocol::{EventSink, Protocol, ProtocolFactory, SeedProbeFactory};
use crate::ring::SharedRing;
use crate::router::EventRouter;
use crate::stats::{NoopStats, StatsKeys, StatsReporter};
use crate::{Error, Result};

/// Lifecycle of a coordinator. `Destroyed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Created,
    Initialized,
    Ready,
    Destroyed,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Initialized => "initialized",
            Self::Ready => "ready",
            Self::Destroyed => "destroyed",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

struct Lifecycle {
    state: LifecycleState,
    protocol: Option<Arc<dyn Protocol>>,
    ready_at: Option<Instant>,
}

struct Inner {
    options: Options,
    ring: Arc<SharedRing>,
    listeners: Arc<ListenerRegistry>,
    router: EventRouter,
    factory: Arc<dyn ProtocolFactory>,
    lifecycle: Mutex<Lifecycle>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(protocol) = self.lifecycle.get_mut().protocol.take() {
            protocol.destroy();
        }
        tracing::debug!(identity = %self.options.identity, "ClusterCoordinator dropped");
    }
}

/// Orchestrates the gossip protocol, the hash ring and event fan-out.
///
/// Cloning yields another handle to the same coordinator. Ring queries are
/// only served once [`bootstrap`](Self::bootstrap) has succeeded.
#[derive(Clone)]
pub struct ClusterCoordinator {
    inner: Arc<Inner>,
}

/// Builder for [`ClusterCoordinator`].
pub struct ClusterCoordinatorBuilder {
    options: Options,
    stats: Arc<dyn StatsReporter>,
    factory: Arc<dyn ProtocolFactory>,
}

impl ClusterCoordinatorBuilder {
    pub fn identity(mut self, identity: impl Into<String>) -> Self {
        self.options.identity = identity.into();
        self
    }

    pub fn stats(mut self, stats: Arc<dyn StatsReporter>) -> Self {
        self.stats = stats;
        self
    }

    pub fn stats_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.options.stats_namespace = namespace.into();
        self
    }

    pub fn replica_points(mut self, replica_points: usize) -> Self {
        self.options.replica_points = replica_points;
        self
    }

    pub fn listener_queue_capacity(mut self, capacity: usize) -> Self {
        self.options.listener_queue_capacity = capacity;
        self
    }

    pub fn protocol(mut self, factory: Arc<dyn ProtocolFactory>) -> Self {
        self.factory = factory;
        self
    }

    /// # Errors
    ///
    /// Returns [`Error::Config`] if the options are invalid.
    pub fn build(self) -> Result<ClusterCoordinator> {
        ClusterCoordinator::with_parts(self.options, self.stats, self.factory)
    }
}

impl ClusterCoordinator {
    pub fn builder(app: impl Into<String>) -> ClusterCoordinatorBuilder {
        ClusterCoordinatorBuilder {
            options: Options::new(app, String::new()),
            stats: Arc::new(NoopStats),
            factory: Arc::new(SeedProbeFactory),
        }
    }

    /// Coordinator with no stats backend and the default join protocol.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the options are invalid.
    pub fn new(options: Options) -> Result<Self> {
        Self::with_parts(options, Arc::new(NoopStats), Arc::new(SeedProbeFactory))
    }

    /// # Errors
    ///
    /// Returns [`Error::Config`] if the environment is incomplete or invalid.
    pub fn from_env() -> Result<Self> {
        Self::new(Options::from_env()?)
    }

    fn with_parts(
        options: Options,
        stats: Arc<dyn StatsReporter>,
        factory: Arc<dyn ProtocolFactory>,
    ) -> Result<Self> {
        options.validate()?;

        let ring = Arc::new(SharedRing::new(options.replica_points));
        let listeners = Arc::new(ListenerRegistry::new(options.listener_queue_capacity));
        let keys = StatsKeys::new(&options.stats_namespace, &options.identity);
        let router = EventRouter::new(ring.clone(), listeners.clone(), stats, keys);

        Ok(Self {
            inner: Arc::new(Inner {
                options,
                ring,
                listeners,
                router,
                factory,
                lifecycle: Mutex::new(Lifecycle {
                    state: LifecycleState::Created,
                    protocol: None,
                    ready_at: None,
                }),
            }),
        })
    }

    /// Current lifecycle state. Every gate reads through here.
    pub fn state(&self) -> LifecycleState {
        self.inner.lifecycle.lock().state
    }

    pub fn ready(&self) -> bool {
        self.state() == LifecycleState::Ready
    }

    /// Application name. Available in every state.
    pub fn app(&self) -> &str {
        &self.inner.options.app
    }

    /// Create the protocol instance and wire it to the router.
    ///
    /// No-op once past `Created`.
    pub(crate) fn init(&self) -> Result<()> {
        match self.state() {
            LifecycleState::Created => {}
            LifecycleState::Destroyed => return Err(Error::Destroyed),
            LifecycleState::Initialized | LifecycleState::Ready => return Ok(()),
        }

        let weak = Arc::downgrade(&self.inner);
        let sink = EventSink::new(move |event| {
            if let Some(inner) = Weak::upgrade(&weak) {
                ClusterCoordinator { inner }.handle_event(event);
            }
        });
        let protocol = self
            .inner
            .factory
            .create(&self.inner.options.identity, sink);

        let mut lifecycle = self.inner.lifecycle.lock();
        match lifecycle.state {
            LifecycleState::Created => {
                lifecycle.protocol = Some(protocol);
                lifecycle.state = LifecycleState::Initialized;
                tracing::debug!(identity = %self.inner.options.identity, "Coordinator initialized");
                Ok(())
            }
            LifecycleState::Destroyed => {
                drop(lifecycle);
                protocol.destroy();
                Err(Error::Destroyed)
            }
            LifecycleState::Initialized | LifecycleState::Ready => {
                // Lost a race with a concurrent init.
                drop(lifecycle);
                protocol.destroy();
                Ok(())
            }
        }
    }

    /// Join the cluster and transition to `Ready`.
    ///
    /// Waits at most `options.max_join_duration`. On failure the coordinator
    /// stays initialized and bootstrap may be retried.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Join`] or [`Error::JoinTimeout`] if the join fails,
    /// [`Error::AlreadyBootstrapped`] if already ready and
    /// [`Error::Destroyed`] if the coordinator was destroyed.
    pub async fn bootstrap(&self, options: BootstrapOptions) -> Result<Vec<String>> {
        self.init()?;

        let protocol = {
            let lifecycle = self.inner.lifecycle.lock();
            match lifecycle.state {
                LifecycleState::Ready => return Err(Error::AlreadyBootstrapped),
                LifecycleState::Destroyed => return Err(Error::Destroyed),
                LifecycleState::Created | LifecycleState::Initialized => {}
            }
            lifecycle.protocol.clone().ok_or(Error::Destroyed)?
        };

        let identity = &self.inner.options.identity;
        let max_join_duration = options.max_join_duration;
        let joined = match tokio::time::timeout(max_join_duration, protocol.bootstrap(&options)).await
        {
            Ok(Ok(joined)) => joined,
            Ok(Err(e)) => {
                tracing::warn!(%identity, "Bootstrap failed: {}", e);
                return Err(e);
            }
            Err(_) => {
                tracing::warn!(%identity, ?max_join_duration, "Bootstrap timed out");
                return Err(Error::JoinTimeout(max_join_duration));
            }
        };

        if !self.inner.ring.load().has_server(identity) {
            self.handle_event(Event::changes(vec![Change::alive(identity.as_str())]));
        }

        let mut lifecycle = self.inner.lifecycle.lock();
        match lifecycle.state {
            LifecycleState::Initialized => {
                lifecycle.state = LifecycleState::Ready;
                lifecycle.ready_at = Some(Instant::now());
                tracing::info!(
                    %identity,
                    joined = joined.len(),
                    servers = self.inner.ring.load().server_count(),
                    "Coordinator ready"
                );
                Ok(joined)
            }
            LifecycleState::Ready => Ok(joined),
            LifecycleState::Destroyed => Err(Error::Destroyed),
            LifecycleState::Created => Err(Error::NotReady),
        }
    }

    /// Tear down. Safe to call from any state, any number of times.
    pub fn destroy(&self) {
        let protocol = {
            let mut lifecycle = self.inner.lifecycle.lock();
            if lifecycle.state == LifecycleState::Destroyed {
                return;
            }
            lifecycle.state = LifecycleState::Destroyed;
            lifecycle.ready_at = None;
            lifecycle.protocol.take()
        };

        if let Some(protocol) = protocol {
            protocol.destroy();
        }
        self.inner.listeners.close();
        self.inner.ring.clear();
        tracing::info!(identity = %self.inner.options.identity, "Coordinator destroyed");
    }

    /// Ingest an event from the protocol. Ignored before init and after destroy.
    pub fn handle_event(&self, event: Event) {
        match self.state() {
            LifecycleState::Initialized | LifecycleState::Ready => {
                self.inner.router.handle(event);
                // A destroy that landed mid-route may have cleared the ring
                // before this batch was applied.
                if self.state() == LifecycleState::Destroyed {
                    self.inner.ring.clear();
                }
            }
            state => {
                tracing::trace!(%state, event = event.kind.name(), "Ignoring event");
            }
        }
    }

    /// # Errors
    ///
    /// Returns [`Error::Destroyed`] after [`destroy`](Self::destroy).
    pub fn register_listener(&self, listener: Arc<dyn EventListener>) -> Result<ListenerId> {
        if self.state() == LifecycleState::Destroyed {
            return Err(Error::Destroyed);
        }
        self.inner.listeners.register(listener)
    }

    pub fn unregister_listener(&self, id: ListenerId) -> bool {
        self.inner.listeners.unregister(id)
    }

    fn ensure_ready(&self) -> Result<()> {
        if self.ready() {
            Ok(())
        } else {
            Err(Error::NotReady)
        }
    }

    pub fn who_am_i(&self) -> Result<String> {
        self.ensure_ready()?;
        Ok(self.inner.options.identity.clone())
    }

    /// Time since the coordinator became ready.
    pub fn uptime(&self) -> Result<Duration> {
        let lifecycle = self.inner.lifecycle.lock();
        match (lifecycle.state, lifecycle.ready_at) {
            (LifecycleState::Ready, Some(ready_at)) => Ok(ready_at.elapsed()),
            _ => Err(Error::NotReady),
        }
    }

    pub fn checksum(&self) -> Result<u64> {
        self.ensure_ready()?;
        Ok(self.inner.ring.load().checksum())
    }

    /// Owner of `key`.
    pub fn lookup(&self, key: &str) -> Result<String> {
        self.ensure_ready()?;
        let started = Instant::now();
        let owner = self
            .inner
            .ring
            .load()
            .lookup(key)
            .map(str::to_string)
            .ok_or(Error::EmptyRing);

        let router = &self.inner.router;
        router
            .stats()
            .record_timer(&router.keys().key("lookup"), started.elapsed());
        owner
    }

    /// Up to `n` distinct owners of `key`, in ring order.
    pub fn lookup_n(&self, key: &str, n: usize) -> Result<Vec<String>> {
        self.ensure_ready()?;
        let ring = self.inner.ring.load();
        if ring.is_empty() {
            return Err(Error::EmptyRing);
        }
        Ok(ring.lookup_n(key, n))
    }

    /// Every Alive or Suspect member.
    pub fn get_reachable_members(&self) -> Result<Vec<String>> {
        self.ensure_ready()?;
        Ok(self
            .inner
            .ring
            .load()
            .servers()
            .map(str::to_string)
            .collect())
    }
}
