use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::RwLock;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::events::Event;
use crate::{Error, Result};

/// Default per-listener queue depth.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Observer of every coordinator event.
///
/// Called from a dedicated delivery thread, one event at a time, in the order
/// events reached the router.
pub trait EventListener: Send + Sync + 'static {
    fn handle_event(&self, event: &Event);
}

impl<F> EventListener for F
where
    F: Fn(&Event) + Send + Sync + 'static,
{
    fn handle_event(&self, event: &Event) {
        self(event)
    }
}

/// Handle returned by [`ListenerRegistry::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Subscription {
    id: ListenerId,
    listener: Arc<dyn EventListener>,
    tx: Sender<Arc<Event>>,
}

/// Fans events out to listeners without blocking the caller.
pub struct ListenerRegistry {
    subscriptions: RwLock<Vec<Subscription>>,
    next_id: AtomicU64,
    capacity: usize,
    dropped: AtomicU64,
    closed: AtomicBool,
}

impl Default for ListenerRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

impl ListenerRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            subscriptions: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            capacity: capacity.max(1),
            dropped: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Register a listener. Registering the same `Arc` twice returns the existing id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Destroyed`] once the registry is closed, or an I/O
    /// error if the delivery thread cannot be spawned.
    pub fn register(&self, listener: Arc<dyn EventListener>) -> Result<ListenerId> {
        let mut subscriptions = self.subscriptions.write();
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Destroyed);
        }
        if let Some(existing) = subscriptions
            .iter()
            .find(|s| same_listener(&s.listener, &listener))
        {
            return Ok(existing.id);
        }

        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = bounded(self.capacity);
        spawn_delivery(id, Arc::clone(&listener), rx)?;

        subscriptions.push(Subscription { id, listener, tx });
        tracing::debug!(listener_id = id.0, "Registered listener");
        Ok(id)
    }

    /// Stop delivering to a listener. Events already queued for it still drain.
    pub fn unregister(&self, id: ListenerId) -> bool {
        let mut subscriptions = self.subscriptions.write();
        let before = subscriptions.len();
        subscriptions.retain(|s| s.id != id);
        let removed = subscriptions.len() != before;
        if removed {
            tracing::debug!(listener_id = id.0, "Unregistered listener");
        }
        removed
    }

    /// Queue `event` for every listener. Never blocks.
    pub fn dispatch(&self, event: Arc<Event>) {
        let subscriptions = self.subscriptions.read();
        for subscription in subscriptions.iter() {
            match subscription.tx.try_send(Arc::clone(&event)) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        listener_id = subscription.id.0,
                        event = event.kind.name(),
                        "Listener queue full, dropping event"
                    );
                }
                Err(TrySendError::Disconnected(_)) => {
                    tracing::debug!(
                        listener_id = subscription.id.0,
                        "Listener delivery thread has exited"
                    );
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.subscriptions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Events dropped because a listener's queue was full.
    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Unregister everyone and refuse new listeners. Delivery threads exit
    /// once their queues drain.
    pub fn close(&self) {
        let mut subscriptions = self.subscriptions.write();
        self.closed.store(true, Ordering::Release);
        let removed = std::mem::take(&mut *subscriptions);
        drop(subscriptions);
        if !removed.is_empty() {
            tracing::debug!(count = removed.len(), "Closed listener queues");
        }
    }
}

fn same_listener(a: &Arc<dyn EventListener>, b: &Arc<dyn EventListener>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

fn spawn_delivery(
    id: ListenerId,
    listener: Arc<dyn EventListener>,
    rx: Receiver<Arc<Event>>,
) -> Result<()> {
    std::thread::Builder::new()
        .name(format!("ringpop-listener-{}", id.0))
        .spawn(move || {
            for event in rx.iter() {
                let delivered = catch_unwind(AssertUnwindSafe(|| listener.handle_event(&event)));
                if delivered.is_err() {
                    tracing::warn!(
                        listener_id = id.0,
                        event = event.kind.name(),
                        "Listener panicked while handling event"
                    );
                }
            }
            tracing::trace!(listener_id = id.0, "Listener delivery thread exiting");
        })?;
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::events::EventKind;
    use parking_lot::Mutex;
    use std::sync::mpsc;
    use std::time::{Duration, Instant};

    /// Records every event it sees.
    #[derive(Default)]
    pub(crate) struct RecordingListener {
        events: Mutex<Vec<Event>>,
    }

    impl RecordingListener {
        pub(crate) fn count(&self) -> usize {
            self.events.lock().len()
        }

        pub(crate) fn names(&self) -> Vec<String> {
            self.events
                .lock()
                .iter()
                .map(|e| e.kind.name().to_string())
                .collect()
        }

        /// Poll until `n` events arrived or the deadline passes.
        pub(crate) fn wait_for(&self, n: usize, timeout: Duration) -> bool {
            let deadline = Instant::now() + timeout;
            while Instant::now() < deadline {
                if self.count() >= n {
                    return true;
                }
                std::thread::sleep(Duration::from_millis(1));
            }
            self.count() >= n
        }
    }

    impl EventListener for RecordingListener {
        fn handle_event(&self, event: &Event) {
            self.events.lock().push(event.clone());
        }
    }

    fn ping(i: usize) -> Arc<Event> {
        Arc::new(Event::new(EventKind::PingSent {
            target: format!("127.0.0.1:{}", 3000 + i),
        }))
    }

    #[test]
    fn test_register_is_deduplicated() {
        let registry = ListenerRegistry::default();
        let listener: Arc<dyn EventListener> = Arc::new(RecordingListener::default());

        let first = registry.register(Arc::clone(&listener)).unwrap();
        let second = registry.register(listener).unwrap();

        assert_eq!(first, second);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_per_listener_order_is_preserved() {
        let registry = ListenerRegistry::default();
        let recorder = Arc::new(RecordingListener::default());
        registry.register(recorder.clone()).unwrap();

        for i in 0..50 {
            registry.dispatch(ping(i));
        }

        assert!(recorder.wait_for(50, Duration::from_secs(2)));
        let targets: Vec<String> = recorder
            .events
            .lock()
            .iter()
            .map(|e| match &e.kind {
                EventKind::PingSent { target } => target.clone(),
                other => panic!("unexpected event {:?}", other),
            })
            .collect();
        let expected: Vec<String> = (0..50).map(|i| format!("127.0.0.1:{}", 3000 + i)).collect();
        assert_eq!(targets, expected);
    }

    #[test]
    fn test_blocked_listener_does_not_delay_others() {
        let registry = ListenerRegistry::default();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let release_rx = Mutex::new(release_rx);
        registry
            .register(Arc::new(move |_: &Event| {
                let _ = release_rx.lock().recv();
            }))
            .unwrap();
        let recorder = Arc::new(RecordingListener::default());
        registry.register(recorder.clone()).unwrap();

        let started = Instant::now();
        registry.dispatch(ping(1));
        assert!(started.elapsed() < Duration::from_secs(1));

        assert!(recorder.wait_for(1, Duration::from_secs(2)));
        drop(release_tx);
    }

    #[test]
    fn test_full_queue_drops_instead_of_blocking() {
        let registry = ListenerRegistry::new(1);
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let release_rx = Mutex::new(release_rx);
        registry
            .register(Arc::new(move |_: &Event| {
                let _ = release_rx.lock().recv();
            }))
            .unwrap();

        // One in flight, one queued, the rest dropped.
        for i in 0..10 {
            registry.dispatch(ping(i));
        }
        assert!(registry.dropped_events() >= 8);
        drop(release_tx);
    }

    #[test]
    fn test_unregister_stops_delivery() {
        let registry = ListenerRegistry::default();
        let recorder = Arc::new(RecordingListener::default());
        let id = registry.register(recorder.clone()).unwrap();

        registry.dispatch(ping(1));
        assert!(recorder.wait_for(1, Duration::from_secs(2)));

        assert!(registry.unregister(id));
        assert!(!registry.unregister(id));
        registry.dispatch(ping(2));
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(recorder.count(), 1);
    }

    #[test]
    fn test_panicking_listener_keeps_receiving() {
        let registry = ListenerRegistry::default();
        let seen = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&seen);
        registry
            .register(Arc::new(move |_: &Event| {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    panic!("first event");
                }
            }))
            .unwrap();

        registry.dispatch(ping(1));
        registry.dispatch(ping(2));

        let deadline = Instant::now() + Duration::from_secs(2);
        while seen.load(Ordering::SeqCst) < 2 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_close_removes_all() {
        let registry = ListenerRegistry::default();
        registry
            .register(Arc::new(RecordingListener::default()))
            .unwrap();
        registry.close();
        assert!(registry.is_empty());
        assert!(registry.is_closed());
    }

    #[test]
    fn test_register_after_close_is_refused() {
        let registry = ListenerRegistry::default();
        registry.close();

        let result = registry.register(Arc::new(RecordingListener::default()));
        assert!(matches!(result, Err(Error::Destroyed)));
        assert!(registry.is_empty());
    }
}
