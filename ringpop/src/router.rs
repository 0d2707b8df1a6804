use std::sync::Arc;

use crate::events::{Event, EventKind};
use crate::listener::ListenerRegistry;
use crate::member::Change;
use crate::ring::SharedRing;
use crate::stats::{StatsKeys, StatsReporter};

/// Turns protocol events into ring mutations, stats and listener notifications.
///
/// Ring and stats effects happen before `handle` returns; listeners are fed
/// through their own queues afterwards.
pub struct EventRouter {
    ring: Arc<SharedRing>,
    listeners: Arc<ListenerRegistry>,
    stats: Arc<dyn StatsReporter>,
    keys: StatsKeys,
}

impl EventRouter {
    pub fn new(
        ring: Arc<SharedRing>,
        listeners: Arc<ListenerRegistry>,
        stats: Arc<dyn StatsReporter>,
        keys: StatsKeys,
    ) -> Self {
        Self {
            ring,
            listeners,
            stats,
            keys,
        }
    }

    pub fn handle(&self, event: Event) {
        let event = Arc::new(event);
        let follow_ups = match &event.kind {
            EventKind::MembershipChangesApplied { changes } => self.apply_changes(changes),
            EventKind::MaxPAdjusted { new_p_count, .. } => {
                self.gauge("max-p", *new_p_count);
                Vec::new()
            }
            EventKind::JoinReceived { .. } => {
                self.count("join.recv", 1);
                Vec::new()
            }
            EventKind::JoinCompleted { duration, .. } => {
                self.stats.record_timer(&self.keys.key("join"), *duration);
                self.count("join.complete", 1);
                Vec::new()
            }
            EventKind::PingSent { .. } => {
                self.count("ping.send", 1);
                Vec::new()
            }
            EventKind::PingReceived { .. } => {
                self.count("ping.recv", 1);
                Vec::new()
            }
            EventKind::PingRequestsSent { peers, .. } => {
                self.count("ping-req.send", len_i64(peers.len()));
                Vec::new()
            }
            EventKind::PingRequestReceived { .. } => {
                self.count("ping-req.recv", 1);
                Vec::new()
            }
            EventKind::PingRequestPing { duration, .. } => {
                self.stats
                    .record_timer(&self.keys.key("ping-req.ping"), *duration);
                Vec::new()
            }
            other => {
                tracing::trace!(event = other.name(), "No stats for event");
                Vec::new()
            }
        };

        self.listeners.dispatch(event);
        for follow_up in follow_ups {
            self.listeners.dispatch(Arc::new(Event::new(follow_up)));
        }
    }

    fn apply_changes(&self, changes: &[Change]) -> Vec<EventKind> {
        self.count("changes.apply", len_i64(changes.len()));
        for change in changes {
            self.count(&format!("membership-update.{}", change.status), 1);
        }

        let (delta, old_checksum, new_checksum) = self.ring.apply_changes(changes);
        if delta.is_empty() {
            return Vec::new();
        }

        tracing::debug!(
            added = delta.added.len(),
            removed = delta.removed.len(),
            checksum = new_checksum,
            "Ring membership changed"
        );
        self.count("ring.checksum-computed", 1);
        if !delta.added.is_empty() {
            self.count("ring.server-added", len_i64(delta.added.len()));
        }
        if !delta.removed.is_empty() {
            self.count("ring.server-removed", len_i64(delta.removed.len()));
        }

        vec![
            EventKind::RingChecksumComputed {
                old_checksum,
                new_checksum,
            },
            EventKind::RingChanged {
                servers_added: delta.added,
                servers_removed: delta.removed,
            },
        ]
    }

    pub(crate) fn keys(&self) -> &StatsKeys {
        &self.keys
    }

    pub(crate) fn stats(&self) -> &dyn StatsReporter {
        self.stats.as_ref()
    }

    fn count(&self, path: &str, value: i64) {
        self.stats.incr_counter(&self.keys.key(path), value);
    }

    fn gauge(&self, path: &str, value: i64) {
        self.stats.update_gauge(&self.keys.key(path), value);
    }
}

fn len_i64(len: usize) -> i64 {
    i64::try_from(len).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::tests::RecordingListener;
    use crate::member::MemberStatus;
    use crate::ring::DEFAULT_REPLICA_POINTS;
    use crate::stats::InMemoryStats;
    use std::time::Duration;

    struct Fixture {
        router: EventRouter,
        ring: Arc<SharedRing>,
        stats: Arc<InMemoryStats>,
        recorder: Arc<RecordingListener>,
    }

    fn fixture() -> Fixture {
        let ring = Arc::new(SharedRing::new(DEFAULT_REPLICA_POINTS));
        let listeners = Arc::new(ListenerRegistry::default());
        let stats = Arc::new(InMemoryStats::new());
        let recorder = Arc::new(RecordingListener::default());
        listeners.register(recorder.clone()).unwrap();
        let router = EventRouter::new(
            ring.clone(),
            listeners,
            stats.clone(),
            StatsKeys::new("ringpop", "127.0.0.1:3001"),
        );
        Fixture {
            router,
            ring,
            stats,
            recorder,
        }
    }

    fn alive(from: usize, to: usize) -> Vec<Change> {
        (from..=to)
            .map(|i| Change::alive(format!("127.0.0.1:{}", 3000 + i)))
            .collect()
    }

    fn stat(f: &Fixture, path: &str) -> i64 {
        f.stats.value(&format!("ringpop.127_0_0_1_3001.{}", path))
    }

    #[test]
    fn test_membership_batch_updates_ring_and_stats() {
        let f = fixture();
        f.router.handle(Event::changes(alive(1, 10)));

        assert_eq!(f.ring.load().server_count(), 10);
        assert_eq!(stat(&f, "changes.apply"), 10);
        assert_eq!(stat(&f, "ring.checksum-computed"), 1);
        assert_eq!(stat(&f, "ring.server-added"), 10);
        assert_eq!(stat(&f, "membership-update.alive"), 10);
        assert_eq!(f.stats.get("ringpop.127_0_0_1_3001.ring.checksum"), None);

        // Forwarded event plus checksum and ring-changed follow-ups.
        assert!(f.recorder.wait_for(3, Duration::from_secs(2)));
        assert_eq!(
            f.recorder.names(),
            vec!["membership-changes-applied", "ring-checksum-computed", "ring-changed"]
        );
    }

    #[test]
    fn test_mixed_batch_replaces_faulty_members() {
        let f = fixture();
        f.router.handle(Event::changes(alive(1, 10)));

        let mut batch = alive(11, 15);
        batch.extend(
            (1..=5).map(|i| Change::new(format!("127.0.0.1:{}", 3000 + i), MemberStatus::Faulty)),
        );
        f.router.handle(Event::changes(batch));

        let ring = f.ring.load();
        assert_eq!(ring.server_count(), 10);
        assert!((1..=5).all(|i| !ring.has_server(&format!("127.0.0.1:{}", 3000 + i))));
        assert!((6..=15).all(|i| ring.has_server(&format!("127.0.0.1:{}", 3000 + i))));
        assert_eq!(stat(&f, "changes.apply"), 20);
        assert_eq!(stat(&f, "ring.checksum-computed"), 2);
        assert_eq!(stat(&f, "ring.server-removed"), 5);
    }

    #[test]
    fn test_unchanged_ring_skips_checksum_stat() {
        let f = fixture();
        f.router.handle(Event::changes(alive(1, 2)));
        f.router.handle(Event::changes(alive(1, 2)));

        assert_eq!(stat(&f, "changes.apply"), 4);
        assert_eq!(stat(&f, "ring.checksum-computed"), 1);
        assert!(f.recorder.wait_for(4, Duration::from_secs(2)));
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(f.recorder.count(), 4);
    }

    #[test]
    fn test_protocol_events_emit_stats() {
        let f = fixture();
        let second = Duration::from_secs(1);

        f.router.handle(EventKind::MaxPAdjusted { old_p_count: 0, new_p_count: 100 }.into());
        f.router.handle(EventKind::JoinReceived { source: "127.0.0.1:3002".into() }.into());
        f.router.handle(EventKind::JoinCompleted { duration: second, joined: vec![] }.into());
        f.router.handle(EventKind::PingSent { target: "127.0.0.1:3002".into() }.into());
        f.router.handle(EventKind::PingReceived { source: "127.0.0.1:3002".into() }.into());
        f.router.handle(
            EventKind::PingRequestsSent {
                target: "127.0.0.1:3002".into(),
                peers: (2..=5).map(|i| format!("127.0.0.1:{}", 3000 + i)).collect(),
            }
            .into(),
        );
        f.router.handle(
            EventKind::PingRequestReceived {
                source: "127.0.0.1:3002".into(),
                target: "127.0.0.1:3003".into(),
            }
            .into(),
        );
        f.router.handle(
            EventKind::PingRequestPing {
                target: "127.0.0.1:3003".into(),
                duration: second,
            }
            .into(),
        );

        assert_eq!(stat(&f, "max-p"), 100);
        assert_eq!(stat(&f, "join.recv"), 1);
        assert_eq!(stat(&f, "join"), 1000);
        assert_eq!(stat(&f, "join.complete"), 1);
        assert_eq!(stat(&f, "ping.send"), 1);
        assert_eq!(stat(&f, "ping.recv"), 1);
        assert_eq!(stat(&f, "ping-req.send"), 4);
        assert_eq!(stat(&f, "ping-req.recv"), 1);
        assert_eq!(stat(&f, "ping-req.ping"), 1000);
        assert!(f.ring.load().is_empty());

        assert!(f.recorder.wait_for(8, Duration::from_secs(2)));
    }

    #[test]
    fn test_unknown_event_is_forwarded_without_stats() {
        let f = fixture();
        f.router.handle(
            EventKind::Other {
                name: "request-forwarded".into(),
            }
            .into(),
        );

        assert!(f.stats.snapshot().is_empty());
        assert!(f.recorder.wait_for(1, Duration::from_secs(2)));
        assert_eq!(f.recorder.names(), vec!["request-forwarded"]);
    }
}
