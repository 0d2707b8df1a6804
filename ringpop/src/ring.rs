use arc_swap::ArcSwap;
use siphasher::sip::SipHasher24;
use std::collections::{BTreeMap, BTreeSet};
use std::hash::Hasher;
use std::sync::Arc;

use crate::member::Change;

/// Virtual positions per server.
pub const DEFAULT_REPLICA_POINTS: usize = 100;

/// Servers that entered or left the ring during one mutation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RingDelta {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl RingDelta {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Consistent hash ring with virtual replicas.
///
/// Positions are `(hash, address)` pairs so two servers hashing to the same
/// point never shadow each other and the layout does not depend on the order
/// servers were added.
#[derive(Clone, Debug)]
pub struct HashRing {
    points: BTreeSet<(u64, String)>,
    servers: BTreeSet<String>,
    replica_points: usize,
    checksum: u64,
}

impl Default for HashRing {
    fn default() -> Self {
        Self::new(DEFAULT_REPLICA_POINTS)
    }
}

impl HashRing {
    pub fn new(replica_points: usize) -> Self {
        let mut ring = Self {
            points: BTreeSet::new(),
            servers: BTreeSet::new(),
            replica_points: replica_points.max(1),
            checksum: 0,
        };
        ring.compute_checksum();
        ring
    }

    /// Add a server. Returns false if it was already present.
    pub fn insert(&mut self, address: &str) -> bool {
        let added = self.insert_points(address);
        if added {
            self.compute_checksum();
        }
        added
    }

    /// Remove a server. Returns false if it was not present.
    pub fn remove(&mut self, address: &str) -> bool {
        let removed = self.remove_points(address);
        if removed {
            self.compute_checksum();
        }
        removed
    }

    /// Apply a batch of membership changes; the last status per address wins.
    ///
    /// The checksum is recomputed at most once per batch.
    pub fn apply_changes(&mut self, changes: &[Change]) -> RingDelta {
        let mut last: BTreeMap<&str, bool> = BTreeMap::new();
        for change in changes {
            last.insert(change.address.as_str(), change.status.is_reachable());
        }

        let mut delta = RingDelta::default();
        for (address, reachable) in last {
            if reachable {
                if self.insert_points(address) {
                    delta.added.push(address.to_string());
                }
            } else if self.remove_points(address) {
                delta.removed.push(address.to_string());
            }
        }

        if !delta.is_empty() {
            self.compute_checksum();
        }
        delta
    }

    /// Owner of `key`: the first position clockwise from the key's hash.
    pub fn lookup(&self, key: &str) -> Option<&str> {
        self.walk(key).next()
    }

    /// Up to `n` distinct owners walking clockwise from `key`.
    pub fn lookup_n(&self, key: &str, n: usize) -> Vec<String> {
        let wanted = n.min(self.servers.len());
        let mut seen: BTreeSet<&str> = BTreeSet::new();
        let mut owners = Vec::with_capacity(wanted);

        for address in self.walk(key) {
            if owners.len() == wanted {
                break;
            }
            if seen.insert(address) {
                owners.push(address.to_string());
            }
        }
        owners
    }

    pub fn has_server(&self, address: &str) -> bool {
        self.servers.contains(address)
    }

    /// All distinct servers in address order. Cloning the iterator restarts it.
    pub fn servers(&self) -> impl Iterator<Item = &str> + Clone + '_ {
        self.servers.iter().map(String::as_str)
    }

    pub fn server_count(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    pub fn checksum(&self) -> u64 {
        self.checksum
    }

    pub fn replica_points(&self) -> usize {
        self.replica_points
    }

    /// Every position once, starting clockwise from the key's hash and wrapping.
    fn walk<'a>(&'a self, key: &str) -> impl Iterator<Item = &'a str> + 'a {
        let start = (hash_bytes(key.as_bytes()), String::new());
        self.points
            .range(start.clone()..)
            .chain(self.points.range(..start))
            .map(|(_, address)| address.as_str())
    }

    fn insert_points(&mut self, address: &str) -> bool {
        if !self.servers.insert(address.to_string()) {
            return false;
        }
        for i in 0..self.replica_points {
            self.points
                .insert((replica_hash(address, i), address.to_string()));
        }
        true
    }

    fn remove_points(&mut self, address: &str) -> bool {
        if !self.servers.remove(address) {
            return false;
        }
        for i in 0..self.replica_points {
            self.points
                .remove(&(replica_hash(address, i), address.to_string()));
        }
        true
    }

    fn compute_checksum(&mut self) {
        let joined = self
            .servers
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(";");
        self.checksum = hash_bytes(joined.as_bytes());
    }
}

#[inline]
fn hash_bytes(bytes: &[u8]) -> u64 {
    let mut hasher = SipHasher24::new();
    hasher.write(bytes);
    hasher.finish()
}

#[inline]
fn replica_hash(address: &str, replica: usize) -> u64 {
    hash_bytes(format!("{}{}", address, replica).as_bytes())
}

/// Ring handle shared between the router (writer) and query paths (readers).
///
/// Each mutation swaps in a whole new ring, so readers always see either the
/// ring before a batch or the ring after it.
pub struct SharedRing {
    inner: ArcSwap<HashRing>,
}

impl SharedRing {
    pub fn new(replica_points: usize) -> Self {
        Self {
            inner: ArcSwap::from_pointee(HashRing::new(replica_points)),
        }
    }

    /// Snapshot of the current ring. Lock-free.
    pub fn load(&self) -> Arc<HashRing> {
        self.inner.load_full()
    }

    pub fn apply_changes(&self, changes: &[Change]) -> (RingDelta, u64, u64) {
        let mut result = (RingDelta::default(), 0, 0);
        self.inner.rcu(|current| {
            let mut next = HashRing::clone(current);
            let delta = next.apply_changes(changes);
            result = (delta, current.checksum(), next.checksum());
            if result.0.is_empty() {
                Arc::clone(current)
            } else {
                Arc::new(next)
            }
        });
        result
    }

    pub fn insert(&self, address: &str) -> bool {
        self.mutate(|ring| ring.insert(address))
    }

    pub fn remove(&self, address: &str) -> bool {
        self.mutate(|ring| ring.remove(address))
    }

    /// Drop every server.
    pub fn clear(&self) {
        let replica_points = self.inner.load().replica_points();
        self.inner.store(Arc::new(HashRing::new(replica_points)));
    }

    fn mutate(&self, mut f: impl FnMut(&mut HashRing) -> bool) -> bool {
        let mut changed = false;
        self.inner.rcu(|current| {
            let mut next = HashRing::clone(current);
            changed = f(&mut next);
            if changed {
                Arc::new(next)
            } else {
                Arc::clone(current)
            }
        });
        changed
    }
}
