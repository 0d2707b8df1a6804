//! Boundary to the gossip/failure-detection protocol.
//!
//! The coordinator creates exactly one [`Protocol`] per instance through a
//! [`ProtocolFactory`] and hands it an [`EventSink`]. Everything the protocol
//! observes (membership batches, pings, joins) comes back through that sink.

use async_trait::async_trait;
use futures_util::future::join_all;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use crate::config::BootstrapOptions;
use crate::events::{Event, EventKind};
use crate::member::Change;
use crate::{Error, Result};

/// Receives events produced by a protocol instance.
#[derive(Clone)]
pub struct EventSink {
    handler: Arc<dyn Fn(Event) + Send + Sync>,
}

impl EventSink {
    pub fn new(handler: impl Fn(Event) + Send + Sync + 'static) -> Self {
        Self {
            handler: Arc::new(handler),
        }
    }

    pub fn emit(&self, event: Event) {
        (self.handler)(event)
    }
}

/// A running gossip protocol instance.
#[async_trait]
pub trait Protocol: Send + Sync {
    /// Join the cluster described by `options`, returning the seeds that were joined.
    ///
    /// Implementations must report this node as Alive through the sink on success.
    async fn bootstrap(&self, options: &BootstrapOptions) -> Result<Vec<String>>;

    /// Stop all protocol activity and release the transport. Must be idempotent.
    fn destroy(&self);
}

pub trait ProtocolFactory: Send + Sync {
    fn create(&self, identity: &str, sink: EventSink) -> Arc<dyn Protocol>;
}

/// Factory for [`SeedProbe`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SeedProbeFactory;

impl ProtocolFactory for SeedProbeFactory {
    fn create(&self, identity: &str, sink: EventSink) -> Arc<dyn Protocol> {
        Arc::new(SeedProbe::new(identity, sink))
    }
}

/// Minimal join protocol: a seed counts as joined once it accepts a TCP connection.
///
/// An empty seed list, or one naming only this node, forms a single-node cluster.
pub struct SeedProbe {
    identity: String,
    sink: EventSink,
    cancel: CancellationToken,
}

impl SeedProbe {
    pub fn new(identity: &str, sink: EventSink) -> Self {
        Self {
            identity: identity.to_string(),
            sink,
            cancel: CancellationToken::new(),
        }
    }

    async fn probe_seeds(&self, seeds: &[&str], timeout: Duration) -> Result<Vec<String>> {
        let probes = seeds.iter().map(|seed| probe(seed, timeout));
        let results = tokio::select! {
            _ = self.cancel.cancelled() => return Err(Error::Destroyed),
            results = join_all(probes) => results,
        };

        let reachable: Vec<String> = results.into_iter().filter_map(Result::ok).collect();
        if reachable.is_empty() {
            return Err(Error::Join(format!(
                "none of {} seeds were reachable",
                seeds.len()
            )));
        }
        Ok(reachable)
    }
}

#[async_trait]
impl Protocol for SeedProbe {
    async fn bootstrap(&self, options: &BootstrapOptions) -> Result<Vec<String>> {
        if self.cancel.is_cancelled() {
            return Err(Error::Destroyed);
        }

        let started = Instant::now();
        let mut seeds: Vec<&str> = options
            .hosts
            .iter()
            .map(String::as_str)
            .filter(|host| *host != self.identity)
            .collect();
        seeds.sort_unstable();
        seeds.dedup();

        let joined = if seeds.is_empty() {
            tracing::info!(identity = %self.identity, "No seeds given, forming single-node cluster");
            Vec::new()
        } else {
            self.probe_seeds(&seeds, options.join_timeout).await?
        };

        let mut changes = vec![Change::alive(self.identity.as_str())];
        changes.extend(joined.iter().map(|seed| Change::alive(seed.as_str())));
        self.sink.emit(Event::changes(changes));
        self.sink.emit(
            EventKind::JoinCompleted {
                duration: started.elapsed(),
                joined: joined.clone(),
            }
            .into(),
        );

        Ok(joined)
    }

    fn destroy(&self) {
        self.cancel.cancel();
    }
}

async fn probe(seed: &str, timeout: Duration) -> Result<String> {
    match tokio::time::timeout(timeout, TcpStream::connect(seed)).await {
        Ok(Ok(_stream)) => Ok(seed.to_string()),
        Ok(Err(e)) => {
            tracing::warn!(seed, "Seed unreachable: {}", e);
            Err(e.into())
        }
        Err(_) => {
            tracing::warn!(seed, ?timeout, "Seed probe timed out");
            Err(Error::JoinTimeout(timeout))
        }
    }
}
