//! Cluster membership coordinator with consistent hashing.
//!
//! This crate provides:
//! - A lifecycle state machine (`created → initialized → ready → destroyed`)
//!   gating every ring query
//! - A consistent hash ring driven by membership batches from a gossip protocol
//! - Event fan-out to stats and to registered listeners, one queue per listener
//!
//! The gossip protocol itself sits behind the [`Protocol`] trait. The bundled
//! [`SeedProbe`] joins by contacting seeds over TCP, which is enough to form
//! single-node clusters and to exercise the lifecycle.
//!
//! # Example
//!
//! ```rust,ignore
//! use ringpop::{BootstrapOptions, ClusterCoordinator};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let coordinator = ClusterCoordinator::builder("my-app")
//!         .identity("10.0.0.1:3000")
//!         .build()?;
//!
//!     // Empty host list forms a single-node cluster
//!     coordinator.bootstrap(BootstrapOptions::default()).await?;
//!
//!     let owner = coordinator.lookup("some-key")?;
//!     let replicas = coordinator.lookup_n("some-key", 3)?;
//!
//!     coordinator.destroy();
//!     Ok(())
//! }
//! ```
//!
//! # Concurrency
//!
//! - Ring reads are lock-free snapshots; each membership batch swaps in a new ring
//! - Stats are emitted before `handle_event` returns
//! - Listeners run on their own threads and never block the protocol

mod config;
mod coordinator;
mod error;
mod events;
mod listener;
mod member;
mod protocol;
mod ring;
mod router;
mod stats;

pub use config::{BootstrapOptions, Options};
pub use coordinator::{ClusterCoordinator, ClusterCoordinatorBuilder, LifecycleState};
pub use error::{Error, Result};
pub use events::{Event, EventKind};
pub use listener::{EventListener, ListenerId, ListenerRegistry};
pub use member::{Change, MemberStatus};
pub use protocol::{EventSink, Protocol, ProtocolFactory, SeedProbe, SeedProbeFactory};
pub use ring::{HashRing, RingDelta, SharedRing};
pub use router::EventRouter;
pub use stats::{InMemoryStats, MetricsStats, NoopStats, StatsKeys, StatsReporter};
