//! gossipd - gossip dissemination and membership engine
//!
//! This crate provides:
//! - Buffered event pools with spread counting
//! - SWIM-style membership updates with self-refutation
//! - Probe-based failure detection with a suspicion timeout
//! - Custom event dissemination with per-sender freshness
//! - Anti-entropy sync with application handlers
//! - An actor wrapper and in-process transport for running clusters

pub mod actor;
pub mod config;
pub mod dissemination;
pub mod freshness;
pub mod gossip;
pub mod listener;
pub mod membership;
pub mod pool;
pub mod sim;
pub mod sync;
pub mod transport;
pub mod updater;

pub use actor::{GossipError, GossipHandle, ProbeOutcome};
pub use config::{Config, GossipConfig, OverflowPolicy};
pub use dissemination::{Dissemination, MembershipEventSupplier};
pub use gossip::{Gossip, GossipStats, Received};
pub use listener::{CustomEventListener, MembershipListener};
pub use membership::{Member, MembershipList};
pub use pool::EventPool;
pub use sync::{CustomEventSyncRequest, SyncRequestHandler};
pub use transport::{LocalNetwork, Transport, TransportError};
pub use updater::MembershipChange;
