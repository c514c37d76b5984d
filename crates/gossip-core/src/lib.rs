//! Broker Gossip Core Library
//!
//! This crate provides the data model, wire messages and encoding shared by
//! every participant of the broker gossip protocol.
//!
//! # Modules
//!
//! - [`types`]: Gossip terms, member identities, membership and custom events
//! - [`messages`]: Push gossip, anti-entropy sync and probe message shapes
//! - [`codec`]: postcard encoding of wire messages
//! - [`math`]: Epidemic broadcast sizing
//! - [`error`]: Error types

pub mod codec;
pub mod error;
pub mod math;
pub mod messages;
pub mod types;

pub use error::{Error, Result};
pub use messages::*;
pub use types::*;
