//! Wire message shapes exchanged between members
//!
//! Transports carry these as opaque bytes produced by [`crate::codec`].

use crate::codec;
use crate::error::Result;
use crate::types::*;
use serde::{Deserialize, Serialize};

/// Periodic push gossip: a bounded prefix of each event pool
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct GossipMessage {
    pub membership_events: Vec<MembershipEvent>,
    pub custom_events: Vec<CustomEvent>,
}

impl GossipMessage {
    pub fn is_empty(&self) -> bool {
        self.membership_events.is_empty() && self.custom_events.is_empty()
    }
}

/// Anti-entropy pull request
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncRequest {
    pub request_id: u64,
    pub stream_id: u32,
    /// Event types to reconcile; empty asks for every registered type
    pub event_types: Vec<EventType>,
}

impl SyncRequest {
    pub fn new(request_id: u64, stream_id: u32, event_types: Vec<EventType>) -> Self {
        Self {
            request_id,
            stream_id,
            event_types,
        }
    }

    /// Whether the requester asked for the given event type
    pub fn wants(&self, event_type: &EventType) -> bool {
        self.event_types.is_empty() || self.event_types.contains(event_type)
    }
}

/// Aggregated answer to a [`SyncRequest`]
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncResponse {
    pub request_id: u64,
    pub stream_id: u32,
    /// Full-state membership view of the responder
    pub members: Vec<MembershipEvent>,
    /// One entry per (event type, sender) known to the responder's handlers
    pub custom_events: Vec<CustomEvent>,
}

/// Liveness check of one member, sent directly or through a helper
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProbeRequest {
    /// The prober as it announces itself
    pub sender: MembershipEvent,
    /// The probed member as the prober sees it
    pub target: MembershipEvent,
}

/// Answer of a probed member carrying its current term
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProbeAck {
    pub member: MembershipEvent,
}

impl GossipMessage {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        codec::encode(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        codec::decode(bytes)
    }
}

impl SyncRequest {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        codec::encode(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        codec::decode(bytes)
    }
}

impl SyncResponse {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        codec::encode(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        codec::decode(bytes)
    }
}

impl ProbeRequest {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        codec::encode(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        codec::decode(bytes)
    }
}

impl ProbeAck {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        codec::encode(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        codec::decode(bytes)
    }
}
