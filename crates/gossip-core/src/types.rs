//! Core protocol types for the broker gossip protocol
//!
//! Everything gossiped between members is ordered by a [`GossipTerm`], a
//! logical clock owned by the member it describes. Wall-clock time never
//! takes part in ordering.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;

// =============================================================================
// LOGICAL TIME
// =============================================================================

/// Logical clock pair totally ordering a member's own status changes.
///
/// Terms compare by `epoch` first, then by `heartbeat`. The derived ordering
/// relies on that field order.
#[derive(
    Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
pub struct GossipTerm {
    pub epoch: u64,
    pub heartbeat: u64,
}

impl GossipTerm {
    pub const fn new(epoch: u64, heartbeat: u64) -> Self {
        Self { epoch, heartbeat }
    }

    pub fn is_greater_than(&self, other: &GossipTerm) -> bool {
        self > other
    }

    pub fn is_equal(&self, other: &GossipTerm) -> bool {
        self == other
    }

    /// Advance the heartbeat within the same epoch.
    pub fn increment(&mut self) {
        self.heartbeat += 1;
    }

    /// The term directly following this one.
    pub fn next(&self) -> GossipTerm {
        GossipTerm::new(self.epoch, self.heartbeat + 1)
    }
}

impl fmt::Display for GossipTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.epoch, self.heartbeat)
    }
}

// =============================================================================
// IDENTITY TYPES
// =============================================================================

/// Logical identity of a cluster member
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MemberId(pub String);

impl MemberId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MemberId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Application-defined custom event type.
///
/// Matching is exact byte equality of the identifier.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventType(pub Vec<u8>);

impl EventType {
    pub fn new(id: impl Into<Vec<u8>>) -> Self {
        Self(id.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.0) {
            Ok(s) => f.write_str(s),
            Err(_) => write!(f, "0x{}", hex::encode(&self.0)),
        }
    }
}

impl From<&str> for EventType {
    fn from(id: &str) -> Self {
        Self(id.as_bytes().to_vec())
    }
}

// =============================================================================
// MEMBERSHIP
// =============================================================================

/// Status of a member in the local membership view
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum MemberStatus {
    Alive,
    Suspect,
    /// Only ever held by the local member after it announced LEAVE
    Leaving,
}

impl MemberStatus {
    /// The membership event type describing this status in a full-state
    /// dump. Transient statuses have none.
    pub fn event_type(&self) -> Option<MembershipEventType> {
        match self {
            MemberStatus::Alive => Some(MembershipEventType::Alive),
            MemberStatus::Suspect => Some(MembershipEventType::Suspect),
            MemberStatus::Leaving => None,
        }
    }
}

/// Membership event kind
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MembershipEventType {
    Join = 0,
    Alive = 1,
    Suspect = 2,
    Confirm = 3,
    Leave = 4,
}

/// A statement about one member's status at a given term
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct MembershipEvent {
    pub event_type: MembershipEventType,
    pub member: MemberId,
    /// Network address of the member, used when the member is first learned
    pub address: SocketAddr,
    pub term: GossipTerm,
}

impl MembershipEvent {
    pub fn new(
        event_type: MembershipEventType,
        member: MemberId,
        address: SocketAddr,
        term: GossipTerm,
    ) -> Self {
        Self {
            event_type,
            member,
            address,
            term,
        }
    }
}

impl fmt::Display for MembershipEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({}, {})", self.event_type, self.member, self.term)
    }
}

// =============================================================================
// CUSTOM EVENTS
// =============================================================================

/// Small application payload disseminated alongside membership events
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CustomEvent {
    pub event_type: EventType,
    pub sender: MemberId,
    /// Sender's logical term for this event type
    pub sender_term: GossipTerm,
    pub payload: Vec<u8>,
}

impl CustomEvent {
    pub fn new(
        event_type: EventType,
        sender: MemberId,
        sender_term: GossipTerm,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            event_type,
            sender,
            sender_term,
            payload,
        }
    }
}
