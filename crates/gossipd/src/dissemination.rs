//! Dissemination of membership and custom events
//!
//! Owns one pool per event kind. Locally originated events are added
//! directly; events received from peers are merged through the membership
//! state machine or the custom event freshness check and re-buffered only
//! when they carried new information, so every member re-spreads what it
//! learns first.

use crate::config::GossipConfig;
use crate::freshness::{self, Freshness};
use crate::membership::MembershipList;
use crate::pool::{EventPool, PoolStats};
use crate::updater::{self, MembershipChange, UpdateOutcome};
use gossip_core::math::gossip_periods_to_spread;
use gossip_core::types::*;
use tracing::debug;

/// Source of membership events for outbound messages
pub trait MembershipEventSupplier {
    /// Up to `limit` events, leaving spread counts untouched
    fn membership_event_view(&self, limit: usize) -> Vec<MembershipEvent>;

    /// Up to `limit` events, counting each as spread once
    fn membership_event_drain(&mut self, limit: usize) -> Vec<MembershipEvent>;
}

/// Buffered event pools
pub struct Dissemination {
    membership_events: EventPool<MembershipEvent>,
    custom_events: EventPool<CustomEvent>,
    retransmission_multiplier: u32,
}

impl Dissemination {
    pub fn new(config: &GossipConfig) -> Self {
        Self {
            membership_events: EventPool::new(
                "membership",
                config.membership_pool_capacity,
                config.overflow_policy,
            ),
            custom_events: EventPool::new(
                "custom",
                config.custom_event_pool_capacity,
                config.overflow_policy,
            ),
            retransmission_multiplier: config.retransmission_multiplier,
        }
    }

    /// Buffer a locally originated membership event
    pub fn add_membership_event(&mut self, event: MembershipEvent) -> bool {
        self.membership_events.add(event)
    }

    /// Buffer a locally originated custom event
    pub fn add_custom_event(&mut self, event: CustomEvent) -> bool {
        self.custom_events.add(event)
    }

    pub fn custom_event_view(&self, limit: usize) -> Vec<CustomEvent> {
        self.custom_events.view(limit).cloned().collect()
    }

    pub fn custom_event_drain(&mut self, limit: usize) -> Vec<CustomEvent> {
        self.custom_events.drain(limit).cloned().collect()
    }

    /// Least spread events first in both pools
    pub fn sort_by_spread_count(&mut self) {
        self.membership_events.sort_by_spread_count();
        self.custom_events.sort_by_spread_count();
    }

    /// Merge a membership event received from a peer.
    ///
    /// Events that changed the local view are buffered for further spread,
    /// as is the ALIVE refuting a suspicion of the local member. Removing a
    /// member also drops its buffered events at older terms, so they are not
    /// spread back to peers that already removed it.
    pub fn consume_membership_event(
        &mut self,
        membership: &mut MembershipList,
        event: &MembershipEvent,
    ) -> UpdateOutcome {
        let outcome = updater::apply(membership, event);
        if let Some(MembershipChange::Removed(member)) = &outcome.change {
            let purged = self
                .membership_events
                .remove_where(|buffered| buffered.member == member.id && buffered.term < event.term);
            if purged > 0 {
                debug!(member = %member.id, purged, "Dropped buffered events of removed member");
            }
        }
        if let Some(refutation) = &outcome.refutation {
            self.membership_events.add(refutation.clone());
        } else if outcome.changed {
            self.membership_events.add(event.clone());
        }
        outcome
    }

    /// Merge a custom event received from a peer, re-buffering it when new.
    pub fn consume_custom_event(
        &mut self,
        membership: &mut MembershipList,
        event: &CustomEvent,
    ) -> Freshness {
        let freshness = freshness::accept(membership, event);
        if freshness.is_new() {
            self.custom_events.add(event.clone());
        } else {
            debug!(sender = %event.sender, event_type = %event.event_type, term = %event.sender_term, ?freshness, "Dropping custom event");
        }
        freshness
    }

    /// Free every event spread more often than a cluster of `cluster_size`
    /// needs. Returns the number of freed events.
    pub fn clear_spread_events(&mut self, cluster_size: usize) -> usize {
        let bound = gossip_periods_to_spread(self.retransmission_multiplier, cluster_size);
        let removed = self
            .membership_events
            .remove_events_with_spread_count_greater_than(bound)
            + self
                .custom_events
                .remove_events_with_spread_count_greater_than(bound);
        if removed > 0 {
            debug!(removed, bound, cluster_size, "Cleared spread events");
        }
        removed
    }

    pub fn membership_pool_stats(&self) -> PoolStats {
        self.membership_events.stats()
    }

    pub fn custom_pool_stats(&self) -> PoolStats {
        self.custom_events.stats()
    }
}

impl MembershipEventSupplier for Dissemination {
    fn membership_event_view(&self, limit: usize) -> Vec<MembershipEvent> {
        self.membership_events.view(limit).cloned().collect()
    }

    fn membership_event_drain(&mut self, limit: usize) -> Vec<MembershipEvent> {
        self.membership_events.drain(limit).cloned().collect()
    }
}
