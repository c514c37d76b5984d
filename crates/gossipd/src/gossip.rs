//! Gossip engine
//!
//! All membership state and event pools of one node live here and are
//! mutated through `&mut self` only. The engine does no I/O; [`crate::actor`]
//! owns it on a single task and performs the messaging around it.

use crate::config::GossipConfig;
use crate::dissemination::{Dissemination, MembershipEventSupplier};
use crate::freshness;
use crate::listener::{CustomEventListener, ListenerRegistry, MembershipListener};
use crate::membership::{Member, MembershipList};
use crate::pool::PoolStats;
use crate::sync::{self, CustomEventSyncRequest, SyncHandlers, SyncRequestHandler, SyncResponseSupplier};
use gossip_core::codec;
use gossip_core::types::*;
use gossip_core::{GossipMessage, ProbeAck, ProbeRequest, SyncRequest, SyncResponse};
use rand::seq::SliceRandom;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// Counts of new information taken from an inbound message
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Received {
    pub membership_events: usize,
    pub custom_events: usize,
}

/// Engine statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GossipStats {
    pub members: usize,
    pub suspects: usize,
    pub membership_events: PoolStats,
    pub custom_events: PoolStats,
    pub sync_events: usize,
    /// Events lost or evicted on full pools since start
    pub overflows: u64,
}

/// Milliseconds in `elapsed`, saturating at `u64::MAX`
fn epoch_millis(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

/// Gossip state of one node
pub struct Gossip {
    config: GossipConfig,
    membership: MembershipList,
    dissemination: Dissemination,
    listeners: ListenerRegistry,
    sync_handlers: SyncHandlers,
    sync_supplier: SyncResponseSupplier,
    next_request_id: u64,
    /// Gossip periods since start
    ticks: u64,
    /// Tick at which each suspected member was first seen suspected
    suspected_since: HashMap<MemberId, u64>,
    /// Remaining members of the current probe round, popped from the back
    probe_order: Vec<MemberId>,
}

impl Gossip {
    /// Create the engine for a starting node.
    ///
    /// The epoch of the local term is the current wall-clock time in
    /// milliseconds, so a restarted node outranks its previous incarnation.
    pub fn new(config: GossipConfig, local_id: MemberId, local_address: SocketAddr) -> Self {
        let since_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        let epoch = epoch_millis(since_epoch);
        Self::with_term(config, local_id, local_address, GossipTerm::new(epoch, 0))
    }

    pub fn with_term(
        config: GossipConfig,
        local_id: MemberId,
        local_address: SocketAddr,
        term: GossipTerm,
    ) -> Self {
        let dissemination = Dissemination::new(&config);
        let sync_supplier = SyncResponseSupplier::new(&config);
        Self {
            membership: MembershipList::new(local_id, local_address, term),
            dissemination,
            listeners: ListenerRegistry::new(),
            sync_handlers: SyncHandlers::default(),
            sync_supplier,
            next_request_id: 0,
            ticks: 0,
            suspected_since: HashMap::new(),
            probe_order: Vec::new(),
            config,
        }
    }

    pub fn local(&self) -> &Member {
        self.membership.local()
    }

    pub fn membership(&self) -> &MembershipList {
        &self.membership
    }

    pub fn config(&self) -> &GossipConfig {
        &self.config
    }

    // -------------------------------------------------------------------------
    // Local member lifecycle
    // -------------------------------------------------------------------------

    /// Announce the local member at its current term
    pub fn join(&mut self) -> bool {
        let local = self.membership.local();
        info!(member = %local.id, term = %local.term, "Joining cluster");
        let event = MembershipEvent::new(
            MembershipEventType::Join,
            local.id.clone(),
            local.address,
            local.term,
        );
        self.dissemination.add_membership_event(event)
    }

    /// Announce that the local member leaves. Suspicions are no longer
    /// refuted afterwards.
    pub fn leave(&mut self) -> bool {
        let local = self.membership.local_mut();
        local.term.increment();
        local.status = MemberStatus::Leaving;
        info!(member = %local.id, term = %local.term, "Leaving cluster");
        let event = MembershipEvent::new(
            MembershipEventType::Leave,
            local.id.clone(),
            local.address,
            local.term,
        );
        self.dissemination.add_membership_event(event)
    }

    // -------------------------------------------------------------------------
    // Outbound
    // -------------------------------------------------------------------------

    pub fn add_membership_event(&mut self, event: MembershipEvent) -> bool {
        self.dissemination.add_membership_event(event)
    }

    /// Buffer a custom event as is, after validating it
    pub fn add_custom_event(&mut self, event: CustomEvent) -> gossip_core::Result<bool> {
        codec::validate_custom_event(&event, self.config.max_payload_size)?;
        Ok(self.dissemination.add_custom_event(event))
    }

    /// Publish a custom event from the local member under a fresh term
    pub fn publish_custom_event(
        &mut self,
        event_type: EventType,
        payload: Vec<u8>,
    ) -> gossip_core::Result<bool> {
        let mut event = CustomEvent::new(
            event_type,
            self.membership.local().id.clone(),
            GossipTerm::default(),
            payload,
        );
        codec::validate_custom_event(&event, self.config.max_payload_size)?;

        event.sender_term = freshness::next_local_term(&mut self.membership, &event.event_type);
        debug!(event_type = %event.event_type, term = %event.sender_term, "Publishing custom event");
        Ok(self.dissemination.add_custom_event(event))
    }

    pub fn membership_event_view(&self, limit: usize) -> Vec<MembershipEvent> {
        self.dissemination.membership_event_view(limit)
    }

    pub fn membership_event_drain(&mut self, limit: usize) -> Vec<MembershipEvent> {
        self.dissemination.membership_event_drain(limit)
    }

    pub fn custom_event_view(&self, limit: usize) -> Vec<CustomEvent> {
        self.dissemination.custom_event_view(limit)
    }

    pub fn custom_event_drain(&mut self, limit: usize) -> Vec<CustomEvent> {
        self.dissemination.custom_event_drain(limit)
    }

    /// Push message carrying the least spread events of both pools
    pub fn build_gossip_message(&mut self) -> GossipMessage {
        let limit = self.config.max_events_per_message;
        self.dissemination.sort_by_spread_count();
        GossipMessage {
            membership_events: self.dissemination.membership_event_drain(limit),
            custom_events: self.dissemination.custom_event_drain(limit),
        }
    }

    // -------------------------------------------------------------------------
    // Inbound
    // -------------------------------------------------------------------------

    /// Merge a membership event from a peer. Returns whether the local view
    /// changed.
    pub fn consume_membership_event(&mut self, event: &MembershipEvent) -> bool {
        let outcome = self
            .dissemination
            .consume_membership_event(&mut self.membership, event);
        if let Some(change) = &outcome.change {
            self.listeners.notify_membership(change);
        }
        outcome.changed
    }

    /// Merge a custom event from a peer. New events are re-spread and
    /// delivered to listeners.
    pub fn consume_custom_event(&mut self, event: &CustomEvent) -> bool {
        if let Err(e) = codec::validate_custom_event(event, self.config.max_payload_size) {
            warn!(sender = %event.sender, error = %e, "Rejecting invalid custom event");
            return false;
        }
        let freshness = self
            .dissemination
            .consume_custom_event(&mut self.membership, event);
        if freshness.is_new() {
            self.listeners.dispatch_custom_event(event);
        }
        freshness.is_new()
    }

    /// Merge a push message: membership first so senders of custom events
    /// are known.
    pub fn receive_gossip(&mut self, message: &GossipMessage) -> Received {
        let mut received = Received::default();
        for event in &message.membership_events {
            if self.consume_membership_event(event) {
                received.membership_events += 1;
            }
        }
        for event in &message.custom_events {
            if self.consume_custom_event(event) {
                received.custom_events += 1;
            }
        }
        received
    }

    // -------------------------------------------------------------------------
    // Maintenance
    // -------------------------------------------------------------------------

    /// Free events spread often enough for the current cluster size
    pub fn clear_spread_events(&mut self) -> usize {
        self.dissemination
            .clear_spread_events(self.membership.cluster_size())
    }

    /// Once per gossip period. Confirms members suspected for too long,
    /// then retires spread events. Returns the number of events retired.
    pub fn tick(&mut self) -> usize {
        self.sync_supplier.reset();
        self.ticks += 1;
        self.check_failures();
        self.clear_spread_events()
    }

    /// Confirm every member suspected for at least `suspect_timeout_ticks`
    /// periods. The CONFIRM carries the next term so it outranks the
    /// suspicion everywhere. Returns the confirmed members.
    pub fn check_failures(&mut self) -> Vec<MemberId> {
        let ticks = self.ticks;
        let suspects: Vec<(MemberId, SocketAddr, GossipTerm)> = self
            .membership
            .members()
            .filter(|m| m.status == MemberStatus::Suspect)
            .map(|m| (m.id.clone(), m.address, m.term))
            .collect();
        self.suspected_since
            .retain(|id, _| suspects.iter().any(|(suspect, _, _)| suspect == id));

        let mut confirmed = Vec::new();
        for (id, address, term) in suspects {
            let since = *self.suspected_since.entry(id.clone()).or_insert(ticks);
            if ticks - since < self.config.suspect_timeout_ticks {
                continue;
            }
            warn!(member = %id, term = %term, suspected_for = ticks - since, "Suspicion timed out, confirming member dead");
            let confirm = MembershipEvent::new(MembershipEventType::Confirm, id.clone(), address, term.next());
            if self.consume_membership_event(&confirm) {
                self.suspected_since.remove(&id);
                confirmed.push(id);
            }
        }
        confirmed
    }

    // -------------------------------------------------------------------------
    // Failure detection
    // -------------------------------------------------------------------------

    /// Probe of the next member in round-robin order. Every member is
    /// probed once per round; the order is reshuffled between rounds.
    pub fn next_probe(&mut self) -> Option<ProbeRequest> {
        let local = self.membership.local();
        if local.status == MemberStatus::Leaving {
            return None;
        }
        let sender = MembershipEvent::new(MembershipEventType::Alive, local.id.clone(), local.address, local.term);

        for refilled in [false, true] {
            if refilled {
                self.probe_order = self.membership.members().map(|m| m.id.clone()).collect();
                self.probe_order.shuffle(&mut rand::thread_rng());
            }
            while let Some(id) = self.probe_order.pop() {
                let Some(target) = self.membership.get(&id).and_then(|m| m.to_event()) else {
                    continue;
                };
                return Some(ProbeRequest {
                    sender: sender.clone(),
                    target,
                });
            }
        }
        None
    }

    /// Up to `probe_helpers` random alive members other than `target`
    pub fn probe_helpers(&self, target: &MemberId) -> Vec<SocketAddr> {
        let candidates: Vec<SocketAddr> = self
            .membership
            .members()
            .filter(|m| m.id != *target && m.status == MemberStatus::Alive)
            .map(|m| m.address)
            .collect();
        candidates
            .choose_multiple(&mut rand::thread_rng(), self.config.probe_helpers)
            .copied()
            .collect()
    }

    /// Answer a probe. The prober is merged as a live member; a prober that
    /// suspects the local member at its current term triggers refutation,
    /// and the ack carries the refuted term.
    pub fn handle_probe(&mut self, request: &ProbeRequest) -> ProbeAck {
        self.consume_membership_event(&request.sender);
        if self.membership.is_local(&request.target.member) {
            self.consume_membership_event(&request.target);
        }
        let local = self.membership.local();
        debug!(prober = %request.sender.member, term = %local.term, "Answering probe");
        ProbeAck {
            member: MembershipEvent::new(MembershipEventType::Alive, local.id.clone(), local.address, local.term),
        }
    }

    /// Merge the ack of a successful probe. Returns whether the view changed.
    pub fn probe_succeeded(&mut self, ack: &ProbeAck) -> bool {
        self.consume_membership_event(&ack.member)
    }

    /// Suspect the target of a probe nobody could get an answer from. Only
    /// applies while the member is still alive at the probed term.
    pub fn probe_failed(&mut self, request: &ProbeRequest) -> bool {
        let target = &request.target;
        let still_alive = self
            .membership
            .get(&target.member)
            .is_some_and(|m| m.status == MemberStatus::Alive && m.term == target.term);
        if !still_alive {
            return false;
        }
        info!(member = %target.member, term = %target.term, "Probe failed, suspecting member");
        let suspicion = MembershipEvent::new(
            MembershipEventType::Suspect,
            target.member.clone(),
            target.address,
            target.term,
        );
        self.consume_membership_event(&suspicion)
    }

    // -------------------------------------------------------------------------
    // Registration
    // -------------------------------------------------------------------------

    pub fn register_sync_request_handler(
        &mut self,
        event_type: EventType,
        handler: Arc<dyn SyncRequestHandler>,
    ) {
        self.sync_handlers.register(event_type, handler);
    }

    pub fn add_custom_event_listener(
        &mut self,
        event_type: EventType,
        listener: Arc<dyn CustomEventListener>,
    ) {
        self.listeners.add_custom_event_listener(event_type, listener);
    }

    pub fn remove_custom_event_listener(&mut self, listener: &Arc<dyn CustomEventListener>) -> usize {
        self.listeners.remove_custom_event_listener(listener)
    }

    pub fn add_membership_listener(&mut self, listener: Arc<dyn MembershipListener>) {
        self.listeners.add_membership_listener(listener);
    }

    pub fn remove_membership_listener(&mut self, listener: &Arc<dyn MembershipListener>) -> usize {
        self.listeners.remove_membership_listener(listener)
    }

    // -------------------------------------------------------------------------
    // Anti-entropy sync
    // -------------------------------------------------------------------------

    /// New request asking a peer for the given event types
    pub fn create_sync_request(&mut self, event_types: Vec<EventType>) -> SyncRequest {
        self.next_request_id += 1;
        SyncRequest::new(self.next_request_id, 0, event_types)
    }

    /// Handlers that must answer `request`
    pub fn sync_handlers_for(
        &self,
        request: &SyncRequest,
    ) -> Vec<(EventType, Arc<dyn SyncRequestHandler>)> {
        self.sync_handlers.matching(request)
    }

    /// Build the response once every handler has filled in its request
    pub fn complete_sync(
        &mut self,
        request: &SyncRequest,
        collected: &[CustomEventSyncRequest],
    ) -> SyncResponse {
        let (materialized, dropped) = sync::materialize(&self.membership, collected);
        let response = SyncResponse {
            request_id: request.request_id,
            stream_id: request.stream_id,
            members: self
                .membership
                .full_state()
                .membership_event_drain(usize::MAX),
            custom_events: self.sync_supplier.respond(materialized),
        };
        debug!(
            request_id = request.request_id,
            members = response.members.len(),
            custom_events = response.custom_events.len(),
            dropped,
            "Answering sync request"
        );
        response
    }

    /// Merge a sync response received from a peer
    pub fn apply_sync_response(&mut self, response: &SyncResponse) -> Received {
        let received = self.receive_gossip(&GossipMessage {
            membership_events: response.members.clone(),
            custom_events: response.custom_events.clone(),
        });
        info!(
            request_id = response.request_id,
            membership_events = received.membership_events,
            custom_events = received.custom_events,
            "Applied sync response"
        );
        received
    }

    pub fn stats(&self) -> GossipStats {
        let membership_events = self.dissemination.membership_pool_stats();
        let custom_events = self.dissemination.custom_pool_stats();
        let sync_events = self.sync_supplier.stats();
        GossipStats {
            members: self.membership.len(),
            suspects: self
                .membership
                .members()
                .filter(|m| m.status == MemberStatus::Suspect)
                .count(),
            membership_events,
            custom_events,
            sync_events: sync_events.size,
            overflows: membership_events.overflows + custom_events.overflows + sync_events.overflows,
        }
    }
}
