//! Anti-entropy synchronization protocol
//!
//! A peer that joins or fell behind pulls the responder's full knowledge:
//! the full-state membership view plus one snapshot per registered custom
//! event type. Snapshots come from application handlers; all of them must
//! succeed before a response is sent.

use crate::config::GossipConfig;
use crate::membership::MembershipList;
use crate::pool::{EventPool, PoolStats};
use async_trait::async_trait;
use futures::future::try_join_all;
use gossip_core::types::*;
use gossip_core::SyncRequest;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Sync protocol errors
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Sync handler for {event_type} failed: {reason}")]
    HandlerFailed { event_type: EventType, reason: String },
    #[error("Sync handler for {event_type} panicked")]
    HandlerPanicked { event_type: EventType },
}

/// One handler's knowledge about one sender
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncResponsePart {
    /// Address of the member that originated the payload
    pub sender: SocketAddr,
    pub payload: Vec<u8>,
}

/// Per event type request handed to a [`SyncRequestHandler`] to fill in
#[derive(Debug, Clone)]
pub struct CustomEventSyncRequest {
    request_id: u64,
    event_type: EventType,
    parts: Vec<SyncResponsePart>,
}

impl CustomEventSyncRequest {
    pub fn new(request_id: u64, event_type: EventType) -> Self {
        Self {
            request_id,
            event_type,
            parts: Vec::new(),
        }
    }

    pub fn request_id(&self) -> u64 {
        self.request_id
    }

    pub fn event_type(&self) -> &EventType {
        &self.event_type
    }

    pub fn add_part(&mut self, sender: SocketAddr, payload: Vec<u8>) {
        self.parts.push(SyncResponsePart { sender, payload });
    }

    pub fn parts(&self) -> &[SyncResponsePart] {
        &self.parts
    }
}

/// Application hook contributing a snapshot for one custom event type
#[async_trait]
pub trait SyncRequestHandler: Send + Sync + 'static {
    async fn on_sync_request(&self, request: &mut CustomEventSyncRequest) -> anyhow::Result<()>;
}

/// Registered handlers, one per event type
#[derive(Default, Clone)]
pub struct SyncHandlers {
    handlers: Vec<(EventType, Arc<dyn SyncRequestHandler>)>,
}

impl SyncHandlers {
    /// Register a handler, replacing any previous one for the same type
    pub fn register(&mut self, event_type: EventType, handler: Arc<dyn SyncRequestHandler>) {
        self.handlers.retain(|(registered, _)| *registered != event_type);
        self.handlers.push((event_type, handler));
    }

    /// Handlers answering the given request
    pub fn matching(&self, request: &SyncRequest) -> Vec<(EventType, Arc<dyn SyncRequestHandler>)> {
        self.handlers
            .iter()
            .filter(|(event_type, _)| request.wants(event_type))
            .cloned()
            .collect()
    }
}

/// Run every handler on its own task and wait for all of them.
///
/// The first failure fails the whole collection. There is no timeout here;
/// a handler that never completes stalls only this request.
pub async fn collect(
    request_id: u64,
    handlers: Vec<(EventType, Arc<dyn SyncRequestHandler>)>,
) -> Result<Vec<CustomEventSyncRequest>, SyncError> {
    let tasks = handlers.into_iter().map(|(event_type, handler)| {
        let task_type = event_type.clone();
        let task = tokio::spawn(async move {
            let mut request = CustomEventSyncRequest::new(request_id, task_type.clone());
            handler
                .on_sync_request(&mut request)
                .await
                .map_err(|e| SyncError::HandlerFailed {
                    event_type: task_type,
                    reason: e.to_string(),
                })?;
            Ok::<_, SyncError>(request)
        });

        async move {
            match task.await {
                Ok(result) => result,
                Err(_) => Err(SyncError::HandlerPanicked { event_type }),
            }
        }
    });

    try_join_all(tasks).await
}

/// Tracks the custom events carried by sync responses within one gossip
/// period.
///
/// A response carries exactly the events materialized for its own request.
/// Each staged event is freed once it has been carried by `spread_limit`
/// responses. The limit grows by one for every additional sync answered
/// within the same period. Everything staged is dropped at the start of the
/// next period.
pub struct SyncResponseSupplier {
    pool: EventPool<CustomEvent>,
    spread_limit: u32,
    answered: u32,
}

impl SyncResponseSupplier {
    pub fn new(config: &GossipConfig) -> Self {
        Self {
            pool: EventPool::new("sync", config.sync_pool_capacity, config.overflow_policy),
            spread_limit: 1,
            answered: 0,
        }
    }

    pub fn spread_limit(&self) -> u32 {
        self.spread_limit
    }

    pub fn increase_spread_limit(&mut self) {
        self.spread_limit += 1;
    }

    /// Start of a gossip period
    pub fn reset(&mut self) {
        self.spread_limit = 1;
        self.answered = 0;
        self.pool.clear();
    }

    fn begin_response(&mut self) {
        if self.answered > 0 {
            self.increase_spread_limit();
        }
        self.answered += 1;
    }

    /// Build the custom event section of one response.
    ///
    /// The returned events are `materialized`, untouched. Staging overflow
    /// is counted in [`SyncResponseSupplier::stats`] but never shortens a
    /// response.
    pub fn respond(&mut self, materialized: Vec<CustomEvent>) -> Vec<CustomEvent> {
        self.begin_response();
        let capacity = self.pool.capacity();
        for event in &materialized {
            if !self.pool.view(capacity).any(|staged| staged == event) {
                self.pool.add(event.clone());
            }
        }

        let spread_limit = self.spread_limit;
        let carried = self
            .pool
            .drain_matching_with_spread_limit(capacity, spread_limit, |staged| materialized.contains(staged))
            .count();
        debug!(
            events = materialized.len(),
            carried,
            spread_limit,
            staged = self.pool.size(),
            "Prepared sync response"
        );
        materialized
    }

    pub fn size(&self) -> usize {
        self.pool.size()
    }

    pub fn stats(&self) -> PoolStats {
        self.pool.stats()
    }
}

/// Turn handler parts into custom events stamped with the term this node
/// tracks for their sender. Parts naming an unknown member, or a member
/// without a term for the type, are dropped. Returns the events and the
/// number of parts dropped.
pub fn materialize(membership: &MembershipList, requests: &[CustomEventSyncRequest]) -> (Vec<CustomEvent>, usize) {
    let mut events = Vec::new();
    let mut dropped = 0;
    for request in requests {
        for part in request.parts() {
            let Some(member) = membership.get_by_address(&part.sender) else {
                warn!(sender = %part.sender, event_type = %request.event_type, "Sync part from unknown member, dropping");
                dropped += 1;
                continue;
            };
            let Some(term) = member.custom_term(&request.event_type) else {
                warn!(member = %member.id, event_type = %request.event_type, "No term tracked for sync part, dropping");
                dropped += 1;
                continue;
            };
            events.push(CustomEvent::new(
                request.event_type.clone(),
                member.id.clone(),
                term,
                part.payload.clone(),
            ));
        }
    }
    debug!(request_id = ?requests.first().map(|r| r.request_id), dropped, "Materialized sync parts");
    (events, dropped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::membership::Member;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    /// Contributes `count` parts from `sender`
    struct FixedHandler {
        sender: SocketAddr,
        count: usize,
    }

    #[async_trait]
    impl SyncRequestHandler for FixedHandler {
        async fn on_sync_request(&self, request: &mut CustomEventSyncRequest) -> anyhow::Result<()> {
            for i in 0..self.count {
                request.add_part(self.sender, vec![i as u8]);
            }
            Ok(())
        }
    }

    struct FailingHandler;

    #[async_trait]
    impl SyncRequestHandler for FailingHandler {
        async fn on_sync_request(&self, _request: &mut CustomEventSyncRequest) -> anyhow::Result<()> {
            anyhow::bail!("store unavailable")
        }
    }

    struct PanickingHandler;

    #[async_trait]
    impl SyncRequestHandler for PanickingHandler {
        async fn on_sync_request(&self, _request: &mut CustomEventSyncRequest) -> anyhow::Result<()> {
            panic!("handler bug")
        }
    }

    fn fixed(sender: SocketAddr, count: usize) -> Arc<dyn SyncRequestHandler> {
        Arc::new(FixedHandler { sender, count })
    }

    fn failing() -> Arc<dyn SyncRequestHandler> {
        Arc::new(FailingHandler)
    }

    fn panicking() -> Arc<dyn SyncRequestHandler> {
        Arc::new(PanickingHandler)
    }

    fn membership() -> MembershipList {
        let mut list = MembershipList::new(MemberId::from("a"), addr(1), GossipTerm::new(0, 0));
        let mut b = Member::new(MemberId::from("b"), addr(2), GossipTerm::new(0, 0));
        b.set_custom_term(EventType::from("leader"), GossipTerm::new(0, 4));
        b.set_custom_term(EventType::from("partition"), GossipTerm::new(0, 2));
        list.add(b);
        list.local_mut()
            .set_custom_term(EventType::from("partition"), GossipTerm::new(0, 9));
        list
    }

    fn handlers(entries: Vec<(&str, Arc<dyn SyncRequestHandler>)>) -> SyncHandlers {
        let mut handlers = SyncHandlers::default();
        for (event_type, handler) in entries {
            handlers.register(EventType::from(event_type), handler);
        }
        handlers
    }

    #[tokio::test]
    async fn test_collect_all_handlers() {
        let handlers = handlers(vec![
            ("leader", fixed(addr(2), 2)),
            ("partition", fixed(addr(1), 3)),
        ]);
        let request = SyncRequest::new(1, 0, vec![]);

        let requests = collect(1, handlers.matching(&request)).await.unwrap();
        let parts: usize = requests.iter().map(|r| r.parts().len()).sum();
        assert_eq!(requests.len(), 2);
        assert_eq!(parts, 5);
    }

    #[tokio::test]
    async fn test_collect_fails_on_any_handler_error() {
        let handlers = handlers(vec![
            ("leader", fixed(addr(2), 2)),
            ("partition", failing()),
        ]);
        let request = SyncRequest::new(2, 0, vec![]);

        let result = collect(2, handlers.matching(&request)).await;
        assert!(matches!(result, Err(SyncError::HandlerFailed { .. })));
    }

    #[tokio::test]
    async fn test_collect_reports_panics() {
        let handlers = handlers(vec![("leader", panicking())]);
        let request = SyncRequest::new(3, 0, vec![]);

        let result = collect(3, handlers.matching(&request)).await;
        assert!(matches!(result, Err(SyncError::HandlerPanicked { .. })));
    }

    #[test]
    fn test_matching_filters_requested_types() {
        let handlers = handlers(vec![
            ("leader", failing()),
            ("partition", failing()),
        ]);
        let request = SyncRequest::new(4, 0, vec![EventType::from("partition")]);
        let matching = handlers.matching(&request);
        assert_eq!(matching.len(), 1);
        assert_eq!(matching[0].0, EventType::from("partition"));
    }

    #[test]
    fn test_register_replaces() {
        let handlers = handlers(vec![
            ("leader", failing()),
            ("leader", fixed(addr(2), 1)),
        ]);
        let matching = handlers.matching(&SyncRequest::new(5, 0, vec![]));
        assert_eq!(matching.len(), 1);
        assert_eq!(matching[0].0, EventType::from("leader"));
    }

    fn leader_event(payload: u8) -> CustomEvent {
        CustomEvent::new(
            EventType::from("leader"),
            MemberId::from("b"),
            GossipTerm::new(0, 4),
            vec![payload],
        )
    }

    #[test]
    fn test_materialize_resolves_terms() {
        let membership = membership();

        let mut leader = CustomEventSyncRequest::new(1, EventType::from("leader"));
        leader.add_part(addr(2), vec![1]);
        let mut partition = CustomEventSyncRequest::new(1, EventType::from("partition"));
        partition.add_part(addr(2), vec![2]);
        partition.add_part(addr(1), vec![3]);

        let (events, dropped) = materialize(&membership, &[leader, partition]);
        assert_eq!(dropped, 0);
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].sender, MemberId::from("b"));
        assert_eq!(events[0].sender_term, GossipTerm::new(0, 4));
        assert_eq!(events[1].sender_term, GossipTerm::new(0, 2));
        assert_eq!(events[2].sender, MemberId::from("a"));
        assert_eq!(events[2].sender_term, GossipTerm::new(0, 9));
    }

    #[test]
    fn test_materialize_drops_unresolvable_parts() {
        let membership = membership();

        let mut leader = CustomEventSyncRequest::new(1, EventType::from("leader"));
        leader.add_part(addr(2), vec![1]);
        leader.add_part(addr(9), vec![2]);
        // the local member never published a leader event
        leader.add_part(addr(1), vec![3]);

        let (events, dropped) = materialize(&membership, &[leader]);
        assert_eq!(dropped, 2);
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_spread_limit_per_period() {
        let mut supplier = SyncResponseSupplier::new(&GossipConfig::default());

        assert_eq!(supplier.respond(vec![leader_event(1)]).len(), 1);
        assert_eq!(supplier.spread_limit(), 1);
        assert_eq!(supplier.size(), 0);

        // second response in the period keeps the event staged for one more
        assert_eq!(supplier.respond(vec![leader_event(1)]).len(), 1);
        assert_eq!(supplier.spread_limit(), 2);
        assert_eq!(supplier.size(), 1);

        supplier.reset();
        assert_eq!(supplier.spread_limit(), 1);
        assert_eq!(supplier.size(), 0);
    }

    #[test]
    fn test_responses_carry_only_their_own_events() {
        let mut supplier = SyncResponseSupplier::new(&GossipConfig::default());

        for payload in 0..3 {
            assert_eq!(supplier.respond(vec![leader_event(payload)]), vec![leader_event(payload)]);
        }
        assert!(supplier.size() > 0);

        let partition = CustomEvent::new(
            EventType::from("partition"),
            MemberId::from("b"),
            GossipTerm::new(0, 2),
            vec![7],
        );
        assert_eq!(supplier.respond(vec![partition.clone()]), vec![partition.clone()]);

        supplier.reset();
        assert_eq!(supplier.size(), 0);
        assert_eq!(supplier.respond(vec![partition.clone()]), vec![partition]);
        assert!(supplier.respond(vec![]).is_empty());
    }

    #[test]
    fn test_staging_overflow_never_shortens_response() {
        let config = GossipConfig {
            sync_pool_capacity: 4,
            ..GossipConfig::default()
        };
        let mut supplier = SyncResponseSupplier::new(&config);
        let events: Vec<CustomEvent> = (0..10).map(leader_event).collect();

        let response = supplier.respond(events.clone());
        assert_eq!(response, events);
        assert_eq!(supplier.stats().overflows, 6);
    }
}
