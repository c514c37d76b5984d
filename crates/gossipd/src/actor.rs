//! Gossip actor
//!
//! One task owns the [`Gossip`] engine. Everything else talks to it through
//! a cloneable [`GossipHandle`] that posts commands into a bounded mailbox
//! and awaits the reply.
//!
//! Sync requests are the only commands that wait on application code. The
//! actor hands the registered handlers to a separate task and keeps serving
//! its mailbox; the collected parts come back as a command of their own.

use crate::gossip::{Gossip, GossipStats, Received};
use crate::listener::{CustomEventListener, MembershipListener};
use crate::membership::Member;
use crate::sync::{self, CustomEventSyncRequest, SyncError, SyncRequestHandler};
use crate::transport::{Transport, TransportError};
use gossip_core::types::*;
use futures::future::select_ok;
use gossip_core::{GossipMessage, ProbeAck, ProbeRequest, SyncRequest, SyncResponse};
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Errors seen by callers of a [`GossipHandle`]
#[derive(Debug, Error)]
pub enum GossipError {
    #[error("Gossip actor stopped")]
    Stopped,
    #[error("Sync request {request_id} was not answered")]
    Unanswered { request_id: u64 },
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("Invalid event: {0}")]
    Core(#[from] gossip_core::Error),
}

/// How one probe round trip ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// No member to probe
    Idle,
    /// The target answered directly
    Acked(MemberId),
    /// The target answered through a helper
    AckedIndirectly(MemberId),
    /// Nobody reached the target; it is now suspected
    Failed(MemberId),
}

type Call = Box<dyn FnOnce(&mut Gossip) + Send>;

enum Command {
    /// Run a closure against the engine
    Call(Call),
    /// Answer a peer's sync request
    Sync {
        request: SyncRequest,
        reply: oneshot::Sender<SyncResponse>,
    },
    /// Handlers for a sync request have finished
    SyncCollected {
        request: SyncRequest,
        result: Result<Vec<CustomEventSyncRequest>, SyncError>,
        reply: oneshot::Sender<SyncResponse>,
    },
    Shutdown,
}

struct GossipActor {
    gossip: Gossip,
    commands: mpsc::Receiver<Command>,
    // weak so dropping every handle still stops the actor
    mailbox: mpsc::WeakSender<Command>,
}

/// Start the actor owning `gossip`
pub fn spawn(gossip: Gossip) -> (GossipHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(gossip.config().command_queue_depth.max(1));
    let local = gossip.local();
    let handle = GossipHandle {
        id: local.id.clone(),
        address: local.address,
        tx,
    };
    let actor = GossipActor {
        gossip,
        commands: rx,
        mailbox: handle.tx.downgrade(),
    };
    let task = tokio::spawn(actor.run());
    (handle, task)
}

impl GossipActor {
    async fn run(mut self) {
        info!(member = %self.gossip.local().id, address = %self.gossip.local().address, "Gossip actor started");

        while let Some(command) = self.commands.recv().await {
            match command {
                Command::Call(call) => call(&mut self.gossip),
                Command::Sync { request, reply } => self.start_sync(request, reply),
                Command::SyncCollected {
                    request,
                    result,
                    reply,
                } => match result {
                    Ok(collected) => {
                        let response = self.gossip.complete_sync(&request, &collected);
                        let _ = reply.send(response);
                    }
                    Err(e) => {
                        // dropping the reply tells the requester there is no answer
                        error!(request_id = request.request_id, error = %e, "Sync request failed");
                    }
                },
                Command::Shutdown => break,
            }
        }

        info!(member = %self.gossip.local().id, "Gossip actor stopped");
    }

    fn start_sync(&self, request: SyncRequest, reply: oneshot::Sender<SyncResponse>) {
        let Some(mailbox) = self.mailbox.upgrade() else {
            return;
        };
        let handlers = self.gossip.sync_handlers_for(&request);
        debug!(request_id = request.request_id, handlers = handlers.len(), "Collecting sync parts");

        tokio::spawn(async move {
            let result = sync::collect(request.request_id, handlers).await;
            let _ = mailbox
                .send(Command::SyncCollected {
                    request,
                    result,
                    reply,
                })
                .await;
        });
    }
}

/// Cloneable handle to a running gossip actor
#[derive(Clone)]
pub struct GossipHandle {
    id: MemberId,
    address: SocketAddr,
    tx: mpsc::Sender<Command>,
}

impl GossipHandle {
    pub fn id(&self) -> &MemberId {
        &self.id
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    async fn call<R, F>(&self, f: F) -> Result<R, GossipError>
    where
        R: Send + 'static,
        F: FnOnce(&mut Gossip) -> R + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let call: Call = Box::new(move |gossip| {
            let _ = tx.send(f(gossip));
        });
        self.tx
            .send(Command::Call(call))
            .await
            .map_err(|_| GossipError::Stopped)?;
        rx.await.map_err(|_| GossipError::Stopped)
    }

    pub async fn join(&self) -> Result<bool, GossipError> {
        self.call(|gossip| gossip.join()).await
    }

    pub async fn leave(&self) -> Result<bool, GossipError> {
        self.call(|gossip| gossip.leave()).await
    }

    pub async fn publish_custom_event(
        &self,
        event_type: EventType,
        payload: Vec<u8>,
    ) -> Result<bool, GossipError> {
        Ok(self
            .call(move |gossip| gossip.publish_custom_event(event_type, payload))
            .await??)
    }

    /// Merge a membership event as if it had been received, spreading it
    /// further when it changes the local view
    pub async fn consume_membership_event(&self, event: MembershipEvent) -> Result<bool, GossipError> {
        self.call(move |gossip| gossip.consume_membership_event(&event))
            .await
    }

    pub async fn receive_gossip(&self, message: GossipMessage) -> Result<Received, GossipError> {
        self.call(move |gossip| gossip.receive_gossip(&message)).await
    }

    /// Answer a peer's sync request once all matching handlers have run
    pub async fn handle_sync_request(&self, request: SyncRequest) -> Result<SyncResponse, GossipError> {
        let request_id = request.request_id;
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(Command::Sync { request, reply: tx })
            .await
            .map_err(|_| GossipError::Stopped)?;
        rx.await.map_err(|_| GossipError::Unanswered { request_id })
    }

    /// Pull the full membership view and custom event snapshot from `peer`
    pub async fn sync_with(
        &self,
        transport: &dyn Transport,
        peer: SocketAddr,
        event_types: Vec<EventType>,
    ) -> Result<Received, GossipError> {
        let request = self
            .call(move |gossip| gossip.create_sync_request(event_types))
            .await?;
        debug!(member = %self.id, %peer, request_id = request.request_id, "Requesting sync");
        let response = transport.request_sync(peer, request).await?;
        self.call(move |gossip| gossip.apply_sync_response(&response))
            .await
    }

    /// Push the least spread buffered events to `peer`. Returns false when
    /// there was nothing to send.
    pub async fn gossip_to(&self, transport: &dyn Transport, peer: SocketAddr) -> Result<bool, GossipError> {
        let message = self.call(|gossip| gossip.build_gossip_message()).await?;
        if message.is_empty() {
            return Ok(false);
        }
        transport.send_gossip(peer, message).await?;
        Ok(true)
    }

    /// Answer a peer's probe
    pub async fn handle_probe(&self, request: ProbeRequest) -> Result<ProbeAck, GossipError> {
        self.call(move |gossip| gossip.handle_probe(&request)).await
    }

    /// Probe the next member: directly first, then through random helpers
    /// in parallel. When every attempt fails the member is suspected.
    pub async fn probe(&self, transport: &dyn Transport) -> Result<ProbeOutcome, GossipError> {
        let Some(request) = self.call(|gossip| gossip.next_probe()).await? else {
            return Ok(ProbeOutcome::Idle);
        };
        let target = request.target.member.clone();
        let address = request.target.address;

        match transport.probe(address, request.clone()).await {
            Ok(ack) => {
                self.call(move |gossip| gossip.probe_succeeded(&ack)).await?;
                return Ok(ProbeOutcome::Acked(target));
            }
            Err(e) => debug!(member = %self.id, %target, error = %e, "Direct probe failed"),
        }

        let helper_target = target.clone();
        let helpers = self
            .call(move |gossip| gossip.probe_helpers(&helper_target))
            .await?;
        if !helpers.is_empty() {
            let attempts = helpers
                .into_iter()
                .map(|via| transport.request_probe(via, request.clone()));
            if let Ok((ack, _)) = select_ok(attempts).await {
                self.call(move |gossip| gossip.probe_succeeded(&ack)).await?;
                return Ok(ProbeOutcome::AckedIndirectly(target));
            }
        }

        self.call(move |gossip| gossip.probe_failed(&request)).await?;
        Ok(ProbeOutcome::Failed(target))
    }

    /// Start of a gossip period. Returns the number of events retired.
    pub async fn tick(&self) -> Result<usize, GossipError> {
        self.call(|gossip| gossip.tick()).await
    }

    /// Snapshot of the remote members
    pub async fn members(&self) -> Result<Vec<Member>, GossipError> {
        self.call(|gossip| gossip.membership().members().cloned().collect())
            .await
    }

    pub async fn local(&self) -> Result<Member, GossipError> {
        self.call(|gossip| gossip.local().clone()).await
    }

    pub async fn stats(&self) -> Result<GossipStats, GossipError> {
        self.call(|gossip| gossip.stats()).await
    }

    pub async fn register_sync_request_handler(
        &self,
        event_type: EventType,
        handler: Arc<dyn SyncRequestHandler>,
    ) -> Result<(), GossipError> {
        self.call(move |gossip| gossip.register_sync_request_handler(event_type, handler))
            .await
    }

    pub async fn add_custom_event_listener(
        &self,
        event_type: EventType,
        listener: Arc<dyn CustomEventListener>,
    ) -> Result<(), GossipError> {
        self.call(move |gossip| gossip.add_custom_event_listener(event_type, listener))
            .await
    }

    pub async fn remove_custom_event_listener(
        &self,
        listener: Arc<dyn CustomEventListener>,
    ) -> Result<usize, GossipError> {
        self.call(move |gossip| gossip.remove_custom_event_listener(&listener))
            .await
    }

    pub async fn add_membership_listener(
        &self,
        listener: Arc<dyn MembershipListener>,
    ) -> Result<(), GossipError> {
        self.call(move |gossip| gossip.add_membership_listener(listener))
            .await
    }

    pub async fn shutdown(&self) -> Result<(), GossipError> {
        self.tx
            .send(Command::Shutdown)
            .await
            .map_err(|_| GossipError::Stopped)
    }
}
