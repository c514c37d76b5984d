//! Message transport between gossip actors
//!
//! [`LocalNetwork`] delivers messages between actors of one process. Every
//! message is encoded to its wire form and decoded again on the way, so
//! anything that crosses it would also cross a real socket.

use crate::actor::GossipHandle;
use async_trait::async_trait;
use gossip_core::{GossipMessage, ProbeAck, ProbeRequest, SyncRequest, SyncResponse};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Transport errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Peer unreachable: {0}")]
    Unreachable(SocketAddr),
    #[error("Request to {0} timed out")]
    Timeout(SocketAddr),
    #[error("Peer {peer} rejected request: {reason}")]
    Rejected { peer: SocketAddr, reason: String },
    #[error("Codec error: {0}")]
    Codec(#[from] gossip_core::Error),
}

/// Delivery of gossip messages and sync requests to peers
#[async_trait]
pub trait Transport: Send + Sync {
    /// One-way push of buffered events
    async fn send_gossip(&self, to: SocketAddr, message: GossipMessage) -> Result<(), TransportError>;

    /// Request-response anti-entropy exchange
    async fn request_sync(&self, to: SocketAddr, request: SyncRequest) -> Result<SyncResponse, TransportError>;

    /// Direct liveness check of `request.target`
    async fn probe(&self, to: SocketAddr, request: ProbeRequest) -> Result<ProbeAck, TransportError>;

    /// Ask `via` to probe `request.target` and relay the ack
    async fn request_probe(&self, via: SocketAddr, request: ProbeRequest) -> Result<ProbeAck, TransportError>;
}

/// In-process network of gossip actors keyed by address
pub struct LocalNetwork {
    peers: RwLock<HashMap<SocketAddr, GossipHandle>>,
    request_timeout: Duration,
}

impl LocalNetwork {
    pub fn new(request_timeout: Duration) -> Self {
        Self {
            peers: RwLock::new(HashMap::new()),
            request_timeout,
        }
    }

    pub fn register(&self, handle: GossipHandle) {
        debug!(member = %handle.id(), address = %handle.address(), "Registered peer");
        self.peers.write().insert(handle.address(), handle);
    }

    /// Make `address` unreachable. Returns whether it was registered.
    pub fn disconnect(&self, address: &SocketAddr) -> bool {
        self.peers.write().remove(address).is_some()
    }

    fn peer(&self, address: SocketAddr) -> Result<GossipHandle, TransportError> {
        self.peers
            .read()
            .get(&address)
            .cloned()
            .ok_or(TransportError::Unreachable(address))
    }
}

#[async_trait]
impl Transport for LocalNetwork {
    async fn send_gossip(&self, to: SocketAddr, message: GossipMessage) -> Result<(), TransportError> {
        let peer = self.peer(to)?;
        let message = GossipMessage::from_bytes(&message.to_bytes()?)?;
        peer.receive_gossip(message).await.map_err(|e| {
            warn!(peer = %to, error = %e, "Gossip delivery failed");
            TransportError::Unreachable(to)
        })?;
        Ok(())
    }

    async fn request_sync(&self, to: SocketAddr, request: SyncRequest) -> Result<SyncResponse, TransportError> {
        let peer = self.peer(to)?;
        let request = SyncRequest::from_bytes(&request.to_bytes()?)?;
        let response = timeout(self.request_timeout, peer.handle_sync_request(request))
            .await
            .map_err(|_| TransportError::Timeout(to))?
            .map_err(|e| TransportError::Rejected {
                peer: to,
                reason: e.to_string(),
            })?;
        Ok(SyncResponse::from_bytes(&response.to_bytes()?)?)
    }

    async fn probe(&self, to: SocketAddr, request: ProbeRequest) -> Result<ProbeAck, TransportError> {
        let peer = self.peer(to)?;
        let request = ProbeRequest::from_bytes(&request.to_bytes()?)?;
        let ack = timeout(self.request_timeout, peer.handle_probe(request))
            .await
            .map_err(|_| TransportError::Timeout(to))?
            .map_err(|_| TransportError::Unreachable(to))?;
        Ok(ProbeAck::from_bytes(&ack.to_bytes()?)?)
    }

    async fn request_probe(&self, via: SocketAddr, request: ProbeRequest) -> Result<ProbeAck, TransportError> {
        // the helper must be reachable itself before it can reach the target
        self.peer(via)?;
        let target = request.target.address;
        self.probe(target, request).await.map_err(|e| {
            debug!(%via, %target, error = %e, "Indirect probe failed");
            e
        })
    }
}
