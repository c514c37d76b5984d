//! In-process cluster simulation
//!
//! Starts a set of gossip actors on a [`LocalNetwork`], joins them through
//! the first node and elects that node leader via a custom event. A third
//! of the way through, the last node crashes. Every round each running node
//! ticks, probes one member and gossips to random peers, so the survivors
//! detect the crash on their own and confirm the node dead.

use crate::actor::{self, GossipHandle, ProbeOutcome};
use crate::config::Config;
use crate::gossip::Gossip;
use crate::listener::CustomEventListener;
use crate::sync::{CustomEventSyncRequest, SyncRequestHandler};
use crate::transport::LocalNetwork;
use async_trait::async_trait;
use gossip_core::types::*;
use parking_lot::Mutex;
use rand::seq::SliceRandom;
use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const BASE_PORT: u16 = 26500;
pub const LEADER: &str = "leader";

/// Leader claims seen by one node. Serves as the node's listener for
/// `leader` events and answers sync requests for them.
pub struct LeaderTable {
    directory: Arc<HashMap<MemberId, SocketAddr>>,
    claims: Mutex<BTreeMap<MemberId, Vec<u8>>>,
}

impl LeaderTable {
    pub fn new(directory: Arc<HashMap<MemberId, SocketAddr>>) -> Self {
        Self {
            directory,
            claims: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn record(&self, sender: MemberId, payload: Vec<u8>) {
        self.claims.lock().insert(sender, payload);
    }

    pub fn claims(&self) -> BTreeMap<MemberId, Vec<u8>> {
        self.claims.lock().clone()
    }
}

impl CustomEventListener for LeaderTable {
    fn on_event(&self, event: &CustomEvent) -> anyhow::Result<()> {
        self.record(event.sender.clone(), event.payload.clone());
        Ok(())
    }
}

#[async_trait]
impl SyncRequestHandler for LeaderTable {
    async fn on_sync_request(&self, request: &mut CustomEventSyncRequest) -> anyhow::Result<()> {
        for (sender, payload) in self.claims() {
            let Some(address) = self.directory.get(&sender) else {
                anyhow::bail!("no address for {sender}");
            };
            request.add_part(*address, payload);
        }
        Ok(())
    }
}

struct Node {
    handle: GossipHandle,
    leaders: Arc<LeaderTable>,
}

/// Per-node view at the end of a run
#[derive(Debug, Clone)]
pub struct NodeReport {
    pub id: MemberId,
    pub members: usize,
    pub suspects: usize,
    pub leader: Option<MemberId>,
    pub overflows: u64,
    /// The crashed node is gone from this node's view
    pub crash_confirmed: bool,
}

/// Outcome of a simulation run
#[derive(Debug, Clone)]
pub struct Report {
    /// Surviving nodes
    pub nodes: Vec<NodeReport>,
    pub crashed: MemberId,
}

impl Report {
    /// Every survivor sees every other survivor alive, has dropped the
    /// crashed node and agrees on the leader
    pub fn converged(&self) -> bool {
        let expected = self.nodes.len().saturating_sub(1);
        let leader = self.nodes.first().map(|n| n.id.clone());
        self.nodes.iter().all(|node| {
            node.members == expected
                && node.suspects == 0
                && node.crash_confirmed
                && node.leader.is_some()
                && node.leader == leader
        })
    }
}

/// Run the simulation described by `config`
pub async fn run(config: &Config) -> anyhow::Result<Report> {
    config.validate()?;
    let network = LocalNetwork::new(Duration::from_millis((config.round_interval_ms * 10).max(1000)));
    let directory: Arc<HashMap<MemberId, SocketAddr>> = Arc::new(
        (0..config.nodes)
            .map(|i| (node_id(i), node_address(i)))
            .collect(),
    );

    let mut nodes = Vec::with_capacity(config.nodes);
    for i in 0..config.nodes {
        let gossip = Gossip::new(config.gossip_config(), node_id(i), node_address(i));
        let (handle, _) = actor::spawn(gossip);
        let leaders = Arc::new(LeaderTable::new(directory.clone()));
        handle
            .add_custom_event_listener(EventType::from(LEADER), leaders.clone())
            .await?;
        handle
            .register_sync_request_handler(EventType::from(LEADER), leaders.clone())
            .await?;
        network.register(handle.clone());
        nodes.push(Node { handle, leaders });
    }

    // everyone joins through the seed
    let seed = nodes[0].handle.address();
    for node in &nodes {
        node.handle.join().await?;
        if node.handle.address() != seed {
            let received = node.handle.sync_with(&network, seed, vec![]).await?;
            debug!(member = %node.handle.id(), ?received, "Synced with seed");
        }
    }

    let leader = &nodes[0];
    leader
        .handle
        .publish_custom_event(EventType::from(LEADER), leader.handle.id().as_str().as_bytes().to_vec())
        .await?;
    leader
        .leaders
        .record(leader.handle.id().clone(), leader.handle.id().as_str().as_bytes().to_vec());
    info!(leader = %leader.handle.id(), "Published leader claim");

    let crash_round = config.rounds / 3;
    let crashed = node_id(config.nodes - 1);
    let mut running = nodes.len();

    for round in 0..config.rounds {
        if round == crash_round {
            let victim = &nodes[config.nodes - 1].handle;
            network.disconnect(&victim.address());
            victim.shutdown().await?;
            running -= 1;
            info!(round, member = %crashed, "Crashed node");
        }

        for node in &nodes[..running] {
            node.handle.tick().await?;
            match node.handle.probe(&network).await {
                Ok(ProbeOutcome::Failed(target)) => {
                    info!(round, member = %node.handle.id(), %target, "Probe failed")
                }
                Ok(_) => {}
                Err(e) => warn!(member = %node.handle.id(), error = %e, "Probe round failed"),
            }
            for peer in pick_peers(&node.handle.members().await?, config.fanout) {
                if let Err(e) = node.handle.gossip_to(&network, peer).await {
                    debug!(member = %node.handle.id(), %peer, error = %e, "Gossip round failed");
                }
            }
        }
        tokio::time::sleep(Duration::from_millis(config.round_interval_ms)).await;
    }

    let mut reports = Vec::with_capacity(running);
    for node in &nodes[..running] {
        let stats = node.handle.stats().await?;
        let members = node.handle.members().await?;
        let leader = node.leaders.claims().into_keys().next();
        reports.push(NodeReport {
            id: node.handle.id().clone(),
            members: stats.members,
            suspects: stats.suspects,
            leader,
            overflows: stats.overflows,
            crash_confirmed: members.iter().all(|m| m.id != crashed),
        });
        node.handle.shutdown().await?;
    }

    Ok(Report {
        nodes: reports,
        crashed,
    })
}

fn node_id(index: usize) -> MemberId {
    MemberId::new(format!("node-{index}"))
}

fn node_address(index: usize) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], BASE_PORT + index as u16))
}

fn pick_peers(members: &[crate::membership::Member], fanout: usize) -> Vec<SocketAddr> {
    let addresses: Vec<SocketAddr> = members.iter().map(|m| m.address).collect();
    addresses
        .choose_multiple(&mut rand::thread_rng(), fanout)
        .copied()
        .collect()
}
