//! Configuration for gossipd

use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};

/// What to do when an event pool has no free slot left
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum OverflowPolicy {
    /// Discard the incoming event
    Drop,
    /// Free the slot that has been spread the most and reuse it
    EvictMostSpread,
}

/// Engine tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GossipConfig {
    /// Scales the number of periods an event is kept for retransmission
    pub retransmission_multiplier: u32,
    pub membership_pool_capacity: usize,
    pub custom_event_pool_capacity: usize,
    /// Capacity of the pool that stages custom events for sync responses
    pub sync_pool_capacity: usize,
    /// Events drained from each pool into one push message
    pub max_events_per_message: usize,
    /// Largest custom event payload accepted for publication
    pub max_payload_size: usize,
    pub overflow_policy: OverflowPolicy,
    /// Depth of the actor mailbox
    pub command_queue_depth: usize,
    /// Gossip periods a member may stay suspected before it is confirmed dead
    pub suspect_timeout_ticks: u64,
    /// Members asked to probe on our behalf after a failed direct probe
    pub probe_helpers: usize,
}

impl Default for GossipConfig {
    fn default() -> Self {
        Self {
            retransmission_multiplier: 3,
            membership_pool_capacity: 32,
            custom_event_pool_capacity: 32,
            sync_pool_capacity: 256,
            max_events_per_message: 32,
            max_payload_size: 64 * 1024,
            overflow_policy: OverflowPolicy::EvictMostSpread,
            command_queue_depth: 1024,
            suspect_timeout_ticks: 10,
            probe_helpers: 3,
        }
    }
}

/// gossipd - in-process gossip cluster simulation
#[derive(Parser, Debug, Clone)]
#[command(name = "gossipd")]
#[command(about = "Runs an in-process gossip cluster and reports membership convergence")]
pub struct Config {
    /// Number of simulated members
    #[arg(short, long, default_value = "5", env = "GOSSIPD_NODES")]
    pub nodes: usize,

    /// Number of gossip rounds to run
    #[arg(short, long, default_value = "40")]
    pub rounds: u32,

    /// Gossip period in milliseconds
    #[arg(long, default_value = "100", env = "GOSSIPD_ROUND_INTERVAL_MS")]
    pub round_interval_ms: u64,

    /// Peers contacted per round
    #[arg(long, default_value = "2")]
    pub fanout: usize,

    /// Retransmission multiplier used to size event lifetimes
    #[arg(long, default_value = "3")]
    pub retransmission_multiplier: u32,

    /// Slots in the membership and custom event pools
    #[arg(long, default_value = "32")]
    pub pool_capacity: usize,

    /// Policy applied when an event pool is full
    #[arg(long, value_enum, default_value = "evict-most-spread")]
    pub overflow_policy: OverflowPolicy,

    /// Gossip periods before a suspected member is confirmed dead
    #[arg(long, default_value = "10")]
    pub suspect_timeout_ticks: u64,

    /// Helpers asked for an indirect probe after a direct probe fails
    #[arg(long, default_value = "3")]
    pub probe_helpers: usize,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Log format (json or pretty)
    #[arg(long, default_value = "pretty")]
    pub log_format: String,
}

impl Config {
    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.nodes < 2 {
            anyhow::bail!("Simulation needs at least 2 nodes");
        }
        if self.fanout == 0 {
            anyhow::bail!("Fanout must be at least 1");
        }
        if self.retransmission_multiplier == 0 {
            anyhow::bail!("Retransmission multiplier must be at least 1");
        }
        if self.pool_capacity == 0 {
            anyhow::bail!("Pool capacity must be at least 1");
        }
        if self.suspect_timeout_ticks == 0 {
            anyhow::bail!("Suspect timeout must be at least 1 tick");
        }
        if self.log_format != "pretty" && self.log_format != "json" {
            anyhow::bail!("Unknown log format: {}", self.log_format);
        }
        Ok(())
    }

    /// Engine configuration derived from the command line
    pub fn gossip_config(&self) -> GossipConfig {
        GossipConfig {
            retransmission_multiplier: self.retransmission_multiplier,
            membership_pool_capacity: self.pool_capacity,
            custom_event_pool_capacity: self.pool_capacity,
            overflow_policy: self.overflow_policy,
            suspect_timeout_ticks: self.suspect_timeout_ticks,
            probe_helpers: self.probe_helpers,
            ..GossipConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Config {
        Config::parse_from(["gossipd"])
    }

    #[test]
    fn test_defaults_validate() {
        let config = test_config();
        assert!(config.validate().is_ok());
        assert_eq!(config.nodes, 5);
        assert_eq!(config.gossip_config().membership_pool_capacity, 32);
    }

    #[test]
    fn test_rejects_single_node() {
        let config = Config::parse_from(["gossipd", "--nodes", "1"]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_unknown_log_format() {
        let config = Config::parse_from(["gossipd", "--log-format", "xml"]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_failure_detection_flags() {
        let config = Config::parse_from(["gossipd", "--suspect-timeout-ticks", "4", "--probe-helpers", "1"]);
        assert!(config.validate().is_ok());
        let gossip = config.gossip_config();
        assert_eq!(gossip.suspect_timeout_ticks, 4);
        assert_eq!(gossip.probe_helpers, 1);

        let config = Config::parse_from(["gossipd", "--suspect-timeout-ticks", "0"]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_overflow_policy_flag() {
        let config = Config::parse_from(["gossipd", "--overflow-policy", "drop"]);
        assert_eq!(config.gossip_config().overflow_policy, OverflowPolicy::Drop);
    }

    #[test]
    fn test_gossip_config_partial_json() {
        let config: GossipConfig =
            serde_json::from_str(r#"{ "retransmission_multiplier": 5, "overflow_policy": "drop" }"#)
                .unwrap();
        assert_eq!(config.retransmission_multiplier, 5);
        assert_eq!(config.overflow_policy, OverflowPolicy::Drop);
        assert_eq!(config.sync_pool_capacity, 256);
    }
}
