//! Node configuration.
//!
//! Loaded from a TOML file with env-var overrides and a validation pass.
//! Interval defaults mirror the protocol's reference deployment; the
//! bad-timestamp thresholds and the registry activity window are distinct
//! knobs and must stay independently configurable.

use serde::{Deserialize, Serialize};
use std::fs;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Refuse non-routable addresses on relay paths.
    #[serde(default)]
    pub production_mode: bool,

    /// Hardcoded bootstrap peers ("host:port"), exempt from bans and
    /// never persisted or advertised.
    #[serde(default)]
    pub bootstrap_peers: Vec<String>,

    /// Deadline for a single outbound stream operation.
    #[serde(default = "default_message_timeout")]
    pub message_timeout_secs: u64,

    /// Interval for the connect-to-more-peers loop.
    #[serde(default = "default_conn_est_interval")]
    pub conn_est_interval_secs: u64,

    /// Interval for self-advertisement Addr broadcasts.
    #[serde(default = "default_periodic_interval")]
    pub self_adv_interval_secs: u64,

    /// Interval for Intro broadcasts.
    #[serde(default = "default_periodic_interval")]
    pub intro_interval_secs: u64,

    /// Interval for GetAddr requests to active peers.
    #[serde(default = "default_periodic_interval")]
    pub get_addr_interval_secs: u64,

    /// Interval for pinging unacquainted peers.
    #[serde(default = "default_periodic_interval")]
    pub ping_interval_secs: u64,

    /// Interval for the stale-peer cleanup sweep.
    #[serde(default = "default_cleanup_interval")]
    pub clean_up_interval_secs: u64,

    /// Interval for draining the transaction broadcast queue.
    #[serde(default = "default_tx_broadcast_interval")]
    pub tx_broadcast_interval_secs: u64,

    /// Maximum addresses accepted in one inbound Addr message.
    #[serde(default = "default_max_addrs_expected")]
    pub max_addrs_expected: usize,

    #[serde(default = "default_max_inbound")]
    pub max_inbound_connections: usize,

    #[serde(default = "default_max_outbound")]
    pub max_outbound_connections: usize,

    /// Stop asking for more peers once this many are active.
    #[serde(default = "default_active_peer_target")]
    pub active_peer_target: usize,

    /// Maximum hashes returned by one GetBlockHashes response.
    #[serde(default = "default_max_get_block_hashes")]
    pub max_get_block_hashes: u64,

    /// Hash-batch size for one GetBlockBodies request.
    #[serde(default = "default_max_block_bodies")]
    pub max_block_bodies_per_request: usize,

    /// Flood fan-out: how many broadcaster peers to select.
    #[serde(default = "default_num_broadcasters")]
    pub num_broadcasters: usize,

    /// Rolling window within which a peer counts as active.
    #[serde(default = "default_active_window")]
    pub active_window_secs: u64,

    /// Advertised timestamps further in the future than this are
    /// implausible. Independent of `active_window_secs`.
    #[serde(default = "default_bad_ts_future")]
    pub bad_timestamp_future_secs: u64,

    /// Advertised timestamps older than this are implausible.
    /// Independent of `active_window_secs`.
    #[serde(default = "default_bad_ts_past")]
    pub bad_timestamp_past_secs: u64,

    /// Registry entries younger than this are not persisted.
    #[serde(default = "default_min_save_age")]
    pub min_save_age_secs: u64,

    /// Connection failures before a temporary ban.
    #[serde(default = "default_max_conn_fail")]
    pub max_conn_fail_count: u32,

    /// Length of a temporary ban.
    #[serde(default = "default_ban_duration")]
    pub ban_duration_secs: u64,

    /// Capacity of the loop-suppression history cache.
    #[serde(default = "default_history_capacity")]
    pub history_cache_capacity: usize,

    /// History TTL for address-set relays.
    #[serde(default = "default_addr_relay_ttl")]
    pub addr_relay_ttl_secs: u64,

    /// History TTL for block and transaction relays.
    #[serde(default = "default_relay_ttl")]
    pub relay_history_ttl_secs: u64,

    /// TTL of the intro cache and intro relay history.
    #[serde(default = "default_intro_ttl")]
    pub intro_ttl_secs: u64,

    /// Broadcaster cache lifetime.
    #[serde(default = "default_broadcaster_refresh")]
    pub broadcaster_refresh_secs: u64,

    /// Minimum transaction fee in base units.
    #[serde(default = "default_min_tx_fee")]
    pub min_tx_fee: u64,
}

fn default_message_timeout() -> u64 {
    60
}
fn default_conn_est_interval() -> u64 {
    600
}
fn default_periodic_interval() -> u64 {
    1800
}
fn default_cleanup_interval() -> u64 {
    600
}
fn default_tx_broadcast_interval() -> u64 {
    3
}
fn default_max_addrs_expected() -> usize {
    1000
}
fn default_max_inbound() -> usize {
    115
}
fn default_max_outbound() -> usize {
    10
}
fn default_active_peer_target() -> usize {
    1000
}
fn default_max_get_block_hashes() -> u64 {
    1000
}
fn default_max_block_bodies() -> usize {
    10
}
fn default_num_broadcasters() -> usize {
    2
}
fn default_active_window() -> u64 {
    3 * 3600
}
fn default_bad_ts_future() -> u64 {
    600
}
fn default_bad_ts_past() -> u64 {
    3 * 3600
}
fn default_min_save_age() -> u64 {
    20 * 60
}
fn default_max_conn_fail() -> u32 {
    3
}
fn default_ban_duration() -> u64 {
    15 * 60
}
fn default_history_capacity() -> usize {
    5000
}
fn default_addr_relay_ttl() -> u64 {
    600
}
fn default_relay_ttl() -> u64 {
    600
}
fn default_intro_ttl() -> u64 {
    3600
}
fn default_broadcaster_refresh() -> u64 {
    24 * 3600
}
fn default_min_tx_fee() -> u64 {
    1
}

impl Default for NodeConfig {
    fn default() -> Self {
        // Round-trip through serde so every field picks up its default fn.
        toml::from_str("").expect("empty config must deserialize")
    }
}

impl NodeConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.message_timeout_secs == 0 {
            return Err("message_timeout_secs must be at least 1".to_string());
        }
        if self.num_broadcasters == 0 {
            return Err("num_broadcasters must be at least 1".to_string());
        }
        if self.max_outbound_connections == 0 {
            return Err("max_outbound_connections must be at least 1".to_string());
        }
        for peer in &self.bootstrap_peers {
            if !peer.contains(':') {
                return Err(format!(
                    "Invalid bootstrap peer address format (missing port): {}",
                    peer
                ));
            }
        }
        Ok(())
    }
}

/// Load node configuration from a TOML file.
pub fn load_config(path: &str) -> Result<NodeConfig, String> {
    let content = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config file {}: {}", path, e))?;

    let mut config: NodeConfig =
        toml::from_str(&content).map_err(|e| format!("Failed to parse TOML config: {}", e))?;

    // Override from environment variables if present
    if let Ok(val) = std::env::var("EMBER_PRODUCTION_MODE") {
        config.production_mode = val.to_lowercase() == "true" || val == "1";
    }
    if let Ok(val) = std::env::var("EMBER_MIN_TX_FEE") {
        if let Ok(parsed) = val.parse() {
            config.min_tx_fee = parsed;
        }
    }

    config.validate()?;

    tracing::info!(
        bootstrap_peers = config.bootstrap_peers.len(),
        max_inbound = config.max_inbound_connections,
        max_outbound = config.max_outbound_connections,
        "Loaded node configuration"
    );

    Ok(config)
}
