//! Indexer configuration, loaded from a JSON document with CLI
//! overrides applied on top.

use crate::{
    constants::{
        DEFAULT_CONCURRENCY_AMOUNT, DEFAULT_MAX_MSGS_IN_FLIGHT, DEFAULT_MIN_BLOCK_CONFIRMATION,
        DEFAULT_WORKER_AMOUNT,
    },
    ship::types::BlockRequest,
};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, path::Path, path::PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PerfConfig {
    /// Decode worker pool size; 0 decodes inline.
    pub worker_amount: usize,
    /// ACK window the node honours.
    pub max_msgs_in_flight: u32,
    /// Ordered queue width.
    pub concurrency_amount: usize,
    /// Assembled blocks per ACK.
    pub min_block_confirmation: u32,
}

impl Default for PerfConfig {
    fn default() -> Self {
        Self {
            worker_amount: DEFAULT_WORKER_AMOUNT,
            max_msgs_in_flight: DEFAULT_MAX_MSGS_IN_FLIGHT,
            concurrency_amount: DEFAULT_CONCURRENCY_AMOUNT,
            min_block_confirmation: DEFAULT_MIN_BLOCK_CONFIRMATION,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcastConfig {
    pub ws_host: String,
    pub ws_port: u16,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            ws_host: "127.0.0.1".into(),
            ws_port: 7300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerConfiguration {
    /// Chain RPC endpoint, forwarded to auxiliary lookups.
    pub endpoint: String,
    /// State-history websocket endpoint.
    pub ws_endpoint: String,
    pub chain_name: String,
    pub chain_id: u64,
    /// Inclusive.
    pub start_block: u32,
    /// Exclusive; open-ended when absent.
    #[serde(default)]
    pub stop_block: Option<u32>,
    #[serde(default)]
    pub irreversible_only: bool,
    #[serde(default)]
    pub perf: PerfConfig,
    /// Opaque sink settings, forwarded untouched. The default store
    /// sink reads `database_dir` out of it.
    #[serde(default)]
    pub elastic: serde_json::Value,
    #[serde(default)]
    pub broadcast: BroadcastConfig,
    /// account → ABI JSON path; the `eosio` entry supplies the
    /// `global` row type.
    #[serde(default)]
    pub contract_abis: HashMap<String, PathBuf>,
    /// Collect per-action decoder errors instead of aborting, and use
    /// readable fingerprints.
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub allow_empty_block: bool,
    #[serde(default)]
    pub allow_empty_traces: bool,
    #[serde(default)]
    pub allow_empty_deltas: bool,
}

impl IndexerConfiguration {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read(path)?;
        serde_json::from_slice(&contents)
            .map_err(|e| anyhow::anyhow!("parsing config {}: {e}", path.display()))
    }

    /// The initial session request. `start_block` may later be
    /// advanced past it when the sink already holds newer blocks.
    pub fn block_request(&self, start_block: u32) -> BlockRequest {
        BlockRequest {
            start_block_num: start_block,
            end_block_num: self.stop_block.unwrap_or(u32::MAX),
            max_messages_in_flight: self.perf.max_msgs_in_flight,
            have_positions: Vec::new(),
            irreversible_only: self.irreversible_only,
            fetch_block: true,
            fetch_traces: true,
            fetch_deltas: true,
        }
    }

    /// Database path for the default store sink.
    pub fn database_dir(&self) -> PathBuf {
        self.elastic
            .get("database_dir")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("/var/lib/telos-indexer/database")
            .into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_minimal_config() {
        let config: IndexerConfiguration = serde_json::from_str(
            r#"{
                "endpoint": "http://127.0.0.1:8888",
                "ws_endpoint": "ws://127.0.0.1:29999",
                "chain_name": "telos-mainnet",
                "chain_id": 40,
                "start_block": 180698860
            }"#,
        )
        .unwrap();
        assert_eq!(config.perf.worker_amount, DEFAULT_WORKER_AMOUNT);
        assert_eq!(config.broadcast.ws_port, 7300);
        assert!(config.stop_block.is_none());
        assert!(!config.debug);

        let request = config.block_request(config.start_block);
        assert_eq!(request.start_block_num, 180698860);
        assert_eq!(request.end_block_num, u32::MAX);
        assert!(request.fetch_block && request.fetch_traces && request.fetch_deltas);
    }
}
