//! Assembled block records as they leave the pipeline.

use crate::{
    constants::{empty_logs_bloom, ZERO_HASH_HEX},
    handlers::EvmTx,
};
use serde::Serialize;
use serde_json::{json, Value};

/// An EVM-relevant action selected from a block's traces.
#[derive(Debug, Clone, Serialize)]
pub struct ActionRecord {
    pub trx_id: String,
    pub action_ordinal: u64,
    pub signatures: Vec<String>,
    #[serde(rename = "evmTx")]
    pub evm_tx: EvmTx,
}

/// One fully assembled block, ready for the sink and the broadcaster.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessedBlock {
    #[serde(rename = "nativeBlockHash")]
    pub native_block_hash: String,
    #[serde(rename = "nativeBlockNumber")]
    pub native_block_number: u32,
    #[serde(rename = "evmBlockNumber")]
    pub evm_block_number: u64,
    #[serde(rename = "blockTimestamp")]
    pub block_timestamp: String,
    #[serde(rename = "evmTxs")]
    pub evm_txs: Vec<ActionRecord>,
    pub errors: Vec<String>,
}

impl ProcessedBlock {
    /// Cumulative gas of the block: the last transaction's running
    /// total.
    pub fn gas_used(&self) -> u64 {
        self.evm_txs
            .last()
            .map(|a| a.evm_tx.gasusedblock)
            .unwrap_or(0)
    }

    /// Block timestamp as unix seconds, parsed from the decoded
    /// `block_timestamp_type` rendering.
    pub fn timestamp_secs(&self) -> u64 {
        chrono::NaiveDateTime::parse_from_str(&self.block_timestamp, "%Y-%m-%dT%H:%M:%S%.f")
            .map(|dt| dt.and_utc().timestamp().max(0) as u64)
            .unwrap_or(0)
    }

    /// The live-subscriber head payload. Header roots and the bloom
    /// come from the external hash computation when present; until
    /// then they are zero-valued.
    pub fn head_json(&self) -> Value {
        json!({
            "parentHash": ZERO_HASH_HEX,
            "extraData": format!("0x{}", self.native_block_hash.to_lowercase()),
            "receiptsRoot": ZERO_HASH_HEX,
            "transactionsRoot": ZERO_HASH_HEX,
            "gasUsed": min_hex(self.gas_used()),
            "logsBloom": empty_logs_bloom(),
            "number": min_hex(self.evm_block_number),
            "timestamp": min_hex(self.timestamp_secs()),
        })
    }
}

/// `0x`-prefixed minimal lowercase hex.
pub fn min_hex(v: u64) -> String {
    format!("0x{v:x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_hex_rendering() {
        assert_eq!(min_hex(0), "0x0");
        assert_eq!(min_hex(7), "0x7");
        assert_eq!(min_hex(255), "0xff");
        assert_eq!(min_hex(4096), "0x1000");
    }

    #[test]
    fn head_json_fields() {
        let block = ProcessedBlock {
            native_block_hash: "ABCD".into(),
            native_block_number: 100,
            evm_block_number: 42,
            block_timestamp: "2024-01-01T00:00:10.000".into(),
            evm_txs: vec![],
            errors: vec![],
        };
        let head = block.head_json();
        assert_eq!(head["number"], "0x2a");
        assert_eq!(head["extraData"], "0xabcd");
        assert_eq!(head["gasUsed"], "0x0");
        assert_eq!(head["timestamp"], min_hex(1_704_067_210));
    }
}
