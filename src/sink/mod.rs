//! Downstream document-store contract. The sink is assumed idempotent
//! on `block_num`: the pipeline guarantees monotonic emission but not
//! exactly-once — on reconnect the same block may be re-sent before
//! the sink confirms.

pub mod memory;

use crate::{block::ActionRecord, error::TranslatorError, state::IndexerState};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Resume point persisted by the sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LastIndexedBlock {
    pub block_num: u32,
    #[serde(rename = "@evmBlockHash")]
    pub evm_block_hash: String,
    #[serde(rename = "@timestamp")]
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalMeta {
    pub block_num: u64,
}

/// Enrichment attached to every indexed block document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockMeta {
    #[serde(rename = "@timestamp")]
    pub timestamp: String,
    #[serde(rename = "@global")]
    pub global: GlobalMeta,
    #[serde(rename = "@evmBlockHash")]
    pub evm_block_hash: String,
}

#[async_trait]
pub trait Sink: Send + Sync {
    async fn init(&self) -> Result<(), TranslatorError>;

    async fn get_last_indexed_block(&self)
        -> Result<Option<LastIndexedBlock>, TranslatorError>;

    async fn index_block(
        &self,
        block_num: u32,
        actions: &[ActionRecord],
        meta: &BlockMeta,
    ) -> Result<(), TranslatorError>;

    async fn index_state(&self, state: IndexerState) -> Result<(), TranslatorError>;

    async fn get_indexer_state(&self) -> Result<Option<IndexerState>, TranslatorError>;
}
