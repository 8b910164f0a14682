//! In-memory sink used by the test suite and dry runs.

use super::{BlockMeta, LastIndexedBlock, Sink};
use crate::{block::ActionRecord, error::TranslatorError, state::IndexerState};
use async_trait::async_trait;
use std::sync::Mutex;

#[derive(Debug, Default)]
pub struct MemorySink {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    blocks: Vec<(u32, Vec<ActionRecord>, BlockMeta)>,
    state: Option<IndexerState>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn indexed_block_nums(&self) -> Vec<u32> {
        self.inner
            .lock()
            .unwrap()
            .blocks
            .iter()
            .map(|(n, _, _)| *n)
            .collect()
    }

    pub fn blocks(&self) -> Vec<(u32, Vec<ActionRecord>, BlockMeta)> {
        self.inner.lock().unwrap().blocks.clone()
    }

    pub fn state(&self) -> Option<IndexerState> {
        self.inner.lock().unwrap().state
    }
}

#[async_trait]
impl Sink for MemorySink {
    async fn init(&self) -> Result<(), TranslatorError> {
        Ok(())
    }

    async fn get_last_indexed_block(
        &self,
    ) -> Result<Option<LastIndexedBlock>, TranslatorError> {
        Ok(self.inner.lock().unwrap().blocks.last().map(|(n, _, meta)| {
            LastIndexedBlock {
                block_num: *n,
                evm_block_hash: meta.evm_block_hash.clone(),
                timestamp: meta.timestamp.clone(),
            }
        }))
    }

    async fn index_block(
        &self,
        block_num: u32,
        actions: &[ActionRecord],
        meta: &BlockMeta,
    ) -> Result<(), TranslatorError> {
        self.inner
            .lock()
            .unwrap()
            .blocks
            .push((block_num, actions.to_vec(), meta.clone()));
        Ok(())
    }

    async fn index_state(&self, state: IndexerState) -> Result<(), TranslatorError> {
        self.inner.lock().unwrap().state = Some(state);
        Ok(())
    }

    async fn get_indexer_state(&self) -> Result<Option<IndexerState>, TranslatorError> {
        Ok(self.inner.lock().unwrap().state)
    }
}
