//! Default speedb-backed sink. Block documents are keyed by
//! big-endian block number so iteration order matches chain order;
//! the resume point and indexer state live under fixed keys.

use crate::{
    block::ActionRecord,
    error::TranslatorError,
    sink::{BlockMeta, LastIndexedBlock, Sink},
    state::IndexerState,
};
use anyhow::anyhow;
use async_trait::async_trait;
use log::trace;
use speedb::{ColumnFamily, ColumnFamilyDescriptor, DBCompressionType, DB};
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct IndexerStore {
    pub db_path: PathBuf,
    pub database: DB,
}

impl IndexerStore {
    /// Check these match with the cf helpers below
    const COLUMN_FAMILIES: [&'static str; 3] = ["blocks", "actions", "state"];

    const LAST_INDEXED_KEY: &'static [u8] = b"last-indexed-block";
    const INDEXER_STATE_KEY: &'static [u8] = b"indexer-state";

    pub fn new(path: &Path) -> anyhow::Result<Self> {
        let mut cf_opts = speedb::Options::default();
        cf_opts.set_compression_type(DBCompressionType::Zstd);

        let mut database_opts = speedb::Options::default();
        database_opts.set_compression_type(DBCompressionType::Zstd);
        database_opts.create_missing_column_families(true);
        database_opts.create_if_missing(true);

        let column_families: Vec<ColumnFamilyDescriptor> = Self::COLUMN_FAMILIES
            .iter()
            .map(|cf| ColumnFamilyDescriptor::new(*cf, cf_opts.clone()))
            .collect();
        Ok(Self {
            db_path: path.into(),
            database: DB::open_cf_descriptors(&database_opts, path, column_families)?,
        })
    }

    fn blocks_cf(&self) -> &ColumnFamily {
        self.database
            .cf_handle("blocks")
            .expect("blocks column family exists")
    }

    fn actions_cf(&self) -> &ColumnFamily {
        self.database
            .cf_handle("actions")
            .expect("actions column family exists")
    }

    fn state_cf(&self) -> &ColumnFamily {
        self.database
            .cf_handle("state")
            .expect("state column family exists")
    }

    fn put_json<T: serde::Serialize>(
        &self,
        cf: &ColumnFamily,
        key: &[u8],
        value: &T,
    ) -> Result<(), TranslatorError> {
        let bytes = serde_json::to_vec(value).map_err(|e| TranslatorError::Sink(e.to_string()))?;
        self.database
            .put_cf(cf, key, bytes)
            .map_err(|e| TranslatorError::Sink(e.to_string()))
    }

    fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        cf: &ColumnFamily,
        key: &[u8],
    ) -> Result<Option<T>, TranslatorError> {
        match self
            .database
            .get_cf(cf, key)
            .map_err(|e| TranslatorError::Sink(e.to_string()))?
        {
            None => Ok(None),
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| TranslatorError::Sink(e.to_string())),
        }
    }

    /// Read back a block document, mainly for inspection tooling.
    pub fn get_block(&self, block_num: u32) -> anyhow::Result<Option<serde_json::Value>> {
        let key = block_num.to_be_bytes();
        let meta: Option<serde_json::Value> = self
            .get_json(self.blocks_cf(), &key)
            .map_err(|e| anyhow!("{e}"))?;
        let Some(meta) = meta else {
            return Ok(None);
        };
        let actions: Option<serde_json::Value> = self
            .get_json(self.actions_cf(), &key)
            .map_err(|e| anyhow!("{e}"))?;
        Ok(Some(serde_json::json!({
            "block_num": block_num,
            "meta": meta,
            "actions": actions.unwrap_or_default(),
        })))
    }
}

#[async_trait]
impl Sink for IndexerStore {
    async fn init(&self) -> Result<(), TranslatorError> {
        Ok(())
    }

    async fn get_last_indexed_block(
        &self,
    ) -> Result<Option<LastIndexedBlock>, TranslatorError> {
        self.get_json(self.state_cf(), Self::LAST_INDEXED_KEY)
    }

    async fn index_block(
        &self,
        block_num: u32,
        actions: &[ActionRecord],
        meta: &BlockMeta,
    ) -> Result<(), TranslatorError> {
        trace!("indexing block {block_num} with {} actions", actions.len());
        let key = block_num.to_be_bytes();

        self.put_json(self.blocks_cf(), &key, meta)?;
        self.put_json(self.actions_cf(), &key, &actions)?;
        self.put_json(
            self.state_cf(),
            Self::LAST_INDEXED_KEY,
            &LastIndexedBlock {
                block_num,
                evm_block_hash: meta.evm_block_hash.clone(),
                timestamp: meta.timestamp.clone(),
            },
        )
    }

    async fn index_state(&self, state: IndexerState) -> Result<(), TranslatorError> {
        self.put_json(self.state_cf(), Self::INDEXER_STATE_KEY, &state)
    }

    async fn get_indexer_state(&self) -> Result<Option<IndexerState>, TranslatorError> {
        self.get_json(self.state_cf(), Self::INDEXER_STATE_KEY)
    }
}
