//! Per-block state machine. Correlates the decoded signed block,
//! trace list and table deltas into an ordered list of EVM
//! transactions, binds action fingerprints to mined signatures,
//! resolves limbo blocks, and emits `ProcessedBlock`s monotonically.

use crate::{
    abi::ContractAbis,
    block::{ActionRecord, ProcessedBlock},
    broadcast::Broadcaster,
    constants::{EVM_ACTIONS, EVM_CONTRACT, MSIG_CONTRACT, SYSTEM_ACCOUNT, TOKEN_CONTRACT,
        TRANSFER_BLACKLIST},
    codec,
    error::{TranslatorError, TxDeserializationError},
    extract::{self, TraceRecord},
    handlers::{DecodeCtx, EvmDecoder, EvmTx},
    hasher::ActionHasher,
    ship::types::BlockPosition,
    sink::{BlockMeta, GlobalMeta, Sink},
    state::{IndexerState, StateCell},
};
use log::{debug, error, info, trace, warn};
use serde_json::Value;
use std::{collections::HashMap, sync::Arc};

/// A block envelope after parallel decoding, plus the signatures mined
/// from its transactions.
#[derive(Debug, Clone)]
pub struct DecodedBlock {
    pub this_block: BlockPosition,
    pub head: BlockPosition,
    pub last_irreversible: BlockPosition,
    /// Decoded signed block body; `Null` when the block was not
    /// fetched.
    pub block: Value,
    /// Decoded `transaction_trace[]`.
    pub traces: Value,
    /// Decoded `table_delta[]` with contract rows expanded.
    pub deltas: Value,
    /// fingerprint → ordered signature list, scoped to this block.
    pub signatures: HashMap<String, Vec<String>>,
}

/// Carry-over for blocks whose EVM block number is not yet known.
/// At most one exists; reset when the next global row consumes it.
#[derive(Debug, Default)]
struct LimboBuffer {
    records: Vec<ActionRecord>,
    errors: Vec<String>,
    native_blocks: Vec<u32>,
}

impl LimboBuffer {
    fn absorb(&mut self, native_block: u32, records: Vec<ActionRecord>, errors: Vec<String>) {
        self.native_blocks.push(native_block);
        self.records.extend(records);
        self.errors.extend(errors);
    }

    /// `(records, errors, buffered_block_count)`, leaving the buffer
    /// empty.
    fn drain(&mut self) -> (Vec<ActionRecord>, Vec<String>, usize) {
        let count = self.native_blocks.len();
        self.native_blocks.clear();
        (
            std::mem::take(&mut self.records),
            std::mem::take(&mut self.errors),
            count,
        )
    }
}

pub struct BlockAssembler {
    debug: bool,
    hasher: ActionHasher,
    contract_abis: Arc<ContractAbis>,
    decoder: Arc<dyn EvmDecoder>,
    sink: Arc<dyn Sink>,
    broadcaster: Broadcaster,
    state_cell: Arc<StateCell>,
    limbo: LimboBuffer,
    last_accepted: Option<u32>,
    last_emitted: Option<u32>,
    last_evm_block: Option<u64>,
}

impl BlockAssembler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        debug: bool,
        hasher: ActionHasher,
        contract_abis: Arc<ContractAbis>,
        decoder: Arc<dyn EvmDecoder>,
        sink: Arc<dyn Sink>,
        broadcaster: Broadcaster,
        state_cell: Arc<StateCell>,
        last_indexed: Option<u32>,
    ) -> Self {
        Self {
            debug,
            hasher,
            contract_abis,
            decoder,
            sink,
            broadcaster,
            state_cell,
            limbo: LimboBuffer::default(),
            last_accepted: last_indexed,
            last_emitted: last_indexed,
            last_evm_block: None,
        }
    }

    pub fn last_accepted(&self) -> Option<u32> {
        self.last_accepted
    }

    /// Process one decoded block in arrival order. Any error from here
    /// pauses the ordered queue and aborts the session.
    pub async fn process_block(&mut self, decoded: DecodedBlock) -> Result<(), TranslatorError> {
        let num = decoded.this_block.block_num;
        match self.last_accepted {
            Some(last) if num > last + 1 => {
                return Err(TranslatorError::Gap {
                    expected: last + 1,
                    got: num,
                });
            }
            Some(last) if num <= last => {
                // Micro-fork inside the reversible horizon. Rolling the
                // emitted stream back is not supported.
                error!(
                    "block {num} re-observed at or below last accepted {last}, aborting"
                );
                return Err(TranslatorError::Fork { got: num, last });
            }
            _ => {}
        }

        let global_row = match self.contract_abis.get(SYSTEM_ACCOUNT) {
            Some(system_abi) => extract::extract_global_row(&decoded.deltas, system_abi)?,
            None => None,
        };

        let (records, errors) = self.build_records(&decoded)?;

        match global_row {
            Some(row) => {
                let evm_block_number =
                    row.get("block_num").and_then(Value::as_u64).ok_or_else(|| {
                        TranslatorError::Decode("global row carries no block_num".into())
                    })?;
                if let Some(last_evm) = self.last_evm_block {
                    if evm_block_number <= last_evm {
                        return Err(TranslatorError::Decode(format!(
                            "evm block number receded: {evm_block_number} after {last_evm}"
                        )));
                    }
                }

                // Pending limbo records resolve into this block, ahead
                // of its own records, preserving arrival order.
                let (mut evm_txs, mut all_errors, limbo_blocks) = self.limbo.drain();
                evm_txs.extend(records);
                all_errors.extend(errors);

                let processed = ProcessedBlock {
                    native_block_hash: decoded.this_block.block_id.clone(),
                    native_block_number: num,
                    evm_block_number,
                    block_timestamp: decoded
                        .block
                        .get("timestamp")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    evm_txs,
                    errors: all_errors,
                };
                self.emit(&processed, limbo_blocks).await?;
                self.last_evm_block = Some(evm_block_number);
                self.last_accepted = Some(num);
                self.finish_block(&decoded, Some(&processed)).await?;
            }
            None => {
                debug!(
                    "block {num} carries no global row, buffering {} records in limbo",
                    records.len()
                );
                self.limbo.absorb(num, records, errors);
                self.last_accepted = Some(num);
                self.finish_block(&decoded, None).await?;
            }
        }
        Ok(())
    }

    /// Emit via the sink, enforcing monotonic emission: the native
    /// number must advance by exactly one past the last emission plus
    /// any blocks resolved out of limbo.
    async fn emit(
        &mut self,
        processed: &ProcessedBlock,
        limbo_blocks: usize,
    ) -> Result<(), TranslatorError> {
        if let Some(last) = self.last_emitted {
            let expected = last + 1 + limbo_blocks as u32;
            if processed.native_block_number != expected {
                return Err(TranslatorError::Gap {
                    expected,
                    got: processed.native_block_number,
                });
            }
        }

        let meta = BlockMeta {
            timestamp: processed.block_timestamp.clone(),
            global: GlobalMeta {
                block_num: processed.evm_block_number,
            },
            evm_block_hash: evm_block_hash(&processed.evm_txs),
        };
        self.sink
            .index_block(processed.native_block_number, &processed.evm_txs, &meta)
            .await?;
        self.last_emitted = Some(processed.native_block_number);
        trace!(
            "indexed block {} (evm {}) with {} txs",
            processed.native_block_number,
            processed.evm_block_number,
            processed.evm_txs.len()
        );
        Ok(())
    }

    /// Post-emission bookkeeping: recompute the head distance, persist
    /// the single SYNC→HEAD flip, publish new heads once there.
    async fn finish_block(
        &mut self,
        decoded: &DecodedBlock,
        processed: Option<&ProcessedBlock>,
    ) -> Result<(), TranslatorError> {
        let num = decoded.this_block.block_num;
        if self.state_cell.observe(decoded.head.block_num, num) {
            info!(
                "caught up with the chain at block {num} (head {}), switching to head mode",
                decoded.head.block_num
            );
            self.sink.index_state(IndexerState::Head).await?;
        }
        if self.state_cell.state() == IndexerState::Head {
            if let Some(processed) = processed {
                self.broadcaster.publish_head(processed);
            }
        }
        Ok(())
    }

    /// Select and decode the EVM-relevant actions of one block.
    fn build_records(
        &self,
        decoded: &DecodedBlock,
    ) -> Result<(Vec<ActionRecord>, Vec<String>), TranslatorError> {
        let num = decoded.this_block.block_num;
        let mut records = Vec::new();
        let mut errors = Vec::new();
        let mut gas_used_block = 0u64;

        for trace in extract::extract_traces(&decoded.traces) {
            let account = trace.account().to_string();
            let name = trace.name().to_string();
            if !is_relevant(&account, &name) {
                continue;
            }

            let outcome = self.dispatch(num, &trace, &account, &name, gas_used_block);
            match outcome {
                Ok(Some(evm_tx)) => {
                    gas_used_block = gas_used_block.max(evm_tx.gasusedblock);
                    let signatures = self.find_signatures(&trace, &decoded.signatures);
                    records.push(ActionRecord {
                        trx_id: trace.trx_id.clone(),
                        action_ordinal: trace.action_ordinal,
                        signatures,
                        evm_tx,
                    });
                }
                Ok(None) => {}
                Err(e) => {
                    if self.debug {
                        warn!("collecting tx deserialization error on block {num}: {e}");
                        errors.push(e.to_string());
                    } else {
                        return Err(e.into());
                    }
                }
            }
        }
        Ok((records, errors))
    }

    /// Route one relevant action to its decoder. `Ok(None)` means the
    /// action passed the coarse filter but produces no EVM
    /// transaction (`eosio.msig::exec`, non-deposit transfers).
    fn dispatch(
        &self,
        native_block: u32,
        trace: &TraceRecord,
        account: &str,
        name: &str,
        gas_used_block: u64,
    ) -> Result<Option<EvmTx>, TxDeserializationError> {
        let ctx = DecodeCtx {
            native_block,
            trx_id: &trace.trx_id,
            action_ordinal: trace.action_ordinal,
            gas_used_block,
        };

        match (account, name) {
            (EVM_CONTRACT, "raw") => {
                let data = hex::decode(trace.data_hex())
                    .map_err(|e| ctx.error(format!("bad raw action data: {e}")))?;
                self.decoder.handle_evm_tx(&ctx, &data).map(Some)
            }
            (EVM_CONTRACT, "withdraw") => {
                let data = self.decode_action_data(&ctx, EVM_CONTRACT, "withdraw", trace)?;
                self.decoder.handle_evm_withdraw(&ctx, &data).map(Some)
            }
            (TOKEN_CONTRACT, "transfer") => {
                let data = self.decode_action_data(&ctx, TOKEN_CONTRACT, "transfer", trace)?;
                if !is_deposit(&data) {
                    return Ok(None);
                }
                self.decoder.handle_evm_deposit(&ctx, &data).map(Some)
            }
            _ => {
                trace!("no decoder for {account}::{name}, skipping");
                Ok(None)
            }
        }
    }

    /// Decode action data with the account's bundled contract ABI;
    /// without one the raw hex passes through untouched.
    fn decode_action_data(
        &self,
        ctx: &DecodeCtx<'_>,
        account: &str,
        action: &str,
        trace: &TraceRecord,
    ) -> Result<Value, TxDeserializationError> {
        let Some(abi) = self.contract_abis.get(account) else {
            return Ok(Value::String(trace.data_hex().to_string()));
        };
        let action_type = abi
            .action_type(action)
            .ok_or_else(|| ctx.error(format!("{account} abi has no action {action}")))?;
        let bytes = hex::decode(trace.data_hex())
            .map_err(|e| ctx.error(format!("bad {action} action data: {e}")))?;
        codec::decode_type(abi, action_type, &bytes)
            .map_err(|e| ctx.error(format!("decoding {account}::{action}: {e}")))
    }

    /// Search the transaction's traces in order for the first
    /// fingerprint present in the block's signature map. A missing
    /// match is non-fatal: the record goes out with no signatures.
    fn find_signatures(
        &self,
        trace: &TraceRecord,
        signatures: &HashMap<String, Vec<String>>,
    ) -> Vec<String> {
        for sibling in trace.siblings.iter() {
            let fingerprint = self.hasher.fingerprint(sibling);
            if let Some(sigs) = signatures.get(&fingerprint) {
                return sigs.clone();
            }
        }
        debug!(
            "no signature fingerprint matched for action {} of {}",
            trace.action_ordinal, trace.trx_id
        );
        Vec::new()
    }
}

fn is_relevant(account: &str, name: &str) -> bool {
    matches!(account, EVM_CONTRACT | TOKEN_CONTRACT | MSIG_CONTRACT)
        && EVM_ACTIONS.contains(&name)
}

/// A transfer is a deposit iff it lands on the EVM contract and does
/// not originate from the system accounts (staking refunds, RAM
/// trades).
fn is_deposit(data: &Value) -> bool {
    let to = data.get("to").and_then(Value::as_str);
    let from = data.get("from").and_then(Value::as_str).unwrap_or_default();
    to == Some(EVM_CONTRACT) && !TRANSFER_BLACKLIST.contains(&from)
}

/// The emitted block's EVM hash, when the decoders computed one.
fn evm_block_hash(evm_txs: &[ActionRecord]) -> String {
    evm_txs
        .last()
        .and_then(|a| a.evm_tx.fields.get("blockHash"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}
