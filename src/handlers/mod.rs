//! Contract for the external EVM transaction decoders. The pipeline
//! routes `eosio.evm::raw`, `eosio.evm::withdraw` and qualifying
//! `eosio.token::transfer` actions here and treats the results as
//! opaque, caring only about the running `gasusedblock` cumulative.

use crate::error::TxDeserializationError;
use serde::Serialize;
use serde_json::{json, Value};

/// An EVM transaction as produced by a decoder. `gasusedblock` is the
/// cumulative gas used in the enclosing block after this transaction.
#[derive(Debug, Clone, Serialize)]
pub struct EvmTx {
    pub gasusedblock: u64,
    #[serde(flatten)]
    pub fields: Value,
}

/// Per-action context handed to a decoder.
#[derive(Debug, Clone, Copy)]
pub struct DecodeCtx<'a> {
    pub native_block: u32,
    pub trx_id: &'a str,
    pub action_ordinal: u64,
    /// Cumulative gas used by earlier transactions in this block.
    pub gas_used_block: u64,
}

impl DecodeCtx<'_> {
    pub fn error(&self, message: impl Into<String>) -> TxDeserializationError {
        TxDeserializationError {
            trx_id: self.trx_id.to_string(),
            message: message.into(),
        }
    }
}

pub trait EvmDecoder: Send + Sync {
    /// `eosio.evm::raw` — a wrapped native EVM transaction.
    fn handle_evm_tx(
        &self,
        ctx: &DecodeCtx<'_>,
        data: &[u8],
    ) -> Result<EvmTx, TxDeserializationError>;

    /// `eosio.evm::withdraw` — TLOS leaving the EVM.
    fn handle_evm_withdraw(
        &self,
        ctx: &DecodeCtx<'_>,
        data: &Value,
    ) -> Result<EvmTx, TxDeserializationError>;

    /// `eosio.token::transfer` into `eosio.evm` — a deposit.
    fn handle_evm_deposit(
        &self,
        ctx: &DecodeCtx<'_>,
        data: &Value,
    ) -> Result<EvmTx, TxDeserializationError>;
}

/// Stand-in decoder wiring for deployments where the real decoders run
/// elsewhere: payloads pass through untouched and the gas cumulative
/// is carried forward unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughDecoder;

impl EvmDecoder for PassthroughDecoder {
    fn handle_evm_tx(
        &self,
        ctx: &DecodeCtx<'_>,
        data: &[u8],
    ) -> Result<EvmTx, TxDeserializationError> {
        if data.is_empty() {
            return Err(ctx.error("empty raw action data"));
        }
        Ok(EvmTx {
            gasusedblock: ctx.gas_used_block,
            fields: json!({ "kind": "raw", "raw": hex::encode(data) }),
        })
    }

    fn handle_evm_withdraw(
        &self,
        ctx: &DecodeCtx<'_>,
        data: &Value,
    ) -> Result<EvmTx, TxDeserializationError> {
        Ok(EvmTx {
            gasusedblock: ctx.gas_used_block,
            fields: json!({ "kind": "withdraw", "action": data }),
        })
    }

    fn handle_evm_deposit(
        &self,
        ctx: &DecodeCtx<'_>,
        data: &Value,
    ) -> Result<EvmTx, TxDeserializationError> {
        Ok(EvmTx {
            gasusedblock: ctx.gas_used_block,
            fields: json!({ "kind": "deposit", "action": data }),
        })
    }
}
