//! Pulls the EVM-relevant pieces out of decoded state-history
//! payloads: executed action traces in canonical order, and the
//! `eosio/eosio/global` contract row carrying the EVM block number.

use crate::{
    abi::Abi,
    codec,
    constants::{GLOBAL_TABLE, SYSTEM_ACCOUNT},
    error::CodecError,
};
use serde_json::Value;
use std::sync::Arc;

/// One executed action trace, flattened out of its transaction trace.
#[derive(Debug, Clone)]
pub struct TraceRecord {
    pub trx_id: String,
    pub action_ordinal: u64,
    pub global_sequence: u64,
    /// The `act` payload: `{account, name, authorization, data}`.
    pub action: Value,
    /// All `act` payloads of the same transaction in trace order,
    /// shared across records for the signature search.
    pub siblings: Arc<Vec<Value>>,
}

impl TraceRecord {
    pub fn account(&self) -> &str {
        self.action
            .get("account")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    pub fn name(&self) -> &str {
        self.action
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    pub fn data_hex(&self) -> &str {
        self.action
            .get("data")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }
}

/// Flatten `transaction_trace_v0` entries with `status == 0`
/// (executed), keeping only action traces where `receiver ==
/// act.account` — inline notifications re-run the same action under a
/// different receiver and must not be double counted. The result is
/// sorted globally by `global_sequence`, which preserves canonical
/// cross-transaction execution order.
pub fn extract_traces(traces: &Value) -> Vec<TraceRecord> {
    let mut records = Vec::new();
    let Some(list) = traces.as_array() else {
        return records;
    };

    for entry in list {
        let Some((tag, trace)) = as_variant(entry) else {
            continue;
        };
        if tag != "transaction_trace_v0" {
            continue;
        }
        if trace.get("status").and_then(Value::as_u64) != Some(0) {
            continue;
        }
        let trx_id = trace
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let Some(action_traces) = trace.get("action_traces").and_then(Value::as_array) else {
            continue;
        };

        let mut kept = Vec::new();
        let mut siblings = Vec::new();
        for at in action_traces {
            let Some((_, at)) = as_variant(at) else {
                continue;
            };
            let Some(act) = at.get("act") else {
                continue;
            };
            siblings.push(act.clone());

            let receiver = at.get("receiver").and_then(Value::as_str);
            let account = act.get("account").and_then(Value::as_str);
            if receiver.is_none() || receiver != account {
                continue;
            }
            kept.push((
                at.get("action_ordinal").and_then(Value::as_u64).unwrap_or(0),
                global_sequence(at),
                act.clone(),
            ));
        }

        let siblings = Arc::new(siblings);
        for (action_ordinal, global_sequence, action) in kept {
            records.push(TraceRecord {
                trx_id: trx_id.clone(),
                action_ordinal,
                global_sequence,
                action,
                siblings: siblings.clone(),
            });
        }
    }

    records.sort_by_key(|r| r.global_sequence);
    records
}

fn global_sequence(action_trace: &Value) -> u64 {
    action_trace
        .get("receipt")
        .and_then(as_variant)
        .and_then(|(_, receipt)| receipt.get("global_sequence"))
        .and_then(Value::as_u64)
        .unwrap_or(0)
}

/// Scan decoded `table_delta_v0|v1` entries of `contract_row` for the
/// singleton `eosio/eosio/global` row and decode its payload with the
/// system contract's `global` table row type. Returns `None` when the
/// block carries no global update (the limbo case).
pub fn extract_global_row(
    deltas: &Value,
    system_abi: &Abi,
) -> Result<Option<Value>, CodecError> {
    let Some(list) = deltas.as_array() else {
        return Ok(None);
    };

    for entry in list {
        let Some((tag, delta)) = as_variant(entry) else {
            continue;
        };
        if !matches!(tag, "table_delta_v0" | "table_delta_v1") {
            continue;
        }
        if delta.get("name").and_then(Value::as_str) != Some("contract_row") {
            continue;
        }
        let Some(rows) = delta.get("rows").and_then(Value::as_array) else {
            continue;
        };
        for row in rows {
            if !row_present(row) {
                continue;
            }
            let Some((_, contract_row)) = row.get("data").and_then(as_variant) else {
                continue;
            };
            let code = contract_row.get("code").and_then(Value::as_str);
            let scope = contract_row.get("scope").and_then(Value::as_str);
            let table = contract_row.get("table").and_then(Value::as_str);
            if code != Some(SYSTEM_ACCOUNT)
                || scope != Some(SYSTEM_ACCOUNT)
                || table != Some(GLOBAL_TABLE)
            {
                continue;
            }

            let row_type = system_abi.table_row_type(GLOBAL_TABLE).ok_or_else(|| {
                CodecError::UnknownType(format!("{SYSTEM_ACCOUNT} table {GLOBAL_TABLE}"))
            })?;
            let payload = contract_row
                .get("value")
                .and_then(Value::as_str)
                .unwrap_or_default();
            let bytes = hex::decode(payload)
                .map_err(|e| CodecError::invalid("contract_row value", e))?;
            return decode_row(system_abi, row_type, &bytes).map(Some);
        }
    }
    Ok(None)
}

fn decode_row(abi: &Abi, row_type: &str, bytes: &[u8]) -> Result<Value, CodecError> {
    codec::decode_type(abi, row_type, bytes)
}

/// `table_delta_v0` carries `present: bool`, v1 a status byte.
fn row_present(row: &Value) -> bool {
    match row.get("present") {
        Some(Value::Bool(b)) => *b,
        Some(v) => v.as_u64().unwrap_or(0) != 0,
        None => false,
    }
}

/// Split a decoded `["type_name", value]` variant pair.
pub fn as_variant(value: &Value) -> Option<(&str, &Value)> {
    let pair = value.as_array()?;
    if pair.len() != 2 {
        return None;
    }
    Some((pair[0].as_str()?, &pair[1]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn action_trace(receiver: &str, account: &str, ordinal: u64, seq: u64) -> Value {
        json!([
            "action_trace_v1",
            {
                "action_ordinal": ordinal,
                "receiver": receiver,
                "act": {
                    "account": account,
                    "name": "raw",
                    "authorization": [],
                    "data": ""
                },
                "receipt": ["action_receipt_v0", {"global_sequence": seq}]
            }
        ])
    }

    #[test]
    fn skips_failed_transactions_and_notifications() {
        let traces = json!([
            ["transaction_trace_v0", {
                "id": "aa",
                "status": 0,
                "action_traces": [
                    action_trace("eosio.evm", "eosio.evm", 1, 20),
                    // inline notification: receiver differs
                    action_trace("alice", "eosio.evm", 2, 21)
                ]
            }],
            ["transaction_trace_v0", {
                "id": "bb",
                "status": 1,
                "action_traces": [action_trace("eosio.evm", "eosio.evm", 1, 10)]
            }]
        ]);
        let records = extract_traces(&traces);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].trx_id, "aa");
        assert_eq!(records[0].global_sequence, 20);
        // siblings keep the notification for the signature search
        assert_eq!(records[0].siblings.len(), 2);
    }

    #[test]
    fn orders_across_transactions_by_global_sequence() {
        let traces = json!([
            ["transaction_trace_v0", {
                "id": "late",
                "status": 0,
                "action_traces": [action_trace("a", "a", 1, 300)]
            }],
            ["transaction_trace_v0", {
                "id": "early",
                "status": 0,
                "action_traces": [action_trace("b", "b", 1, 100)]
            }]
        ]);
        let records = extract_traces(&traces);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].trx_id, "early");
        assert_eq!(records[1].trx_id, "late");
    }

    #[test]
    fn finds_the_global_row() {
        let system_abi = Abi::parse(
            r#"{
                "structs": [{"name": "global_state", "base": "", "fields": [
                    {"name": "block_num", "type": "uint32"}
                ]}],
                "tables": [{"name": "global", "type": "global_state"}]
            }"#,
        )
        .unwrap();

        let deltas = json!([
            ["table_delta_v0", {
                "name": "contract_row",
                "rows": [
                    {"present": true, "data": ["contract_row_v0", {
                        "code": "eosio", "scope": "eosio", "table": "global",
                        "primary_key": 0, "payer": "eosio",
                        "value": "07000000"
                    }]}
                ]
            }]
        ]);
        let row = extract_global_row(&deltas, &system_abi).unwrap().unwrap();
        assert_eq!(row, json!({"block_num": 7}));

        let other = json!([
            ["table_delta_v0", {
                "name": "contract_row",
                "rows": [
                    {"present": true, "data": ["contract_row_v0", {
                        "code": "eosio.token", "scope": "eosio", "table": "global",
                        "primary_key": 0, "payer": "eosio", "value": "07000000"
                    }]}
                ]
            }]
        ]);
        assert!(extract_global_row(&other, &system_abi).unwrap().is_none());
    }
}
