//! Wire-session types: the block request that opens a stream and the
//! raw envelope each result frame parses into.

use crate::{
    abi::Abi,
    codec::{block_type_for_result, Cursor},
    error::CodecError,
};
use serde_json::{json, Value};

/// `{block_num, block_id}` position triple member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockPosition {
    pub block_num: u32,
    pub block_id: String,
}

impl BlockPosition {
    pub fn to_value(&self) -> Value {
        json!({ "block_num": self.block_num, "block_id": self.block_id })
    }
}

/// Session configuration sent as `get_blocks_request_v0`. Mutated only
/// between ACK boundaries (in practice: between sessions).
#[derive(Debug, Clone)]
pub struct BlockRequest {
    /// Inclusive.
    pub start_block_num: u32,
    /// Exclusive; defaults to the 32-bit maximum.
    pub end_block_num: u32,
    pub max_messages_in_flight: u32,
    /// Rolling set of known positions the node uses to resync.
    pub have_positions: Vec<BlockPosition>,
    pub irreversible_only: bool,
    pub fetch_block: bool,
    pub fetch_traces: bool,
    pub fetch_deltas: bool,
}

impl Default for BlockRequest {
    fn default() -> Self {
        Self {
            start_block_num: 0,
            end_block_num: u32::MAX,
            max_messages_in_flight: crate::constants::DEFAULT_MAX_MSGS_IN_FLIGHT,
            have_positions: Vec::new(),
            irreversible_only: false,
            fetch_block: true,
            fetch_traces: true,
            fetch_deltas: true,
        }
    }
}

impl BlockRequest {
    /// The `request` variant value for the codec.
    pub fn to_request_value(&self) -> Value {
        json!([
            "get_blocks_request_v0",
            {
                "start_block_num": self.start_block_num,
                "end_block_num": self.end_block_num,
                "max_messages_in_flight": self.max_messages_in_flight,
                "have_positions": self
                    .have_positions
                    .iter()
                    .map(BlockPosition::to_value)
                    .collect::<Vec<_>>(),
                "irreversible_only": self.irreversible_only,
                "fetch_block": self.fetch_block,
                "fetch_traces": self.fetch_traces,
                "fetch_deltas": self.fetch_deltas,
            }
        ])
    }
}

pub fn ack_request_value(num_messages: u32) -> Value {
    json!(["get_blocks_ack_request_v0", { "num_messages": num_messages }])
}

/// A result frame, partially decoded: positions plus the opaque
/// payload blobs. The blobs go to the worker pool; everything else is
/// cheap enough to parse on the frame handler.
#[derive(Debug, Clone)]
pub struct BlockEnvelope {
    /// `get_blocks_result_v{0,1,2}`.
    pub result_type: String,
    pub head: BlockPosition,
    pub last_irreversible: BlockPosition,
    pub this_block: Option<BlockPosition>,
    pub prev_block: Option<BlockPosition>,
    pub block: Option<Vec<u8>>,
    pub traces: Option<Vec<u8>>,
    pub deltas: Option<Vec<u8>>,
}

/// Parse a result frame against the session schema. The variant tag is
/// validated against the schema's `result` variant and must be one of
/// the three accepted block-result versions; the whole buffer must be
/// consumed.
pub fn parse_envelope(abi: &Abi, frame: &[u8]) -> Result<BlockEnvelope, CodecError> {
    let mut cursor = Cursor::new(frame);
    let tag = cursor.read_varuint32("result")? as usize;
    let variant = abi
        .get_variant("result")
        .ok_or_else(|| CodecError::UnknownType("result".into()))?;
    let result_type = variant
        .types
        .get(tag)
        .ok_or_else(|| CodecError::UnsupportedVariant(format!("result tag {tag}")))?
        .clone();
    // Validates the version; the body type itself is used at decode
    // time.
    block_type_for_result(&result_type)?;

    let envelope = BlockEnvelope {
        result_type,
        head: read_position(&mut cursor)?,
        last_irreversible: read_position(&mut cursor)?,
        this_block: read_optional_position(&mut cursor)?,
        prev_block: read_optional_position(&mut cursor)?,
        block: read_optional_bytes(&mut cursor)?,
        traces: read_optional_bytes(&mut cursor)?,
        deltas: read_optional_bytes(&mut cursor)?,
    };
    if !cursor.is_empty() {
        return Err(CodecError::TrailingBytes {
            type_name: envelope.result_type,
            extra: cursor.remaining(),
        });
    }
    Ok(envelope)
}

fn read_position(cursor: &mut Cursor<'_>) -> Result<BlockPosition, CodecError> {
    let block_num = cursor.read_u32("block_position.block_num")?;
    let block_id = hex::encode(cursor.read_exact(32, "block_position.block_id")?);
    Ok(BlockPosition {
        block_num,
        block_id,
    })
}

fn read_optional_position(
    cursor: &mut Cursor<'_>,
) -> Result<Option<BlockPosition>, CodecError> {
    if cursor.read_u8("block_position?")? == 0 {
        Ok(None)
    } else {
        read_position(cursor).map(Some)
    }
}

fn read_optional_bytes(cursor: &mut Cursor<'_>) -> Result<Option<Vec<u8>>, CodecError> {
    if cursor.read_u8("bytes?")? == 0 {
        Ok(None)
    } else {
        cursor.read_bytes("bytes").map(|b| Some(b.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode_type;

    fn ship_abi() -> Abi {
        Abi::parse(
            r#"{
                "structs": [
                    {"name": "block_position", "base": "", "fields": [
                        {"name": "block_num", "type": "uint32"},
                        {"name": "block_id", "type": "checksum256"}
                    ]},
                    {"name": "get_blocks_result_v0", "base": "", "fields": [
                        {"name": "head", "type": "block_position"},
                        {"name": "last_irreversible", "type": "block_position"},
                        {"name": "this_block", "type": "block_position?"},
                        {"name": "prev_block", "type": "block_position?"},
                        {"name": "block", "type": "bytes?"},
                        {"name": "traces", "type": "bytes?"},
                        {"name": "deltas", "type": "bytes?"}
                    ]},
                    {"name": "get_status_result_v0", "base": "", "fields": []}
                ],
                "variants": [
                    {"name": "result", "types": ["get_status_result_v0", "get_blocks_result_v0"]}
                ]
            }"#,
        )
        .unwrap()
    }

    fn id(n: u8) -> String {
        hex::encode([n; 32])
    }

    #[test]
    fn parses_a_result_frame() {
        let abi = ship_abi();
        let frame = encode_type(
            &abi,
            "result",
            &serde_json::json!([
                "get_blocks_result_v0",
                {
                    "head": {"block_num": 1000, "block_id": id(1)},
                    "last_irreversible": {"block_num": 700, "block_id": id(2)},
                    "this_block": {"block_num": 900, "block_id": id(3)},
                    "prev_block": {"block_num": 899, "block_id": id(4)},
                    "block": "0badc0de",
                    "traces": "00",
                    "deltas": null
                }
            ]),
        )
        .unwrap();

        let envelope = parse_envelope(&abi, &frame).unwrap();
        assert_eq!(envelope.result_type, "get_blocks_result_v0");
        assert_eq!(envelope.head.block_num, 1000);
        assert_eq!(envelope.this_block.as_ref().unwrap().block_num, 900);
        assert_eq!(envelope.this_block.as_ref().unwrap().block_id, id(3));
        assert_eq!(envelope.block.as_deref(), Some(&[0x0b, 0xad, 0xc0, 0xde][..]));
        assert_eq!(envelope.traces.as_deref(), Some(&[0u8][..]));
        assert!(envelope.deltas.is_none());
    }

    #[test]
    fn rejects_non_block_results_and_trailing_bytes() {
        let abi = ship_abi();

        // get_status_result_v0 is tag 0: valid in the schema, not a
        // block result.
        let err = parse_envelope(&abi, &[0]).unwrap_err();
        assert!(matches!(err, CodecError::UnsupportedVariant(_)));

        let mut frame = encode_type(
            &abi,
            "result",
            &serde_json::json!([
                "get_blocks_result_v0",
                {
                    "head": {"block_num": 1, "block_id": id(0)},
                    "last_irreversible": {"block_num": 1, "block_id": id(0)},
                    "this_block": null,
                    "prev_block": null,
                    "block": null,
                    "traces": null,
                    "deltas": null
                }
            ]),
        )
        .unwrap();
        frame.push(0);
        let err = parse_envelope(&abi, &frame).unwrap_err();
        assert!(matches!(err, CodecError::TrailingBytes { .. }));
    }
}
