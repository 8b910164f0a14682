//! State-history streaming client. Maintains the websocket session
//! with the source node: negotiates the schema, requests a block
//! range, fans decode work out to the worker pool, applies ACK-window
//! backpressure, and reconnects with backoff on transport failures.

pub mod types;

use crate::{
    abi::Abi,
    assembler::DecodedBlock,
    codec::{self, block_type_for_result, unwrap_block_body},
    constants::{MAX_WS_FRAME_BYTES, RECONNECT_BACKOFF_MS},
    error::{CodecError, TranslatorError},
    extract::as_variant,
    hasher::ActionHasher,
    pool::DecodeWorkerPool,
    queue::{OrderedQueue, QueueHandler},
    state::{IndexerState, StateCell},
};
use async_tungstenite::{
    tokio::connect_async_with_config,
    tungstenite::{protocol::WebSocketConfig, Message},
};
use futures::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use serde_json::Value;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc, Mutex,
    },
};
use tokio::sync::{mpsc, watch};
use types::{ack_request_value, parse_envelope, BlockEnvelope, BlockPosition, BlockRequest};

/// Ordered candidate types for `packed_trx` payloads. The first that
/// decodes cleanly wins; only a winning `transaction` yields
/// fingerprints.
const PACKED_TRX_CANDIDATES: [&str; 9] = [
    "transaction",
    "code_v0",
    "account_v0",
    "contract_table_v0",
    "contract_row_v0",
    "code",
    "account",
    "contract_table",
    "contract_row",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    AwaitingAbi,
    Streaming,
}

/// ACK window shared between the frame handler and the block
/// consumers. `unconfirmed` never exceeds `max_messages_in_flight`
/// because the node stops sending at the window boundary.
pub struct AckWindow {
    min_block_confirmation: u32,
    unconfirmed: AtomicU32,
    session: Mutex<Option<AckSession>>,
}

struct AckSession {
    writer: mpsc::UnboundedSender<Message>,
    abi: Arc<Abi>,
}

impl AckWindow {
    pub fn new(min_block_confirmation: u32, max_messages_in_flight: u32) -> Self {
        let min = if min_block_confirmation > max_messages_in_flight {
            warn!(
                "min_block_confirmation {min_block_confirmation} exceeds the ack window \
                 {max_messages_in_flight}, clamping"
            );
            max_messages_in_flight
        } else {
            min_block_confirmation.max(1)
        };
        Self {
            min_block_confirmation: min,
            unconfirmed: AtomicU32::new(0),
            session: Mutex::new(None),
        }
    }

    fn attach(&self, writer: mpsc::UnboundedSender<Message>, abi: Arc<Abi>) {
        *self.session.lock().unwrap() = Some(AckSession { writer, abi });
        self.unconfirmed.store(0, Ordering::SeqCst);
    }

    fn detach(&self) {
        *self.session.lock().unwrap() = None;
    }

    pub fn unconfirmed(&self) -> u32 {
        self.unconfirmed.load(Ordering::SeqCst)
    }

    /// Count one assembled block; once `min_block_confirmation` is
    /// reached, ACK the batch and reset.
    pub fn block_processed(&self) -> Result<(), TranslatorError> {
        let unconfirmed = self.unconfirmed.fetch_add(1, Ordering::SeqCst) + 1;
        if unconfirmed < self.min_block_confirmation {
            return Ok(());
        }
        let guard = self.session.lock().unwrap();
        if let Some(session) = guard.as_ref() {
            let bytes =
                codec::encode_type(&session.abi, "request", &ack_request_value(unconfirmed))?;
            // A dead writer means the socket is already closing; the
            // frame loop reports that.
            let _ = session.writer.send(Message::Binary(bytes));
        }
        self.unconfirmed.store(0, Ordering::SeqCst);
        Ok(())
    }
}

pub struct ShipClient {
    ws_endpoint: String,
    request: BlockRequest,
    ds_threads: usize,
    allow_empty_block: bool,
    allow_empty_traces: bool,
    allow_empty_deltas: bool,
    must_reconnect: bool,
    hasher: ActionHasher,
    queue: Arc<OrderedQueue<DecodedBlock>>,
    handler: QueueHandler<DecodedBlock>,
    ack: Arc<AckWindow>,
    state_cell: Arc<StateCell>,
    session: SessionState,
}

impl ShipClient {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ws_endpoint: String,
        request: BlockRequest,
        ds_threads: usize,
        allow_empty: (bool, bool, bool),
        hasher: ActionHasher,
        queue: Arc<OrderedQueue<DecodedBlock>>,
        handler: QueueHandler<DecodedBlock>,
        ack: Arc<AckWindow>,
        state_cell: Arc<StateCell>,
    ) -> Self {
        Self {
            ws_endpoint,
            request,
            ds_threads,
            allow_empty_block: allow_empty.0,
            allow_empty_traces: allow_empty.1,
            allow_empty_deltas: allow_empty.2,
            must_reconnect: true,
            hasher,
            queue,
            handler,
            ack,
            state_cell,
            session: SessionState::Disconnected,
        }
    }

    pub fn session_state(&self) -> SessionState {
        self.session
    }

    /// Run sessions until the requested range is exhausted or a fatal
    /// error ends the pipeline. Transport failures and gaps reconnect
    /// with backoff, resuming from the last ordered block.
    pub async fn run(&mut self) -> Result<(), TranslatorError> {
        loop {
            let outcome = self.run_session().await;
            self.ack.detach();
            self.session = SessionState::Disconnected;
            match outcome {
                Ok(()) => return Ok(()),
                Err(e) if e.is_recoverable() && self.must_reconnect => {
                    warn!("session ended ({e}), reconnecting in {RECONNECT_BACKOFF_MS}ms");
                    // Drop whatever the aborted session left queued,
                    // then reopen the queue for the next session.
                    self.queue.clear();
                    self.queue.start_processing();
                    let resume = self.state_cell.last_ordered_block();
                    if resume > 0 {
                        self.request.start_block_num = resume + 1;
                    }
                    tokio::time::sleep(std::time::Duration::from_millis(RECONNECT_BACKOFF_MS))
                        .await;
                }
                Err(e) => {
                    self.queue.pause();
                    return Err(e);
                }
            }
        }
    }

    async fn run_session(&mut self) -> Result<(), TranslatorError> {
        self.session = SessionState::Connecting;
        info!("connecting to state-history endpoint {}", self.ws_endpoint);
        let mut ws_config = WebSocketConfig::default();
        ws_config.max_message_size = Some(MAX_WS_FRAME_BYTES);
        ws_config.max_frame_size = Some(MAX_WS_FRAME_BYTES);
        let (ws, _) = connect_async_with_config(self.ws_endpoint.as_str(), Some(ws_config))
            .await
            .map_err(|e| TranslatorError::Transport(e.to_string()))?;
        let (mut ws_sink, mut ws_stream) = ws.split();

        // The first frame is the node's schema.
        self.session = SessionState::AwaitingAbi;
        let abi_text = match ws_stream.next().await {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Binary(bytes))) => String::from_utf8(bytes)
                .map_err(|e| TranslatorError::Transport(format!("schema frame: {e}")))?,
            Some(Ok(other)) => {
                return Err(TranslatorError::Transport(format!(
                    "expected schema frame, got {other:?}"
                )))
            }
            Some(Err(e)) => return Err(TranslatorError::Transport(e.to_string())),
            None => {
                return Err(TranslatorError::Transport(
                    "connection closed before schema".into(),
                ))
            }
        };
        let abi = Arc::new(Abi::parse(&abi_text).map_err(TranslatorError::from)?);
        debug!("loaded schema {}", abi.version);
        let pool = Arc::new(
            DecodeWorkerPool::new(abi.clone(), self.ds_threads)
                .map_err(|e| TranslatorError::Decode(e.to_string()))?,
        );

        let (writer_tx, mut writer_rx) = mpsc::unbounded_channel::<Message>();
        let writer = tokio::spawn(async move {
            while let Some(message) = writer_rx.recv().await {
                if ws_sink.send(message).await.is_err() {
                    break;
                }
            }
        });
        self.ack.attach(writer_tx.clone(), abi.clone());

        let request_bytes =
            codec::encode_type(&abi, "request", &self.request.to_request_value())?;
        writer_tx
            .send(Message::Binary(request_bytes))
            .map_err(|_| TranslatorError::Transport("writer closed".into()))?;
        self.session = SessionState::Streaming;
        info!(
            "streaming blocks [{}, {})",
            self.request.start_block_num, self.request.end_block_num
        );

        let mut failure_rx = self.queue.failure();
        let outcome = loop {
            tokio::select! {
                changed = failure_rx.changed() => {
                    if changed.is_err() {
                        break Err(TranslatorError::Transport("queue driver gone".into()));
                    }
                    if let Some(e) = failure_rx.borrow_and_update().as_ref() {
                        break Err(e.as_ref().clone());
                    }
                }
                frame = ws_stream.next() => match frame {
                    None => break Err(TranslatorError::Transport("connection closed".into())),
                    Some(Err(e)) => break Err(TranslatorError::Transport(e.to_string())),
                    Some(Ok(Message::Binary(bytes))) => {
                        match self.handle_result_frame(&abi, &pool, bytes).await {
                            Ok(false) => {}
                            Ok(true) => break Ok(()),
                            Err(e) => break Err(e),
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        let _ = writer_tx.send(Message::Pong(payload));
                    }
                    Some(Ok(Message::Close(_))) => {
                        break Err(TranslatorError::Transport("closed by node".into()));
                    }
                    Some(Ok(_)) => {}
                }
            }
        };

        let outcome = match outcome {
            // Range exhausted: let the queue finish what it holds.
            Ok(()) => self.drain_queue(&mut failure_rx).await,
            Err(e) => Err(e),
        };
        writer.abort();
        outcome
    }

    /// Returns `Ok(true)` once the final requested block is scheduled.
    async fn handle_result_frame(
        &self,
        abi: &Arc<Abi>,
        pool: &Arc<DecodeWorkerPool>,
        frame: Vec<u8>,
    ) -> Result<bool, TranslatorError> {
        let envelope = parse_envelope(abi, &frame).map_err(TranslatorError::from)?;
        let Some(this_block) = envelope.this_block.clone() else {
            // Caught up with the head, or the node is pre-snapshot.
            debug!(
                "result frame without this_block at head {}",
                envelope.head.block_num
            );
            return Ok(false);
        };

        self.check_payload(
            "block",
            self.request.fetch_block,
            envelope.block.is_some(),
            self.allow_empty_block,
        )?;
        self.check_payload(
            "traces",
            self.request.fetch_traces,
            envelope.traces.is_some(),
            self.allow_empty_traces,
        )?;
        self.check_payload(
            "deltas",
            self.request.fetch_deltas,
            envelope.deltas.is_some(),
            self.allow_empty_deltas,
        )?;

        let reached_end = this_block
            .block_num
            .checked_add(1)
            .map(|next| next >= self.request.end_block_num)
            .unwrap_or(true);

        let task = decode_task(
            pool.clone(),
            abi.clone(),
            self.hasher,
            envelope,
            this_block,
        );
        match self.state_cell.state() {
            IndexerState::Sync => self.queue.push(Box::pin(task)),
            IndexerState::Head => {
                // Immediate dispatch; first let any still-queued sync
                // work surface so order is preserved across the flip.
                if self.queue.depth() > 0 {
                    self.queue.drained().await;
                }
                let decoded = task.await?;
                (self.handler)(decoded).await?;
            }
        }
        Ok(reached_end)
    }

    fn check_payload(
        &self,
        what: &str,
        requested: bool,
        present: bool,
        allow_empty: bool,
    ) -> Result<(), TranslatorError> {
        if !requested || present {
            return Ok(());
        }
        if allow_empty {
            warn!("requested {what} payload missing from result, continuing");
            Ok(())
        } else {
            error!("requested {what} payload missing from result, pausing");
            self.queue.pause();
            Err(TranslatorError::Decode(format!(
                "missing {what} payload in block result"
            )))
        }
    }

    async fn drain_queue(
        &self,
        failure_rx: &mut watch::Receiver<Option<Arc<TranslatorError>>>,
    ) -> Result<(), TranslatorError> {
        info!("requested range exhausted, draining the queue");
        tokio::select! {
            _ = self.queue.drained() => Ok(()),
            changed = failure_rx.changed() => {
                if changed.is_ok() {
                    if let Some(e) = failure_rx.borrow().as_ref() {
                        return Err(e.as_ref().clone());
                    }
                }
                Ok(())
            }
        }
    }
}

/// The per-block pipeline stage: three parallel decodes joined with
/// short-circuit on first failure, then signature mining.
fn decode_task(
    pool: Arc<DecodeWorkerPool>,
    abi: Arc<Abi>,
    hasher: ActionHasher,
    envelope: BlockEnvelope,
    this_block: BlockPosition,
) -> impl std::future::Future<Output = Result<DecodedBlock, TranslatorError>> + Send + 'static {
    async move {
        let BlockEnvelope {
            result_type,
            head,
            last_irreversible,
            block,
            traces,
            deltas,
            ..
        } = envelope;

        let block_fut = async {
            match block {
                None => Ok(Value::Null),
                Some(bytes) => {
                    let body_type = block_type_for_result(&result_type)?;
                    let body = pool.decode(body_type, bytes).await?;
                    unwrap_block_body(&result_type, body)
                }
            }
        };
        let traces_fut = async {
            match traces {
                None => Ok(Value::Null),
                Some(bytes) => pool.decode("transaction_trace[]", bytes).await,
            }
        };
        let deltas_fut = async {
            match deltas {
                None => Ok(Value::Null),
                Some(bytes) => decode_deltas(&pool, bytes).await,
            }
        };

        let (block, traces, deltas) = tokio::try_join!(block_fut, traces_fut, deltas_fut)
            .map_err(TranslatorError::from)?;
        let signatures = mine_signatures(&abi, hasher, &block);

        Ok(DecodedBlock {
            this_block,
            head,
            last_irreversible,
            block,
            traces,
            deltas,
            signatures,
        })
    }
}

/// Decode `table_delta[]`, then expand each whitelisted `contract_row`
/// row payload in a second batch.
async fn decode_deltas(
    pool: &DecodeWorkerPool,
    bytes: Vec<u8>,
) -> Result<Value, CodecError> {
    let mut deltas = pool.decode("table_delta[]", bytes).await?;

    let mut slots = Vec::new();
    let mut jobs = Vec::new();
    if let Some(list) = deltas.as_array() {
        for (delta_idx, entry) in list.iter().enumerate() {
            let Some((_, delta)) = as_variant(entry) else {
                continue;
            };
            if delta.get("name").and_then(Value::as_str) != Some("contract_row") {
                continue;
            }
            let Some(rows) = delta.get("rows").and_then(Value::as_array) else {
                continue;
            };
            for (row_idx, row) in rows.iter().enumerate() {
                let Some(data) = row.get("data").and_then(Value::as_str) else {
                    continue;
                };
                let raw = hex::decode(data)
                    .map_err(|e| CodecError::invalid("contract_row data", e))?;
                slots.push((delta_idx, row_idx));
                jobs.push(("contract_row".to_string(), raw));
            }
        }
    }
    if jobs.is_empty() {
        return Ok(deltas);
    }

    let results = pool.decode_batch(jobs).await;
    for ((delta_idx, row_idx), result) in slots.into_iter().zip(results) {
        deltas[delta_idx][1]["rows"][row_idx]["data"] = result?;
    }
    Ok(deltas)
}

/// Mine the block's signature map from its packed transactions. Every
/// failure here is non-fatal: the block stays emittable and missing
/// signatures surface as empty lists.
pub fn mine_signatures(
    abi: &Abi,
    hasher: ActionHasher,
    block: &Value,
) -> HashMap<String, Vec<String>> {
    let mut map = HashMap::new();
    let Some(transactions) = block.get("transactions").and_then(Value::as_array) else {
        return map;
    };

    for receipt in transactions {
        let Some((tag, packed)) = receipt.get("trx").and_then(as_variant) else {
            continue;
        };
        if tag != "packed_transaction" {
            continue;
        }
        let signatures = transaction_signatures(packed);
        let Some(packed_trx) = packed.get("packed_trx").and_then(Value::as_str) else {
            continue;
        };
        let Ok(bytes) = hex::decode(packed_trx) else {
            continue;
        };

        let Some((winner, decoded)) = decode_first_candidate(abi, &bytes) else {
            warn!("packed_trx matched no candidate type, skipping transaction");
            continue;
        };
        if winner != "transaction" {
            continue;
        }
        if let Some(actions) = decoded.get("actions").and_then(Value::as_array) {
            for action in actions {
                map.insert(hasher.fingerprint(action), signatures.clone());
            }
        }
    }
    map
}

fn decode_first_candidate(abi: &Abi, bytes: &[u8]) -> Option<(&'static str, Value)> {
    for candidate in PACKED_TRX_CANDIDATES {
        if !abi.has_type(candidate) {
            continue;
        }
        if let Ok(value) = codec::decode_type(abi, candidate, bytes) {
            return Some((candidate, value));
        }
    }
    None
}

/// Signatures live either directly on the packed transaction or under
/// its legacy prunable data.
fn transaction_signatures(packed: &Value) -> Vec<String> {
    let direct = packed.get("signatures").and_then(Value::as_array);
    let from_prunable = packed
        .get("prunable_data")
        .and_then(as_variant)
        .filter(|(tag, _)| *tag == "prunable_data_full_legacy")
        .and_then(|(_, full)| full.get("signatures").and_then(Value::as_array));

    direct
        .or(from_prunable)
        .map(|list| {
            list.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ack_abi() -> Arc<Abi> {
        Arc::new(
            Abi::parse(
                r#"{
                    "structs": [{"name": "get_blocks_ack_request_v0", "base": "", "fields": [
                        {"name": "num_messages", "type": "uint32"}
                    ]}],
                    "variants": [{"name": "request", "types": ["get_blocks_ack_request_v0"]}]
                }"#,
            )
            .unwrap(),
        )
    }

    #[test]
    fn ack_window_counts_and_resets() {
        let ack = AckWindow::new(3, 10);
        ack.block_processed().unwrap();
        ack.block_processed().unwrap();
        assert_eq!(ack.unconfirmed(), 2);
        ack.block_processed().unwrap();
        assert_eq!(ack.unconfirmed(), 0);
    }

    #[test]
    fn ack_confirmation_threshold_is_clamped_to_the_window() {
        // unconfirmed can never exceed max_messages_in_flight.
        let ack = AckWindow::new(50, 10);
        for _ in 0..9 {
            ack.block_processed().unwrap();
            assert!(ack.unconfirmed() <= 10);
        }
        ack.block_processed().unwrap();
        assert_eq!(ack.unconfirmed(), 0);
    }

    #[test]
    fn ack_messages_carry_the_batch_size() {
        let abi = ack_abi();
        let ack = AckWindow::new(2, 10);
        let (writer_tx, mut writer_rx) = mpsc::unbounded_channel();
        ack.attach(writer_tx, abi.clone());

        ack.block_processed().unwrap();
        assert!(writer_rx.try_recv().is_err());
        ack.block_processed().unwrap();

        let message = writer_rx.try_recv().unwrap();
        let Message::Binary(bytes) = message else {
            panic!("expected a binary ack frame");
        };
        let decoded = codec::decode_type(&abi, "request", &bytes).unwrap();
        assert_eq!(
            decoded,
            json!(["get_blocks_ack_request_v0", {"num_messages": 2}])
        );
    }

    #[tokio::test]
    async fn delta_rows_decode_in_a_second_stage() {
        let abi = Arc::new(
            Abi::parse(
                r#"{
                    "structs": [
                        {"name": "row", "base": "", "fields": [
                            {"name": "present", "type": "bool"},
                            {"name": "data", "type": "bytes"}
                        ]},
                        {"name": "table_delta_v0", "base": "", "fields": [
                            {"name": "name", "type": "string"},
                            {"name": "rows", "type": "row[]"}
                        ]},
                        {"name": "contract_row_v0", "base": "", "fields": [
                            {"name": "code", "type": "name"},
                            {"name": "scope", "type": "name"},
                            {"name": "table", "type": "name"},
                            {"name": "primary_key", "type": "uint64"},
                            {"name": "payer", "type": "name"},
                            {"name": "value", "type": "bytes"}
                        ]}
                    ],
                    "variants": [
                        {"name": "table_delta", "types": ["table_delta_v0"]},
                        {"name": "contract_row", "types": ["contract_row_v0"]}
                    ]
                }"#,
            )
            .unwrap(),
        );
        let pool = DecodeWorkerPool::new(abi.clone(), 0).unwrap();

        let row_payload = codec::encode_type(
            &abi,
            "contract_row",
            &json!(["contract_row_v0", {
                "code": "eosio", "scope": "eosio", "table": "global",
                "primary_key": 1, "payer": "eosio", "value": "07000000"
            }]),
        )
        .unwrap();
        let deltas_bytes = codec::encode_type(
            &abi,
            "table_delta[]",
            &json!([["table_delta_v0", {
                "name": "contract_row",
                "rows": [{"present": true, "data": hex::encode(row_payload)}]
            }]]),
        )
        .unwrap();

        let deltas = decode_deltas(&pool, deltas_bytes).await.unwrap();
        let row = &deltas[0][1]["rows"][0]["data"];
        assert_eq!(row[0], "contract_row_v0");
        assert_eq!(row[1]["table"], "global");
        assert_eq!(row[1]["value"], "07000000");
    }
}
