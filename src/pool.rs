//! Parallel decode of large opaque byte arrays. Workers share the
//! session schema and nothing else: a job is `(type, bytes)` in,
//! `Result<Value>` out, so any decode is pure and order-free.

use crate::{abi::Abi, codec, error::CodecError};
use anyhow::Result;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::oneshot;

pub struct DecodeWorkerPool {
    abi: Arc<Abi>,
    /// `None` when `ds_threads == 0`: decode inline on the caller.
    pool: Option<rayon::ThreadPool>,
}

impl DecodeWorkerPool {
    /// Spawn a pool of `ds_threads` workers over the active schema.
    /// The pool must be dropped before a reconnect loads a new schema.
    pub fn new(abi: Arc<Abi>, ds_threads: usize) -> Result<Self> {
        let pool = if ds_threads == 0 {
            None
        } else {
            Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(ds_threads)
                    .thread_name(|i| format!("decode-{i}"))
                    .build()?,
            )
        };
        Ok(Self { abi, pool })
    }

    pub fn abi(&self) -> &Arc<Abi> {
        &self.abi
    }

    /// Decode one payload, fully consuming the buffer.
    pub async fn decode(
        &self,
        type_name: &str,
        bytes: Vec<u8>,
    ) -> Result<Value, CodecError> {
        match &self.pool {
            None => codec::decode_type(&self.abi, type_name, &bytes),
            Some(pool) => {
                let (tx, rx) = oneshot::channel();
                let abi = self.abi.clone();
                let type_name = type_name.to_string();
                pool.spawn(move || {
                    let _ = tx.send(codec::decode_type(&abi, &type_name, &bytes));
                });
                rx.await.unwrap_or_else(|_| {
                    Err(CodecError::invalid("decode worker", "worker dropped result"))
                })
            }
        }
    }

    /// Decode a batch, preserving job order in the results.
    pub async fn decode_batch(
        &self,
        jobs: Vec<(String, Vec<u8>)>,
    ) -> Vec<Result<Value, CodecError>> {
        match &self.pool {
            None => jobs
                .into_iter()
                .map(|(t, b)| codec::decode_type(&self.abi, &t, &b))
                .collect(),
            Some(pool) => {
                let receivers: Vec<_> = jobs
                    .into_iter()
                    .map(|(type_name, bytes)| {
                        let (tx, rx) = oneshot::channel();
                        let abi = self.abi.clone();
                        pool.spawn(move || {
                            let _ = tx.send(codec::decode_type(&abi, &type_name, &bytes));
                        });
                        rx
                    })
                    .collect();

                let mut results = Vec::with_capacity(receivers.len());
                for rx in receivers {
                    results.push(rx.await.unwrap_or_else(|_| {
                        Err(CodecError::invalid("decode worker", "worker dropped result"))
                    }));
                }
                results
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn abi() -> Arc<Abi> {
        Arc::new(
            Abi::parse(
                r#"{"structs": [{"name": "pair", "base": "", "fields": [
                    {"name": "a", "type": "uint32"},
                    {"name": "b", "type": "uint32"}
                ]}]}"#,
            )
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn decodes_inline_with_zero_threads() {
        let pool = DecodeWorkerPool::new(abi(), 0).unwrap();
        let mut bytes = Vec::new();
        bytes.extend(1u32.to_le_bytes());
        bytes.extend(2u32.to_le_bytes());
        let value = pool.decode("pair", bytes).await.unwrap();
        assert_eq!(value, json!({"a": 1, "b": 2}));
    }

    #[tokio::test]
    async fn batch_preserves_order_and_reports_failures() {
        let pool = DecodeWorkerPool::new(abi(), 2).unwrap();
        let good: Vec<u8> = [3u32.to_le_bytes(), 4u32.to_le_bytes()].concat();
        let jobs = vec![
            ("pair".to_string(), good.clone()),
            ("pair".to_string(), vec![0u8; 3]), // truncated
            ("pair".to_string(), good),
        ];
        let results = pool.decode_batch(jobs).await;
        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
        assert_eq!(results[2].as_ref().unwrap(), &json!({"a": 3, "b": 4}));
    }
}
