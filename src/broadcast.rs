//! Live-subscriber broadcast: new heads fan out over a websocket
//! server on the `broadcast` topic.

use crate::block::ProcessedBlock;
use anyhow::Result;
use async_tungstenite::{tokio::accept_async, tungstenite::Message};
use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use serde_json::json;
use tokio::{net::TcpListener, sync::broadcast};

const BROADCAST_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub struct Broadcaster {
    sender: broadcast::Sender<String>,
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl Broadcaster {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self { sender }
    }

    /// Publish a new head to all connected subscribers. Send errors
    /// only mean nobody is listening.
    pub fn publish_head(&self, block: &ProcessedBlock) {
        let message = json!({
            "type": "head",
            "data": block.head_json(),
        });
        let _ = self.sender.send(message.to_string());
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.sender.subscribe()
    }

    /// Accept subscriber connections and pump head messages at them
    /// until the process shuts down.
    pub async fn serve(&self, host: &str, port: u16) -> Result<()> {
        let listener = TcpListener::bind((host, port)).await?;
        info!("broadcast server listening on {host}:{port}");
        loop {
            let (stream, peer) = listener.accept().await?;
            let receiver = self.sender.subscribe();
            tokio::spawn(async move {
                debug!("broadcast subscriber connected: {peer}");
                if let Err(e) = serve_subscriber(stream, receiver).await {
                    debug!("broadcast subscriber {peer} closed: {e}");
                }
            });
        }
    }
}

async fn serve_subscriber(
    stream: tokio::net::TcpStream,
    mut receiver: broadcast::Receiver<String>,
) -> Result<()> {
    let ws = accept_async(stream).await?;
    let (mut sink, mut source) = ws.split();

    loop {
        tokio::select! {
            head = receiver.recv() => match head {
                Ok(message) => sink.send(Message::Text(message)).await?,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("broadcast subscriber lagged, skipped {skipped} heads");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            incoming = source.next() => match incoming {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(Message::Ping(payload))) => sink.send(Message::Pong(payload)).await?,
                // Subscribers have nothing to say on this topic.
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
            },
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::ProcessedBlock;

    #[tokio::test]
    async fn publishes_head_payloads_to_subscribers() {
        let broadcaster = Broadcaster::new();
        let mut receiver = broadcaster.subscribe();

        let block = ProcessedBlock {
            native_block_hash: "aa".into(),
            native_block_number: 10,
            evm_block_number: 3,
            block_timestamp: "2024-01-01T00:00:00.000".into(),
            evm_txs: vec![],
            errors: vec![],
        };
        broadcaster.publish_head(&block);

        let message = receiver.recv().await.unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&message).unwrap();
        assert_eq!(parsed["type"], "head");
        assert_eq!(parsed["data"]["number"], "0x3");
        assert_eq!(parsed["data"]["extraData"], "0xaa");
    }
}
