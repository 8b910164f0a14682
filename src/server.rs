//! Wires the pipeline together: resume point from the sink, assembler
//! behind the ordered queue, ship client sessions, broadcaster, and
//! graceful shutdown.

use crate::{
    abi::ContractAbis,
    assembler::{BlockAssembler, DecodedBlock},
    broadcast::Broadcaster,
    config::IndexerConfiguration,
    constants::SYSTEM_ACCOUNT,
    handlers::EvmDecoder,
    hasher::ActionHasher,
    queue::{OrderedQueue, QueueHandler},
    ship::{AckWindow, ShipClient},
    sink::Sink,
    state::{IndexerState, StateCell},
};
use anyhow::Context;
use log::{error, info, warn};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Run the indexer until the requested range is exhausted or a
/// shutdown signal arrives. Fatal schema/decoder failures propagate as
/// errors; the binary maps them to exit code 1.
pub async fn start_indexer(
    config: IndexerConfiguration,
    sink: Arc<dyn Sink>,
    decoder: Arc<dyn EvmDecoder>,
) -> anyhow::Result<()> {
    info!(
        "starting telos-indexer for {} (chain id {})",
        config.chain_name, config.chain_id
    );
    sink.init().await.context("initializing sink")?;

    let contract_abis =
        Arc::new(ContractAbis::load(&config.contract_abis).context("loading contract abis")?);
    if contract_abis.get(SYSTEM_ACCOUNT).is_none() {
        warn!(
            "no {SYSTEM_ACCOUNT} contract abi configured: global rows cannot be decoded \
             and every block will buffer in limbo"
        );
    }

    // Resume after whatever the sink already holds.
    let last_indexed = sink.get_last_indexed_block().await?;
    let last_block_num = last_indexed.as_ref().map(|l| l.block_num);
    let start_block = match last_block_num {
        Some(last) if last + 1 > config.start_block => {
            info!("sink has blocks through {last}, resuming from {}", last + 1);
            last + 1
        }
        _ => config.start_block,
    };

    let hasher = ActionHasher::from_debug_flag(config.debug);
    let state_cell = Arc::new(StateCell::new(last_block_num.unwrap_or(0)));
    let broadcaster = Broadcaster::new();
    {
        let broadcaster = broadcaster.clone();
        let host = config.broadcast.ws_host.clone();
        let port = config.broadcast.ws_port;
        tokio::spawn(async move {
            if let Err(e) = broadcaster.serve(&host, port).await {
                error!("broadcast server failed: {e}");
            }
        });
    }

    sink.index_state(IndexerState::Sync).await?;

    let assembler = Arc::new(Mutex::new(BlockAssembler::new(
        config.debug,
        hasher,
        contract_abis,
        decoder,
        sink.clone(),
        broadcaster,
        state_cell.clone(),
        last_block_num,
    )));
    let ack = Arc::new(AckWindow::new(
        config.perf.min_block_confirmation,
        config.perf.max_msgs_in_flight,
    ));

    let handler: QueueHandler<DecodedBlock> = {
        let assembler = assembler.clone();
        let ack = ack.clone();
        Arc::new(move |decoded| {
            let assembler = assembler.clone();
            let ack = ack.clone();
            Box::pin(async move {
                assembler.lock().await.process_block(decoded).await?;
                ack.block_processed()
            })
        })
    };
    let queue = Arc::new(OrderedQueue::new(
        config.perf.concurrency_amount,
        handler.clone(),
    ));

    let mut client = ShipClient::new(
        config.ws_endpoint.clone(),
        config.block_request(start_block),
        config.perf.worker_amount,
        (
            config.allow_empty_block,
            config.allow_empty_traces,
            config.allow_empty_deltas,
        ),
        hasher,
        queue,
        handler,
        ack,
        state_cell.clone(),
    );

    tokio::select! {
        result = client.run() => match result {
            Ok(()) => {
                info!("requested block range fully indexed");
                sink.index_state(state_cell.state()).await?;
                Ok(())
            }
            Err(e) => {
                // Best effort: keep the resume point fresh even on the
                // way down.
                let _ = sink.index_state(state_cell.state()).await;
                Err(e.into())
            }
        },
        _ = wait_for_signal() => {
            info!("shutdown signal received, persisting indexer state");
            sink.index_state(state_cell.state()).await?;
            Ok(())
        }
    }
}

async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut term = signal(SignalKind::terminate()).expect("sigterm signal handler registered");
    let mut int = signal(SignalKind::interrupt()).expect("sigint signal handler registered");
    tokio::select! {
        _ = term.recv() => info!("received SIGTERM"),
        _ = int.recv() => info!("received SIGINT"),
    }
}
