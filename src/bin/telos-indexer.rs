use clap::{Parser, Subcommand};
use log::{error, info, LevelFilter};
use std::{path::PathBuf, sync::Arc};
use stderrlog::{ColorChoice, Timestamp};
use telos_indexer::{
    config::IndexerConfiguration,
    handlers::PassthroughDecoder,
    server::start_indexer,
    store::IndexerStore,
};

#[derive(Parser, Debug)]
#[command(name = "telos-indexer", author, version, about, long_about = Some("Telos Indexer\n\n\
Translate native state-history blocks into an indexed Telos EVM chain"))]
struct Cli {
    #[command(subcommand)]
    command: IndexerCommand,

    /// Max stdout log level
    #[arg(long, default_value_t = LevelFilter::Info)]
    log_level: LevelFilter,
}

#[derive(Subcommand, Debug)]
enum IndexerCommand {
    /// Start the indexer via a JSON config file
    Start {
        /// Path to the indexer config file
        #[arg(short, long)]
        config: PathBuf,

        /// Override the configured start block
        #[arg(long)]
        start_block: Option<u32>,

        /// Override the configured stop block (exclusive)
        #[arg(long)]
        stop_block: Option<u32>,

        /// Override the store database directory
        #[arg(long)]
        database_dir: Option<PathBuf>,
    },
    /// Print an indexed block document
    GetBlock {
        /// Path to the store database directory
        #[arg(long)]
        database_dir: PathBuf,

        /// Native block number to fetch
        block_num: u32,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();

    stderrlog::new()
        .module(module_path!())
        .module("telos_indexer")
        .color(ColorChoice::Never)
        .timestamp(Timestamp::Microsecond)
        .verbosity(args.log_level)
        .init()
        .unwrap();

    match args.command {
        IndexerCommand::Start {
            config,
            start_block,
            stop_block,
            database_dir,
        } => {
            let mut config = IndexerConfiguration::from_file(&config)?;
            if let Some(start_block) = start_block {
                config.start_block = start_block;
            }
            if let Some(stop_block) = stop_block {
                config.stop_block = Some(stop_block);
            }
            let database_dir = database_dir.unwrap_or_else(|| config.database_dir());

            info!("opening indexer store at {}", database_dir.display());
            let store = Arc::new(IndexerStore::new(&database_dir)?);

            if let Err(e) = start_indexer(config, store, Arc::new(PassthroughDecoder)).await {
                error!("indexer failed: {e:#}");
                std::process::exit(1);
            }
            Ok(())
        }
        IndexerCommand::GetBlock {
            database_dir,
            block_num,
        } => {
            let store = IndexerStore::new(&database_dir)?;
            match store.get_block(block_num)? {
                Some(doc) => println!("{}", serde_json::to_string_pretty(&doc)?),
                None => println!("block {block_num} is not indexed"),
            }
            Ok(())
        }
    }
}
