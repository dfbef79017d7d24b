mod constants;
mod server;
mod view;

use anyhow::Context;
use clap::{Parser, Subcommand};
use constants::{DEFAULT_DATA_DIR, DEFAULT_DIFFICULTY, DEFAULT_PORT};
use ledger_core::mine::mine_block;
use ledger_core::pow::Cancellation;
use ledger_core::{Block, Chain};
use ledger_storage::SledStore;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;
use view::BlockView;

#[derive(Parser, Debug)]
#[command(name = "ledger-node")]
#[command(about = "Single-node hash-linked ledger")]
struct Cli {
    /// Data directory for the block store
    #[arg(long, global = true, env = "LEDGER_DATADIR", default_value = DEFAULT_DATA_DIR)]
    datadir: PathBuf,

    /// Port for the read-only HTTP view
    #[arg(long, global = true, env = "LEDGER_PORT", default_value_t = DEFAULT_PORT)]
    port: u16,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Open the chain and serve it until Ctrl+C
    Start,
    /// Mine and append an empty block on top of the tip
    #[command(name = "createblock")]
    CreateBlock {
        #[arg(long, default_value_t = DEFAULT_DIFFICULTY)]
        difficulty: u32,
        /// Give up mining after this many seconds
        #[arg(long)]
        timeout_secs: Option<u64>,
    },
    /// Show the current height and tip
    Status,
    /// Show one block
    Block { height: u64 },
}

fn open_chain(datadir: &Path) -> anyhow::Result<Arc<Chain<SledStore>>> {
    let store = SledStore::open(datadir)?;
    let chain = Chain::open(Arc::new(store)).context("initializing chain")?;
    Ok(Arc::new(chain))
}

async fn create_block(
    chain: &Chain<SledStore>,
    difficulty: u32,
    timeout_secs: Option<u64>,
) -> anyhow::Result<()> {
    let tip = chain.get_latest_block()?;
    let mut block = Block::new(tip.height + 1, tip.hash(), vec![], difficulty);

    let cancel = timeout_secs
        .map(|s| Cancellation::with_timeout(Duration::from_secs(s)))
        .unwrap_or_default();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    let block = tokio::task::spawn_blocking(move || {
        mine_block(&mut block, &cancel).map(|_| block)
    })
    .await??;

    let tip = chain.add_block(block)?;
    println!("Created new block at height {}", tip.height);
    println!("Hash: {}", hex::encode(tip.hash));
    Ok(())
}

fn status(chain: &Chain<SledStore>) -> anyhow::Result<()> {
    let latest = chain.get_latest_block()?;
    println!("Current Height: {}", chain.height());
    println!("Latest Block Hash: {}", hex::encode(latest.hash()));
    println!("Latest Block Time: {}", latest.header.timestamp);
    println!("Number of Transactions: {}", latest.txs.len());
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let chain = open_chain(&cli.datadir)?;

    match cli.cmd {
        Command::Start => {
            info!(height = chain.height(), datadir = %cli.datadir.display(), "chain initialized");
            server::serve(chain, cli.port).await?;
        }
        Command::CreateBlock {
            difficulty,
            timeout_secs,
        } => create_block(&chain, difficulty, timeout_secs).await?,
        Command::Status => status(&chain)?,
        Command::Block { height } => {
            let block = chain.get_block(height)?;
            println!("{}", BlockView::from(&block));
        }
    }
    Ok(())
}
