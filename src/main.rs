use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use ember_coin::{core::blockchain::BlockchainOptions, node::node::Node};

/// A small proof-of-work cryptocurrency node
#[derive(Parser, Debug)]
#[command(name = "ember-coin", version, about)]
struct Cli {
    /// Address of a bootstrap peer
    #[arg(long, default_value = "")]
    bootstrap_addr: String,

    /// Overlay listen address
    #[arg(long, default_value = "0.0.0.0:3000")]
    listen_addr: String,

    /// Folder holding wallets, snapshots and logs
    #[arg(long, default_value = ".ember-coin")]
    folder: PathBuf,

    /// Broadcast a transfer, format <amount>:<address>, then exit
    #[arg(long)]
    send: Option<String>,

    /// Mine blocks
    #[arg(long)]
    mine: bool,

    /// Print the loaded wallets after syncing
    #[arg(long)]
    wallets: bool,

    /// Collect mining statistics
    #[arg(long)]
    stats: bool,

    /// Verbosity, repeat for more detail
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let options = BlockchainOptions {
        bootstrap_addr: cli.bootstrap_addr,
        listen_addr: cli.listen_addr,
        folder: cli.folder,
        send: cli.send,
        mine: cli.mine,
        wallets: cli.wallets,
        stats: cli.stats,
        verbose: cli.verbose,
    };

    let mut node = Node::new(options)?;
    node.start().await?;

    tokio::signal::ctrl_c().await?;
    node.stop().await;

    Ok(())
}
