//! Sends CHAT to every address listed in a CSV export.
//!
//! ```text
//! x402-chat-airdrop --csv holders.csv --per-address 10 --batch-size 100
//! ```
//!
//! Uses the engine endpoint, secret key and server wallet from the service config.

use clap::Parser;
use std::path::PathBuf;
use std::process;
use x402_chat::airdrop::{
    AirdropList, BATCH_DELAY, DEFAULT_BATCH_SIZE, DEFAULT_PER_ADDRESS, send_batches,
};
use x402_chat::config::Config;
use x402_chat::transfer::EngineClient;
use x402_chat::util::Telemetry;
use x402_chat_types::networks::CHAT;

#[derive(Parser, Debug)]
#[command(name = "x402-chat-airdrop", about = "Distribute CHAT to addresses from a CSV file")]
struct Args {
    /// CSV file with a header row and the address in the second column
    #[arg(long)]
    csv: PathBuf,
    #[arg(long, short, env = "CONFIG", default_value = "config.json")]
    config: PathBuf,
    /// Whole CHAT tokens sent to each address
    #[arg(long, default_value_t = DEFAULT_PER_ADDRESS)]
    per_address: u64,
    #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
    batch_size: usize,
    /// Print the batches without sending anything
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() {
    let _ = rustls::crypto::ring::default_provider().install_default();
    dotenvy::dotenv().ok();
    let _telemetry = Telemetry::new()
        .with_name("x402-chat-airdrop")
        .with_version(env!("CARGO_PKG_VERSION"))
        .register();

    if let Err(e) = airdrop(Args::parse()).await {
        tracing::error!("{e}");
        eprintln!("{e}");
        process::exit(1)
    }
}

async fn airdrop(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let csv = std::fs::read_to_string(&args.csv)?;
    let list = AirdropList::parse(&csv);
    tracing::info!(
        addresses = list.addresses.len(),
        skipped = list.skipped,
        "Loaded airdrop list"
    );

    let token = CHAT::arbitrum();
    let batches = list.batches(args.batch_size, token.whole_units(args.per_address));

    if args.dry_run {
        for (index, batch) in batches.iter().enumerate() {
            println!("Batch {} ({} recipients)", index + 1, batch.len());
            for recipient in batch {
                println!("  {} {}", recipient.address, recipient.quantity);
            }
        }
        return Ok(());
    }

    let config = Config::load_from_path(&args.config)?;
    let engine_config = config.engine();
    let engine = EngineClient::try_new(
        engine_config.url.inner().clone(),
        engine_config.secret_key.inner(),
    )?
    .with_timeout(engine_config.timeout());
    let sent = send_batches(
        &engine,
        &config.server_wallet(),
        &token,
        &batches,
        BATCH_DELAY,
    )
    .await?;
    tracing::info!(transactions = sent.len(), "Airdrop complete");
    Ok(())
}
