use anyhow::Result;
use clap::Parser;
use nft_ownership::cache::OwnershipCache;
use nft_ownership::config::Config;
use nft_ownership::deployment::resolve_deploy_block;
use nft_ownership::query::commands::parse_wallet;
use nft_ownership::query::formatters::{OutputFormat, format_scan_result};
use nft_ownership::repository::Database;
use nft_ownership::rpc::RpcClient;
use nft_ownership::scanner::OwnershipScanner;
use nft_ownership::sync::OwnershipSync;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "scan")]
#[command(
    about = "Scan a wallet's ERC-721 transfer history and refresh its ownership cache",
    long_about = None
)]
struct Cli {
    /// Wallet address to scan
    wallet: String,

    #[arg(short, long, default_value = "table")]
    format: String,

    /// Override the block window size from the environment
    #[arg(long)]
    block_range: Option<u64>,

    /// Drop the cached hint before scanning
    #[arg(long, default_value = "false")]
    fresh: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let format = OutputFormat::from(cli.format.as_str());
    let wallet = parse_wallet(&cli.wallet)?;

    let config = Config::from_env()?;
    info!("Configuration loaded");
    info!("Contract address: {:?}", config.nft_contract_address);
    info!(
        "RPC URLs: {} endpoint(s) configured",
        config.json_rpc_urls.len()
    );

    let db = Database::new(&config.database_url)?;
    info!("Database initialized");

    let client = RpcClient::new(&config.json_rpc_urls)?;
    let chain_id = match config.chain_id {
        Some(id) => id,
        None => client.get_chain_id().await?,
    };
    info!("RPC client connected (chain id {})", chain_id);

    let deploy_block = resolve_deploy_block(
        &client,
        config.nft_contract_address,
        config.contract_deploy_block,
        config.discover_deploy_block,
    )
    .await?;

    let block_range = cli.block_range.unwrap_or(config.block_range);
    let scanner = OwnershipScanner::new(client, config.nft_contract_address, wallet, block_range)?
        .with_deploy_block(deploy_block);
    let sync = OwnershipSync::new(scanner, OwnershipCache::new(db), chain_id);

    if cli.fresh {
        sync.clear_cache();
    }

    if let Some(hint) = sync.cached_hint() {
        info!(
            "Cached hint: {} token(s), unverified until the scan completes",
            hint.token_ids.len()
        );
    }

    let owned = sync
        .run_to_completion(|step| {
            let progress = step.chunk.progress;
            info!(
                "{:>5.1}% ({}/{} blocks), {} token(s) so far",
                progress.percent,
                progress.scanned,
                progress.total,
                step.display_ids.len()
            );
        })
        .await;

    match owned {
        Ok(owned) => {
            info!("Wallet {:?} owns {} token(s)", wallet, owned.len());
            let hint = sync.cached_hint();
            println!("{}", format_scan_result(sync.key(), &owned, hint.as_ref(), &format));
            Ok(())
        }
        Err(e) => {
            error!("Scanner error: {}", e);
            Err(e.into())
        }
    }
}
