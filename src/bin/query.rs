use alloy_primitives::Address;
use anyhow::Result;
use clap::{Parser, Subcommand};
use nft_ownership::cache::{CACHE_KEY_PREFIX, CacheKey, OwnershipCache};
use nft_ownership::config::Config;
use nft_ownership::query::commands::{
    cmd_cached, cmd_clear, cmd_list, cmd_tokens, cmd_verify, parse_wallet,
};
use nft_ownership::query::formatters::OutputFormat;
use nft_ownership::repository::Database;
use nft_ownership::rpc::RpcClient;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "query")]
#[command(about = "Inspect cached NFT ownership and resolve token metadata", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "table")]
    format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the cached ownership hint for a wallet
    Cached { wallet: String },
    /// List every cached wallet key
    List,
    /// Remove the cached ownership hint for a wallet
    Clear { wallet: String },
    /// Resolve tokenURI for each cached token
    Tokens { wallet: String },
    /// Check cached tokens against ownerOf
    Verify { wallet: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let format = OutputFormat::from(cli.format.as_str());

    let config = Config::from_env()?;
    let contract = config.nft_contract_address;

    if let Commands::List = cli.command {
        let db = Database::new(&config.database_url)?;
        return cmd_list(&db, &format!("{CACHE_KEY_PREFIX}:"));
    }

    let client = RpcClient::new(&config.json_rpc_urls)?;

    let chain_id = match config.chain_id {
        Some(id) => id,
        None => client.get_chain_id().await?,
    };
    let cache = OwnershipCache::new(Database::new(&config.database_url)?);
    let key_for = |wallet: &str| -> Result<(CacheKey, Address)> {
        let wallet = parse_wallet(wallet)?;
        Ok((CacheKey::new(chain_id, contract, wallet), wallet))
    };

    match cli.command {
        Commands::Cached { wallet } => {
            let (key, _) = key_for(&wallet)?;
            cmd_cached(&cache, &key, &format)?;
        }
        Commands::Clear { wallet } => {
            let (key, _) = key_for(&wallet)?;
            cmd_clear(&cache, &key)?;
        }
        Commands::Tokens { wallet } => {
            let (key, _) = key_for(&wallet)?;
            cmd_tokens(&client, &cache, &key, contract, &format).await?;
        }
        Commands::Verify { wallet } => {
            let (key, wallet) = key_for(&wallet)?;
            cmd_verify(&client, &cache, &key, contract, wallet, &format).await?;
        }
        Commands::List => {}
    }

    Ok(())
}
