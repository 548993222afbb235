use crate::cache::{CacheKey, KeyValueStore, OwnershipCache};
use crate::metadata::{fetch_token_details, verify_hint};
use crate::query::formatters::{
    OutputFormat, format_cache_entry, format_token_details, format_verification,
};
use crate::repository::{CacheRepository, Database};
use crate::rpc::RpcClient;
use alloy_primitives::Address;
use anyhow::Result;
use std::str::FromStr;

pub fn parse_wallet(address: &str) -> Result<Address> {
    Address::from_str(address.trim())
        .map_err(|_| anyhow::anyhow!("Invalid wallet address format: {}", address))
}

pub fn cmd_cached<K: KeyValueStore>(
    cache: &OwnershipCache<K>,
    key: &CacheKey,
    format: &OutputFormat,
) -> Result<()> {
    let hint = cache.load(key);
    let output = format_cache_entry(key, hint.as_ref(), format);
    println!("{output}");

    Ok(())
}

pub fn cmd_list(db: &Database, prefix: &str) -> Result<()> {
    let keys = CacheRepository::new(&db.conn).keys_with_prefix(prefix)?;
    if keys.is_empty() {
        println!("No cached wallets.");
    }
    for key in keys {
        println!("{key}");
    }

    Ok(())
}

pub fn cmd_clear<K: KeyValueStore>(cache: &OwnershipCache<K>, key: &CacheKey) -> Result<()> {
    cache.clear(key);
    println!("Cleared {key}");

    Ok(())
}

pub async fn cmd_tokens<K: KeyValueStore>(
    client: &RpcClient,
    cache: &OwnershipCache<K>,
    key: &CacheKey,
    contract: Address,
    format: &OutputFormat,
) -> Result<()> {
    let token_ids = cache.cached_ids(key);
    if token_ids.is_empty() {
        println!("No cached tokens for {key}; run `scan` first.");
        return Ok(());
    }

    let details = fetch_token_details(client, contract, &token_ids).await;
    let output = format_token_details(&details, format);
    println!("{output}");

    Ok(())
}

pub async fn cmd_verify<K: KeyValueStore>(
    client: &RpcClient,
    cache: &OwnershipCache<K>,
    key: &CacheKey,
    contract: Address,
    wallet: Address,
    format: &OutputFormat,
) -> Result<()> {
    let Some(hint) = cache.load(key) else {
        println!("No cached ownership for {key}.");
        return Ok(());
    };

    let verification = verify_hint(client, contract, wallet, &hint).await;
    let output = format_verification(&verification, format);
    println!("{output}");

    Ok(())
}
