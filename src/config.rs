use crate::error::ScanError;
use alloy_primitives::Address;
use anyhow::{Context, Result};
use std::str::FromStr;

pub const DEFAULT_BLOCK_RANGE: u64 = 50_000;

#[derive(Debug, Clone)]
pub struct Config {
    pub json_rpc_urls: Vec<String>,
    pub nft_contract_address: Address,
    pub contract_deploy_block: Option<u64>,
    pub discover_deploy_block: bool,
    pub block_range: u64,
    pub chain_id: Option<u64>,
    pub database_url: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build the configuration from any variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let urls = lookup("JSON_RPC_URLS")
            .or_else(|| lookup("JSON_RPC_URL"))
            .context("JSON_RPC_URLS must be set in .env")?;
        let json_rpc_urls: Vec<String> = urls
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if json_rpc_urls.is_empty() {
            anyhow::bail!("JSON_RPC_URLS must contain at least one URL");
        }

        let contract_address_str = lookup("NFT_CONTRACT_ADDRESS").ok_or_else(|| {
            ScanError::Configuration("NFT_CONTRACT_ADDRESS must be set in .env".to_string())
        })?;
        let nft_contract_address = parse_contract_address(&contract_address_str)?;

        let contract_deploy_block = lookup("CONTRACT_DEPLOY_BLOCK")
            .map(|v| {
                v.trim().parse::<u64>().map_err(|_| {
                    ScanError::Configuration(format!("Invalid CONTRACT_DEPLOY_BLOCK: {v}"))
                })
            })
            .transpose()?;

        let discover_deploy_block = lookup("DISCOVER_DEPLOY_BLOCK")
            .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        let block_range = match lookup("SCAN_BLOCK_RANGE") {
            Some(v) => match v.trim().parse::<u64>() {
                Ok(range) if range > 0 => range,
                _ => {
                    let message = format!("Invalid SCAN_BLOCK_RANGE: {v}");
                    return Err(ScanError::Configuration(message).into());
                }
            },
            None => DEFAULT_BLOCK_RANGE,
        };

        let chain_id = lookup("CHAIN_ID")
            .map(|v| v.trim().parse::<u64>().with_context(|| format!("Invalid CHAIN_ID: {v}")))
            .transpose()?;

        let database_url = lookup("DATABASE_URL")
            .unwrap_or_else(|| "sqlite:./nft-cache.db".to_string());

        Ok(Config {
            json_rpc_urls,
            nft_contract_address,
            contract_deploy_block,
            discover_deploy_block,
            block_range,
            chain_id,
            database_url,
        })
    }
}

pub fn parse_contract_address(value: &str) -> Result<Address, ScanError> {
    let address = Address::from_str(value.trim()).map_err(|_| {
        ScanError::Configuration(format!("Invalid NFT_CONTRACT_ADDRESS format: {value}"))
    })?;
    if address.is_zero() {
        return Err(ScanError::Configuration(
            "NFT_CONTRACT_ADDRESS must not be the zero address".to_string(),
        ));
    }
    Ok(address)
}
