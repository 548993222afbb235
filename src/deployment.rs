use crate::rpc::RpcClient;
use alloy_primitives::Address;
use anyhow::Result;
use tracing::info;

/// Binary search for the first block at which `address` has code.
pub async fn find_deployment_block(
    client: &RpcClient,
    address: Address,
    latest_block: u64,
) -> Result<u64> {
    info!("Searching for deployment block of contract {:?}", address);

    let code = client.get_code_at_block(address, latest_block).await?;
    if code.is_empty() {
        anyhow::bail!("Address {:?} is not a deployed contract", address);
    }

    let mut left = 0u64;
    let mut right = latest_block;

    while left < right {
        let mid = left + (right - left) / 2;

        let code = client.get_code_at_block(address, mid).await?;

        if code.is_empty() {
            left = mid + 1;
        } else {
            right = mid;
        }
    }

    info!("Contract deployed at block {}", left);
    Ok(left)
}

/// Deploy block to scan down to: the configured one, a discovered one when
/// discovery is enabled, otherwise genesis.
pub async fn resolve_deploy_block(
    client: &RpcClient,
    address: Address,
    configured: Option<u64>,
    discover: bool,
) -> Result<u64> {
    if let Some(block) = configured {
        info!("Using configured deployment block: {}", block);
        return Ok(block);
    }
    if !discover {
        info!("No deployment block configured, scanning down to genesis");
        return Ok(0);
    }

    let latest_block = client.get_latest_block().await?;
    find_deployment_block(client, address, latest_block).await
}
