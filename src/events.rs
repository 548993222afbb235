use alloy::rpc::types::Log;
use alloy::sol;
use alloy::sol_types::SolEvent;
use alloy_primitives::{B256, U256};
use tracing::warn;

sol! {
    event Transfer(address indexed from, address indexed to, uint256 indexed tokenId);

    function ownerOf(uint256 tokenId) external view returns (address);
    function tokenURI(uint256 tokenId) external view returns (string);
}

pub type TokenId = U256;

/// Which side of a transfer the scanned wallet was on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Received,
    Sent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferEvent {
    pub token_id: TokenId,
    pub block_number: u64,
    pub log_index: u64,
    pub transaction_hash: B256,
    pub direction: Direction,
}

impl TransferEvent {
    pub fn new(token_id: TokenId, block_number: u64, log_index: u64, direction: Direction) -> Self {
        Self {
            token_id,
            block_number,
            log_index,
            transaction_hash: B256::ZERO,
            direction,
        }
    }
}

pub fn decode_transfer_event(log: &Log) -> anyhow::Result<Transfer> {
    let log_data = log.data();
    let decoded = Transfer::decode_raw_log(log.topics(), &log_data.data)?;
    Ok(decoded)
}

/// Turn a raw log into a directional transfer. Logs that fail to decode or are
/// still pending (no block number) are skipped.
pub fn to_transfer_event(log: &Log, direction: Direction) -> Option<TransferEvent> {
    let event = match decode_transfer_event(log) {
        Ok(event) => event,
        Err(e) => {
            warn!("Failed to decode transfer event: {}", e);
            return None;
        }
    };

    let Some(block_number) = log.block_number else {
        warn!("Skipping pending transfer log for token {}", event.tokenId);
        return None;
    };

    Some(TransferEvent {
        token_id: event.tokenId,
        block_number,
        log_index: log.log_index.unwrap_or_default(),
        transaction_hash: log.transaction_hash.unwrap_or_default(),
        direction,
    })
}
