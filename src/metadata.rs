use crate::cache::OwnershipHint;
use crate::events::TokenId;
use alloy_primitives::Address;
use anyhow::Result;
use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

const MAX_CONCURRENT_CALLS: usize = 8;

/// Read-only ERC-721 views. Implemented by the RPC client.
#[allow(async_fn_in_trait)]
pub trait ContractReader {
    async fn owner_of(&self, contract: Address, token_id: TokenId) -> Result<Address>;
    async fn token_uri(&self, contract: Address, token_id: TokenId) -> Result<String>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenDetails {
    pub token_id: TokenId,
    pub token_uri: Option<String>,
    pub error: Option<String>,
}

/// Look up `tokenURI` for each token. A failing token is reported in its own
/// entry rather than failing the batch.
pub async fn fetch_token_details<C: ContractReader>(
    client: &C,
    contract: Address,
    token_ids: &[TokenId],
) -> Vec<TokenDetails> {
    info!("Fetching metadata URIs for {} token(s)", token_ids.len());

    stream::iter(token_ids.iter().copied())
        .map(|token_id| async move {
            match client.token_uri(contract, token_id).await {
                Ok(uri) => TokenDetails {
                    token_id,
                    token_uri: Some(uri),
                    error: None,
                },
                Err(e) => {
                    warn!("Failed to fetch tokenURI for token {}: {}", token_id, e);
                    TokenDetails {
                        token_id,
                        token_uri: None,
                        error: Some(e.to_string()),
                    }
                }
            }
        })
        .buffered(MAX_CONCURRENT_CALLS)
        .collect()
        .await
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HintVerification {
    pub confirmed: Vec<TokenId>,
    pub unconfirmed: Vec<TokenId>,
}

/// Check cached ids against `ownerOf` while a full scan is still pending.
/// Ids whose lookup fails land in `unconfirmed`. The cache is not modified.
pub async fn verify_hint<C: ContractReader>(
    client: &C,
    contract: Address,
    wallet: Address,
    hint: &OwnershipHint,
) -> HintVerification {
    let owners: Vec<(TokenId, Option<Address>)> = stream::iter(hint.token_ids.iter().copied())
        .map(|token_id| async move {
            match client.owner_of(contract, token_id).await {
                Ok(owner) => (token_id, Some(owner)),
                Err(e) => {
                    debug!("ownerOf({}) failed: {}", token_id, e);
                    (token_id, None)
                }
            }
        })
        .buffered(MAX_CONCURRENT_CALLS)
        .collect()
        .await;

    split_by_owner(wallet, owners)
}

fn split_by_owner(wallet: Address, owners: Vec<(TokenId, Option<Address>)>) -> HintVerification {
    let mut verification = HintVerification::default();
    for (token_id, owner) in owners {
        if owner == Some(wallet) {
            verification.confirmed.push(token_id);
        } else {
            verification.unconfirmed.push(token_id);
        }
    }
    verification
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{U256, address};
    use chrono::Utc;
    use std::collections::HashMap;

    const CONTRACT: Address = address!("0x00000000000000000000000000000000000000aa");
    const WALLET: Address = address!("0x00000000000000000000000000000000000000bb");
    const OTHER: Address = address!("0x00000000000000000000000000000000000000cc");

    /// Answers from fixed tables; tokens missing from a table revert.
    #[derive(Default)]
    struct FixedReader {
        owners: HashMap<u64, Address>,
        uris: HashMap<u64, String>,
    }

    impl ContractReader for FixedReader {
        async fn owner_of(&self, contract: Address, token_id: TokenId) -> Result<Address> {
            assert_eq!(contract, CONTRACT);
            let id = token_id.to::<u64>();
            self.owners
                .get(&id)
                .copied()
                .ok_or_else(|| anyhow::anyhow!("execution reverted: invalid token ID"))
        }

        async fn token_uri(&self, contract: Address, token_id: TokenId) -> Result<String> {
            assert_eq!(contract, CONTRACT);
            let id = token_id.to::<u64>();
            self.uris.get(&id).cloned().ok_or_else(|| {
                anyhow::anyhow!("execution reverted: URI query for nonexistent token")
            })
        }
    }

    #[tokio::test]
    async fn test_failed_token_uri_is_reported_per_token() {
        let reader = FixedReader {
            uris: HashMap::from([
                (1, "ipfs://meta/1.json".to_string()),
                (3, "ipfs://meta/3.json".to_string()),
            ]),
            ..Default::default()
        };
        let ids = [U256::from(3), U256::from(2), U256::from(1)];

        let details = fetch_token_details(&reader, CONTRACT, &ids).await;

        assert_eq!(details.len(), 3);
        assert_eq!(details[0].token_uri.as_deref(), Some("ipfs://meta/3.json"));
        assert_eq!(details[1].token_id, U256::from(2));
        assert!(details[1].token_uri.is_none());
        assert!(details[1].error.as_deref().is_some_and(|e| e.contains("nonexistent")));
        assert_eq!(details[2].token_uri.as_deref(), Some("ipfs://meta/1.json"));
        assert!(details[2].error.is_none());
    }

    #[tokio::test]
    async fn test_failed_owner_lookup_is_unconfirmed() {
        let reader = FixedReader {
            owners: HashMap::from([(8, WALLET), (6, OTHER)]),
            ..Default::default()
        };
        let hint = OwnershipHint {
            token_ids: vec![U256::from(8), U256::from(7), U256::from(6)],
            updated_at: Utc::now(),
        };

        let verification = verify_hint(&reader, CONTRACT, WALLET, &hint).await;

        assert_eq!(verification.confirmed, vec![U256::from(8)]);
        assert_eq!(verification.unconfirmed, vec![U256::from(7), U256::from(6)]);
    }

    #[test]
    fn test_split_by_owner() {
        let wallet = address!("0x00000000000000000000000000000000000000bb");
        let other = address!("0x00000000000000000000000000000000000000cc");

        let verification = split_by_owner(
            wallet,
            vec![
                (U256::from(9), Some(wallet)),
                (U256::from(7), Some(other)),
                (U256::from(4), None),
                (U256::from(1), Some(wallet)),
            ],
        );

        assert_eq!(verification.confirmed, vec![U256::from(9), U256::from(1)]);
        assert_eq!(verification.unconfirmed, vec![U256::from(7), U256::from(4)]);
    }
}
