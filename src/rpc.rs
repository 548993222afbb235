use crate::events::{
    Direction, TokenId, Transfer, TransferEvent, ownerOfCall, to_transfer_event, tokenURICall,
};
use crate::metadata::ContractReader;
use crate::scanner::{TransferLogSource, TransferQuery};
use alloy::providers::fillers::FillProvider;
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::{BlockNumberOrTag, Filter, Log, TransactionInput, TransactionRequest};
use alloy::sol_types::{SolCall, SolEvent};
use alloy_primitives::{Address, Bytes};
use anyhow::Result;
use regex::Regex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::timeout;
use tokio_retry::Retry;
use tokio_retry::strategy::{ExponentialBackoff, jitter};
use tracing::{debug, info, warn};

type AlloyFullProvider = FillProvider<
    alloy::providers::fillers::JoinFill<
        alloy::providers::Identity,
        alloy::providers::fillers::JoinFill<
            alloy::providers::fillers::GasFiller,
            alloy::providers::fillers::JoinFill<
                alloy::providers::fillers::BlobGasFiller,
                alloy::providers::fillers::JoinFill<
                    alloy::providers::fillers::NonceFiller,
                    alloy::providers::fillers::ChainIdFiller,
                >,
            >,
        >,
    >,
    alloy::providers::RootProvider,
>;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct RpcClient {
    providers: Vec<AlloyFullProvider>,
    urls: Vec<String>,
    current_provider: Arc<AtomicUsize>,
    max_retries: usize,
}

impl RpcClient {
    pub fn new(rpc_urls: &[String]) -> Result<Self> {
        if rpc_urls.is_empty() {
            return Err(anyhow::anyhow!("At least one RPC URL must be provided"));
        }

        let mut providers = Vec::new();
        for url in rpc_urls {
            let parsed_url = url
                .parse()
                .map_err(|_| anyhow::anyhow!("Invalid RPC URL: {}", url))?;
            let provider: AlloyFullProvider = ProviderBuilder::new().connect_http(parsed_url);
            providers.push(provider);
        }

        Ok(RpcClient {
            providers,
            urls: rpc_urls.to_vec(),
            current_provider: Arc::new(AtomicUsize::new(0)),
            max_retries: 5,
        })
    }

    fn get_provider(&self) -> &AlloyFullProvider {
        let index = self.current_provider.load(Ordering::Relaxed) % self.providers.len();
        &self.providers[index]
    }

    pub fn get_current_url(&self) -> &str {
        let index = self.current_provider.load(Ordering::Relaxed) % self.urls.len();
        &self.urls[index]
    }

    pub fn rotate_provider(&self) {
        let current = self.current_provider.load(Ordering::Relaxed);
        let next = (current + 1) % self.providers.len();
        self.current_provider.store(next, Ordering::Relaxed);

        if self.providers.len() > 1 {
            debug!("Rotating to RPC provider #{}", next);
        }
    }

    fn get_retry_strategy(&self) -> impl Iterator<Item = Duration> {
        ExponentialBackoff::from_millis(100)
            .factor(2)
            .max_delay(Duration::from_secs(10))
            .map(jitter)
            .take(self.max_retries)
    }

    fn handle_error(&self, error_str: &str) {
        let current_url = self.get_current_url();
        warn!(
            "RPC error on {}: {}, rotating provider",
            current_url, error_str
        );
        self.rotate_provider();
    }

    fn handle_timeout(&self) -> anyhow::Error {
        let current_url = self.get_current_url();
        warn!(
            "Request timeout after {} seconds on {}, rotating provider",
            REQUEST_TIMEOUT.as_secs(),
            current_url
        );
        self.rotate_provider();
        anyhow::anyhow!(
            "Request timeout after {} seconds",
            REQUEST_TIMEOUT.as_secs()
        )
    }

    pub async fn get_latest_block(&self) -> Result<u64> {
        let client = self.clone();
        Retry::spawn(self.get_retry_strategy(), move || {
            let client = client.clone();
            async move {
                let provider = client.get_provider();
                match timeout(REQUEST_TIMEOUT, provider.get_block_number()).await {
                    Ok(Ok(block_number)) => Ok(block_number),
                    Ok(Err(e)) => {
                        let error_str = e.to_string();
                        client.handle_error(&error_str);
                        Err(anyhow::anyhow!("{}", e))
                    }
                    Err(_) => Err(client.handle_timeout()),
                }
            }
        })
        .await
    }

    pub async fn get_chain_id(&self) -> Result<u64> {
        let client = self.clone();
        Retry::spawn(self.get_retry_strategy(), move || {
            let client = client.clone();
            async move {
                let provider = client.get_provider();
                match timeout(REQUEST_TIMEOUT, provider.get_chain_id()).await {
                    Ok(Ok(chain_id)) => Ok(chain_id),
                    Ok(Err(e)) => {
                        let error_str = e.to_string();
                        client.handle_error(&error_str);
                        Err(anyhow::anyhow!("{}", e))
                    }
                    Err(_) => Err(client.handle_timeout()),
                }
            }
        })
        .await
    }

    pub async fn get_code_at_block(&self, address: Address, block_number: u64) -> Result<Bytes> {
        let client = self.clone();
        Retry::spawn(self.get_retry_strategy(), move || {
            let client = client.clone();
            async move {
                let provider = client.get_provider();
                let future = provider
                    .get_code_at(address)
                    .block_id(BlockNumberOrTag::Number(block_number).into());

                match timeout(REQUEST_TIMEOUT, future).await {
                    Ok(Ok(result)) => Ok(result),
                    Ok(Err(e)) => {
                        let error_str = e.to_string();
                        client.handle_error(&error_str);
                        Err(anyhow::anyhow!("{}", e))
                    }
                    Err(_) => Err(client.handle_timeout()),
                }
            }
        })
        .await
    }

    /// Read-only `eth_call` against a contract. Reverts are returned as errors
    /// straight away instead of being retried.
    pub async fn call_contract<C: SolCall>(
        &self,
        address: Address,
        call: C,
    ) -> Result<C::Return> {
        let input = Bytes::from(call.abi_encode());
        let client = self.clone();
        let output = Retry::spawn(self.get_retry_strategy(), move || {
            let client = client.clone();
            let input = input.clone();
            async move {
                let provider = client.get_provider();
                let tx = TransactionRequest::default()
                    .to(address)
                    .input(TransactionInput::new(input));

                match timeout(REQUEST_TIMEOUT, provider.call(tx)).await {
                    Ok(Ok(output)) => Ok(Ok(output)),
                    Ok(Err(e)) => {
                        let error_str = e.to_string();
                        if error_str.contains("revert") {
                            Ok(Err(anyhow::anyhow!("{}", e)))
                        } else {
                            client.handle_error(&error_str);
                            Err(anyhow::anyhow!("{}", e))
                        }
                    }
                    Err(_) => Err(client.handle_timeout()),
                }
            }
        })
        .await
        .and_then(|r| r)?;

        C::abi_decode_returns(&output)
            .map_err(|e| anyhow::anyhow!("Failed to decode call result: {}", e))
    }

    async fn get_logs_internal(
        &self,
        filter: &Filter,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<Log>> {
        let client = self.clone();
        let filter = filter.clone().from_block(from_block).to_block(to_block);
        Retry::spawn(self.get_retry_strategy(), move || {
            let client = client.clone();
            let filter = filter.clone();
            async move {
                let provider = client.get_provider();

                match timeout(REQUEST_TIMEOUT, provider.get_logs(&filter)).await {
                    Ok(Ok(logs)) => Ok(Ok(logs)),
                    Ok(Err(e)) => {
                        let error_str = e.to_string();

                        if error_str.contains("exceeds max results") {
                            debug!(
                                "Max results exceeded for blocks {}-{}, will split range",
                                from_block, to_block
                            );
                            // not retryable as-is, the caller narrows the range
                            Ok(Err(anyhow::anyhow!("{}", e)))
                        } else {
                            client.handle_error(&error_str);
                            Err(anyhow::anyhow!("{}", e))
                        }
                    }
                    Err(_) => Err(client.handle_timeout()),
                }
            }
        })
        .await
        .and_then(|r| r)
    }

    fn parse_max_results_error(error_str: &str) -> Option<(u64, u64)> {
        let re = Regex::new(r"retry with the range (\d+)-(\d+)").ok()?;
        let captures = re.captures(error_str)?;

        let from = captures.get(1)?.as_str().parse().ok()?;
        let to = captures.get(2)?.as_str().parse().ok()?;

        Some((from, to))
    }

    /// End of the next sub-range to request after a max-results error. The
    /// provider's suggestion is used only when it starts at `from_block`;
    /// otherwise the range is halved. `None` once a single block overflows.
    fn narrowed_range_end(error_str: &str, from_block: u64, to_block: u64) -> Option<u64> {
        match Self::parse_max_results_error(error_str) {
            Some((suggested_from, suggested_to))
                if suggested_from == from_block && suggested_to < to_block =>
            {
                Some(suggested_to)
            }
            _ if from_block < to_block => Some(from_block + (to_block - from_block) / 2),
            _ => None,
        }
    }

    /// Fetch all logs matching `filter` in `[from_block, to_block]`, narrowing
    /// the range whenever the provider caps the result size.
    pub async fn get_logs(
        &self,
        filter: &Filter,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<Log>> {
        let mut all_logs = Vec::new();
        let mut current_from = from_block;
        let mut current_to = to_block;

        while current_from <= to_block {
            match self.get_logs_internal(filter, current_from, current_to).await {
                Ok(logs) => {
                    all_logs.extend(logs);
                    if current_to == to_block {
                        break;
                    }
                    current_from = current_to + 1;
                    current_to = to_block;
                }
                Err(e) => {
                    let error_str = e.to_string();
                    if !error_str.contains("exceeds max results") {
                        return Err(e);
                    }

                    let Some(narrowed_to) =
                        Self::narrowed_range_end(&error_str, current_from, current_to)
                    else {
                        return Err(e);
                    };

                    info!(
                        "Hit max results limit for blocks {}-{}, splitting at block {}",
                        current_from, current_to, narrowed_to
                    );
                    current_to = narrowed_to;
                }
            }
        }

        Ok(all_logs)
    }
}

/// `Transfer` logs of `contract` where the wallet is the recipient (topic 2)
/// or the sender (topic 1).
pub fn transfer_filter(contract: Address, wallet: Address, direction: Direction) -> Filter {
    let filter = Filter::new()
        .address(contract)
        .event_signature(Transfer::SIGNATURE_HASH);

    match direction {
        Direction::Received => filter.topic2(wallet.into_word()),
        Direction::Sent => filter.topic1(wallet.into_word()),
    }
}

impl TransferLogSource for RpcClient {
    async fn latest_block(&self) -> Result<u64> {
        self.get_latest_block().await
    }

    async fn transfer_events(&self, query: &TransferQuery) -> Result<Vec<TransferEvent>> {
        let filter = transfer_filter(query.contract, query.wallet, query.direction);
        let logs = self.get_logs(&filter, query.from_block, query.to_block).await?;

        Ok(logs
            .iter()
            .filter_map(|log| to_transfer_event(log, query.direction))
            .collect())
    }
}

impl ContractReader for RpcClient {
    async fn owner_of(&self, contract: Address, token_id: TokenId) -> Result<Address> {
        self.call_contract(contract, ownerOfCall { tokenId: token_id }).await
    }

    async fn token_uri(&self, contract: Address, token_id: TokenId) -> Result<String> {
        self.call_contract(contract, tokenURICall { tokenId: token_id }).await
    }
}
