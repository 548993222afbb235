use crate::cache::{CacheKey, KeyValueStore, OwnershipCache, OwnershipHint};
use crate::error::ScanError;
use crate::events::TokenId;
use crate::scanner::{ChunkResult, OwnershipScanner, TransferLogSource};
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{info, warn};

const MIN_CHUNK_INTERVAL_MS: u64 = 200; // 5 chunks per second at most
const RETRY_BACKOFF_MS: u64 = 1_000;
const MAX_CHUNK_RETRIES: u32 = 5;

/// Result of one scan step as the caller should show it.
#[derive(Debug, Clone)]
pub struct SyncStep {
    pub chunk: ChunkResult,
    /// While the scan is partial: cached hint plus everything scanned so far.
    /// Once complete: exactly the scanned ownership set.
    pub display_ids: Vec<TokenId>,
}

impl SyncStep {
    pub fn is_complete(&self) -> bool {
        !self.chunk.has_more
    }
}

/// Drives one wallet's scan and keeps its local cache reconciled with it.
pub struct OwnershipSync<S, K> {
    scanner: OwnershipScanner<S>,
    cache: OwnershipCache<K>,
    key: CacheKey,
    min_chunk_interval: Duration,
    retry_backoff: Duration,
    max_retries: u32,
}

impl<S: TransferLogSource, K: KeyValueStore> OwnershipSync<S, K> {
    pub fn new(scanner: OwnershipScanner<S>, cache: OwnershipCache<K>, chain_id: u64) -> Self {
        let key = CacheKey::new(chain_id, scanner.contract_address(), scanner.wallet());
        Self {
            scanner,
            cache,
            key,
            min_chunk_interval: Duration::from_millis(MIN_CHUNK_INTERVAL_MS),
            retry_backoff: Duration::from_millis(RETRY_BACKOFF_MS),
            max_retries: MAX_CHUNK_RETRIES,
        }
    }

    pub fn with_pacing(mut self, min_chunk_interval: Duration, retry_backoff: Duration) -> Self {
        self.min_chunk_interval = min_chunk_interval;
        self.retry_backoff = retry_backoff;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn scanner(&self) -> &OwnershipScanner<S> {
        &self.scanner
    }

    pub fn cache(&self) -> &OwnershipCache<K> {
        &self.cache
    }

    /// What to paint before any scan result arrives. Unverified.
    pub fn cached_hint(&self) -> Option<OwnershipHint> {
        self.cache.load(&self.key)
    }

    /// Scan one chunk and fold it into the cache: union while partial, exact
    /// replacement once the history is complete.
    pub async fn scan_step(&self) -> Result<SyncStep, ScanError> {
        let chunk = self.scanner.scan_next_chunk().await?;

        let display_ids = if chunk.has_more {
            self.cache.merge_with_scanned(&self.key, &chunk.owned_token_ids)
        } else {
            self.cache.sync_with_verified(&self.key, &chunk.owned_token_ids);
            chunk.owned_token_ids.clone()
        };

        Ok(SyncStep { chunk, display_ids })
    }

    /// Scan until the deploy block is reached, retrying throttled or failed
    /// chunks with a growing delay. Returns the verified ownership set.
    pub async fn run_to_completion(
        &self,
        mut on_step: impl FnMut(&SyncStep),
    ) -> Result<Vec<TokenId>, ScanError> {
        let mut attempt = 0u32;

        loop {
            let started = Instant::now();

            let step = match self.scan_step().await {
                Ok(step) => {
                    attempt = 0;
                    step
                }
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    let delay = self.retry_backoff * 2u32.saturating_pow(attempt - 1);
                    match &e {
                        ScanError::RateLimited(_) => {
                            warn!("Rate limited, waiting {:?} before retry {}...", delay, attempt)
                        }
                        _ => warn!("Chunk failed ({}), retry {} in {:?}", e, attempt, delay),
                    }
                    sleep(delay).await;
                    continue;
                }
                Err(e) => return Err(e),
            };

            on_step(&step);

            if step.is_complete() {
                info!(
                    "Scan complete for wallet {:?}: {} token(s) owned",
                    self.scanner.wallet(),
                    step.chunk.owned_token_ids.len()
                );
                return Ok(step.chunk.owned_token_ids);
            }

            let elapsed = started.elapsed();
            if elapsed < self.min_chunk_interval {
                sleep(self.min_chunk_interval - elapsed).await;
            }
        }
    }

    /// Start the scan over. The cache is kept as a hint for the next run.
    pub async fn reset(&self) -> Result<(), ScanError> {
        self.scanner.reset().await
    }

    pub fn clear_cache(&self) {
        self.cache.clear(&self.key);
    }
}
