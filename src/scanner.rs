use crate::error::ScanError;
use crate::events::{Direction, TokenId, TransferEvent};
use crate::ownership::{build_ownership_set, sorted_descending};
use alloy_primitives::Address;
use anyhow::Result;
use futures::future::try_join;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// One `Transfer` log query: a single direction over an inclusive block range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferQuery {
    pub contract: Address,
    pub wallet: Address,
    pub direction: Direction,
    pub from_block: u64,
    pub to_block: u64,
}

/// Where transfer logs come from. Implemented by the RPC client; tests script it.
#[allow(async_fn_in_trait)]
pub trait TransferLogSource {
    async fn latest_block(&self) -> Result<u64>;
    async fn transfer_events(&self, query: &TransferQuery) -> Result<Vec<TransferEvent>>;
}

/// How far back the scanner has walked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanCursor {
    pub latest_block: u64,
    pub current_to_block: u64,
    pub contract_deploy_block: u64,
    pub block_range: u64,
    pub has_more: bool,
}

impl ScanCursor {
    fn start(latest_block: u64, contract_deploy_block: u64, block_range: u64) -> Self {
        Self {
            latest_block,
            current_to_block: latest_block,
            contract_deploy_block,
            block_range,
            has_more: latest_block >= contract_deploy_block,
        }
    }

    /// First block of the next window; windows are `block_range` blocks wide
    /// and never reach below the deploy block.
    pub fn window_start(&self) -> u64 {
        self.current_to_block
            .saturating_sub(self.block_range.saturating_sub(1))
            .max(self.contract_deploy_block)
    }

    fn advance(&self, from_block: u64) -> Self {
        Self {
            current_to_block: from_block.saturating_sub(1),
            has_more: from_block > self.contract_deploy_block,
            ..*self
        }
    }

    pub fn progress(&self) -> ScanProgress {
        let total = self.latest_block.saturating_sub(self.contract_deploy_block);
        let scanned = if self.has_more {
            self.latest_block.saturating_sub(self.current_to_block).min(total)
        } else {
            total
        };

        let percent = if total == 0 {
            if self.has_more { 0.0 } else { 100.0 }
        } else {
            (scanned as f64 / total as f64 * 100.0).clamp(0.0, 100.0)
        };

        ScanProgress {
            scanned,
            total,
            percent,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ScanProgress {
    pub scanned: u64,
    pub total: u64,
    pub percent: f64,
}

/// Outcome of one `scan_next_chunk` call. `owned_token_ids` is always
/// recomputed from the whole accumulated history, so an older chunk can
/// retract a token reported by a newer one.
#[derive(Debug, Clone)]
pub struct ChunkResult {
    pub owned_token_ids: Vec<TokenId>,
    pub has_more: bool,
    pub progress: ScanProgress,
    pub new_received: Vec<TransferEvent>,
    pub new_sent: Vec<TransferEvent>,
}

#[derive(Debug, Default)]
struct ScanState {
    cursor: Option<ScanCursor>,
    received: Vec<TransferEvent>,
    sent: Vec<TransferEvent>,
}

impl ScanState {
    fn owned_token_ids(&self) -> Vec<TokenId> {
        sorted_descending(build_ownership_set(&self.received, &self.sent))
    }
}

/// Walks a contract's `Transfer` history backward from the chain head for a
/// single wallet, one block window per call.
///
/// State sits behind an async mutex that doubles as the re-entrancy guard: a
/// call made while another is in flight fails with
/// [`ScanError::ScanInProgress`] rather than waiting.
pub struct OwnershipScanner<S> {
    source: S,
    contract_address: Address,
    wallet: Address,
    block_range: u64,
    contract_deploy_block: u64,
    state: Mutex<ScanState>,
}

impl<S: TransferLogSource> OwnershipScanner<S> {
    pub fn new(
        source: S,
        contract_address: Address,
        wallet: Address,
        block_range: u64,
    ) -> Result<Self, ScanError> {
        if contract_address.is_zero() {
            return Err(ScanError::Configuration(
                "NFT contract address is not set".to_string(),
            ));
        }
        if block_range == 0 {
            return Err(ScanError::Configuration(
                "block range must be at least one block".to_string(),
            ));
        }

        Ok(Self {
            source,
            contract_address,
            wallet,
            block_range,
            contract_deploy_block: 0,
            state: Mutex::new(ScanState::default()),
        })
    }

    /// Lower bound for the backward walk. Zero when unknown.
    pub fn with_deploy_block(mut self, block: u64) -> Self {
        self.contract_deploy_block = block;
        self
    }

    pub fn wallet(&self) -> Address {
        self.wallet
    }

    pub fn contract_address(&self) -> Address {
        self.contract_address
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    fn acquire(&self) -> Result<MutexGuard<'_, ScanState>, ScanError> {
        self.state.try_lock().map_err(|_| ScanError::ScanInProgress)
    }

    /// Fetch the chain head and place the cursor there. Once a scan has
    /// started this returns the current cursor unchanged; use `reset` to
    /// start over.
    pub async fn initialize(&self) -> Result<ScanCursor, ScanError> {
        let mut state = self.acquire()?;
        if let Some(cursor) = state.cursor {
            debug!("Scanner already initialized for wallet {:?}", self.wallet);
            return Ok(cursor);
        }
        self.initialize_locked(&mut state).await
    }

    async fn initialize_locked(&self, state: &mut ScanState) -> Result<ScanCursor, ScanError> {
        let latest_block = self.source.latest_block().await.map_err(|e| {
            warn!("Failed to fetch chain head: {:#}", e);
            ScanError::from_rpc(&e)
        })?;

        let cursor = ScanCursor::start(latest_block, self.contract_deploy_block, self.block_range);
        info!(
            "Scanner initialized for wallet {:?}: head {}, deploy block {}",
            self.wallet, latest_block, self.contract_deploy_block
        );

        state.cursor = Some(cursor);
        Ok(cursor)
    }

    fn query(&self, direction: Direction, from_block: u64, to_block: u64) -> TransferQuery {
        TransferQuery {
            contract: self.contract_address,
            wallet: self.wallet,
            direction,
            from_block,
            to_block,
        }
    }

    /// Scan the next window below the cursor. Nothing is recorded unless both
    /// the received and the sent query succeed, so a failed chunk can simply be
    /// retried.
    pub async fn scan_next_chunk(&self) -> Result<ChunkResult, ScanError> {
        let mut state = self.acquire()?;

        let existing = state.cursor;
        let cursor = match existing {
            Some(cursor) => cursor,
            None => self.initialize_locked(&mut state).await?,
        };

        if !cursor.has_more {
            return Ok(ChunkResult {
                owned_token_ids: state.owned_token_ids(),
                has_more: false,
                progress: cursor.progress(),
                new_received: Vec::new(),
                new_sent: Vec::new(),
            });
        }

        let to_block = cursor.current_to_block;
        let from_block = cursor.window_start();
        debug!("Fetching transfer logs for blocks {} to {}", from_block, to_block);

        let received_query = self.query(Direction::Received, from_block, to_block);
        let sent_query = self.query(Direction::Sent, from_block, to_block);

        let (new_received, new_sent) = try_join(
            self.source.transfer_events(&received_query),
            self.source.transfer_events(&sent_query),
        )
        .await
        .map_err(|e| {
            warn!(
                "Transfer log query failed for blocks {} to {}: {:#}",
                from_block, to_block, e
            );
            ScanError::from_rpc(&e)
        })?;

        state.received.extend(new_received.iter().cloned());
        state.sent.extend(new_sent.iter().cloned());

        let next = cursor.advance(from_block);
        state.cursor = Some(next);

        let progress = next.progress();
        info!(
            "Scanned blocks {} to {}: {} received, {} sent ({:.1}% complete)",
            from_block,
            to_block,
            new_received.len(),
            new_sent.len(),
            progress.percent
        );

        Ok(ChunkResult {
            owned_token_ids: state.owned_token_ids(),
            has_more: next.has_more,
            progress,
            new_received,
            new_sent,
        })
    }

    /// Waits for an in-flight chunk to finish before reading.
    pub async fn get_progress(&self) -> ScanProgress {
        let state = self.state.lock().await;
        state.cursor.map(|c| c.progress()).unwrap_or_default()
    }

    pub async fn cursor(&self) -> Option<ScanCursor> {
        self.state.lock().await.cursor
    }

    /// Forget everything scanned so far. The local cache is left alone.
    pub async fn reset(&self) -> Result<(), ScanError> {
        let mut state = self.acquire()?;
        *state = ScanState::default();
        debug!("Scanner state reset for wallet {:?}", self.wallet);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{U256, address};
    use std::sync::Mutex as StdMutex;

    const CONTRACT: Address = address!("0x00000000000000000000000000000000000000aa");
    const WALLET: Address = address!("0x00000000000000000000000000000000000000bb");

    #[derive(Default)]
    struct ScriptedSource {
        head: u64,
        events: Vec<TransferEvent>,
        queries: StdMutex<Vec<TransferQuery>>,
        fail_sent: StdMutex<Option<String>>,
        yield_first: bool,
    }

    impl ScriptedSource {
        fn new(head: u64, events: Vec<TransferEvent>) -> Self {
            Self {
                head,
                events,
                ..Default::default()
            }
        }

        fn query_count(&self) -> usize {
            self.queries.lock().unwrap().len()
        }
    }

    impl TransferLogSource for ScriptedSource {
        async fn latest_block(&self) -> Result<u64> {
            Ok(self.head)
        }

        async fn transfer_events(&self, query: &TransferQuery) -> Result<Vec<TransferEvent>> {
            if self.yield_first {
                tokio::task::yield_now().await;
            }
            self.queries.lock().unwrap().push(*query);
            if query.direction == Direction::Sent {
                if let Some(msg) = self.fail_sent.lock().unwrap().take() {
                    return Err(anyhow::anyhow!(msg));
                }
            }
            Ok(self
                .events
                .iter()
                .filter(|e| {
                    e.direction == query.direction
                        && e.block_number >= query.from_block
                        && e.block_number <= query.to_block
                })
                .cloned()
                .collect())
        }
    }

    fn event(token: u64, block: u64, direction: Direction) -> TransferEvent {
        TransferEvent::new(U256::from(token), block, 0, direction)
    }

    fn scanner(source: ScriptedSource, range: u64) -> OwnershipScanner<ScriptedSource> {
        OwnershipScanner::new(source, CONTRACT, WALLET, range).unwrap()
    }

    #[test]
    fn test_rejects_bad_configuration() {
        let zero_contract =
            OwnershipScanner::new(ScriptedSource::default(), Address::ZERO, WALLET, 10);
        assert!(matches!(zero_contract, Err(ScanError::Configuration(_))));

        let zero_range = OwnershipScanner::new(ScriptedSource::default(), CONTRACT, WALLET, 0);
        assert!(matches!(zero_range, Err(ScanError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_initialize_sets_cursor_at_head() {
        let scanner = scanner(ScriptedSource::new(1_000, vec![]), 100);

        let cursor = scanner.initialize().await.unwrap();

        assert_eq!(cursor.latest_block, 1_000);
        assert_eq!(cursor.current_to_block, 1_000);
        assert!(cursor.has_more);
    }

    #[tokio::test]
    async fn test_initialize_mid_scan_keeps_cursor() {
        let events = vec![event(4, 990_000, Direction::Received)];
        let scanner = scanner(ScriptedSource::new(1_000_000, events), 50_000);

        let first = scanner.scan_next_chunk().await.unwrap();
        assert_eq!(first.progress.scanned, 50_000);

        let cursor = scanner.initialize().await.unwrap();
        assert_eq!(cursor.current_to_block, 950_000);
        assert_eq!(scanner.get_progress().await.scanned, 50_000);

        let second = scanner.scan_next_chunk().await.unwrap();
        assert!(second.new_received.is_empty());
        assert_eq!(second.progress.scanned, 100_000);
        assert_eq!(second.owned_token_ids, vec![U256::from(4)]);
    }

    #[tokio::test]
    async fn test_windows_walk_backward_without_gaps() {
        let scanner =
            scanner(ScriptedSource::new(1_000_000, vec![]), 50_000).with_deploy_block(880_000);

        scanner.scan_next_chunk().await.unwrap();
        scanner.scan_next_chunk().await.unwrap();
        let last = scanner.scan_next_chunk().await.unwrap();

        let queries = scanner.source().queries.lock().unwrap().clone();
        let windows: Vec<(u64, u64)> = queries
            .iter()
            .filter(|q| q.direction == Direction::Received)
            .map(|q| (q.from_block, q.to_block))
            .collect();
        assert_eq!(
            windows,
            vec![(950_001, 1_000_000), (900_001, 950_000), (880_000, 900_000)]
        );
        assert!(!last.has_more);
        assert_eq!(last.progress.percent, 100.0);
    }

    #[tokio::test]
    async fn test_no_queries_after_completion() {
        let events = vec![event(3, 40, Direction::Received)];
        let scanner = scanner(ScriptedSource::new(99, events), 100);

        let first = scanner.scan_next_chunk().await.unwrap();
        assert!(!first.has_more);
        assert_eq!(scanner.source().query_count(), 2);

        let again = scanner.scan_next_chunk().await.unwrap();
        assert!(!again.has_more);
        assert_eq!(again.owned_token_ids, vec![U256::from(3)]);
        assert!(again.new_received.is_empty());
        assert_eq!(scanner.source().query_count(), 2);
    }

    #[tokio::test]
    async fn test_failed_chunk_leaves_state_untouched() {
        let events = vec![event(1, 950, Direction::Received), event(2, 900, Direction::Received)];
        let source = ScriptedSource::new(1_000, events);
        *source.fail_sent.lock().unwrap() = Some("HTTP 429 Too Many Requests".to_string());
        let scanner = scanner(source, 200);

        let err = scanner.scan_next_chunk().await.unwrap_err();
        assert!(matches!(err, ScanError::RateLimited(_)));

        let cursor = scanner.cursor().await.unwrap();
        assert_eq!(cursor.current_to_block, 1_000);
        assert_eq!(scanner.get_progress().await.scanned, 0);

        let retried = scanner.scan_next_chunk().await.unwrap();
        assert_eq!(retried.owned_token_ids, vec![U256::from(2), U256::from(1)]);
        assert_eq!(retried.new_received.len(), 2);
    }

    #[tokio::test]
    async fn test_network_failure_is_classified() {
        let source = ScriptedSource::new(1_000, vec![]);
        *source.fail_sent.lock().unwrap() = Some("connection reset".to_string());
        let scanner = scanner(source, 200);

        let err = scanner.scan_next_chunk().await.unwrap_err();
        assert!(matches!(err, ScanError::Network(_)));
    }

    #[tokio::test]
    async fn test_progress_is_monotonic_and_bounded() {
        let scanner = scanner(ScriptedSource::new(10_000, vec![]), 3_000).with_deploy_block(1_000);

        let mut last_scanned = 0;
        loop {
            let result = scanner.scan_next_chunk().await.unwrap();
            let progress = scanner.get_progress().await;
            assert_eq!(progress, result.progress);
            assert!(progress.scanned >= last_scanned);
            assert!(progress.percent <= 100.0);
            assert_eq!(progress.total, 9_000);
            last_scanned = progress.scanned;
            if !result.has_more {
                break;
            }
        }
        assert_eq!(last_scanned, 9_000);
    }

    #[tokio::test]
    async fn test_head_below_deploy_block_has_nothing_to_scan() {
        let scanner = scanner(ScriptedSource::new(50, vec![]), 10).with_deploy_block(100);

        let result = scanner.scan_next_chunk().await.unwrap();

        assert!(!result.has_more);
        assert_eq!(result.progress.percent, 100.0);
        assert_eq!(scanner.source().query_count(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_scan_is_rejected() {
        let source = ScriptedSource {
            head: 1_000,
            yield_first: true,
            ..Default::default()
        };
        let scanner = scanner(source, 100);
        scanner.initialize().await.unwrap();

        let (first, second) = tokio::join!(scanner.scan_next_chunk(), scanner.scan_next_chunk());

        assert!(first.is_ok());
        assert!(matches!(second, Err(ScanError::ScanInProgress)));
        assert_eq!(scanner.cursor().await.unwrap().current_to_block, 900);
    }

    #[tokio::test]
    async fn test_reset_clears_history() {
        let events = vec![event(5, 10, Direction::Received)];
        let scanner = scanner(ScriptedSource::new(20, events), 100);
        scanner.scan_next_chunk().await.unwrap();

        scanner.reset().await.unwrap();

        assert!(scanner.cursor().await.is_none());
        assert_eq!(scanner.get_progress().await, ScanProgress::default());
        let rescanned = scanner.scan_next_chunk().await.unwrap();
        assert_eq!(rescanned.owned_token_ids, vec![U256::from(5)]);
    }
}
