use crate::error::ScanError;
use crate::events::TokenId;
use crate::ownership::sorted_descending;
use alloy_primitives::Address;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;
use tracing::{debug, warn};

pub const CACHE_KEY_PREFIX: &str = "nft-owned";

/// Minimal string key/value storage, the shape of a browser's local storage.
pub trait KeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store lock poisoned"))?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store lock poisoned"))?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store lock poisoned"))?;
        entries.remove(key);
        Ok(())
    }
}

/// Identifies one wallet's holdings of one contract on one chain.
/// Addresses are rendered as fixed-width lowercase hex, so checksum casing of
/// the inputs never produces a second key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(chain_id: u64, contract_address: Address, wallet_address: Address) -> Self {
        let key = format!("{CACHE_KEY_PREFIX}:{chain_id}:{contract_address:?}:{wallet_address:?}");
        CacheKey(key.to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Unverified, possibly stale list of token ids remembered from an earlier
/// scan. Only useful as a prefetch hint until a scan confirms it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnershipHint {
    pub token_ids: Vec<TokenId>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredEntry {
    token_ids: Vec<String>,
    updated_at: DateTime<Utc>,
}

impl StoredEntry {
    fn into_hint(self) -> Result<OwnershipHint> {
        let token_ids = self
            .token_ids
            .iter()
            .map(|id| {
                TokenId::from_str(id)
                    .map_err(|_| anyhow::anyhow!("Invalid token id in cache: {}", id))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(OwnershipHint {
            token_ids,
            updated_at: self.updated_at,
        })
    }
}

/// Reconciles the locally persisted ownership hint with on-chain results.
/// Storage failures are logged and swallowed: losing the cache only costs a
/// slower first paint.
pub struct OwnershipCache<S> {
    store: S,
}

impl<S: KeyValueStore> OwnershipCache<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn load(&self, key: &CacheKey) -> Option<OwnershipHint> {
        let raw = match self.store.get(key.as_str()) {
            Ok(raw) => raw?,
            Err(e) => {
                storage_failure("read", key, &e);
                return None;
            }
        };

        match serde_json::from_str::<StoredEntry>(&raw)
            .map_err(anyhow::Error::from)
            .and_then(StoredEntry::into_hint)
        {
            Ok(hint) => Some(hint),
            Err(e) => {
                warn!("Ignoring unreadable cache entry {}: {}", key, e);
                None
            }
        }
    }

    /// Cached ids only, empty when nothing usable is stored.
    pub fn cached_ids(&self, key: &CacheKey) -> Vec<TokenId> {
        self.load(key).map(|hint| hint.token_ids).unwrap_or_default()
    }

    /// Union the cache with freshly scanned ids. Never drops a cached id: a
    /// partial scan cannot prove the wallet no longer holds it.
    pub fn merge_with_scanned(&self, key: &CacheKey, scanned_ids: &[TokenId]) -> Vec<TokenId> {
        let mut merged: BTreeSet<TokenId> = self.cached_ids(key).into_iter().collect();
        merged.extend(scanned_ids.iter().copied());

        let merged = sorted_descending(merged);
        self.save(key, &merged);
        merged
    }

    /// Replace the cache with the ownership set of a completed scan. An empty
    /// verified set leaves the cache alone, since it is more likely a failed
    /// query than a wallet that sold everything.
    pub fn sync_with_verified(&self, key: &CacheKey, verified_ids: &[TokenId]) {
        if verified_ids.is_empty() {
            debug!("Skipping cache sync for {}: verified set is empty", key);
            return;
        }

        let cached: BTreeSet<TokenId> = self.cached_ids(key).into_iter().collect();
        let verified: BTreeSet<TokenId> = verified_ids.iter().copied().collect();
        let dropped = cached.difference(&verified).count();
        let added = verified.difference(&cached).count();
        if dropped > 0 || added > 0 {
            debug!(
                "Cache sync for {}: {} stale id(s) dropped, {} id(s) added",
                key, dropped, added
            );
        }

        self.save(key, &sorted_descending(verified));
    }

    pub fn clear(&self, key: &CacheKey) {
        if let Err(e) = self.store.remove(key.as_str()) {
            storage_failure("clear", key, &e);
        }
    }

    fn save(&self, key: &CacheKey, token_ids: &[TokenId]) {
        let entry = StoredEntry {
            token_ids: token_ids.iter().map(|id| id.to_string()).collect(),
            updated_at: Utc::now(),
        };

        let result = serde_json::to_string(&entry)
            .map_err(anyhow::Error::from)
            .and_then(|raw| self.store.set(key.as_str(), &raw));

        if let Err(e) = result {
            storage_failure("write", key, &e);
        }
    }
}

fn storage_failure(operation: &str, key: &CacheKey, error: &anyhow::Error) {
    let error = ScanError::StorageUnavailable(format!("{operation} {key}: {error:#}"));
    warn!("{}; continuing without cache", error);
}
