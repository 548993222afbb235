pub mod cache;
pub mod config;
pub mod deployment;
pub mod error;
pub mod events;
pub mod metadata;
pub mod ownership;
pub mod query;
pub mod repository;
pub mod rpc;
pub mod scanner;
pub mod sync;

pub use cache::{CacheKey, KeyValueStore, MemoryStore, OwnershipCache, OwnershipHint};
pub use error::ScanError;
pub use events::{Direction, TokenId, TransferEvent};
pub use metadata::ContractReader;
pub use ownership::build_ownership_set;
pub use scanner::{
    ChunkResult, OwnershipScanner, ScanCursor, ScanProgress, TransferLogSource, TransferQuery,
};
pub use sync::{OwnershipSync, SyncStep};
