pub mod cache_repository;
pub mod database;

pub use cache_repository::CacheRepository;
pub use database::Database;
