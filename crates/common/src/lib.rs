pub mod config;
pub mod error;
pub mod redis_pool;
pub mod types;
