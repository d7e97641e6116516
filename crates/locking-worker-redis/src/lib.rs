//! Redis backend for locking workers.

pub mod provider;
pub mod store;

pub use provider::{RedisLockProvider, RedisLockProviderBuilder};
pub use store::{RedisLockStore, RedisWatch};
