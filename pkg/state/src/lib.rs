pub mod client;
pub mod memory;
pub mod redis_store;

pub use client::{StateStore, StoreHandle, StoreOp};
pub use memory::MemoryStore;
pub use redis_store::RedisStore;
