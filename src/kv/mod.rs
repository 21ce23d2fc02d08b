//! Key-value backend: pooled connections, an expiring string cache and
//! publish/subscribe messaging.

pub mod cache;
pub mod pool;
pub mod pubsub;

pub use cache::KeyValueCache;
pub use pool::{KeyValueDatabase, KvConnection, KvPool, RedisConnectionManager};
pub use pubsub::{PubSubChannel, PubSubMessage};
