//! Redis backend for the stream bridge.
//!
//! - `RedisHistoryStore` reads the `<channel><suffix>` list with a full-range
//!   `LRANGE` and reverses it into replay order.
//! - `RedisSource` opens one dedicated pub/sub connection per subscribed
//!   channel; the returned stream ends when that connection drops.

use events::Error;
use log::*;
use redis::aio::ConnectionManager;
use service::config::Config;

pub mod history;
pub mod pubsub;

pub use history::RedisHistoryStore;
pub use pubsub::RedisSource;

/// Both halves of the Redis backend, sharing one client configuration.
pub struct Redis {
    pub history: RedisHistoryStore,
    pub source: RedisSource,
}

/// Connects to the configured Redis endpoint.
///
/// The history connection is established eagerly so that a wrong endpoint is
/// reported at startup; it reconnects on its own afterwards. Pub/sub
/// connections are opened per channel by the subscription supervisor.
pub async fn init_redis(config: &Config) -> Result<Redis, Error> {
    let client = redis::Client::open(config.redis_url()).map_err(Error::connect_failed)?;
    info!("Connecting to Redis at {}", client.get_connection_info().addr);

    let connection = ConnectionManager::new(client.clone())
        .await
        .map_err(Error::store_unavailable)?;

    Ok(Redis {
        history: RedisHistoryStore::new(connection, config.history_key_suffix()),
        source: RedisSource::from_client(client),
    })
}

/// Redis values are binary-safe; payloads are forwarded as text.
pub(crate) fn decode_payload(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}
