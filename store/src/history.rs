use crate::decode_payload;
use async_trait::async_trait;
use events::{oldest_first, Channel, Error, HistoryStore, Message};
use log::*;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

/// Reads the recent-history list Redis keeps for each channel.
#[derive(Clone)]
pub struct RedisHistoryStore {
    connection: ConnectionManager,
    key_suffix: String,
}

impl RedisHistoryStore {
    pub fn new(connection: ConnectionManager, key_suffix: impl Into<String>) -> Self {
        Self {
            connection,
            key_suffix: key_suffix.into(),
        }
    }
}

#[async_trait]
impl HistoryStore for RedisHistoryStore {
    async fn fetch_recent(&self, channel: &Channel) -> Result<Vec<Message>, Error> {
        let key = channel.history_key(&self.key_suffix);
        let mut connection = self.connection.clone();

        // Publishers LPUSH, so the list comes back newest-first.
        let newest_first: Vec<Vec<u8>> = connection
            .lrange(&key, 0, -1)
            .await
            .map_err(Error::store_unavailable)?;

        debug!("Fetched {} history entries from {key}", newest_first.len());

        let payloads: Vec<String> = newest_first.iter().map(|b| decode_payload(b)).collect();
        Ok(oldest_first(channel, payloads))
    }
}
