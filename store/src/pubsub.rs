use crate::decode_payload;
use async_trait::async_trait;
use events::{Channel, Error, Message, MessageSource, MessageStream};
use futures::StreamExt;
use log::*;

/// Redis pub/sub. Each `subscribe` opens its own connection so that one
/// channel's connection loss never affects another.
#[derive(Clone)]
pub struct RedisSource {
    client: redis::Client,
}

impl RedisSource {
    pub fn open(redis_url: &str) -> Result<Self, Error> {
        let client = redis::Client::open(redis_url).map_err(Error::connect_failed)?;
        Ok(Self::from_client(client))
    }

    pub fn from_client(client: redis::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl MessageSource for RedisSource {
    async fn subscribe(&self, channel: &Channel) -> Result<MessageStream, Error> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(Error::connect_failed)?;

        pubsub
            .subscribe(channel.as_str())
            .await
            .map_err(Error::subscribe_failed)?;

        debug!("Redis SUBSCRIBE {channel} acknowledged");

        let channel = channel.clone();
        let stream = pubsub
            .into_on_message()
            .map(move |msg| Message::new(channel.clone(), decode_payload(msg.get_payload_bytes())));

        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use events::{ErrorKind, SubscriptionErrorKind};

    #[test]
    fn test_open_rejects_malformed_url() {
        let err = RedisSource::open("not a redis url").err().unwrap();
        assert_eq!(
            err.error_kind,
            ErrorKind::Subscription(SubscriptionErrorKind::ConnectFailed)
        );
    }

    #[test]
    fn test_open_accepts_redis_url_without_connecting() {
        assert!(RedisSource::open("redis://127.0.0.1:6379").is_ok());
    }
}
