//! Redis-backed [`SetStore`].

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use tracing::info;

use super::ChannelStoreError;
use super::external::SetStore;

/// [`SetStore`] issuing `SADD`/`SREM`/`SMEMBERS`/`DEL` over one multiplexed
/// connection. Redis deletes a set when its last member is removed.
#[derive(Clone)]
pub struct RedisSetStore {
    conn: MultiplexedConnection,
}

impl RedisSetStore {
    /// Connect to the server at `url`.
    pub async fn connect(url: &str) -> Result<Self, ChannelStoreError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        info!(url, "connected to shared set store");
        Ok(Self { conn })
    }
}

#[async_trait]
impl SetStore for RedisSetStore {
    async fn add(&self, key: &str, member: &str) -> Result<(), ChannelStoreError> {
        let mut conn = self.conn.clone();
        redis::cmd("SADD")
            .arg(key)
            .arg(member)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn remove(&self, key: &str, member: &str) -> Result<(), ChannelStoreError> {
        let mut conn = self.conn.clone();
        redis::cmd("SREM")
            .arg(key)
            .arg(member)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn members(&self, key: &str) -> Result<Vec<String>, ChannelStoreError> {
        let mut conn = self.conn.clone();
        let members: Vec<String> = redis::cmd("SMEMBERS")
            .arg(key)
            .query_async(&mut conn)
            .await?;
        Ok(members)
    }

    async fn delete(&self, key: &str) -> Result<(), ChannelStoreError> {
        let mut conn = self.conn.clone();
        redis::cmd("DEL")
            .arg(key)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn invalid_url_is_an_error() {
        let result = RedisSetStore::connect("not-a-redis-url").await;
        assert!(matches!(result, Err(ChannelStoreError::Redis(_))));
    }
}
