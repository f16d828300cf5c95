//! Redis-backed L2 transport.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisError};
use tracing::debug;

use crate::cache::{DistributedTransport, TransportError};

use super::error::InfraError;

const SCAN_BATCH: usize = 500;

#[derive(Clone)]
pub struct RedisTransport {
    conn: ConnectionManager,
}

impl RedisTransport {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    /// Open a managed connection to `url`.
    pub async fn connect(url: &str) -> Result<Self, InfraError> {
        let client = Client::open(url)
            .map_err(|err| InfraError::redis(format!("invalid redis url: {err}")))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|err| InfraError::redis(format!("failed to connect: {err}")))?;
        Ok(Self::new(conn))
    }
}

#[async_trait]
impl DistributedTransport for RedisTransport {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, TransportError> {
        let mut conn = self.conn.clone();
        let value: Option<Vec<u8>> = conn.get(key).await.map_err(command_error)?;
        Ok(value.map(Bytes::from))
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), TransportError> {
        let mut conn = self.conn.clone();
        // EX 0 is rejected by the server.
        let seconds = ttl.as_secs().max(1);
        conn.set_ex::<_, _, ()>(key, &value[..], seconds)
            .await
            .map_err(command_error)
    }

    async fn delete(&self, key: &str) -> Result<(), TransportError> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key).await.map_err(command_error)
    }

    async fn delete_by_prefix(&self, prefix: &str) -> Result<u64, TransportError> {
        let mut conn = self.conn.clone();
        let pattern = format!("{}*", escape_glob(prefix));
        let mut cursor: u64 = 0;
        let mut removed: u64 = 0;

        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await
                .map_err(command_error)?;

            if !keys.is_empty() {
                let deleted: u64 = redis::cmd("DEL")
                    .arg(&keys)
                    .query_async(&mut conn)
                    .await
                    .map_err(command_error)?;
                removed += deleted;
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        debug!(prefix, removed, "Redis prefix purge finished");
        Ok(removed)
    }

    async fn ping(&self) -> Result<(), TransportError> {
        let mut conn = self.conn.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(command_error)?;
        Ok(())
    }
}

fn command_error(err: RedisError) -> TransportError {
    if err.is_connection_dropped() || err.is_connection_refusal() || err.is_io_error() {
        TransportError::Connection(err.to_string())
    } else {
        TransportError::Command(err.to_string())
    }
}

/// Escape glob metacharacters so `prefix` matches literally in `SCAN MATCH`.
fn escape_glob(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len());
    for ch in prefix.chars() {
        if matches!(ch, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}
