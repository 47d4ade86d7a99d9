//! Redis hash trace backend
//!
//! Each record is a Redis hash; every subfield write is a single `HSET` and
//! read-back is one `HGETALL`. Every call is bounded by the configured timeout.
//! The connection manager reconnects on its own after the server goes away.

use super::{TraceBackend, TraceError};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tracing::info;

pub struct RedisTraceBackend {
    connection: ConnectionManager,
    timeout: Duration,
}

impl RedisTraceBackend {
    /// Open a managed, reconnecting connection to `url`
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self, TraceError> {
        let client = redis::Client::open(url)
            .map_err(|e| TraceError::Backend(format!("Invalid Redis URL: {e}")))?;

        let connection = bounded(timeout, "connect", client.get_connection_manager())
            .await?;

        info!(timeout_ms = timeout.as_millis() as u64, "Connected Redis trace backend");
        Ok(Self {
            connection,
            timeout,
        })
    }
}

async fn bounded<T, F>(timeout: Duration, op: &str, fut: F) -> Result<T, TraceError>
where
    F: Future<Output = redis::RedisResult<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(TraceError::Backend(format!("Redis {op} failed: {e}"))),
        Err(_) => Err(TraceError::Backend(format!(
            "Redis {op} timed out after {}ms",
            timeout.as_millis()
        ))),
    }
}

#[async_trait]
impl TraceBackend for RedisTraceBackend {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn set_field(&self, key: &str, field: &str, value: String) -> Result<(), TraceError> {
        let mut conn = self.connection.clone();
        bounded(self.timeout, "HSET", conn.hset::<_, _, _, ()>(key, field, value)).await
    }

    async fn get_fields(&self, key: &str) -> Result<HashMap<String, String>, TraceError> {
        let mut conn = self.connection.clone();
        bounded(self.timeout, "HGETALL", conn.hgetall(key)).await
    }
}
