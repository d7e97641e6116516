//! Redis implementation of the lock store.

use std::sync::Arc;
use std::time::Duration;

use fred::prelude::*;
use fred::types::CustomCommand;
use locking_worker_core::error::{LockError, LockResult};
use locking_worker_core::traits::{LockStore, TxOutcome, WatchSession};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{instrument, warn, Span};

/// Lock store backed by a single Redis server.
///
/// Plain commands go through the shared client. WATCH is connection-scoped,
/// so watch sessions run on a second, dedicated connection that is held
/// exclusively from WATCH until EXEC or UNWATCH.
pub struct RedisLockStore {
    client: RedisClient,
    watch_client: Arc<Mutex<RedisClient>>,
}

impl RedisLockStore {
    /// Wraps a connected client and opens the dedicated watch connection.
    pub async fn connect(client: RedisClient) -> LockResult<Self> {
        let watch_client = client.clone_new();
        watch_client.connect();
        watch_client.wait_for_connect().await.map_err(|e| {
            LockError::Connection(Box::new(std::io::Error::other(format!(
                "failed to open Redis watch connection: {}",
                e
            ))))
        })?;

        Ok(Self {
            client,
            watch_client: Arc::new(Mutex::new(watch_client)),
        })
    }

    /// Returns the shared client.
    pub fn client(&self) -> &RedisClient {
        &self.client
    }
}

/// EXPIRE takes whole seconds; round up so the key never lives shorter than asked.
fn expire_seconds(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_millis().div_ceil(1000).max(1)).unwrap_or(i64::MAX)
}

async fn unwatch(client: &RedisClient) -> LockResult<()> {
    let cmd = CustomCommand::new_static("UNWATCH", None, false);
    let _: RedisValue = client
        .custom(cmd, Vec::<RedisValue>::new())
        .await
        .map_err(|e| LockError::backend("Redis UNWATCH failed", e))?;
    Ok(())
}

impl LockStore for RedisLockStore {
    type Watch = RedisWatch;

    fn backend(&self) -> &'static str {
        "redis"
    }

    #[instrument(skip(self), fields(backend = "redis", created = tracing::field::Empty))]
    async fn create_if_absent(&self, key: &str, value: &str) -> LockResult<bool> {
        // SET NX returns Some(value) if key was set, None if key already exists
        let result: Option<String> = self
            .client
            .set(key, value, None, Some(SetOptions::NX), false)
            .await
            .map_err(|e| LockError::backend("Redis SET NX failed", e))?;

        Span::current().record("created", result.is_some());
        Ok(result.is_some())
    }

    #[instrument(skip(self), fields(backend = "redis"))]
    async fn get(&self, key: &str) -> LockResult<Option<String>> {
        self.client
            .get(key)
            .await
            .map_err(|e| LockError::backend("Redis GET failed", e))
    }

    #[instrument(skip(self), fields(backend = "redis"))]
    async fn set(&self, key: &str, value: &str) -> LockResult<()> {
        let _: RedisValue = self
            .client
            .set(key, value, None, None, false)
            .await
            .map_err(|e| LockError::backend("Redis SET failed", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "redis"))]
    async fn delete(&self, key: &str) -> LockResult<()> {
        let _: i64 = self
            .client
            .del(key)
            .await
            .map_err(|e| LockError::backend("Redis DEL failed", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "redis"))]
    async fn expire(&self, key: &str, ttl: Duration) -> LockResult<()> {
        let args: Vec<RedisValue> = vec![key.into(), expire_seconds(ttl).into()];
        let cmd = CustomCommand::new_static("EXPIRE", None, false);
        let _: i64 = self
            .client
            .custom(cmd, args)
            .await
            .map_err(|e| LockError::backend("Redis EXPIRE failed", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "redis"))]
    async fn watch(&self, key: &str) -> LockResult<RedisWatch> {
        let conn = self.watch_client.clone().lock_owned().await;

        let args: Vec<RedisValue> = vec![key.into()];
        let cmd = CustomCommand::new_static("WATCH", None, false);
        let _: RedisValue = conn
            .custom(cmd, args)
            .await
            .map_err(|e| LockError::backend("Redis WATCH failed", e))?;

        Ok(RedisWatch {
            conn: Some(conn),
            key: key.to_string(),
        })
    }
}

/// An open WATCH on the dedicated connection of a [`RedisLockStore`].
///
/// Dropping a session that was not finished issues UNWATCH in the
/// background before the connection is handed to the next session.
pub struct RedisWatch {
    conn: Option<OwnedMutexGuard<RedisClient>>,
    key: String,
}

impl RedisWatch {
    fn connection(&self) -> LockResult<&RedisClient> {
        self.conn
            .as_deref()
            .ok_or_else(|| LockError::backend("Redis watch", "session already finished"))
    }

    fn finish(&mut self) -> LockResult<OwnedMutexGuard<RedisClient>> {
        self.conn
            .take()
            .ok_or_else(|| LockError::backend("Redis watch", "session already finished"))
    }
}

/// Reads an EXEC reply: nil means the WATCH fired and nothing ran.
fn exec_outcome(reply: RedisValue) -> TxOutcome<Option<RedisValue>> {
    match reply {
        RedisValue::Null => TxOutcome::Aborted,
        RedisValue::Array(mut replies) => TxOutcome::Committed(replies.pop()),
        other => TxOutcome::Committed(Some(other)),
    }
}

impl WatchSession for RedisWatch {
    async fn get(&mut self) -> LockResult<Option<String>> {
        self.connection()?
            .get(&self.key)
            .await
            .map_err(|e| LockError::backend("Redis GET (watched) failed", e))
    }

    #[instrument(skip(self), fields(lock.key = %self.key, backend = "redis"))]
    async fn transactional_get(mut self) -> LockResult<TxOutcome<Option<String>>> {
        let conn = self.finish()?;

        let trx = conn.multi();
        let _: RedisValue = trx
            .get(&self.key)
            .await
            .map_err(|e| LockError::backend("Redis GET (queued) failed", e))?;
        let reply: RedisValue = trx
            .exec(true)
            .await
            .map_err(|e| LockError::backend("Redis EXEC failed", e))?;

        Ok(match exec_outcome(reply) {
            TxOutcome::Aborted => TxOutcome::Aborted,
            TxOutcome::Committed(value) => {
                TxOutcome::Committed(value.and_then(RedisValue::into_string))
            }
        })
    }

    #[instrument(skip(self), fields(lock.key = %self.key, backend = "redis"))]
    async fn transactional_set(mut self, value: &str) -> LockResult<TxOutcome<()>> {
        let conn = self.finish()?;

        let trx = conn.multi();
        let _: RedisValue = trx
            .set(&self.key, value, None, None, false)
            .await
            .map_err(|e| LockError::backend("Redis SET (queued) failed", e))?;
        let reply: RedisValue = trx
            .exec(true)
            .await
            .map_err(|e| LockError::backend("Redis EXEC failed", e))?;

        Ok(match exec_outcome(reply) {
            TxOutcome::Aborted => TxOutcome::Aborted,
            TxOutcome::Committed(_) => TxOutcome::Committed(()),
        })
    }

    async fn unwatch(mut self) -> LockResult<()> {
        let conn = self.finish()?;
        unwatch(&conn).await
    }
}

impl Drop for RedisWatch {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };

        // Keep the guard until UNWATCH lands so no other session sees a stale watch.
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(err) = unwatch(&conn).await {
                        warn!(error = %err, "failed to release abandoned Redis watch");
                    }
                });
            }
            Err(_) => warn!(key = %self.key, "abandoned Redis watch outside a runtime"),
        }
    }
}
