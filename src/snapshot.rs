//! The opaque key-value snapshot store consumed by the executor (spec §6).
//! Storage itself is out of scope; this module only pins down the trait
//! and carries one in-memory implementation plus a Redis-backed one
//! grounded in the teacher's non-pooled `redis::Client::open` usage.

use std::collections::HashMap;
use std::sync::Mutex;

use redis::AsyncCommands;

use crate::ids::{TaskCommandId, TaskId};

fn key(task_id: &TaskId, command_id: &TaskCommandId) -> String {
    format!("snapshot:{task_id}:{command_id}")
}

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("storage backend error: {0}")]
    Backend(String),
    #[error("stored value is not valid JSON: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// `Load` returns `Ok(None)` for a missing key (not an error — a fresh run);
/// `Save` overwrites the prior value atomically per key.
pub trait SnapshotStore: Send + Sync {
    fn load(
        &self,
        task_id: &TaskId,
        command_id: &TaskCommandId,
    ) -> impl Future<Output = Result<Option<serde_json::Value>, SnapshotError>> + Send;

    fn save(
        &self,
        task_id: &TaskId,
        command_id: &TaskCommandId,
        value: serde_json::Value,
    ) -> impl Future<Output = Result<(), SnapshotError>> + Send;
}

#[derive(Debug, Default)]
pub struct InMemorySnapshotStore {
    values: Mutex<HashMap<String, serde_json::Value>>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SnapshotStore for InMemorySnapshotStore {
    async fn load(
        &self,
        task_id: &TaskId,
        command_id: &TaskCommandId,
    ) -> Result<Option<serde_json::Value>, SnapshotError> {
        Ok(self.values.lock().unwrap().get(&key(task_id, command_id)).cloned())
    }

    async fn save(
        &self,
        task_id: &TaskId,
        command_id: &TaskCommandId,
        value: serde_json::Value,
    ) -> Result<(), SnapshotError> {
        self.values
            .lock()
            .unwrap()
            .insert(key(task_id, command_id), value);
        Ok(())
    }
}

/// Grounded in `main.rs`'s `redis::Client::open` — a single non-pooled
/// client, matching the teacher's current style (no `bb8` pool).
#[derive(Clone)]
pub struct RedisSnapshotStore {
    client: redis::Client,
}

impl RedisSnapshotStore {
    pub fn new(client: redis::Client) -> Self {
        Self { client }
    }
}

impl SnapshotStore for RedisSnapshotStore {
    async fn load(
        &self,
        task_id: &TaskId,
        command_id: &TaskCommandId,
    ) -> Result<Option<serde_json::Value>, SnapshotError> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| SnapshotError::Backend(e.to_string()))?;

        let raw: Option<String> = conn
            .get(key(task_id, command_id))
            .await
            .map_err(|e| SnapshotError::Backend(e.to_string()))?;

        raw.map(|s| serde_json::from_str(&s)).transpose().map_err(Into::into)
    }

    async fn save(
        &self,
        task_id: &TaskId,
        command_id: &TaskCommandId,
        value: serde_json::Value,
    ) -> Result<(), SnapshotError> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| SnapshotError::Backend(e.to_string()))?;

        let raw = serde_json::to_string(&value)?;
        let _: () = conn
            .set(key(task_id, command_id), raw)
            .await
            .map_err(|e| SnapshotError::Backend(e.to_string()))?;

        Ok(())
    }
}
