//! Redis persistence for the measurement cache and the learned measurements.
//!
//! Both are stored as JSON strings under fixed keys and restored at startup.

use std::collections::BTreeMap;

use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use thiserror::Error;
use tracing::info;

use crate::measurement::cache::CacheSnapshot;
use crate::measurement::database::LearnedSummary;

pub const CACHE_KEY: &str = "layout:snapshot:cache";
pub const LEARNED_KEY: &str = "layout:snapshot:learned";

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("snapshot is not valid JSON: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Everything a restart needs to pick up where the previous process stopped.
#[derive(Debug, Default)]
pub struct Snapshots {
    pub cache: Option<CacheSnapshot>,
    pub learned: Option<BTreeMap<String, LearnedSummary>>,
}

#[derive(Clone)]
pub struct SnapshotStore {
    conn: MultiplexedConnection,
}

impl SnapshotStore {
    pub async fn connect(url: &str) -> Result<Self, SnapshotError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_tokio_connection().await?;
        info!("Redis snapshot store connected");
        Ok(Self { conn })
    }

    pub async fn save(
        &self,
        cache: &CacheSnapshot,
        learned: &BTreeMap<String, LearnedSummary>,
    ) -> Result<(), SnapshotError> {
        let cache = serde_json::to_string(cache)?;
        let learned = serde_json::to_string(learned)?;

        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(CACHE_KEY, cache).await?;
        conn.set::<_, _, ()>(LEARNED_KEY, learned).await?;
        Ok(())
    }

    /// Missing keys load as `None`.
    pub async fn load(&self) -> Result<Snapshots, SnapshotError> {
        let mut conn = self.conn.clone();
        let cache: Option<String> = conn.get(CACHE_KEY).await?;
        let learned: Option<String> = conn.get(LEARNED_KEY).await?;

        Ok(Snapshots {
            cache: decode(cache)?,
            learned: decode(learned)?,
        })
    }
}

fn decode<T: serde::de::DeserializeOwned>(raw: Option<String>) -> Result<Option<T>, SnapshotError> {
    raw.map(|raw| serde_json::from_str(&raw))
        .transpose()
        .map_err(SnapshotError::from)
}
