//! `queue_meta(name, partitions, backup_hours, bucket_minutes)` — spec.md
//! §6. Grounded on `persistency/streams.rs`'s `get_key`/`rmp_serde`
//! load-store pattern over `sled::Db`.

use super::Catalog;
use crate::error::{QueueError, QueueResult};
use serde::{Deserialize, Serialize};

const VALID_BUCKET_MINUTES: &[u32] = &[1, 2, 3, 4, 5, 6, 10, 12, 15, 20, 30, 60];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueRecord {
    pub name: String,
    pub partitions: u32,
    pub backup_hours: u32,
    pub bucket_minutes: u32,
}

fn key(name: &str) -> String {
    format!("queue_meta:{name}")
}

impl Catalog {
    pub async fn get_queue(&self, name: &str) -> QueueResult<Option<QueueRecord>> {
        match self.db.get(key(name))? {
            Some(bytes) => Ok(Some(rmp_serde::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Idempotent: if `name` already exists, the existing record is
    /// returned unchanged and the supplied options are ignored — there is
    /// no reconfiguration (spec.md §4.1).
    pub async fn create_queue(
        &self,
        name: &str,
        partitions: u32,
        backup_hours: u32,
        bucket_minutes: u32,
    ) -> QueueResult<QueueRecord> {
        if partitions < 1 {
            return Err(QueueError::ConfigError(
                "partitions must be >= 1".to_string(),
            ));
        }
        if backup_hours < 1 {
            return Err(QueueError::ConfigError(
                "backup_hours must be >= 1".to_string(),
            ));
        }
        if !VALID_BUCKET_MINUTES.contains(&bucket_minutes) {
            return Err(QueueError::ConfigError(format!(
                "bucket_minutes must be one of {VALID_BUCKET_MINUTES:?}, got {bucket_minutes}"
            )));
        }

        let _guard = self.lock().await?;
        if let Some(existing) = self.get_queue(name).await? {
            return Ok(existing);
        }

        let record = QueueRecord {
            name: name.to_string(),
            partitions,
            backup_hours,
            bucket_minutes,
        };
        let encoded = rmp_serde::to_vec(&record)?;
        self.db.insert(key(name), encoded)?;
        self.db.flush_async().await?;
        tracing::info!(
            queue = name,
            partitions,
            backup_hours,
            bucket_minutes,
            "created queue"
        );
        Ok(record)
    }
}
