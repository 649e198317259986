//! `consume_registry(queue, group_id, partition, pid)` — spec.md §6,
//! logical key `(queue, group_id, partition)`. The live-consumer registry
//! enforcing exclusive per-(queue, group, partition) ownership, with
//! dead-owner steal via `src/pid.rs`'s signal-0 probe (spec.md §4.1).

use super::Catalog;
use crate::error::QueueResult;
use crate::pid::is_process_alive;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumerRegistrationRecord {
    pub owner_pid: u32,
}

fn key(group: &str, queue: &str, partition: u32) -> String {
    format!("registry:{queue}:{group}:{partition}")
}

impl Catalog {
    /// Claims or steals the (queue, group, partition) slot for `pid`.
    /// Returns `true` on success, `false` if a live owner already holds
    /// it.
    pub async fn register_consumer(
        &self,
        group: &str,
        queue: &str,
        partition: u32,
        pid: u32,
    ) -> QueueResult<bool> {
        let key = key(group, queue, partition);
        let _guard = self.lock().await?;

        if let Some(existing) = self.db.get(&key)? {
            let existing: ConsumerRegistrationRecord = rmp_serde::from_slice(&existing)?;
            if is_process_alive(existing.owner_pid) {
                return Ok(false);
            }
            tracing::info!(
                queue,
                group,
                partition,
                dead_pid = existing.owner_pid,
                new_pid = pid,
                "stealing registration from dead owner"
            );
        }

        let record = ConsumerRegistrationRecord { owner_pid: pid };
        let encoded = rmp_serde::to_vec(&record)?;
        self.db.insert(&key, encoded)?;
        self.db.flush_async().await?;
        Ok(true)
    }

    /// Deletes the row only if it still belongs to `pid` (spec.md §4.1).
    pub async fn unregister_consumer(
        &self,
        group: &str,
        queue: &str,
        partition: u32,
        pid: u32,
    ) -> QueueResult<()> {
        let key = key(group, queue, partition);
        let _guard = self.lock().await?;

        if let Some(existing) = self.db.get(&key)? {
            let existing: ConsumerRegistrationRecord = rmp_serde::from_slice(&existing)?;
            if existing.owner_pid == pid {
                self.db.remove(&key)?;
                self.db.flush_async().await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_live_claim_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::open(dir.path()).await.unwrap();
        let my_pid = std::process::id();
        assert!(catalog.register_consumer("g", "q", 0, my_pid).await.unwrap());
        assert!(!catalog.register_consumer("g", "q", 0, my_pid + 1).await.unwrap());
    }

    #[tokio::test]
    async fn dead_owner_is_stolen() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::open(dir.path()).await.unwrap();
        assert!(catalog.register_consumer("g", "q", 0, u32::MAX - 1).await.unwrap());
        assert!(catalog
            .register_consumer("g", "q", 0, std::process::id())
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn unregister_only_removes_own_registration() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::open(dir.path()).await.unwrap();
        let my_pid = std::process::id();
        catalog.register_consumer("g", "q", 0, my_pid).await.unwrap();
        catalog.unregister_consumer("g", "q", 0, my_pid + 12345).await.unwrap();
        // still registered, since the unregister call named the wrong pid
        assert!(!catalog.register_consumer("g", "q", 0, my_pid + 1).await.unwrap());
        catalog.unregister_consumer("g", "q", 0, my_pid).await.unwrap();
        assert!(catalog.register_consumer("g", "q", 0, my_pid + 1).await.unwrap());
    }
}
