//! The metadata catalog: a durable small-record store backing queue
//! metadata, the log index, consume offsets and live-consumer
//! registrations, plus the cross-process exclusion primitive every
//! mutation goes through (spec.md §4.1).

mod consume_offset;
mod log_index;
mod queue_meta;
mod registry;

pub use consume_offset::{ConsumeOffsetLookup, ConsumeOffsetRecord};
pub use log_index::LogSegmentRecord;
pub use queue_meta::QueueRecord;
pub use registry::ConsumerRegistrationRecord;

use crate::error::{QueueError, QueueResult};
use crate::lockfile::FileLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex, OnceLock};
use tokio::sync::Mutex;

const CATALOG_DB_NAME: &str = "catalog";
const CATALOG_LOCK_SUFFIX: &str = ".lock";

/// A handle to one directory's metadata catalog.
///
/// Grounded on `server/src/compat/storage_conversion/persistency/*.rs`'s
/// use of `sled::Db` as the small-record store, generalized from "legacy
/// on-disk format reader" into the crate's primary catalog engine.
pub struct Catalog {
    pub(crate) root: PathBuf,
    pub(crate) db: sled::Db,
    lock_path: PathBuf,
    process_mutex: Mutex<()>,
    pub(crate) lookahead: usize,
}

/// Scoped acquisition of the catalog's exclusion primitive: the
/// in-process mutex first, then the advisory cross-process file lock.
/// Released in reverse order on drop (spec.md §4.1, §9 "Resource
/// scopes"). Field declaration order below matters: Rust drops fields
/// top-to-bottom, so `file_lock` (acquired second) is declared first and
/// therefore released first.
pub struct CatalogLockGuard<'a> {
    _file_lock: FileLock,
    _process_guard: tokio::sync::MutexGuard<'a, ()>,
}

static CATALOG_CACHE: OnceLock<StdMutex<HashMap<PathBuf, Arc<Catalog>>>> = OnceLock::new();

impl Catalog {
    /// Open (creating if absent) the catalog rooted at `root`.
    pub async fn open(root: impl AsRef<Path>) -> QueueResult<Catalog> {
        Self::open_with_lookahead(root, 5).await
    }

    pub async fn open_with_lookahead(
        root: impl AsRef<Path>,
        lookahead: usize,
    ) -> QueueResult<Catalog> {
        let root = root.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&root).await?;
        let db_path = root.join(CATALOG_DB_NAME);
        let db = sled::open(&db_path)?;
        let lock_path = root.join(format!("{CATALOG_DB_NAME}{CATALOG_LOCK_SUFFIX}"));
        Ok(Catalog {
            root,
            db,
            lock_path,
            process_mutex: Mutex::new(()),
            lookahead,
        })
    }

    /// A process-wide cache of catalog handles keyed by canonicalized
    /// path, per spec.md §9's design note. Callers are free to ignore this
    /// and construct an explicit `Catalog::open` handle instead.
    pub async fn shared(root: impl AsRef<Path>) -> QueueResult<Arc<Catalog>> {
        let canonical = tokio::fs::create_dir_all(root.as_ref())
            .await
            .map_err(QueueError::from)
            .and_then(|_| {
                std::fs::canonicalize(root.as_ref()).map_err(QueueError::from)
            })?;

        let cache = CATALOG_CACHE.get_or_init(|| StdMutex::new(HashMap::new()));
        if let Some(existing) = cache.lock().unwrap().get(&canonical) {
            return Ok(existing.clone());
        }

        let catalog = Arc::new(Catalog::open(&canonical).await?);
        cache
            .lock()
            .unwrap()
            .insert(canonical, catalog.clone());
        Ok(catalog)
    }

    /// Acquire the exclusion primitive: in-process mutex, then the
    /// cross-process advisory file lock. All mutating operations and all
    /// multi-statement read-modify-write sequences must hold this guard
    /// for their whole duration.
    pub async fn lock(&self) -> QueueResult<CatalogLockGuard<'_>> {
        let process_guard = self.process_mutex.lock().await;
        let lock_path = self.lock_path.clone();
        let file_lock = tokio::task::spawn_blocking(move || FileLock::acquire_exclusive(&lock_path))
            .await
            .map_err(|err| QueueError::IoError(anyhow::anyhow!("lock task panicked: {err}")))??;
        Ok(CatalogLockGuard {
            _file_lock: file_lock,
            _process_guard: process_guard,
        })
    }

    /// Directory that segment files for `queue` live under.
    pub fn queue_dir(&self, queue: &str) -> PathBuf {
        self.root.join(queue)
    }

    /// `K` in spec.md §4.4's open-next-segment algorithm.
    pub fn lookahead(&self) -> usize {
        self.lookahead
    }

    pub async fn close(self) -> QueueResult<()> {
        self.db.flush_async().await?;
        Ok(())
    }
}
