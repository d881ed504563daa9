//! Durable local storage backed by RocksDB.
//!
//! All values live in a single column family; keys and values are the UTF-8
//! strings of the [`KeyValueStore`] contract.

use super::KeyValueStore;
use crate::error::{NomadError, Result};
use rocksdb::{ColumnFamilyDescriptor, DBWithThreadMode, MultiThreaded, Options};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, trace};

/// Column family holding the local key-value entries.
const CF_LOCAL: &str = "local_storage";

// =============================================================================
// RocksDB Configuration
// =============================================================================

/// Configuration for RocksDB storage.
#[derive(Debug, Clone)]
pub struct RocksDbConfig {
    /// Maximum number of open files.
    pub max_open_files: i32,
    /// Number of log files to keep.
    pub keep_log_file_num: usize,
    /// Maximum WAL size in bytes.
    pub max_wal_size: u64,
    /// Write buffer size in bytes.
    pub write_buffer_size: usize,
}

impl Default for RocksDbConfig {
    fn default() -> Self {
        Self {
            max_open_files: 64,
            keep_log_file_num: 2,
            max_wal_size: 8 * 1024 * 1024,      // 8MB
            write_buffer_size: 4 * 1024 * 1024, // 4MB
        }
    }
}

impl RocksDbConfig {
    /// Builds RocksDB Options from this configuration.
    pub fn build_options(&self) -> Options {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        opts.set_max_open_files(self.max_open_files);
        opts.set_keep_log_file_num(self.keep_log_file_num);
        opts.set_max_total_wal_size(self.max_wal_size);
        opts.increase_parallelism(num_cpus::get() as i32);
        opts.set_write_buffer_size(self.write_buffer_size);
        opts
    }
}

// =============================================================================
// Store
// =============================================================================

/// Durable [`KeyValueStore`]. Clones share the same database handle.
#[derive(Clone)]
pub struct RocksDbStore {
    db: Arc<DBWithThreadMode<MultiThreaded>>,
}

impl std::fmt::Debug for RocksDbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RocksDbStore")
            .field("path", &self.db.path())
            .finish()
    }
}

impl RocksDbStore {
    /// Opens (or creates) the store at `db_path`.
    pub fn open(db_path: impl AsRef<Path>, config: &RocksDbConfig) -> Result<Self> {
        let opts = config.build_options();
        let cf = ColumnFamilyDescriptor::new(CF_LOCAL, Options::default());

        let db = DBWithThreadMode::<MultiThreaded>::open_cf_descriptors(
            &opts,
            db_path.as_ref(),
            vec![cf],
        )
        .map_err(|e| NomadError::storage(format!("Failed to open RocksDB: {}", e)))?;

        debug!(path = ?db_path.as_ref(), "opened local store");
        Ok(Self { db: Arc::new(db) })
    }

    fn with_cf<T>(
        &self,
        op: impl FnOnce(&Arc<rocksdb::BoundColumnFamily<'_>>) -> Result<T>,
    ) -> Result<T> {
        let cf = self
            .db
            .cf_handle(CF_LOCAL)
            .ok_or_else(|| NomadError::storage(format!("Column family '{}' not found", CF_LOCAL)))?;
        op(&cf)
    }
}

impl KeyValueStore for RocksDbStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        self.with_cf(|cf| match self.db.get_cf(cf, key.as_bytes()) {
            Ok(Some(bytes)) => {
                trace!(key, value_bytes = bytes.len(), "db_get: found record");
                String::from_utf8(bytes)
                    .map(Some)
                    .map_err(|e| NomadError::storage(format!("Value is not UTF-8: {}", e)))
            }
            Ok(None) => {
                trace!(key, "db_get: key not found");
                Ok(None)
            }
            Err(e) => Err(NomadError::storage(format!("Failed to read: {}", e))),
        })
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.with_cf(|cf| {
            trace!(key, value_bytes = value.len(), "db_put: storing value");
            self.db
                .put_cf(cf, key.as_bytes(), value.as_bytes())
                .map_err(|e| NomadError::storage(format!("Failed to write: {}", e)))
        })
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.with_cf(|cf| {
            trace!(key, "db_delete: deleting key");
            self.db
                .delete_cf(cf, key.as_bytes())
                .map_err(|e| NomadError::storage(format!("Failed to delete: {}", e)))
        })
    }
}
