use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::{Result, Transaction};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Handle to the metadata database. Cheap to clone; all clones share one pool.
#[derive(Clone)]
pub struct MetadataStore {
    pool: SqlitePool,
    // Serializes write units of work. A deferred SQLite transaction that reads
    // before it writes cannot upgrade once another writer has committed.
    write_gate: Arc<Mutex<()>>,
}

impl MetadataStore {
    /// Wrap an existing pool. Migrations are expected to have run already.
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            write_gate: Arc::new(Mutex::new(())),
        }
    }

    /// Open (creating if needed) the database file at `path` and apply migrations.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        MIGRATOR.run(&pool).await?;
        info!(path = %path.display(), "Metadata store ready");

        Ok(Self::new(pool))
    }

    /// Private in-memory database, used by tests and throwaway servers.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

        // One connection: every connection to :memory: is a separate database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        MIGRATOR.run(&pool).await?;

        Ok(Self::new(pool))
    }

    /// Start a unit of work for lookups.
    pub async fn begin(&self) -> Result<Transaction> {
        let tx = self.pool.begin().await?;
        debug!("Read transaction started");
        Ok(Transaction::new(tx, None))
    }

    /// Start a unit of work that will write. Held exclusively until commit, rollback or drop.
    pub async fn begin_write(&self) -> Result<Transaction> {
        let guard = self.write_gate.clone().lock_owned().await;
        let tx = self.pool.begin().await?;
        debug!("Write transaction started");
        Ok(Transaction::new(tx, Some(guard)))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
