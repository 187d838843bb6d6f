use std::collections::HashMap;

use chrono::{DateTime, SecondsFormat, Utc};
use faas_common::{ConfigBlob, FunctionEntry, DEFAULT_TIMEOUT_MS};
use sqlx::Sqlite;
use tokio::sync::OwnedMutexGuard;
use tracing::debug;

use crate::{Result, StoreError};

/// One recorded invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricRecord {
    pub function_id: i64,
    pub called_at: String,
    pub duration_ms: i64,
}

/// A unit of work against the registry. Nothing is visible to other units
/// until [`Transaction::commit`]; dropping without committing rolls back.
pub struct Transaction {
    tx: sqlx::Transaction<'static, Sqlite>,
    // Released after the sqlx transaction has finished.
    _write_guard: Option<OwnedMutexGuard<()>>,
}

impl Transaction {
    pub(crate) fn new(
        tx: sqlx::Transaction<'static, Sqlite>,
        write_guard: Option<OwnedMutexGuard<()>>,
    ) -> Self {
        Self {
            tx,
            _write_guard: write_guard,
        }
    }

    pub async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    pub async fn rollback(self) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }

    // ---- Functions ----

    /// Create a function record and return its new id.
    pub async fn add_function(&mut self, name: &str) -> Result<i64> {
        let result = sqlx::query("INSERT INTO functions (name) VALUES (?)")
            .bind(name)
            .execute(&mut *self.tx)
            .await?;

        let id = result.last_insert_rowid();
        debug!(function_id = id, name, "Function registered");
        Ok(id)
    }

    /// Every function ordered by id, with its stored timeout and associated methods.
    /// Fails as a whole if any function is missing its config row.
    pub async fn list_functions(&mut self) -> Result<Vec<FunctionEntry>> {
        let rows: Vec<(i64, String)> = sqlx::query_as("SELECT id, name FROM functions ORDER BY id")
            .fetch_all(&mut *self.tx)
            .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for (id, name) in rows {
            let timeout = self.get_timeout(id).await?;
            let methods = self.get_methods(id).await?;
            entries.push(FunctionEntry {
                id,
                name,
                timeout,
                methods,
            });
        }
        Ok(entries)
    }

    pub async fn get_timeout(&mut self, function_id: i64) -> Result<i64> {
        sqlx::query_scalar::<_, i64>("SELECT timeout FROM configs WHERE id = ?")
            .bind(function_id)
            .fetch_optional(&mut *self.tx)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("config for function {function_id}")))
    }

    /// Method names associated with a function, in vocabulary order.
    pub async fn get_methods(&mut self, function_id: i64) -> Result<Vec<String>> {
        let methods = sqlx::query_scalar::<_, String>(
            "SELECT http_methods.method FROM methods \
             JOIN http_methods ON http_methods.id = methods.method \
             WHERE methods.function_id = ? ORDER BY http_methods.id",
        )
        .bind(function_id)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(methods)
    }

    // ---- Folders ----

    /// Ensure a folder with this label exists. Idempotent.
    pub async fn add_folder(&mut self, label: &str) -> Result<()> {
        match self.get_folder(label).await {
            Ok(_) => return Ok(()),
            Err(StoreError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }

        let result = sqlx::query("INSERT INTO folders (label) VALUES (?)")
            .bind(label)
            .execute(&mut *self.tx)
            .await?;
        debug!(folder_id = result.last_insert_rowid(), label, "Folder created");
        Ok(())
    }

    pub async fn get_folder(&mut self, label: &str) -> Result<i64> {
        sqlx::query_scalar::<_, i64>("SELECT id FROM folders WHERE label = ?")
            .bind(label)
            .fetch_optional(&mut *self.tx)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("folder {label}")))
    }

    /// Resolve every label to its folder id. The first missing label aborts the lookup.
    pub async fn get_folders(&mut self, labels: &[String]) -> Result<HashMap<String, i64>> {
        let mut folders = HashMap::with_capacity(labels.len());
        for label in labels {
            let id = self.get_folder(label).await?;
            folders.insert(label.clone(), id);
        }
        Ok(folders)
    }

    // ---- Configs ----

    /// Store the timeout and encoded settings for a function.
    /// A non-positive timeout is stored as the default.
    pub async fn add_config_blob(
        &mut self,
        function_id: i64,
        timeout: i64,
        blob: &ConfigBlob,
    ) -> Result<()> {
        let timeout = if timeout <= 0 {
            DEFAULT_TIMEOUT_MS
        } else {
            timeout
        };
        let encoded = serde_json::to_vec(blob)?;

        sqlx::query("INSERT INTO configs (id, timeout, config) VALUES (?, ?, ?)")
            .bind(function_id)
            .bind(timeout)
            .bind(encoded)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    pub async fn get_config(&mut self, function_id: i64) -> Result<ConfigBlob> {
        let raw = sqlx::query_scalar::<_, Vec<u8>>("SELECT config FROM configs WHERE id = ?")
            .bind(function_id)
            .fetch_optional(&mut *self.tx)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("function {function_id}")))?;

        Ok(serde_json::from_slice(&raw)?)
    }

    // ---- Methods ----

    /// Associate a method with a function. Names outside the seeded vocabulary are rejected.
    pub async fn add_method(&mut self, function_id: i64, method: &str) -> Result<()> {
        let result = sqlx::query(
            "INSERT INTO methods (function_id, method) \
             SELECT ?, id FROM http_methods WHERE method = ?",
        )
        .bind(function_id)
        .bind(method)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::InvalidMethod(method.to_string()));
        }
        Ok(())
    }

    pub async fn check_method(&mut self, function_id: i64, method: &str) -> Result<bool> {
        let found = sqlx::query_scalar::<_, i64>(
            "SELECT methods.function_id FROM methods \
             JOIN http_methods ON http_methods.id = methods.method \
             WHERE methods.function_id = ? AND http_methods.method = ? LIMIT 1",
        )
        .bind(function_id)
        .bind(method)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(found.is_some())
    }

    // ---- Metrics ----

    pub async fn add_metric(
        &mut self,
        function_id: i64,
        called_at: DateTime<Utc>,
        duration_ms: i64,
    ) -> Result<()> {
        sqlx::query("INSERT INTO metrics (function_id, called_at, duration) VALUES (?, ?, ?)")
            .bind(function_id)
            .bind(called_at.to_rfc3339_opts(SecondsFormat::Millis, true))
            .bind(duration_ms)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    /// Recorded invocations of a function, oldest first.
    pub async fn list_metrics(&mut self, function_id: i64) -> Result<Vec<MetricRecord>> {
        let rows: Vec<(i64, String, i64)> = sqlx::query_as(
            "SELECT function_id, called_at, duration FROM metrics \
             WHERE function_id = ? ORDER BY id",
        )
        .bind(function_id)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(function_id, called_at, duration_ms)| MetricRecord {
                function_id,
                called_at,
                duration_ms,
            })
            .collect())
    }
}
