use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use faas_common::{
    canonical_method, effective_timeout, ConfigBlob, FaasError, InvocationResult, SandboxConfig,
    SandboxExecutor,
};
use faas_store::{MetadataStore, StoreError, Transaction};
use tracing::{debug, info, instrument, warn, Span};
use uuid::Uuid;

use crate::error::ApiError;
use crate::protocol::{parse_response, CapturedResponse};

/// Registry state an invocation needs, read in one unit of work.
struct Lookup {
    blob: ConfigBlob,
    folders: HashMap<String, i64>,
    timeout_ms: i64,
}

/// Drives one invocation: registry lookups, sandbox run, output translation, metric.
pub struct Dispatcher {
    store: MetadataStore,
    executor: Arc<dyn SandboxExecutor>,
}

impl Dispatcher {
    pub fn new(store: MetadataStore, executor: Arc<dyn SandboxExecutor>) -> Self {
        Self { store, executor }
    }

    #[instrument(skip(self, payload), fields(request_id = tracing::field::Empty))]
    pub async fn invoke(
        &self,
        function_id: i64,
        method: &str,
        payload: Vec<u8>,
    ) -> Result<CapturedResponse, ApiError> {
        let request_id = Uuid::new_v4().to_string();
        Span::current().record("request_id", request_id.as_str());
        let method = canonical_method(method);

        // Lookups are committed before the sandbox starts so no pooled
        // connection stays checked out for the length of the run.
        let mut tx = self.store.begin().await?;
        let lookup = match Self::lookup(&mut tx, function_id, &method).await {
            Ok(lookup) => {
                tx.commit().await?;
                lookup
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(error = %rollback_err, "Rollback after failed lookup failed");
                }
                return Err(e);
            }
        };

        let config = SandboxConfig {
            function_id,
            request_id,
            vars: lookup.blob.vars,
            folders: lookup.folders,
            payload,
            timeout: effective_timeout(lookup.timeout_ms),
        };

        let called_at = Utc::now();
        let (output, elapsed) = match self.executor.execute(config).await? {
            InvocationResult::Completed { output, elapsed } => (output, elapsed),
            InvocationResult::TimedOut => return Err(FaasError::Timeout.into()),
        };

        let response = parse_response(&output)?;
        debug!(status = %response.status, body_bytes = response.body.len(), "Captured output parsed");

        let elapsed_ms = i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX);
        let mut tx = self.store.begin_write().await?;
        tx.add_metric(function_id, called_at, elapsed_ms).await?;
        tx.commit().await?;

        info!(elapsed_ms, status = %response.status, "Invocation served");
        Ok(response)
    }

    async fn lookup(
        tx: &mut Transaction,
        function_id: i64,
        method: &str,
    ) -> Result<Lookup, ApiError> {
        match tx.check_method(function_id, method).await {
            Ok(true) => {}
            Ok(false) => return Err(ApiError::InvalidFunctionId),
            Err(e) => {
                warn!(error = %e, "Method check failed");
                return Err(ApiError::InvalidFunctionId);
            }
        }

        let blob = tx.get_config(function_id).await?;
        let timeout_ms = tx.get_timeout(function_id).await?;
        // Labels were registered at upload; one missing now is a server-side fault.
        let folders = tx
            .get_folders(&blob.folders)
            .await
            .map_err(|e: StoreError| FaasError::Store(e.to_string()))?;

        Ok(Lookup {
            blob,
            folders,
            timeout_ms,
        })
    }
}
