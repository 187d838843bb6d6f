use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use faas_common::{
    module_path, FaasError, InvocationResult, Result as CommonResult, SandboxConfig,
    SandboxExecutor,
};
use tracing::{debug, error, info, instrument, warn};
use wasmtime::{Engine, Linker};

use crate::config::ExecutorConfig;
use crate::epoch::{deadline_ticks, EpochTicker};
use crate::module_cache::ModuleCache;
use crate::sandbox::{Environment, HostState, RunOutcome, Sandbox};
use crate::{ExecutorError, Result};

/// WebAssembly execution engine. Each invocation gets a fresh store, WASI
/// context and instance; only compiled modules are shared between calls.
#[derive(Clone)]
pub struct WasmExecutor {
    inner: Arc<Inner>,
}

struct Inner {
    engine: Engine,
    linker: Linker<HostState>,
    modules: ModuleCache,
    config: ExecutorConfig,
    ticker: Arc<EpochTicker>,
}

impl WasmExecutor {
    pub fn new(config: ExecutorConfig) -> Result<Self> {
        let mut wasm_config = wasmtime::Config::new();
        wasm_config.epoch_interruption(true);
        let engine =
            Engine::new(&wasm_config).map_err(|e| ExecutorError::Engine(format!("{e:#}")))?;

        let mut linker = Linker::new(&engine);
        wasmtime_wasi::add_to_linker(&mut linker, |state: &mut HostState| state.wasi_mut())
            .map_err(|e| ExecutorError::Engine(format!("failed to add WASI to linker: {e:#}")))?;

        let ticker = Arc::new(EpochTicker::start(engine.clone(), config.epoch_tick)?);
        let modules = ModuleCache::new(config.module_cache_capacity);

        info!(
            modules_dir = %config.modules_dir.display(),
            data_dir = %config.data_dir.display(),
            cache_capacity = config.module_cache_capacity,
            "WASM executor initialized"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                engine,
                linker,
                modules,
                config,
                ticker,
            }),
        })
    }

    /// Number of compiled modules currently held in memory.
    pub fn cached_modules(&self) -> usize {
        self.inner.modules.len()
    }

    async fn run(&self, config: SandboxConfig) -> Result<InvocationResult> {
        let timeout = config.timeout;
        // Loading and compiling count against the invocation deadline too.
        let deadline = tokio::time::Instant::now() + timeout;
        let started = Instant::now();

        let inner = self.inner.clone();
        let setup = tokio::task::spawn_blocking(move || inner.prepare(&config));
        let sandbox = match tokio::time::timeout_at(deadline, setup).await {
            Ok(joined) => joined
                .map_err(|e| ExecutorError::Internal(format!("sandbox setup task failed: {e}")))??,
            Err(_) => {
                warn!(timeout_ms = timeout.as_millis() as u64, "Invocation timed out during setup");
                return Ok(InvocationResult::TimedOut);
            }
        };

        let worker = tokio::task::spawn_blocking(move || sandbox.run());

        // On timeout the worker is left to the epoch deadline, which traps it shortly after.
        let joined = match tokio::time::timeout_at(deadline, worker).await {
            Ok(joined) => joined,
            Err(_) => {
                warn!(timeout_ms = timeout.as_millis() as u64, "Invocation timed out");
                return Ok(InvocationResult::TimedOut);
            }
        };

        let outcome = joined
            .map_err(|e| ExecutorError::Internal(format!("sandbox worker failed: {e}")))??;
        let elapsed = started.elapsed();

        match outcome {
            RunOutcome::Completed(output) => {
                info!(
                    elapsed_ms = elapsed.as_millis() as u64,
                    output_bytes = output.len(),
                    "Invocation completed"
                );
                Ok(InvocationResult::Completed { output, elapsed })
            }
            RunOutcome::Interrupted => {
                warn!(elapsed_ms = elapsed.as_millis() as u64, "Module interrupted at epoch deadline");
                Ok(InvocationResult::TimedOut)
            }
        }
    }
}

impl Inner {
    /// Loading, Configuring and Instantiated stages.
    fn prepare(&self, config: &SandboxConfig) -> Result<Sandbox> {
        let path = module_path(&self.config.modules_dir, config.function_id);
        let module = self
            .modules
            .get_or_compile(&self.engine, config.function_id, &path)?;

        let env = Environment::configure(config, &self.config.data_dir)?;
        let ticks = deadline_ticks(config.timeout, self.config.epoch_tick);
        debug!(function_id = config.function_id, ticks, "Instantiating sandbox");

        Sandbox::instantiate(
            &self.engine,
            &self.linker,
            &module,
            env,
            self.ticker.clone(),
            ticks,
        )
    }
}

#[async_trait]
impl SandboxExecutor for WasmExecutor {
    #[instrument(skip(self, config), fields(function_id = config.function_id, request_id = %config.request_id))]
    async fn execute(&self, config: SandboxConfig) -> CommonResult<InvocationResult> {
        self.run(config).await.map_err(|e| {
            error!(error = %e, "Sandbox execution failed");
            FaasError::from(e)
        })
    }
}
