//! One sandbox per invocation: configure WASI, instantiate, run `_start`.

use std::path::Path;
use std::sync::Arc;

use faas_common::{SandboxConfig, REQUEST_ENV_VAR};
use tracing::debug;
use wasi_common::pipe::WritePipe;
use wasi_common::I32Exit;
use wasmtime::{Engine, Linker, Module, Store, Trap, TypedFunc};
use wasmtime_wasi::sync::{ambient_authority, Dir, WasiCtxBuilder};
use wasmtime_wasi::WasiCtx;

use crate::epoch::EpochTicker;
use crate::{ExecutorError, Result};

pub const ENTRY_POINT: &str = "_start";

pub struct HostState {
    wasi: WasiCtx,
}

impl HostState {
    pub fn wasi_mut(&mut self) -> &mut WasiCtx {
        &mut self.wasi
    }
}

/// How a run ended, short of an error.
#[derive(Debug)]
pub enum RunOutcome {
    /// Entry point returned (or exited with status 0); everything written to stdout.
    Completed(Vec<u8>),
    /// The store's epoch deadline passed.
    Interrupted,
}

/// Restricted WASI context plus the pipe that captures stdout.
pub struct Environment {
    wasi: WasiCtx,
    stdout: WritePipe<Vec<u8>>,
}

impl Environment {
    /// Declared vars plus the request body, inherited stdin, captured stdout,
    /// and one preopen per folder mapping. Nothing else of the host is visible.
    pub fn configure(config: &SandboxConfig, data_dir: &Path) -> Result<Self> {
        let stdout = WritePipe::new(Vec::new());
        let mut builder = WasiCtxBuilder::new();
        builder.inherit_stdin().stdout(Box::new(stdout.clone()));

        for (key, value) in &config.vars {
            // The request body always wins over a declared var of the same name.
            if key == REQUEST_ENV_VAR {
                continue;
            }
            builder
                .env(key, value)
                .map_err(|e| ExecutorError::Configure(format!("env var {key}: {e}")))?;
        }

        // Environment entries are NUL terminated.
        if config.payload.contains(&0) {
            return Err(ExecutorError::InvalidRequest(
                "request body contains a NUL byte".to_string(),
            ));
        }
        let request = String::from_utf8_lossy(&config.payload);
        builder
            .env(REQUEST_ENV_VAR, &request)
            .map_err(|e| ExecutorError::Configure(format!("request body: {e}")))?;

        for (label, folder_id) in &config.folders {
            let host_dir = data_dir.join(folder_id.to_string());
            std::fs::create_dir_all(&host_dir)?;

            let dir = Dir::open_ambient_dir(&host_dir, ambient_authority())?;
            builder
                .preopened_dir(dir, label)
                .map_err(|e| ExecutorError::Configure(format!("mount {label}: {e:#}")))?;
            debug!(label = %label, host_dir = %host_dir.display(), "Folder mounted");
        }

        Ok(Self {
            wasi: builder.build(),
            stdout,
        })
    }
}

/// An instantiated module with its own store, ready to run once.
pub struct Sandbox {
    store: Store<HostState>,
    entry: TypedFunc<(), ()>,
    stdout: WritePipe<Vec<u8>>,
    // Keeps the epoch advancing until this run ends, even if the executor is gone.
    epoch: Arc<EpochTicker>,
}

impl Sandbox {
    pub fn instantiate(
        engine: &Engine,
        linker: &Linker<HostState>,
        module: &Module,
        env: Environment,
        epoch: Arc<EpochTicker>,
        deadline_ticks: u64,
    ) -> Result<Self> {
        let Environment { wasi, stdout } = env;

        let mut store = Store::new(engine, HostState { wasi });
        store.set_epoch_deadline(deadline_ticks);

        let instance = linker
            .instantiate(&mut store, module)
            .map_err(|e| ExecutorError::Instantiate(format!("{e:#}")))?;
        let entry = instance
            .get_typed_func::<(), ()>(&mut store, ENTRY_POINT)
            .map_err(|e| ExecutorError::Instantiate(format!("{ENTRY_POINT}: {e:#}")))?;

        Ok(Self {
            store,
            entry,
            stdout,
            epoch,
        })
    }

    /// Call the entry point to completion on the current thread.
    pub fn run(self) -> Result<RunOutcome> {
        let Sandbox {
            mut store,
            entry,
            stdout,
            epoch,
        } = self;

        let result = entry.call(&mut store, ());
        // The store holds the other end of the pipe.
        drop(store);
        drop(epoch);

        match result {
            Ok(()) => {}
            Err(err) => {
                if let Some(exit) = err.downcast_ref::<I32Exit>() {
                    if exit.0 != 0 {
                        return Err(ExecutorError::Exit(exit.0));
                    }
                } else if err.downcast_ref::<Trap>() == Some(&Trap::Interrupt) {
                    return Ok(RunOutcome::Interrupted);
                } else {
                    return Err(ExecutorError::Trap(format!("{err:#}")));
                }
            }
        }

        let output = stdout
            .try_into_inner()
            .map_err(|_| ExecutorError::Internal("stdout pipe still shared".to_string()))?;
        Ok(RunOutcome::Completed(output))
    }
}
