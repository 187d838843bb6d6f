// Re-export dependencies used in public interfaces of common types

use std::collections::{BTreeMap, HashMap};
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
pub use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FaasError {
    #[error("Invalid Request: {0}")]
    Validation(String),

    #[error("Resource Not Found: {0}")]
    NotFound(String),

    #[error("Execution timed out")]
    Timeout,

    #[error("Sandbox Error: {0}")]
    Sandbox(String),

    #[error("Store Error: {0}")]
    Store(String),

    #[error("Protocol Error: {0}")]
    Protocol(String),

    #[error("Configuration Error: {0}")]
    Config(String),

    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal Error: {0}")]
    Internal(String),
}

// Define the primary Result type for FaaS operations
pub type Result<T> = std::result::Result<T, FaasError>;

/// Timeout stored for functions uploaded with a non-positive timeout.
pub const DEFAULT_TIMEOUT_MS: i64 = 1000;

/// Hard ceiling on any single invocation, whatever the stored timeout says.
pub const MAX_TIMEOUT: Duration = Duration::from_secs(15 * 60);

pub const MODULE_EXTENSION: &str = "wasm";

/// Environment variable carrying the raw inbound request body into the module.
pub const REQUEST_ENV_VAR: &str = "REQUEST";

/// Method vocabulary seeded into the store. Only these can be associated with a function.
pub const CANONICAL_METHODS: [&str; 9] = [
    "GET", "HEAD", "POST", "PUT", "DELETE", "CONNECT", "OPTIONS", "TRACE", "PATCH",
];

pub fn canonical_method(method: &str) -> String {
    method.trim().to_ascii_uppercase()
}

/// Location of the compiled module for `function_id` inside the module storage directory.
pub fn module_path(modules_dir: &Path, function_id: i64) -> PathBuf {
    modules_dir.join(format!("{function_id}.{MODULE_EXTENSION}"))
}

/// Deadline for one invocation: the stored timeout, capped at [`MAX_TIMEOUT`].
pub fn effective_timeout(timeout_ms: i64) -> Duration {
    Duration::from_millis(timeout_ms.max(0) as u64).min(MAX_TIMEOUT)
}

/// Descriptor uploaded alongside a module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionConfig {
    pub name: String,
    #[serde(default)]
    pub timeout: i64,
    #[serde(default)]
    pub methods: Vec<String>,
    #[serde(default)]
    pub folders: Vec<String>,
    #[serde(default)]
    pub vars: BTreeMap<String, String>,
}

impl FunctionConfig {
    pub fn parse(data: &str) -> Result<Self> {
        serde_json::from_str(data)
            .map_err(|e| FaasError::Validation(format!("invalid function config: {e}")))
    }

    pub fn blob(&self) -> ConfigBlob {
        ConfigBlob {
            folders: self.folders.clone(),
            vars: self.vars.clone(),
        }
    }

    /// Declared methods, canonicalized, first occurrence kept.
    pub fn canonical_methods(&self) -> Vec<String> {
        let mut methods: Vec<String> = Vec::with_capacity(self.methods.len());
        for method in self.methods.iter().map(|m| canonical_method(m)) {
            if !methods.contains(&method) {
                methods.push(method);
            }
        }
        methods
    }
}

/// Per-function settings persisted as an encoded document keyed by function id.
/// The timeout lives in its own column and is not part of the blob.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigBlob {
    #[serde(default)]
    pub folders: Vec<String>,
    #[serde(default)]
    pub vars: BTreeMap<String, String>,
}

/// One row of the function listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionEntry {
    pub id: i64,
    pub name: String,
    pub timeout: i64,
    pub methods: Vec<String>,
}

// Configuration for a sandbox execution request
#[derive(Debug, Clone, Default)]
pub struct SandboxConfig {
    pub function_id: i64,
    pub request_id: String,
    pub vars: BTreeMap<String, String>,
    /// Logical mount name -> folder identifier.
    pub folders: HashMap<String, i64>,
    pub payload: Vec<u8>,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvocationResult {
    /// Entry point returned before the deadline; `output` is everything written to stdout.
    Completed { output: Vec<u8>, elapsed: Duration },
    TimedOut,
}

impl Display for InvocationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvocationResult::Completed { output, elapsed } => write!(
                f,
                "InvocationResult::Completed(output: {} bytes, elapsed: {}ms)",
                output.len(),
                elapsed.as_millis()
            ),
            InvocationResult::TimedOut => write!(f, "InvocationResult::TimedOut"),
        }
    }
}

// Define the SandboxExecutor trait
#[async_trait]
pub trait SandboxExecutor: Send + Sync {
    async fn execute(&self, config: SandboxConfig) -> Result<InvocationResult>;
}
