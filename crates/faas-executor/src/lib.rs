use faas_common::FaasError;
use thiserror::Error;

// Re-export dependencies potentially needed by consumers
pub use faas_common as common;
pub use wasmtime;

pub mod config;
pub mod epoch;
pub mod executor;
pub mod module_cache;
mod sandbox;

pub use config::ExecutorConfig;
pub use executor::WasmExecutor;
pub use sandbox::ENTRY_POINT;

// --- Custom Error Type ---
#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("Module not found for function {0}")]
    ModuleNotFound(i64),
    #[error("Module compilation failed: {0}")]
    Compile(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Sandbox configuration failed: {0}")]
    Configure(String),
    #[error("Module instantiation failed: {0}")]
    Instantiate(String),
    #[error("Module trapped: {0}")]
    Trap(String),
    #[error("Module exited with status {0}")]
    Exit(i32),
    #[error("Engine error: {0}")]
    Engine(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Internal executor error: {0}")]
    Internal(String),
}

// Implement conversion from ExecutorError to the common FaasError
impl From<ExecutorError> for FaasError {
    fn from(err: ExecutorError) -> Self {
        match err {
            ExecutorError::ModuleNotFound(id) => {
                FaasError::NotFound(format!("module for function {id}"))
            }
            ExecutorError::InvalidRequest(msg) => FaasError::Validation(msg),
            ExecutorError::Io(e) => FaasError::Io(e),
            ExecutorError::Internal(msg) => FaasError::Internal(msg),
            other => FaasError::Sandbox(other.to_string()),
        }
    }
}

// Define local Result using the crate's Error type
pub type Result<T> = std::result::Result<T, ExecutorError>;
