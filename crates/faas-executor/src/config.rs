use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_MODULE_CACHE_CAPACITY: usize = 64;
pub const DEFAULT_EPOCH_TICK: Duration = Duration::from_millis(10);

/// Settings the execution engine is built from. Constructed once at startup.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Directory holding `<id>.wasm` files.
    pub modules_dir: PathBuf,
    /// Root under which each folder id gets its own host directory.
    pub data_dir: PathBuf,
    /// Maximum number of compiled modules kept in memory.
    pub module_cache_capacity: usize,
    /// Interval at which the engine epoch advances.
    pub epoch_tick: Duration,
}

impl ExecutorConfig {
    pub fn new(modules_dir: impl Into<PathBuf>, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            modules_dir: modules_dir.into(),
            data_dir: data_dir.into(),
            module_cache_capacity: DEFAULT_MODULE_CACHE_CAPACITY,
            epoch_tick: DEFAULT_EPOCH_TICK,
        }
    }

    pub fn with_module_cache_capacity(mut self, capacity: usize) -> Self {
        self.module_cache_capacity = capacity;
        self
    }

    pub fn with_epoch_tick(mut self, tick: Duration) -> Self {
        self.epoch_tick = tick;
        self
    }
}
