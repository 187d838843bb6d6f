//! Compiled-module cache keyed by function id

use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use lru::LruCache;
use tracing::debug;
use wasmtime::{Engine, Module};

use crate::{ExecutorError, Result};

/// LRU of compiled modules. A `Module` is immutable and cheap to clone, so
/// concurrent invocations of the same function share one compilation while
/// each still builds its own store and instance.
pub struct ModuleCache {
    modules: Mutex<LruCache<i64, Module>>,
}

impl ModuleCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            modules: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Return the compiled module for `function_id`, reading and compiling
    /// `path` on a miss.
    pub fn get_or_compile(&self, engine: &Engine, function_id: i64, path: &Path) -> Result<Module> {
        if let Some(module) = self.lock()?.get(&function_id) {
            debug!(function_id, "Module cache hit");
            return Ok(module.clone());
        }

        let bytes = std::fs::read(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ExecutorError::ModuleNotFound(function_id),
            _ => ExecutorError::Io(e),
        })?;

        // Compile outside the lock.
        let module = Module::from_binary(engine, &bytes)
            .map_err(|e| ExecutorError::Compile(format!("{e:#}")))?;
        debug!(function_id, size = bytes.len(), "Module compiled");

        self.lock()?.put(function_id, module.clone());
        Ok(module)
    }

    pub fn len(&self) -> usize {
        self.lock().map(|cache| cache.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<MutexGuard<'_, LruCache<i64, Module>>> {
        self.modules
            .lock()
            .map_err(|_| ExecutorError::Internal("module cache lock poisoned".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const EMPTY_MODULE: &str = r#"(module (func (export "_start")))"#;

    fn write_module(dir: &TempDir, id: i64) -> std::path::PathBuf {
        let path = dir.path().join(format!("{id}.wasm"));
        std::fs::write(&path, wat::parse_str(EMPTY_MODULE).unwrap()).unwrap();
        path
    }

    #[test]
    fn test_hit_does_not_touch_disk() {
        let dir = TempDir::new().unwrap();
        let engine = Engine::default();
        let cache = ModuleCache::new(4);
        let path = write_module(&dir, 1);

        cache.get_or_compile(&engine, 1, &path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert!(cache.get_or_compile(&engine, 1, &path).is_ok());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_missing_module() {
        let dir = TempDir::new().unwrap();
        let cache = ModuleCache::new(4);

        let err = cache
            .get_or_compile(&Engine::default(), 9, &dir.path().join("9.wasm"))
            .err()
            .expect("missing module should fail");
        assert!(matches!(err, ExecutorError::ModuleNotFound(9)));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_malformed_module_is_not_cached() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("3.wasm");
        std::fs::write(&path, b"definitely not wasm").unwrap();
        let cache = ModuleCache::new(4);

        let err = cache
            .get_or_compile(&Engine::default(), 3, &path)
            .err()
            .expect("malformed module should fail");
        assert!(matches!(err, ExecutorError::Compile(_)));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_capacity_evicts_least_recent() {
        let dir = TempDir::new().unwrap();
        let engine = Engine::default();
        let cache = ModuleCache::new(1);
        let first = write_module(&dir, 1);
        let second = write_module(&dir, 2);

        cache.get_or_compile(&engine, 1, &first).unwrap();
        cache.get_or_compile(&engine, 2, &second).unwrap();
        assert_eq!(cache.len(), 1);

        // Evicted entry has to come from disk again.
        std::fs::remove_file(&first).unwrap();
        let err = cache
            .get_or_compile(&engine, 1, &first)
            .err()
            .expect("evicted module should be reread");
        assert!(matches!(err, ExecutorError::ModuleNotFound(1)));
    }
}
