use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};

use faas_common::{FaasError, Result};
use faas_executor::ExecutorConfig;
use serde::{Deserialize, Serialize};
use tracing::info;

pub const DEFAULT_CONFIG_PATH: &str = "config.json";
pub const CONFIG_PATH_ENV: &str = "FAAS_CONFIG";
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 32 * 1024 * 1024;

/// Server settings. Read once at startup and handed to each component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub addr: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub fs_dir: PathBuf,
    pub modules_dir: PathBuf,
    pub module_cache_capacity: usize,
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1".to_string(),
            port: 8080,
            db_path: PathBuf::from("./wasm.db"),
            fs_dir: PathBuf::from("./fs"),
            modules_dir: PathBuf::from("./modules"),
            module_cache_capacity: faas_executor::config::DEFAULT_MODULE_CACHE_CAPACITY,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}

impl ServerConfig {
    /// Config file named by `FAAS_CONFIG` (or `config.json`), then environment overrides.
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let mut config = Self::load_from(Path::new(&path))?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Read `path`, or write the defaults there if it does not exist yet.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let raw = std::fs::read_to_string(path)?;
            return serde_json::from_str(&raw).map_err(|e| {
                FaasError::Config(format!("failed to parse {}: {e}", path.display()))
            });
        }

        let config = Self::default();
        let encoded = serde_json::to_string_pretty(&config)
            .map_err(|e| FaasError::Config(format!("failed to encode defaults: {e}")))?;
        std::fs::write(path, encoded)?;
        info!(path = %path.display(), "Wrote default server config");
        Ok(config)
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(addr) = lookup("FAAS_ADDR") {
            self.addr = addr;
        }
        if let Some(port) = lookup("FAAS_PORT") {
            self.port = port
                .parse()
                .map_err(|e| FaasError::Config(format!("invalid FAAS_PORT {port:?}: {e}")))?;
        }
        if let Some(path) = lookup("FAAS_DB_PATH") {
            self.db_path = PathBuf::from(path);
        }
        if let Some(path) = lookup("FAAS_FS_DIR") {
            self.fs_dir = PathBuf::from(path);
        }
        if let Some(path) = lookup("FAAS_MODULES_DIR") {
            self.modules_dir = PathBuf::from(path);
        }
        Ok(())
    }

    pub fn make_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.modules_dir)?;
        std::fs::create_dir_all(&self.fs_dir)?;
        Ok(())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self
            .addr
            .parse()
            .map_err(|e| FaasError::Config(format!("invalid listen address {:?}: {e}", self.addr)))?;
        Ok(SocketAddr::new(ip, self.port))
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig::new(&self.modules_dir, &self.fs_dir)
            .with_module_cache_capacity(self.module_cache_capacity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_writes_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");

        let config = ServerConfig::load_from(&path).unwrap();
        assert_eq!(config, ServerConfig::default());
        assert!(path.exists());

        // Second load reads what was written.
        assert_eq!(ServerConfig::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"port": 9000, "modules_dir": "/srv/modules"}"#).unwrap();

        let config = ServerConfig::load_from(&path).unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.modules_dir, PathBuf::from("/srv/modules"));
        assert_eq!(config.addr, "127.0.0.1");
        assert_eq!(config.max_upload_bytes, DEFAULT_MAX_UPLOAD_BYTES);
    }

    #[test]
    fn test_malformed_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ port: ").unwrap();

        assert!(matches!(
            ServerConfig::load_from(&path),
            Err(FaasError::Config(_))
        ));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("FAAS_ADDR", "0.0.0.0"),
            ("FAAS_PORT", "3000"),
            ("FAAS_DB_PATH", "/tmp/faas.db"),
        ]
        .into_iter()
        .collect();

        let mut config = ServerConfig::default();
        config
            .apply_overrides(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.socket_addr().unwrap(), "0.0.0.0:3000".parse().unwrap());
        assert_eq!(config.db_path, PathBuf::from("/tmp/faas.db"));
        assert_eq!(config.fs_dir, PathBuf::from("./fs"));
    }

    #[test]
    fn test_invalid_port_override() {
        let mut config = ServerConfig::default();
        let err = config
            .apply_overrides(|key| (key == "FAAS_PORT").then(|| "http".to_string()))
            .unwrap_err();
        assert!(matches!(err, FaasError::Config(_)));
    }

    #[test]
    fn test_make_dirs_and_executor_config() {
        let dir = TempDir::new().unwrap();
        let config = ServerConfig {
            fs_dir: dir.path().join("fs"),
            modules_dir: dir.path().join("modules"),
            module_cache_capacity: 3,
            ..ServerConfig::default()
        };

        config.make_dirs().unwrap();
        assert!(config.fs_dir.is_dir());
        assert!(config.modules_dir.is_dir());

        let executor = config.executor_config();
        assert_eq!(executor.data_dir, config.fs_dir);
        assert_eq!(executor.module_cache_capacity, 3);
    }
}
