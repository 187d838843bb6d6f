use std::path::Path;

use axum::extract::Multipart;
use faas_common::{module_path, FaasError, FunctionConfig, Result};
use faas_store::{MetadataStore, Transaction};
use tracing::{info, instrument, warn};

pub const CONFIG_FIELD: &str = "config";
pub const MODULE_FIELD: &str = "module";

/// The two form fields of an upload.
#[derive(Debug)]
pub struct Upload {
    pub config: FunctionConfig,
    pub module: Vec<u8>,
}

impl Upload {
    /// Read `config` and `module` out of a multipart body. Unknown fields are skipped.
    pub async fn from_multipart(multipart: &mut Multipart) -> Result<Self> {
        let mut config = None;
        let mut module = None;

        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| FaasError::Validation(format!("malformed multipart body: {e}")))?
        {
            let name = field.name().map(str::to_owned);
            match name.as_deref() {
                Some(CONFIG_FIELD) => {
                    let text = field.text().await.map_err(|e| {
                        FaasError::Validation(format!("unreadable {CONFIG_FIELD} field: {e}"))
                    })?;
                    config = Some(FunctionConfig::parse(&text)?);
                }
                Some(MODULE_FIELD) => {
                    let bytes = field.bytes().await.map_err(|e| {
                        FaasError::Validation(format!("unreadable {MODULE_FIELD} field: {e}"))
                    })?;
                    module = Some(bytes.to_vec());
                }
                _ => {}
            }
        }

        Ok(Self {
            config: config
                .ok_or_else(|| FaasError::Validation(format!("missing {CONFIG_FIELD} field")))?,
            module: module
                .ok_or_else(|| FaasError::Validation(format!("missing {MODULE_FIELD} field")))?,
        })
    }
}

/// Register the function, its folders, config blob and methods, and write the
/// module file, all in one unit of work. Returns the new function id.
#[instrument(skip(store, modules_dir, upload), fields(name = %upload.config.name))]
pub async fn register_function(
    store: &MetadataStore,
    modules_dir: &Path,
    upload: &Upload,
) -> Result<i64> {
    let mut tx = store.begin_write().await?;

    let (function_id, path) = match stage(&mut tx, modules_dir, upload).await {
        Ok(staged) => staged,
        Err(e) => {
            if let Err(rollback_err) = tx.rollback().await {
                warn!(error = %rollback_err, "Rollback after failed upload failed");
            }
            return Err(e);
        }
    };

    if let Err(e) = tx.commit().await {
        if let Err(remove_err) = tokio::fs::remove_file(&path).await {
            warn!(error = %remove_err, path = %path.display(), "Failed to remove orphaned module");
        }
        return Err(e.into());
    }

    info!(function_id, path = %path.display(), "Function uploaded");
    Ok(function_id)
}

async fn stage(
    tx: &mut Transaction,
    modules_dir: &Path,
    upload: &Upload,
) -> Result<(i64, std::path::PathBuf)> {
    let config = &upload.config;
    let function_id = tx.add_function(&config.name).await?;

    for label in &config.folders {
        tx.add_folder(label).await?;
    }

    tx.add_config_blob(function_id, config.timeout, &config.blob())
        .await?;

    for method in config.canonical_methods() {
        tx.add_method(function_id, &method).await?;
    }

    // Written last: nothing is left on disk if any registry step fails.
    let path = module_path(modules_dir, function_id);
    tokio::fs::write(&path, &upload.module).await?;

    Ok((function_id, path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn upload(methods: &[&str], folders: &[&str], timeout: i64) -> Upload {
        Upload {
            config: FunctionConfig {
                name: "todos".to_string(),
                timeout,
                methods: methods.iter().map(|m| m.to_string()).collect(),
                folders: folders.iter().map(|f| f.to_string()).collect(),
                vars: BTreeMap::from([("X".to_string(), "1".to_string())]),
            },
            module: b"\0asm\x01\0\0\0".to_vec(),
        }
    }

    #[tokio::test]
    async fn test_register_function_persists_everything() {
        let dir = TempDir::new().unwrap();
        let store = MetadataStore::in_memory().await.unwrap();

        let id = register_function(&store, dir.path(), &upload(&["get", "POST", "GET"], &["todos"], 0))
            .await
            .unwrap();

        assert_eq!(
            std::fs::read(module_path(dir.path(), id)).unwrap(),
            b"\0asm\x01\0\0\0".to_vec()
        );

        let mut tx = store.begin().await.unwrap();
        let functions = tx.list_functions().await.unwrap();
        assert_eq!(functions.len(), 1);
        assert_eq!(functions[0].timeout, 1000);
        assert_eq!(functions[0].methods, vec!["GET", "POST"]);

        let blob = tx.get_config(id).await.unwrap();
        assert_eq!(blob.folders, vec!["todos".to_string()]);
        assert_eq!(blob.vars.get("X").map(String::as_str), Some("1"));
        assert!(tx.get_folder("todos").await.is_ok());
    }

    #[tokio::test]
    async fn test_unknown_method_leaves_nothing_behind() {
        let dir = TempDir::new().unwrap();
        let store = MetadataStore::in_memory().await.unwrap();

        let err = register_function(&store, dir.path(), &upload(&["GET", "FETCH"], &["todos"], 10))
            .await
            .unwrap_err();
        assert!(matches!(err, FaasError::Validation(_)));

        let mut tx = store.begin().await.unwrap();
        assert!(tx.list_functions().await.unwrap().is_empty());
        assert!(tx.get_folder("todos").await.is_err());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_unwritable_modules_dir_rolls_back() {
        let dir = TempDir::new().unwrap();
        let store = MetadataStore::in_memory().await.unwrap();
        let missing = dir.path().join("does-not-exist");

        let err = register_function(&store, &missing, &upload(&["GET"], &[], 10))
            .await
            .unwrap_err();
        assert!(matches!(err, FaasError::Io(_)));

        let mut tx = store.begin().await.unwrap();
        assert!(tx.list_functions().await.unwrap().is_empty());
    }
}
