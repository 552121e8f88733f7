//! Process-wide blob store bootstrap.

use std::path::PathBuf;
use std::process::exit;
use std::sync::Arc;

use object_store::aws::{AmazonS3, AmazonS3Builder};
use object_store::local::LocalFileSystem;
use object_store::ObjectStore;

static BLOB_STORE: tokio::sync::OnceCell<Arc<dyn ObjectStore>> =
    tokio::sync::OnceCell::const_new();

/// The configured blob store: S3 when `BOREAL_S3_BLOBS` is set, a local
/// directory otherwise.
pub async fn default_blob_store() -> Arc<dyn ObjectStore> {
    match BLOB_STORE
        .get_or_try_init(|| async { new_blob_store() })
        .await
    {
        Ok(store) => store.clone(),
        Err(e) => {
            tracing::error!("Failed to initialize blob store: {}. Exiting.", e);
            exit(1);
        }
    }
}

fn new_blob_store() -> Result<Arc<dyn ObjectStore>, String> {
    if boreal_config::CONFIG.s3_blobs {
        tracing::info!("Using S3 blob store");
        Ok(Arc::new(s3_blob_store()?))
    } else {
        tracing::info!("Using LocalFileSystem blob store");
        Ok(Arc::new(local_blob_store()))
    }
}

fn s3_blob_store() -> Result<AmazonS3, String> {
    let bucket_name = boreal_config::CONFIG
        .s3_bucket
        .as_ref()
        .ok_or("S3 bucket name not configured".to_string())?;
    AmazonS3Builder::from_env()
        .with_allow_http(true)
        .with_bucket_name(bucket_name)
        .build()
        .map_err(|e| format!("Failed to build S3 blob store: {}", e))
}

fn local_blob_store() -> LocalFileSystem {
    let path = PathBuf::from(&boreal_config::CONFIG.blob_dir);
    if let Err(e) = std::fs::create_dir_all(&path) {
        tracing::warn!("Could not create blob dir {}: {}", path.display(), e);
    }
    LocalFileSystem::new_with_prefix(path).expect("Failed to create LocalFileSystem")
}
