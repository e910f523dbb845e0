use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tokio::fs;
use tracing::{debug, info};

use atelier_shared::images::is_image_filename;

use crate::error::ServerError;

/// Verify that a resolved path stays within the expected base directory.
/// Prevents path traversal attacks.
fn ensure_within(base: &Path, target: &Path) -> Result<PathBuf, ServerError> {
    // Canonicalize base; target may not exist yet so normalize manually
    let canonical_base = base.canonicalize().unwrap_or_else(|_| base.to_path_buf());
    let mut resolved = canonical_base.clone();
    for component in target
        .strip_prefix(&canonical_base)
        .unwrap_or(target)
        .components()
    {
        match component {
            std::path::Component::Normal(c) => resolved.push(c),
            std::path::Component::ParentDir => {
                return Err(ServerError::BadRequest(
                    "Path traversal detected".to_string(),
                ));
            }
            _ => {} // RootDir, CurDir, Prefix — skip
        }
    }
    if !resolved.starts_with(&canonical_base) {
        return Err(ServerError::BadRequest(
            "Path traversal detected".to_string(),
        ));
    }
    Ok(resolved)
}

/// Filesystem store for generated image files, served under `/images`.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    base_dir: PathBuf,
}

impl ArtifactStore {
    pub async fn new(base_dir: PathBuf) -> Result<Self, ServerError> {
        fs::create_dir_all(&base_dir).await.map_err(|e| {
            ServerError::Storage(format!(
                "Failed to create image directory '{}': {}",
                base_dir.display(),
                e
            ))
        })?;

        info!(path = %base_dir.display(), "Artifact store initialized");

        Ok(Self { base_dir })
    }

    pub async fn save(&self, filename: &str, data: &[u8]) -> Result<(), ServerError> {
        let path = self.safe_path(filename)?;

        fs::write(&path, data).await.map_err(|e| {
            ServerError::Storage(format!("Failed to write image {}: {}", filename, e))
        })?;

        debug!(filename = %filename, size = data.len(), "Stored image file");
        Ok(())
    }

    pub async fn read(&self, filename: &str) -> Result<Vec<u8>, ServerError> {
        let path = self.safe_path(filename)?;

        if !path.exists() {
            return Err(ServerError::ArtifactNotFound(filename.to_string()));
        }

        let data = fs::read(&path).await.map_err(|e| {
            ServerError::Storage(format!("Failed to read image {}: {}", filename, e))
        })?;

        debug!(filename = %filename, size = data.len(), "Read image file");
        Ok(data)
    }

    /// Remove an image file.  Missing files are treated as already deleted.
    #[allow(dead_code)]
    pub async fn delete(&self, filename: &str) -> Result<(), ServerError> {
        let path = self.safe_path(filename)?;

        if !path.exists() {
            return Ok(());
        }

        fs::remove_file(&path).await.map_err(|e| {
            ServerError::Storage(format!("Failed to delete image {}: {}", filename, e))
        })?;

        debug!(filename = %filename, "Deleted image file");
        Ok(())
    }

    /// Filenames of all image files in the store, in directory order.
    pub async fn list(&self) -> Result<Vec<String>, ServerError> {
        let mut names = Vec::new();
        let mut entries = fs::read_dir(&self.base_dir)
            .await
            .map_err(|e| ServerError::Storage(format!("Failed to list images: {}", e)))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| ServerError::Storage(format!("Failed to read directory entry: {}", e)))?
        {
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| ServerError::Storage(format!("Failed to stat entry: {}", e)))?;
            if !file_type.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if is_image_filename(name) {
                    names.push(name.to_string());
                }
            }
        }

        Ok(names)
    }

    /// Creation time of an image file, falling back to the modification
    /// time on filesystems that do not record birth times, then to now.
    pub async fn created_at(&self, filename: &str) -> SystemTime {
        let Ok(path) = self.safe_path(filename) else {
            return SystemTime::now();
        };
        match fs::metadata(&path).await {
            Ok(meta) => meta
                .created()
                .or_else(|_| meta.modified())
                .unwrap_or_else(|_| SystemTime::now()),
            Err(_) => SystemTime::now(),
        }
    }

    /// Safe file path that validates against traversal.
    fn safe_path(&self, filename: &str) -> Result<PathBuf, ServerError> {
        if filename.is_empty()
            || filename.contains('/')
            || filename.contains('\\')
            || filename.contains("..")
        {
            return Err(ServerError::BadRequest(
                "Path traversal detected".to_string(),
            ));
        }
        let raw = self.base_dir.join(filename);
        ensure_within(&self.base_dir, &raw)
    }
}
