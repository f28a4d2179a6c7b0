//! Local filesystem artifact store.
//!
//! ## Storage Layout
//!
//! ```text
//! {root}/
//! └── {kind dir}/           # one of PathsConfig's raw/cleaned/structured dirs
//!     └── {material}/
//!         └── {key}.{html|json}
//! ```
//!
//! Writes go to `{key}.{ext}.tmp` first and are renamed into place, so a
//! reader sees either the previous artifact or the complete new one.

use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::io::AsyncWriteExt;

use crate::error::{AppError, Result};
use crate::models::{ArtifactKind, DocumentKey, PathsConfig};
use crate::storage::ArtifactStore;

/// Local filesystem storage backend.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root_dir: PathBuf,
    paths: PathsConfig,
}

impl LocalStorage {
    /// Create a LocalStorage rooted at the given data directory with default tree names.
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self::with_paths(root_dir, PathsConfig::default())
    }

    /// Create a LocalStorage with custom tree names.
    pub fn with_paths(root_dir: impl Into<PathBuf>, paths: PathsConfig) -> Self {
        Self {
            root_dir: root_dir.into(),
            paths,
        }
    }

    /// Root directory of one artifact tree.
    pub fn kind_root(&self, kind: ArtifactKind) -> PathBuf {
        match kind {
            ArtifactKind::Raw => self.paths.raw_root(&self.root_dir),
            ArtifactKind::Cleaned => self.paths.cleaned_root(&self.root_dir),
            ArtifactKind::Structured => self.paths.structured_root(&self.root_dir),
        }
    }

    fn material_path(&self, kind: ArtifactKind, material: &str) -> PathBuf {
        self.kind_root(kind).join(material)
    }

    /// Full path of an artifact.
    pub fn path(&self, kind: ArtifactKind, material: &str, key: &DocumentKey) -> PathBuf {
        self.material_path(kind, material)
            .join(format!("{}.{}", key, kind.extension()))
    }

    /// Write bytes atomically (write to temp, then rename).
    async fn write_bytes(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        let result = async {
            let mut file = tokio::fs::File::create(&tmp).await?;
            file.write_all(bytes).await?;
            file.flush().await?;
            file.sync_all().await?;
            drop(file);
            tokio::fs::rename(&tmp, path).await
        }
        .await;

        if let Err(e) = result {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(AppError::Io(e));
        }
        Ok(())
    }

    /// Sorted names of the sub-directories of `dir`, `None` if `dir` is absent.
    async fn list_dirs(dir: &Path) -> Result<Option<Vec<String>>> {
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(AppError::Io(e)),
        };

        let mut names = BTreeSet::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    names.insert(name.to_string());
                }
            }
        }
        Ok(Some(names.into_iter().collect()))
    }
}

#[async_trait]
impl ArtifactStore for LocalStorage {
    async fn list_materials(&self, kind: ArtifactKind) -> Result<Option<Vec<String>>> {
        Self::list_dirs(&self.kind_root(kind)).await
    }

    async fn list_keys(
        &self,
        kind: ArtifactKind,
        material: &str,
    ) -> Result<Option<Vec<DocumentKey>>> {
        let dir = self.material_path(kind, material);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(AppError::Io(e)),
        };

        let mut keys = BTreeSet::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(kind.extension()) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match DocumentKey::new(stem) {
                Ok(key) => {
                    keys.insert(key);
                }
                Err(e) => log::debug!("Ignoring {}: {}", path.display(), e),
            }
        }
        Ok(Some(keys.into_iter().collect()))
    }

    async fn has_material(&self, kind: ArtifactKind, material: &str) -> Result<bool> {
        Ok(tokio::fs::try_exists(self.material_path(kind, material)).await?)
    }

    async fn exists(&self, kind: ArtifactKind, material: &str, key: &DocumentKey) -> Result<bool> {
        Ok(tokio::fs::try_exists(self.path(kind, material, key)).await?)
    }

    async fn read(
        &self,
        kind: ArtifactKind,
        material: &str,
        key: &DocumentKey,
    ) -> Result<Option<Vec<u8>>> {
        match tokio::fs::read(self.path(kind, material, key)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::Io(e)),
        }
    }

    async fn write(
        &self,
        kind: ArtifactKind,
        material: &str,
        key: &DocumentKey,
        bytes: &[u8],
    ) -> Result<()> {
        self.write_bytes(&self.path(kind, material, key), bytes)
            .await
    }

    async fn write_new(
        &self,
        kind: ArtifactKind,
        material: &str,
        key: &DocumentKey,
        bytes: &[u8],
    ) -> Result<bool> {
        if self.exists(kind, material, key).await? {
            return Ok(false);
        }
        self.write(kind, material, key, bytes).await?;
        Ok(true)
    }

    async fn created_at(
        &self,
        kind: ArtifactKind,
        material: &str,
        key: &DocumentKey,
    ) -> Result<Option<DateTime<Utc>>> {
        let metadata = match tokio::fs::metadata(self.path(kind, material, key)).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(AppError::Io(e)),
        };
        // Birth time is not recorded everywhere; fall back to mtime.
        let time = metadata.created().or_else(|_| metadata.modified())?;
        Ok(Some(DateTime::<Utc>::from(time)))
    }

    fn location(&self, kind: ArtifactKind, material: &str, key: &DocumentKey) -> String {
        self.path(kind, material, key).display().to_string()
    }

    fn root_location(&self, kind: ArtifactKind) -> String {
        self.kind_root(kind).display().to_string()
    }
}
