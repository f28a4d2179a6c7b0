// src/services/catalog.rs

//! Read-only view over the artifact trees for the query surface.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::{AppError, Result};
use crate::models::{ArtifactKind, DocumentKey, StructuredRecord, material_dir};
use crate::storage::ArtifactStore;

pub struct Catalog {
    store: Arc<dyn ArtifactStore>,
}

impl Catalog {
    pub fn new(store: Arc<dyn ArtifactStore>) -> Self {
        Self { store }
    }

    /// Every material with its structured records, records ordered by standard.
    ///
    /// Records without a raw artifact break provenance and are left out;
    /// a material left with no records is not listed.
    pub async fn materials(&self) -> Result<BTreeMap<String, Vec<StructuredRecord>>> {
        let materials = self.require_materials(ArtifactKind::Structured).await?;
        let mut out = BTreeMap::new();

        for material in materials {
            let keys = self
                .store
                .list_keys(ArtifactKind::Structured, &material)
                .await?
                .unwrap_or_default();

            let mut records = Vec::with_capacity(keys.len());
            for key in keys {
                if !self.store.exists(ArtifactKind::Raw, &material, &key).await? {
                    log::warn!("Skipping {}/{}: no raw artifact", material, key);
                    continue;
                }
                let Some(bytes) = self
                    .store
                    .read(ArtifactKind::Structured, &material, &key)
                    .await?
                else {
                    continue;
                };
                match serde_json::from_slice(&bytes) {
                    Ok(data) => records.push(StructuredRecord::from_data(data)),
                    Err(e) => log::warn!("Skipping {}/{}: {}", material, key, e),
                }
            }
            if records.is_empty() {
                continue;
            }
            records.sort_by(|a, b| a.standard.cmp(&b.standard));
            out.insert(material, records);
        }
        Ok(out)
    }

    /// Cleaned file names per material.
    pub async fn cleaned_files(&self) -> Result<BTreeMap<String, Vec<String>>> {
        let kind = ArtifactKind::Cleaned;
        let materials = self.require_materials(kind).await?;
        let mut out = BTreeMap::new();

        for material in materials {
            let files = self
                .store
                .list_keys(kind, &material)
                .await?
                .unwrap_or_default()
                .into_iter()
                .map(|key| format!("{}.{}", key, kind.extension()))
                .collect();
            out.insert(material, files);
        }
        Ok(out)
    }

    /// Content of one cleaned file, `None` if it does not exist.
    pub async fn cleaned_file(&self, material: &str, file: &str) -> Result<Option<Vec<u8>>> {
        let kind = ArtifactKind::Cleaned;
        let dir = material_dir(material)?;
        let stem = file
            .strip_suffix(&format!(".{}", kind.extension()))
            .ok_or_else(|| AppError::invalid_key("file name", file))?;
        let key = DocumentKey::new(stem)?;
        self.store.read(kind, &dir, &key).await
    }

    async fn require_materials(&self, kind: ArtifactKind) -> Result<Vec<String>> {
        self.store
            .list_materials(kind)
            .await?
            .ok_or_else(|| AppError::RootMissing(PathBuf::from(self.store.root_location(kind))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::LocalStorage;
    use serde_json::json;
    use tempfile::TempDir;

    fn key(s: &str) -> DocumentKey {
        DocumentKey::new(s).unwrap()
    }

    async fn put_record(store: &LocalStorage, material: &str, k: &str, standard: &str) {
        let k = key(k);
        store
            .write(ArtifactKind::Raw, material, &k, b"<html/>")
            .await
            .unwrap();
        let data = json!({ "Material": { "BelongsToStandard": { "StandardCode": standard } } });
        store
            .write(
                ArtifactKind::Structured,
                material,
                &k,
                &serde_json::to_vec(&data).unwrap(),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_materials_sorted_by_standard() {
        let temp = TempDir::new().unwrap();
        let store = LocalStorage::new(temp.path());
        put_record(&store, "C45", "C45_a", "GB/T 699").await;
        put_record(&store, "18CrMo4", "18CrMo4_a", "NF EN 10084").await;
        put_record(&store, "18CrMo4", "18CrMo4_b", "DIN EN 10084").await;

        let catalog = Catalog::new(Arc::new(store));
        let materials = catalog.materials().await.unwrap();

        let names: Vec<&String> = materials.keys().collect();
        assert_eq!(names, vec!["18CrMo4", "C45"]);
        let standards: Vec<&str> = materials["18CrMo4"]
            .iter()
            .map(|r| r.standard.as_str())
            .collect();
        assert_eq!(standards, vec!["DIN EN 10084", "NF EN 10084"]);
    }

    #[tokio::test]
    async fn test_materials_skips_orphans_and_bad_json() {
        let temp = TempDir::new().unwrap();
        let store = LocalStorage::new(temp.path());
        put_record(&store, "C45", "C45_a", "GB/T 699").await;
        store
            .write(ArtifactKind::Structured, "C45", &key("C45_orphan"), b"{}")
            .await
            .unwrap();
        store
            .write(ArtifactKind::Raw, "C45", &key("C45_bad"), b"<html/>")
            .await
            .unwrap();
        store
            .write(ArtifactKind::Structured, "C45", &key("C45_bad"), b"not json")
            .await
            .unwrap();

        store
            .write(ArtifactKind::Structured, "Orph", &key("Orph_a"), b"{}")
            .await
            .unwrap();

        let catalog = Catalog::new(Arc::new(store));
        let materials = catalog.materials().await.unwrap();
        assert_eq!(materials["C45"].len(), 1);
        assert!(!materials.contains_key("Orph"));
    }

    #[tokio::test]
    async fn test_missing_root_is_error() {
        let temp = TempDir::new().unwrap();
        let catalog = Catalog::new(Arc::new(LocalStorage::new(temp.path())));

        assert!(matches!(
            catalog.materials().await,
            Err(AppError::RootMissing(_))
        ));
        assert!(matches!(
            catalog.cleaned_files().await,
            Err(AppError::RootMissing(_))
        ));
    }

    #[tokio::test]
    async fn test_cleaned_files_and_lookup() {
        let temp = TempDir::new().unwrap();
        let store = LocalStorage::new(temp.path());
        store
            .write(ArtifactKind::Cleaned, "C45", &key("C45_b"), b"<p>b</p>")
            .await
            .unwrap();
        store
            .write(ArtifactKind::Cleaned, "C45", &key("C45_a"), b"<p>a</p>")
            .await
            .unwrap();

        let catalog = Catalog::new(Arc::new(store));
        let files = catalog.cleaned_files().await.unwrap();
        assert_eq!(files["C45"], vec!["C45_a.html", "C45_b.html"]);

        let body = catalog.cleaned_file("C45", "C45_a.html").await.unwrap();
        assert_eq!(body.unwrap(), b"<p>a</p>");
        assert!(catalog.cleaned_file("C45", "C45_z.html").await.unwrap().is_none());
        assert!(matches!(
            catalog.cleaned_file("C45", "C45_a.json").await,
            Err(AppError::InvalidKey { .. })
        ));
        assert!(catalog.cleaned_file("C45", "..html").await.is_err());
    }
}
