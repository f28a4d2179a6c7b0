//! Outstanding-set calculation.
//!
//! Computes which raw documents of a material still need to go through the
//! transforming stages:
//!
//! - **resume mode**: raw keys without a cleaned artifact
//! - **since mode**: raw keys whose artifact was created at or after a timestamp

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::{ArtifactKind, DocumentKey, material_dir};
use crate::storage::ArtifactStore;

/// Result of a diff for one material.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Outstanding {
    /// Keys to process, sorted lexicographically
    pub keys: Vec<DocumentKey>,
    /// The material had no cleaned directory when the diff ran
    pub new_material: bool,
    /// Raw artifacts present for the material
    pub raw_total: usize,
}

impl Outstanding {
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// An artifact whose key has no raw artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Orphan {
    pub kind: ArtifactKind,
    pub key: DocumentKey,
}

/// Calculator for outstanding document keys.
pub struct DiffEngine {
    store: Arc<dyn ArtifactStore>,
}

impl DiffEngine {
    pub fn new(store: Arc<dyn ArtifactStore>) -> Self {
        Self { store }
    }

    /// Keys of `material` that need processing.
    ///
    /// A material without a raw directory has nothing outstanding.
    pub async fn outstanding(
        &self,
        material: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Outstanding> {
        let dir = material_dir(material)?;
        let new_material = !self.store.has_material(ArtifactKind::Cleaned, &dir).await?;

        let Some(raw_keys) = self.store.list_keys(ArtifactKind::Raw, &dir).await? else {
            log::debug!("No raw directory for {}", dir);
            return Ok(Outstanding {
                new_material,
                ..Outstanding::default()
            });
        };
        let raw_total = raw_keys.len();

        let keys = match since {
            Some(since) => {
                let mut keys = Vec::new();
                for key in raw_keys {
                    let created = self
                        .store
                        .created_at(ArtifactKind::Raw, &dir, &key)
                        .await?;
                    if created.is_some_and(|at| at >= since) {
                        keys.push(key);
                    }
                }
                keys
            }
            None => {
                let cleaned: BTreeSet<DocumentKey> = self
                    .store
                    .list_keys(ArtifactKind::Cleaned, &dir)
                    .await?
                    .unwrap_or_default()
                    .into_iter()
                    .collect();
                raw_keys
                    .into_iter()
                    .filter(|key| !cleaned.contains(key))
                    .collect()
            }
        };

        Ok(Outstanding {
            keys,
            new_material,
            raw_total,
        })
    }

    /// Cleaned and structured artifacts of `material` without a raw artifact.
    pub async fn orphans(&self, material: &str) -> Result<Vec<Orphan>> {
        let dir = material_dir(material)?;
        let raw: BTreeSet<DocumentKey> = self
            .store
            .list_keys(ArtifactKind::Raw, &dir)
            .await?
            .unwrap_or_default()
            .into_iter()
            .collect();

        let mut orphans = Vec::new();
        for kind in [ArtifactKind::Cleaned, ArtifactKind::Structured] {
            let keys = self.store.list_keys(kind, &dir).await?.unwrap_or_default();
            orphans.extend(
                keys.into_iter()
                    .filter(|key| !raw.contains(key))
                    .map(|key| Orphan { kind, key }),
            );
        }
        Ok(orphans)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::LocalStorage;
    use std::time::Duration;
    use tempfile::TempDir;

    fn key(s: &str) -> DocumentKey {
        DocumentKey::new(s).unwrap()
    }

    async fn put(store: &LocalStorage, kind: ArtifactKind, material: &str, k: &str) {
        store.write(kind, material, &key(k), b"x").await.unwrap();
    }

    fn setup() -> (TempDir, Arc<LocalStorage>) {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(LocalStorage::new(temp.path()));
        (temp, store)
    }

    #[tokio::test]
    async fn test_resume_is_raw_minus_cleaned() {
        let (_temp, store) = setup();
        for k in ["C45_c", "C45_a", "C45_b"] {
            put(&store, ArtifactKind::Raw, "C45", k).await;
        }
        put(&store, ArtifactKind::Cleaned, "C45", "C45_b").await;

        let engine = DiffEngine::new(store);
        let outstanding = engine.outstanding("C45", None).await.unwrap();

        assert_eq!(outstanding.keys, vec![key("C45_a"), key("C45_c")]);
        assert!(!outstanding.new_material);
        assert_eq!(outstanding.raw_total, 3);
    }

    #[tokio::test]
    async fn test_new_material_flag() {
        let (_temp, store) = setup();
        put(&store, ArtifactKind::Raw, "C45", "C45_a").await;

        let engine = DiffEngine::new(store);
        let outstanding = engine.outstanding("C45", None).await.unwrap();
        assert!(outstanding.new_material);
        assert_eq!(outstanding.keys, vec![key("C45_a")]);
    }

    #[tokio::test]
    async fn test_missing_raw_directory_is_empty() {
        let (_temp, store) = setup();
        let engine = DiffEngine::new(store);

        let outstanding = engine.outstanding("Unknown", None).await.unwrap();
        assert!(outstanding.is_empty());
        assert_eq!(outstanding.raw_total, 0);
        assert!(outstanding.new_material);
    }

    #[tokio::test]
    async fn test_since_selects_recent_raw_artifacts() {
        let (_temp, store) = setup();
        put(&store, ArtifactKind::Raw, "C45", "C45_old").await;
        put(&store, ArtifactKind::Cleaned, "C45", "C45_old").await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        let marker = Utc::now();
        tokio::time::sleep(Duration::from_millis(50)).await;
        put(&store, ArtifactKind::Raw, "C45", "C45_new").await;
        put(&store, ArtifactKind::Cleaned, "C45", "C45_new").await;

        let engine = DiffEngine::new(store);
        let outstanding = engine.outstanding("C45", Some(marker)).await.unwrap();

        // Already-cleaned keys still count in since mode.
        assert_eq!(outstanding.keys, vec![key("C45_new")]);
        assert_eq!(outstanding.raw_total, 2);
    }

    #[tokio::test]
    async fn test_outstanding_is_stable() {
        let (_temp, store) = setup();
        for k in ["C45_b", "C45_a", "C45_d"] {
            put(&store, ArtifactKind::Raw, "C45", k).await;
        }
        let engine = DiffEngine::new(store);

        let first = engine.outstanding("C45", None).await.unwrap();
        let second = engine.outstanding("C45", None).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_material_name_whitespace() {
        let (_temp, store) = setup();
        put(&store, ArtifactKind::Raw, "M2高速钢", "M2高速钢_GB").await;

        let engine = DiffEngine::new(store);
        let outstanding = engine.outstanding("M2 高速钢", None).await.unwrap();
        assert_eq!(outstanding.keys, vec![key("M2高速钢_GB")]);
    }

    #[tokio::test]
    async fn test_orphans() {
        let (_temp, store) = setup();
        put(&store, ArtifactKind::Raw, "C45", "C45_a").await;
        put(&store, ArtifactKind::Cleaned, "C45", "C45_a").await;
        put(&store, ArtifactKind::Cleaned, "C45", "C45_x").await;
        put(&store, ArtifactKind::Structured, "C45", "C45_y").await;

        let engine = DiffEngine::new(store);
        let orphans = engine.orphans("C45").await.unwrap();
        assert_eq!(
            orphans,
            vec![
                Orphan {
                    kind: ArtifactKind::Cleaned,
                    key: key("C45_x")
                },
                Orphan {
                    kind: ArtifactKind::Structured,
                    key: key("C45_y")
                },
            ]
        );
    }
}
