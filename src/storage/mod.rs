//! Storage abstraction for pipeline artifacts.
//!
//! Every stage reads and writes through one [`ArtifactStore`], so there is a
//! single key scheme and a single place that builds paths.
//!
//! ## Directory Structure
//!
//! ```text
//! data/
//! ├── config.toml
//! ├── html_data/            # raw: written by the fetcher only
//! │   └── 18CrMo4/
//! │       └── 18CrMo4_NF_EN_10084-2008.html
//! ├── clean_html_data/      # cleaned: written by the clean stage
//! │   └── 18CrMo4/
//! │       └── 18CrMo4_NF_EN_10084-2008.html
//! └── JsonData/             # structured: written by the extract stage
//!     └── 18CrMo4/
//!         └── 18CrMo4_NF_EN_10084-2008.json
//! ```

pub mod local;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::{ArtifactKind, DocumentKey};

// Re-export for convenience
pub use local::LocalStorage;

/// Filesystem-like key/value store, one namespace per artifact kind.
///
/// `material` is always the material directory name (see
/// [`material_dir`](crate::models::material_dir)).
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Materials with a directory in the given tree, sorted by name.
    ///
    /// `None` when the tree root itself is absent.
    async fn list_materials(&self, kind: ArtifactKind) -> Result<Option<Vec<String>>>;

    /// Keys stored for a material, sorted lexicographically.
    ///
    /// `None` when the material has no directory in this tree.
    async fn list_keys(&self, kind: ArtifactKind, material: &str)
    -> Result<Option<Vec<DocumentKey>>>;

    /// Whether the material has a directory in this tree.
    async fn has_material(&self, kind: ArtifactKind, material: &str) -> Result<bool>;

    async fn exists(&self, kind: ArtifactKind, material: &str, key: &DocumentKey) -> Result<bool>;

    /// Read an artifact, `None` if it does not exist.
    async fn read(
        &self,
        kind: ArtifactKind,
        material: &str,
        key: &DocumentKey,
    ) -> Result<Option<Vec<u8>>>;

    /// Write an artifact atomically, replacing any previous content.
    async fn write(
        &self,
        kind: ArtifactKind,
        material: &str,
        key: &DocumentKey,
        bytes: &[u8],
    ) -> Result<()>;

    /// Write an artifact only if the key is not taken yet.
    ///
    /// Returns `false` (and leaves the existing artifact untouched) otherwise.
    async fn write_new(
        &self,
        kind: ArtifactKind,
        material: &str,
        key: &DocumentKey,
        bytes: &[u8],
    ) -> Result<bool>;

    /// Creation time of an artifact, `None` if it does not exist.
    async fn created_at(
        &self,
        kind: ArtifactKind,
        material: &str,
        key: &DocumentKey,
    ) -> Result<Option<DateTime<Utc>>>;

    /// Human-readable location of an artifact, for logs and reports.
    fn location(&self, kind: ArtifactKind, material: &str, key: &DocumentKey) -> String;

    /// Human-readable location of a whole artifact tree.
    fn root_location(&self, kind: ArtifactKind) -> String;
}
