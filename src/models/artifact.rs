//! Artifact kinds, pipeline stages and document keys.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::utils::{clean_name, clean_standard};

/// One of the three artifact trees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Raw,
    Cleaned,
    Structured,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 3] = [Self::Raw, Self::Cleaned, Self::Structured];

    /// File extension of artifacts of this kind.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Raw | Self::Cleaned => "html",
            Self::Structured => "json",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::Cleaned => "cleaned",
            Self::Structured => "structured",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A transforming pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Clean,
    Extract,
}

impl Stage {
    /// Artifact the stage reads.
    pub fn input(self) -> ArtifactKind {
        match self {
            Self::Clean => ArtifactKind::Raw,
            Self::Extract => ArtifactKind::Cleaned,
        }
    }

    /// Artifact the stage writes.
    pub fn output(self) -> ArtifactKind {
        match self {
            Self::Clean => ArtifactKind::Cleaned,
            Self::Extract => ArtifactKind::Structured,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Clean => f.write_str("clean"),
            Self::Extract => f.write_str("extract"),
        }
    }
}

/// Identifier of one scraped document within a material.
///
/// The same key names the raw, cleaned and structured artifact of a document,
/// so it must be usable as a single file-name stem.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DocumentKey(String);

impl DocumentKey {
    /// Create a key, rejecting values that are not a single path segment.
    pub fn new(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        validate_segment("document key", &value)?;
        Ok(Self(value))
    }

    /// Key for a document matched by material name and standard code.
    pub fn for_standard(name: &str, standard: &str) -> Result<Self> {
        Self::new(format!("{}_{}", clean_name(name), clean_standard(standard)))
    }

    /// Key for a document identified only by its capture time.
    pub fn for_capture(name: &str, captured_at: DateTime<Utc>) -> Result<Self> {
        Self::new(format!(
            "{}_{}",
            clean_name(name),
            captured_at.format("%Y%m%d_%H%M%S")
        ))
    }

    /// The same key with a `_{n}` ordinal appended.
    pub fn with_ordinal(&self, n: usize) -> Self {
        Self(format!("{}_{}", self.0, n))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for DocumentKey {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<DocumentKey> for String {
    fn from(key: DocumentKey) -> Self {
        key.0
    }
}

/// Directory name for a material: the name with all whitespace removed.
pub fn material_dir(material: &str) -> Result<String> {
    let dir = clean_name(material);
    validate_segment("material", &dir)?;
    Ok(dir)
}

/// Reject anything that could escape its parent directory.
fn validate_segment(kind: &'static str, value: &str) -> Result<()> {
    let invalid = value.is_empty()
        || value.starts_with('.')
        || value.contains(['/', '\\', '\0'])
        || value.contains("..");
    if invalid {
        return Err(AppError::invalid_key(kind, value));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn key_from_standard_replaces_separators() {
        let key = DocumentKey::for_standard("18 CrMo4", "NF EN 10084/2008").unwrap();
        assert_eq!(key.as_str(), "18CrMo4_NF_EN_10084_2008");
    }

    #[test]
    fn key_from_capture_time() {
        let at = Utc.with_ymd_and_hms(2024, 3, 18, 12, 34, 56).unwrap();
        let key = DocumentKey::for_capture("42CrMo4", at).unwrap();
        assert_eq!(key.as_str(), "42CrMo4_20240318_123456");
    }

    #[test]
    fn ordinal_suffix() {
        let key = DocumentKey::new("C45_EN_10083-2").unwrap();
        assert_eq!(key.with_ordinal(2).as_str(), "C45_EN_10083-2_2");
    }

    #[test]
    fn rejects_path_like_keys() {
        assert!(DocumentKey::new("").is_err());
        assert!(DocumentKey::new("../etc").is_err());
        assert!(DocumentKey::new("a/b").is_err());
        assert!(DocumentKey::new(".hidden").is_err());
        assert!(DocumentKey::new("C45_GB_T_699-2015").is_ok());
    }

    #[test]
    fn material_dir_strips_whitespace() {
        assert_eq!(material_dir(" M2 高速钢 ").unwrap(), "M2高速钢");
        assert!(material_dir("   ").is_err());
    }

    #[test]
    fn key_deserialization_is_validated() {
        let ok: std::result::Result<DocumentKey, _> = serde_json::from_str("\"A_1\"");
        assert!(ok.is_ok());
        let bad: std::result::Result<DocumentKey, _> = serde_json::from_str("\"a/../b\"");
        assert!(bad.is_err());
    }

    #[test]
    fn stages_chain_artifacts() {
        assert_eq!(Stage::Clean.output(), Stage::Extract.input());
        assert_eq!(Stage::Extract.output(), ArtifactKind::Structured);
    }
}
