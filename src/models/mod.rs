// src/models/mod.rs

//! Domain models for the pipeline.
//!
//! This module contains all data structures used throughout the application,
//! organized by their primary purpose.

mod artifact;
mod config;
mod record;
mod report;

// Re-export all public types
pub use artifact::{ArtifactKind, DocumentKey, Stage, material_dir};
pub use config::{
    CleanerConfig, Config, ExtractorConfig, FetcherConfig, LoggingConfig, PathsConfig,
    PipelineConfig, ServerConfig,
};
pub use record::StructuredRecord;
pub use report::{
    ArtifactPresence, DiffMode, DocumentReport, FailureReason, FetchSummary, FetchedDocument,
    RunReport, SkipReason, StageOutcome,
};
