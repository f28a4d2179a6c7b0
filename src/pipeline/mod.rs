//! Incremental processing of scraped material pages.
//!
//! - `DiffEngine`: which raw documents still need work
//! - `StageRunner`: one stage for one document
//! - `PipelineOrchestrator`: fetch, diff, clean and extract for a material

pub mod diff;
pub mod orchestrator;
pub mod stage;

pub use diff::{DiffEngine, Orphan, Outstanding};
pub use orchestrator::{PipelineOrchestrator, RunOptions};
pub use stage::{StageRunner, parse_extractor_output};
