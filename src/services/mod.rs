//! Collaborators of the pipeline and the query-side catalog.
//!
//! - Raw document fetching (`SearchFetcher`)
//! - HTML cleaning (`HtmlCleaner`)
//! - LLM extraction (`LlmExtractor`)
//! - Read-only artifact views (`Catalog`)

mod catalog;
mod cleaner;
mod extractor;
mod fetcher;

pub use catalog::Catalog;
pub use cleaner::{Cleaner, HtmlCleaner};
pub use extractor::{Extractor, LlmExtractor, PROMPT_VERSION, SYSTEM_PROMPT};
pub use fetcher::{Fetcher, SearchFetcher, SearchPage, SearchRow};
