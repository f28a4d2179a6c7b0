//! Application configuration structures.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Artifact tree layout
    #[serde(default)]
    pub paths: PathsConfig,

    /// Search and detail page fetching
    #[serde(default)]
    pub fetcher: FetcherConfig,

    /// DOM cleaning rules
    #[serde(default)]
    pub cleaner: CleanerConfig,

    /// LLM extraction backend
    #[serde(default)]
    pub extractor: ExtractorConfig,

    /// Orchestration timing and batch settings
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Query surface
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load configuration, using defaults when the file does not exist.
    ///
    /// A file that exists but cannot be read or parsed is still an error, so
    /// the caller can report it once logging is up.
    pub fn load_if_present(path: impl AsRef<Path>) -> Result<Self> {
        if !path.as_ref().exists() {
            return Ok(Self::default());
        }
        Self::load(path)
    }

    /// Apply environment overrides for the extractor backend.
    ///
    /// `lookup` is usually `std::env::var(..).ok()`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup(&self.extractor.api_key_env).filter(|k| !k.trim().is_empty()) {
            self.extractor.api_key = Some(key);
        }
        if let Some(url) = lookup("OPENAI_BASE_URL").filter(|u| !u.trim().is_empty()) {
            self.extractor.base_url = url;
        }
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        let dirs = [
            &self.paths.raw_dir,
            &self.paths.cleaned_dir,
            &self.paths.structured_dir,
        ];
        if dirs.iter().any(|d| d.trim().is_empty()) {
            return Err(AppError::validation("paths.* directory names must be set"));
        }
        if dirs[0] == dirs[1] || dirs[1] == dirs[2] || dirs[0] == dirs[2] {
            return Err(AppError::validation(
                "paths.raw_dir, cleaned_dir and structured_dir must differ",
            ));
        }
        if !self.fetcher.search_url.contains("{keyword}") {
            return Err(AppError::validation(
                "fetcher.search_url must contain {keyword}",
            ));
        }
        if self.fetcher.user_agent.trim().is_empty() {
            return Err(AppError::validation("fetcher.user_agent is empty"));
        }
        if self.fetcher.timeout_secs == 0 {
            return Err(AppError::validation("fetcher.timeout_secs must be > 0"));
        }
        if self.fetcher.max_pages == 0 {
            return Err(AppError::validation("fetcher.max_pages must be > 0"));
        }
        if self.extractor.model.trim().is_empty() {
            return Err(AppError::validation("extractor.model is empty"));
        }
        if self.extractor.timeout_secs == 0 {
            return Err(AppError::validation("extractor.timeout_secs must be > 0"));
        }
        if !(0.0..=2.0).contains(&self.extractor.temperature) {
            return Err(AppError::validation(
                "extractor.temperature must be within 0.0..=2.0",
            ));
        }
        if self.pipeline.clean_timeout_secs == 0 || self.pipeline.fetch_timeout_secs == 0 {
            return Err(AppError::validation("pipeline timeouts must be > 0"));
        }
        Ok(())
    }
}

/// Names of the three artifact trees below the data directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "defaults::raw_dir")]
    pub raw_dir: String,

    #[serde(default = "defaults::cleaned_dir")]
    pub cleaned_dir: String,

    #[serde(default = "defaults::structured_dir")]
    pub structured_dir: String,
}

impl PathsConfig {
    pub fn raw_root(&self, data_dir: &Path) -> PathBuf {
        data_dir.join(&self.raw_dir)
    }

    pub fn cleaned_root(&self, data_dir: &Path) -> PathBuf {
        data_dir.join(&self.cleaned_dir)
    }

    pub fn structured_root(&self, data_dir: &Path) -> PathBuf {
        data_dir.join(&self.structured_dir)
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            raw_dir: defaults::raw_dir(),
            cleaned_dir: defaults::cleaned_dir(),
            structured_dir: defaults::structured_dir(),
        }
    }
}

/// Search-result crawling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetcherConfig {
    /// Search page URL with `{keyword}` and `{page}` placeholders
    #[serde(default = "defaults::search_url")]
    pub search_url: String,

    /// CSS selector for result rows
    #[serde(default = "defaults::row_selector")]
    pub row_selector: String,

    /// CSS selector (within a row) for the name link
    #[serde(default = "defaults::name_selector")]
    pub name_selector: String,

    /// CSS selector (within a row) for the standard code
    #[serde(default = "defaults::standard_selector")]
    pub standard_selector: String,

    /// User-Agent header for HTTP requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Per-request timeout in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,

    /// Delay between page requests in milliseconds
    #[serde(default = "defaults::request_delay")]
    pub request_delay_ms: u64,

    /// Search pages to visit before giving up
    #[serde(default = "defaults::max_pages")]
    pub max_pages: usize,

    /// Replace raw artifacts whose key already exists
    #[serde(default)]
    pub overwrite_existing: bool,
}

impl FetcherConfig {
    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }

    /// Search URL for a keyword and 1-based page number.
    ///
    /// The keyword is form-encoded, so names such as `55#` stay in the query.
    pub fn search_page_url(&self, keyword: &str, page: usize) -> String {
        let keyword: String = url::form_urlencoded::byte_serialize(keyword.as_bytes()).collect();
        self.search_url
            .replace("{keyword}", &keyword)
            .replace("{page}", &page.to_string())
    }
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            search_url: defaults::search_url(),
            row_selector: defaults::row_selector(),
            name_selector: defaults::name_selector(),
            standard_selector: defaults::standard_selector(),
            user_agent: defaults::user_agent(),
            timeout_secs: defaults::timeout(),
            request_delay_ms: defaults::request_delay(),
            max_pages: defaults::max_pages(),
            overwrite_existing: false,
        }
    }
}

/// DOM cleaning rules for detail pages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanerConfig {
    /// Everything before the row holding this element is dropped
    #[serde(default = "defaults::breadcrumb_selector")]
    pub breadcrumb_selector: String,

    /// Class of the layout rows the markers live in
    #[serde(default = "defaults::row_class")]
    pub row_class: String,

    /// Text of the trailing note; its row and everything after it is dropped
    #[serde(default = "defaults::note_marker")]
    pub note_marker: String,

    /// Comment opening a block to drop
    #[serde(default = "defaults::block_start_marker")]
    pub block_start_marker: String,

    /// Comment closing a block to drop
    #[serde(default = "defaults::block_end_marker")]
    pub block_end_marker: String,

    /// Elements removed with their content
    #[serde(default = "defaults::drop_tags")]
    pub drop_tags: Vec<String>,
}

impl Default for CleanerConfig {
    fn default() -> Self {
        Self {
            breadcrumb_selector: defaults::breadcrumb_selector(),
            row_class: defaults::row_class(),
            note_marker: defaults::note_marker(),
            block_start_marker: defaults::block_start_marker(),
            block_end_marker: defaults::block_end_marker(),
            drop_tags: defaults::drop_tags(),
        }
    }
}

/// OpenAI-compatible chat completion backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractorConfig {
    #[serde(default = "defaults::base_url")]
    pub base_url: String,

    #[serde(default = "defaults::model")]
    pub model: String,

    /// Environment variable holding the API key
    #[serde(default = "defaults::api_key_env")]
    pub api_key_env: String,

    /// Filled from the environment, never read from the file
    #[serde(skip)]
    pub api_key: Option<String>,

    #[serde(default = "defaults::temperature")]
    pub temperature: f32,

    /// Per-document call timeout in seconds
    #[serde(default = "defaults::extract_timeout")]
    pub timeout_secs: u64,
}

impl ExtractorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            base_url: defaults::base_url(),
            model: defaults::model(),
            api_key_env: defaults::api_key_env(),
            api_key: None,
            temperature: defaults::temperature(),
            timeout_secs: defaults::extract_timeout(),
        }
    }
}

/// Orchestrator timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Pause between successive extract calls in milliseconds
    #[serde(default = "defaults::extract_delay")]
    pub extract_delay_ms: u64,

    /// Budget for one clean call in seconds
    #[serde(default = "defaults::clean_timeout")]
    pub clean_timeout_secs: u64,

    /// Budget for one whole fetch in seconds
    #[serde(default = "defaults::fetch_timeout")]
    pub fetch_timeout_secs: u64,

    /// Materials processed by a batch run
    #[serde(default = "defaults::materials")]
    pub materials: Vec<String>,
}

impl PipelineConfig {
    pub fn extract_delay(&self) -> Duration {
        Duration::from_millis(self.extract_delay_ms)
    }

    pub fn clean_timeout(&self) -> Duration {
        Duration::from_secs(self.clean_timeout_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            extract_delay_ms: defaults::extract_delay(),
            clean_timeout_secs: defaults::clean_timeout(),
            fetch_timeout_secs: defaults::fetch_timeout(),
            materials: defaults::materials(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "defaults::host")]
    pub host: String,

    #[serde(default = "defaults::port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: defaults::host(),
            port: defaults::port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset
    #[serde(default = "defaults::log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::log_level(),
        }
    }
}

mod defaults {
    // Paths
    pub fn raw_dir() -> String {
        "html_data".into()
    }
    pub fn cleaned_dir() -> String {
        "clean_html_data".into()
    }
    pub fn structured_dir() -> String {
        "JsonData".into()
    }

    // Fetcher
    pub fn search_url() -> String {
        "https://www.caishuku.com/material/?keyword={keyword}&page={page}".into()
    }
    pub fn row_selector() -> String {
        "table.layui-table.head-sticky > tbody > tr".into()
    }
    pub fn name_selector() -> String {
        "td:nth-child(2) a".into()
    }
    pub fn standard_selector() -> String {
        "td:nth-child(3) b".into()
    }
    pub fn user_agent() -> String {
        "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36".into()
    }
    pub fn timeout() -> u64 {
        30
    }
    pub fn request_delay() -> u64 {
        2000
    }
    pub fn max_pages() -> usize {
        2
    }

    // Cleaner
    pub fn breadcrumb_selector() -> String {
        "span.layui-breadcrumb".into()
    }
    pub fn row_class() -> String {
        "layui-row".into()
    }
    pub fn note_marker() -> String {
        "注：数据仅供参考".into()
    }
    pub fn block_start_marker() -> String {
        "suppliers paihao".into()
    }
    pub fn block_end_marker() -> String {
        "suppliers paihao end".into()
    }
    pub fn drop_tags() -> Vec<String> {
        ["script", "noscript", "style", "link"]
            .into_iter()
            .map(String::from)
            .collect()
    }

    // Extractor
    pub fn base_url() -> String {
        "https://api.openai.com/v1".into()
    }
    pub fn model() -> String {
        "grok-beta".into()
    }
    pub fn api_key_env() -> String {
        "OPENAI_API_KEY".into()
    }
    pub fn temperature() -> f32 {
        0.9
    }
    pub fn extract_timeout() -> u64 {
        120
    }

    // Pipeline
    pub fn extract_delay() -> u64 {
        1000
    }
    pub fn clean_timeout() -> u64 {
        30
    }
    pub fn fetch_timeout() -> u64 {
        600
    }
    pub fn materials() -> Vec<String> {
        [
            "06Cr19Ni10", "10", "10#", "100C6", "100Cr6", "100Cr6-E", "100Cr6-G", "100Cr6A",
            "100CrMnMoSi8-4-6", "100CrMnSi6-4", "100CrMo7-3", "100CrMo7-4", "10B50", "10MnCrNi",
            "10MnCrNiMo", "16MnCr5", "16MnCr5H", "18CrMo4", "18CrNiMo7-6", "18Ni300", "20Cr",
            "20CrMnTiH", "20CrMo", "20CrNiMo", "20MnCr5", "20MnCr5ZR", "31CrMnV9ZR", "34Cr4",
            "38CrMoAl", "40Cr", "42CRMO", "42CrMo4", "440B", "44SMn28", "45#", "50CrMo4",
            "52100", "55#", "55#钢", "65Mn", "8620H", "8Cr4Mo4V", "9Cr18Mo", "C20", "C45",
            "CF53", "Cr12MoV", "EP4", "EP6", "GCr15", "GCr15SiMn", "GCr18Mo", "K1010",
            "M2高速钢", "M50", "S43C", "S45C", "S53C", "SAE1055", "SAE5120", "SCM415H",
            "SCM420H", "SKF3L", "SNCM439", "SUJ2", "SUJ2S1", "W6Mo5Cr4V2", "X45NiCrMo4", "ZF7B",
        ]
        .into_iter()
        .map(String::from)
        .collect()
    }

    // Server
    pub fn host() -> String {
        "0.0.0.0".into()
    }
    pub fn port() -> u16 {
        5001
    }

    pub fn log_level() -> String {
        "info".into()
    }
}
