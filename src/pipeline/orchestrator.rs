//! Per-material pipeline run: fetch, diff, clean, extract.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use crate::error::{AppError, Result};
use crate::logging;
use crate::models::{
    ArtifactKind, ArtifactPresence, Config, DiffMode, DocumentKey, DocumentReport, FetchSummary,
    PipelineConfig, RunReport, SkipReason, Stage, StageOutcome, material_dir,
};
use crate::services::{Cleaner, Extractor, Fetcher, HtmlCleaner, LlmExtractor, SearchFetcher};
use crate::storage::ArtifactStore;

use super::diff::DiffEngine;
use super::stage::StageRunner;

const TOTAL_STEPS: usize = 4;

/// Filesystem timestamps come from a coarse clock and can trail `Utc::now()`.
const CLOCK_SLACK_MS: i64 = 50;

/// Caller choices for one run.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Use only raw documents already on disk
    pub skip_fetch: bool,
    /// Fetch only search rows carrying exactly this standard
    pub only_standard: Option<String>,
    /// Process raw documents created at or after this instant
    pub since_override: Option<DateTime<Utc>>,
    /// Replace raw documents that already exist
    pub refetch: bool,
}

/// Sequences the stages for one material at a time.
pub struct PipelineOrchestrator {
    store: Arc<dyn ArtifactStore>,
    fetcher: Arc<dyn Fetcher>,
    diff: DiffEngine,
    runner: StageRunner,
    extract_delay: Duration,
    fetch_timeout: Duration,
    cancel: Arc<AtomicBool>,
}

impl PipelineOrchestrator {
    pub fn new(
        store: Arc<dyn ArtifactStore>,
        fetcher: Arc<dyn Fetcher>,
        cleaner: Arc<dyn Cleaner>,
        extractor: Arc<dyn Extractor>,
    ) -> Self {
        let defaults = PipelineConfig::default();
        Self {
            diff: DiffEngine::new(Arc::clone(&store)),
            runner: StageRunner::new(Arc::clone(&store), cleaner, extractor),
            store,
            fetcher,
            extract_delay: defaults.extract_delay(),
            fetch_timeout: defaults.fetch_timeout(),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Orchestrator with the HTTP fetcher, DOM cleaner and LLM extractor.
    pub fn from_config(config: &Config, store: Arc<dyn ArtifactStore>) -> Result<Self> {
        let fetcher = Arc::new(SearchFetcher::new(config.fetcher.clone())?);
        let cleaner = Arc::new(HtmlCleaner::new(config.cleaner.clone())?);
        let extractor = Arc::new(LlmExtractor::new(config.extractor.clone())?);
        Ok(Self::new(store, fetcher, cleaner, extractor)
            .with_settings(&config.pipeline, config.extractor.timeout()))
    }

    /// Apply delays and timeouts.
    pub fn with_settings(mut self, pipeline: &PipelineConfig, extract_timeout: Duration) -> Self {
        self.extract_delay = pipeline.extract_delay();
        self.fetch_timeout = pipeline.fetch_timeout();
        self.runner = self
            .runner
            .with_timeouts(pipeline.clean_timeout(), extract_timeout);
        self
    }

    /// Share a cancellation flag with the caller.
    pub fn with_cancel(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Run the pipeline for one material.
    ///
    /// Only a failed fetch, or a store error while computing the outstanding
    /// set, is an `Err`. Per-document failures are part of the report.
    pub async fn process(&self, material: &str, options: &RunOptions) -> Result<RunReport> {
        let started_at = Utc::now();
        let timer = Instant::now();
        let dir = material_dir(material)?;
        logging::header(&format!("Processing {}", material));

        // Step 1: Fetch
        let (fetch, fetch_start) = if options.skip_fetch {
            logging::step(1, TOTAL_STEPS, "Fetch - skipped");
            if !self.store.has_material(ArtifactKind::Raw, &dir).await? {
                return Err(AppError::fetch(
                    material,
                    "fetch skipped and no raw documents exist",
                ));
            }
            (None, None)
        } else {
            logging::step(1, TOTAL_STEPS, "Fetch - Collecting raw documents");
            let fetch_start = Utc::now() - chrono::Duration::milliseconds(CLOCK_SLACK_MS);
            let summary = self.fetch(material, options).await?;
            logging::sub_item(&format!(
                "{} written, {} kept, {} unmatched rows",
                summary.written.len(),
                summary.kept_existing.len(),
                summary.unmatched_rows
            ));
            (Some(summary), Some(fetch_start))
        };

        // Step 2: Diff
        logging::step(2, TOTAL_STEPS, "Diff - Computing outstanding documents");
        let since = options.since_override.or(fetch_start);
        let mode = since.map_or(DiffMode::Resume, DiffMode::Since);
        let outstanding = self.diff.outstanding(material, since).await?;
        logging::sub_item(&format!(
            "{} outstanding of {} raw{}",
            outstanding.keys.len(),
            outstanding.raw_total,
            if outstanding.new_material {
                " (new material)"
            } else {
                ""
            }
        ));

        let mut report = RunReport {
            material: material.to_string(),
            mode,
            new_material: outstanding.new_material,
            fetch,
            documents: Vec::new(),
            cancelled: false,
            started_at,
            elapsed_ms: 0,
        };

        if outstanding.is_empty() {
            log::info!("Nothing to process for {}", material);
        } else {
            let keys = outstanding.keys;

            // Step 3: Clean
            logging::step(3, TOTAL_STEPS, "Clean - Stripping page chrome");
            let cleaned = self.run_clean(&dir, &keys).await;

            // Step 4: Extract
            logging::step(4, TOTAL_STEPS, "Extract - Structuring documents");
            let extracted = self.run_extract(&dir, &keys, &cleaned).await;

            for ((key, clean), extract) in keys.into_iter().zip(cleaned).zip(extracted) {
                let artifacts = self.presence(&dir, &key).await;
                report.documents.push(DocumentReport {
                    key,
                    clean,
                    extract,
                    artifacts,
                });
            }
            report.cancelled = report.documents.iter().any(|d| {
                matches!(d.clean, StageOutcome::Skipped(SkipReason::Cancelled))
                    || matches!(d.extract, StageOutcome::Skipped(SkipReason::Cancelled))
            });
        }

        report.elapsed_ms = u64::try_from(timer.elapsed().as_millis()).unwrap_or(u64::MAX);
        logging::summary("Run", &report.summary_items());
        Ok(report)
    }

    /// Run each configured material in turn.
    ///
    /// A failed material does not stop the batch; cancellation does.
    pub async fn process_batch(
        &self,
        materials: &[String],
        options: &RunOptions,
    ) -> Vec<(String, Result<RunReport>)> {
        let mut results = Vec::with_capacity(materials.len());
        for (index, material) in materials.iter().enumerate() {
            if self.is_cancelled() {
                log::warn!("Cancelled before {}", material);
                break;
            }
            logging::separator();
            log::info!("Material {}/{}: {}", index + 1, materials.len(), material);
            let result = self.process(material, options).await;
            if let Err(e) = &result {
                log::error!("{} failed: {}", material, e);
            }
            results.push((material.clone(), result));
        }
        results
    }

    async fn fetch(&self, material: &str, options: &RunOptions) -> Result<FetchSummary> {
        let fetch = self.fetcher.fetch(
            material,
            options.only_standard.as_deref(),
            options.refetch,
            self.store.as_ref(),
        );
        match tokio::time::timeout(self.fetch_timeout, fetch).await {
            Err(_) => Err(AppError::fetch(
                material,
                AppError::timeout("fetch", self.fetch_timeout.as_secs()),
            )),
            Ok(Err(e @ AppError::Fetch { .. })) => Err(e),
            Ok(Err(e)) => Err(AppError::fetch(material, e)),
            Ok(Ok(summary)) => Ok(summary),
        }
    }

    async fn run_clean(&self, dir: &str, keys: &[DocumentKey]) -> Vec<StageOutcome> {
        let mut outcomes = Vec::with_capacity(keys.len());
        for (index, key) in keys.iter().enumerate() {
            if self.is_cancelled() {
                outcomes.push(StageOutcome::Skipped(SkipReason::Cancelled));
                continue;
            }
            let outcome = self.runner.run(Stage::Clean, dir, key).await;
            self.log_outcome(Stage::Clean, index, keys.len(), key, &outcome);
            outcomes.push(outcome);
        }
        outcomes
    }

    async fn run_extract(
        &self,
        dir: &str,
        keys: &[DocumentKey],
        cleaned: &[StageOutcome],
    ) -> Vec<StageOutcome> {
        let mut outcomes = Vec::with_capacity(keys.len());
        let mut called = false;

        for (index, (key, clean)) in keys.iter().zip(cleaned).enumerate() {
            match clean {
                StageOutcome::Success => {}
                StageOutcome::Skipped(SkipReason::Cancelled) => {
                    outcomes.push(StageOutcome::Skipped(SkipReason::Cancelled));
                    continue;
                }
                _ => {
                    outcomes.push(StageOutcome::Skipped(SkipReason::UpstreamFailed));
                    continue;
                }
            }

            if called && !self.extract_delay.is_zero() {
                tokio::time::sleep(self.extract_delay).await;
            }
            if self.is_cancelled() {
                outcomes.push(StageOutcome::Skipped(SkipReason::Cancelled));
                continue;
            }

            called = true;
            let outcome = self.runner.run(Stage::Extract, dir, key).await;
            self.log_outcome(Stage::Extract, index, keys.len(), key, &outcome);
            outcomes.push(outcome);
        }
        outcomes
    }

    fn log_outcome(
        &self,
        stage: Stage,
        index: usize,
        total: usize,
        key: &DocumentKey,
        outcome: &StageOutcome,
    ) {
        match outcome {
            StageOutcome::Failed(reason) => {
                log::warn!("    [{}/{}] {} {} {}", index + 1, total, stage, key, reason)
            }
            _ => logging::sub_item(&format!("[{}/{}] {} {}", index + 1, total, key, outcome)),
        }
    }

    async fn presence(&self, dir: &str, key: &DocumentKey) -> ArtifactPresence {
        let store = &self.store;
        ArtifactPresence {
            raw: store
                .exists(ArtifactKind::Raw, dir, key)
                .await
                .unwrap_or_default(),
            cleaned: store
                .exists(ArtifactKind::Cleaned, dir, key)
                .await
                .unwrap_or_default(),
            structured: store
                .exists(ArtifactKind::Structured, dir, key)
                .await
                .unwrap_or_default(),
        }
    }
}
