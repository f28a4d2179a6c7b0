//! Single-stage execution for one document key.
//!
//! A stage run never returns an error: every problem is scoped to the key and
//! reported as a [`StageOutcome`]. Nothing is written unless the collaborator
//! produced usable output.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::models::{ArtifactKind, DocumentKey, FailureReason, Stage, StageOutcome};
use crate::services::{Cleaner, Extractor};
use crate::storage::ArtifactStore;

/// Executes clean and extract for single keys.
pub struct StageRunner {
    store: Arc<dyn ArtifactStore>,
    cleaner: Arc<dyn Cleaner>,
    extractor: Arc<dyn Extractor>,
    clean_timeout: Duration,
    extract_timeout: Duration,
}

impl StageRunner {
    pub fn new(
        store: Arc<dyn ArtifactStore>,
        cleaner: Arc<dyn Cleaner>,
        extractor: Arc<dyn Extractor>,
    ) -> Self {
        Self {
            store,
            cleaner,
            extractor,
            clean_timeout: Duration::from_secs(30),
            extract_timeout: Duration::from_secs(120),
        }
    }

    /// Budgets for one clean call and one extract call.
    pub fn with_timeouts(mut self, clean: Duration, extract: Duration) -> Self {
        self.clean_timeout = clean;
        self.extract_timeout = extract;
        self
    }

    /// Run `stage` for `key` of the material directory `material`.
    pub async fn run(&self, stage: Stage, material: &str, key: &DocumentKey) -> StageOutcome {
        let result = match stage {
            Stage::Clean => self.clean(material, key).await,
            Stage::Extract => self.extract(material, key).await,
        };
        match result {
            Ok(()) => {
                log::debug!(
                    "{} ok: {}",
                    stage,
                    self.store.location(stage.output(), material, key)
                );
                StageOutcome::Success
            }
            Err(reason) => StageOutcome::Failed(reason),
        }
    }

    async fn clean(&self, material: &str, key: &DocumentKey) -> Result<(), FailureReason> {
        let raw = self.load(Stage::Clean.input(), material, key).await?;

        let cleaner = Arc::clone(&self.cleaner);
        let task = tokio::task::spawn_blocking(move || cleaner.clean(&raw));
        let cleaned = match tokio::time::timeout(self.clean_timeout, task).await {
            Err(_) => return Err(timed_out(self.clean_timeout)),
            Ok(Err(join)) => {
                return Err(FailureReason::CollaboratorError(format!(
                    "cleaner aborted: {join}"
                )));
            }
            Ok(Ok(result)) => {
                result.map_err(|e| FailureReason::CollaboratorError(e.to_string()))?
            }
        };

        if cleaned.trim().is_empty() {
            return Err(FailureReason::InvalidOutput(
                "cleaner returned empty output".into(),
            ));
        }
        self.store_output(Stage::Clean, material, key, cleaned.as_bytes())
            .await
    }

    async fn extract(&self, material: &str, key: &DocumentKey) -> Result<(), FailureReason> {
        let cleaned = self.load(Stage::Extract.input(), material, key).await?;
        // Provenance: a structured artifact always has a raw one.
        match self.store.exists(ArtifactKind::Raw, material, key).await {
            Ok(true) => {}
            Ok(false) => return Err(FailureReason::MissingInput(ArtifactKind::Raw)),
            Err(e) => {
                return Err(FailureReason::CollaboratorError(format!(
                    "reading raw artifact: {e}"
                )));
            }
        }

        let answer =
            match tokio::time::timeout(self.extract_timeout, self.extractor.extract(&cleaned))
                .await
            {
                Err(_) => return Err(timed_out(self.extract_timeout)),
                Ok(result) => {
                    result.map_err(|e| FailureReason::CollaboratorError(e.to_string()))?
                }
            };

        let value = parse_extractor_output(&answer).map_err(FailureReason::InvalidOutput)?;
        let bytes = serde_json::to_vec_pretty(&value)
            .map_err(|e| FailureReason::InvalidOutput(e.to_string()))?;
        self.store_output(Stage::Extract, material, key, &bytes)
            .await
    }

    /// Input artifact as text; absence is a missing-input failure.
    async fn load(
        &self,
        kind: ArtifactKind,
        material: &str,
        key: &DocumentKey,
    ) -> Result<String, FailureReason> {
        match self.store.read(kind, material, key).await {
            Ok(Some(bytes)) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
            Ok(None) => Err(FailureReason::MissingInput(kind)),
            Err(e) => Err(FailureReason::CollaboratorError(format!(
                "reading {kind} artifact: {e}"
            ))),
        }
    }

    async fn store_output(
        &self,
        stage: Stage,
        material: &str,
        key: &DocumentKey,
        bytes: &[u8],
    ) -> Result<(), FailureReason> {
        self.store
            .write(stage.output(), material, key, bytes)
            .await
            .map_err(|e| FailureReason::StoreWrite(e.to_string()))
    }
}

fn timed_out(budget: Duration) -> FailureReason {
    FailureReason::Timeout(u64::try_from(budget.as_millis()).unwrap_or(u64::MAX))
}

/// Parse an extractor answer into a non-empty JSON object.
///
/// A surrounding ```` ```json ```` fence is tolerated.
pub fn parse_extractor_output(text: &str) -> Result<Value, String> {
    let body = strip_fence(text.trim());
    if body.is_empty() {
        return Err("extractor returned empty output".into());
    }
    let value: Value = serde_json::from_str(body).map_err(|e| format!("not JSON: {e}"))?;
    match value {
        Value::Object(map) if map.is_empty() => Err("empty JSON object".into()),
        Value::Object(map) => Ok(Value::Object(map)),
        other => Err(format!("expected a JSON object, got {}", json_type(&other))),
    }
}

fn strip_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
