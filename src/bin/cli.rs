//! matrec CLI
//!
//! Local entry point for pipeline runs, inspection and the query server.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use matrec::{
    error::Result,
    logging,
    models::{ArtifactKind, Config},
    pipeline::{DiffEngine, PipelineOrchestrator, RunOptions},
    services::{HtmlCleaner, SearchFetcher},
    storage::{ArtifactStore, LocalStorage},
    utils::same_name,
};

/// matrec - material page scrape, clean and extract pipeline
#[derive(Parser, Debug)]
#[command(
    name = "matrec",
    version,
    about = "Incremental scrape → clean → extract pipeline for material data pages"
)]
struct Cli {
    /// Data directory holding config.toml and the artifact trees
    #[arg(short, long, default_value = "data")]
    data_dir: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch, clean and extract one material (or every configured one)
    Run {
        /// Material to process
        #[arg(short, long, required_unless_present = "all", conflicts_with = "all")]
        material: Option<String>,

        /// Process every material of the configured list
        #[arg(long)]
        all: bool,

        /// Only fetch rows with this standard (words are joined with spaces)
        #[arg(short, long, num_args = 1..)]
        standard: Vec<String>,

        /// Use raw documents already on disk
        #[arg(long)]
        skip_fetch: bool,

        /// Process raw documents created at or after this RFC 3339 instant
        #[arg(long)]
        since: Option<DateTime<Utc>>,

        /// Replace raw documents that already exist
        #[arg(long)]
        refetch: bool,

        /// Print the run report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the outstanding documents of a material without processing them
    Diff {
        #[arg(short, long)]
        material: String,

        /// Use since mode instead of resume mode
        #[arg(long)]
        since: Option<DateTime<Utc>>,
    },

    /// Serve the query API
    #[cfg(feature = "server")]
    Serve {
        /// Port override
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Validate configuration
    Validate,

    /// Show artifact counts and provenance orphans
    Info,
}

/// Initialize logging based on verbosity flag.
fn init_logging(verbose: bool, default_level: &str) {
    let level = if verbose { "debug" } else { default_level };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

/// Set the flag on Ctrl-C; the orchestrator stops between documents.
fn watch_interrupt(cancel: Arc<AtomicBool>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupted, stopping after the current document");
            cancel.store(true, Ordering::SeqCst);
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli.data_dir.join("config.toml");
    let loaded = Config::load_if_present(&config_path);
    let level = loaded
        .as_ref()
        .map_or_else(|_| Config::default().logging.level, |c| c.logging.level.clone());
    init_logging(cli.verbose, &level);
    let mut config = loaded.unwrap_or_else(|e| {
        log::warn!(
            "Config load failed from {}: {}. Using defaults.",
            config_path.display(),
            e
        );
        Config::default()
    });
    config.apply_env(|name| std::env::var(name).ok());

    log::info!("Data directory: {}", cli.data_dir.display());
    let store: Arc<dyn ArtifactStore> = Arc::new(LocalStorage::with_paths(
        &cli.data_dir,
        config.paths.clone(),
    ));

    match cli.command {
        Command::Run {
            material,
            all,
            standard,
            skip_fetch,
            since,
            refetch,
            json,
        } => {
            let orchestrator = PipelineOrchestrator::from_config(&config, Arc::clone(&store))?;
            watch_interrupt(orchestrator.cancel_flag());
            let options = RunOptions {
                skip_fetch,
                only_standard: (!standard.is_empty()).then(|| standard.join(" ")),
                since_override: since,
                refetch: refetch || config.fetcher.overwrite_existing,
            };

            if all {
                let results = orchestrator
                    .process_batch(&config.pipeline.materials, &options)
                    .await;
                let failed = results.iter().filter(|(_, r)| r.is_err()).count();
                logging::summary(
                    "Batch",
                    &[
                        ("Materials", results.len().to_string()),
                        ("Aborted", failed.to_string()),
                    ],
                );
                if json {
                    let entries: Vec<serde_json::Value> = results
                        .iter()
                        .map(|(material, result)| match result {
                            Ok(report) => serde_json::json!({ "material": material, "report": report }),
                            Err(e) => serde_json::json!({ "material": material, "error": e.to_string() }),
                        })
                        .collect();
                    println!("{}", serde_json::to_string_pretty(&entries)?);
                }
            } else if let Some(material) = material {
                if !config
                    .pipeline
                    .materials
                    .iter()
                    .any(|known| same_name(known, &material))
                {
                    log::warn!("{} is not in the configured material list", material);
                }
                let report = orchestrator.process(&material, &options).await?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&report)?);
                }
            }
        }

        Command::Diff { material, since } => {
            let engine = DiffEngine::new(Arc::clone(&store));
            let outstanding = engine.outstanding(&material, since).await?;
            logging::summary(
                &format!("Diff {}", material),
                &[
                    (
                        "Mode",
                        since.map_or("resume".to_string(), |at| format!("since {}", at.to_rfc3339())),
                    ),
                    ("New material", outstanding.new_material.to_string()),
                    ("Raw documents", outstanding.raw_total.to_string()),
                    ("Outstanding", outstanding.keys.len().to_string()),
                ],
            );
            for key in &outstanding.keys {
                logging::sub_item(key.as_str());
            }
        }

        #[cfg(feature = "server")]
        Command::Serve { port } => {
            let mut server = config.server.clone();
            if let Some(port) = port {
                server.port = port;
            }
            let catalog = Arc::new(matrec::services::Catalog::new(Arc::clone(&store)));
            matrec::server::serve(&server, catalog).await?;
        }

        Command::Validate => {
            log::info!("Validating configuration...");

            if let Err(e) = config.validate() {
                log::error!("Config validation failed: {}", e);
                return Err(e);
            }
            SearchFetcher::new(config.fetcher.clone())?;
            HtmlCleaner::new(config.cleaner.clone())?;
            log::info!("✓ Config OK (paths, selectors, extractor and pipeline settings)");

            if config.extractor.api_key.is_none() {
                log::warn!("{} is not set", config.extractor.api_key_env);
            }
            log::info!("All validations passed!");
        }

        Command::Info => {
            let mut materials = BTreeSet::new();
            for kind in ArtifactKind::ALL {
                let Some(names) = store.list_materials(kind).await? else {
                    log::info!(
                        "{:<10} : {} not found",
                        kind.label(),
                        store.root_location(kind)
                    );
                    continue;
                };
                let mut documents = 0;
                for name in &names {
                    documents += store.list_keys(kind, name).await?.map_or(0, |k| k.len());
                }
                log::info!(
                    "{:<10} : {} materials, {} documents",
                    kind.label(),
                    names.len(),
                    documents
                );
                materials.extend(names);
            }

            let engine = DiffEngine::new(Arc::clone(&store));
            let mut orphan_count = 0;
            for material in &materials {
                for orphan in engine.orphans(material).await? {
                    orphan_count += 1;
                    log::warn!("Orphan {} artifact {}/{}", orphan.kind, material, orphan.key);
                }
            }
            if orphan_count == 0 {
                log::info!("No provenance orphans.");
            }
        }
    }

    log::info!("Done!");

    Ok(())
}
