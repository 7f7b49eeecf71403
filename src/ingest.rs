//! Ingestion pipeline orchestration.
//!
//! Coordinates a full build: read sources → parse → chunk → index →
//! publish a version → optionally activate it. Sources are parsed and
//! chunked in parallel on the blocking pool. A source that fails to parse
//! is reported and skipped; the remaining sources still produce a version,
//! but such a partial version is never activated automatically.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::Utc;
use statute_corpus_core::chunk::{chunk_document, ChunkStream, ChunkingConfig};
use statute_corpus_core::model::Chunk;
use statute_corpus_core::parser::parse_document;
use statute_corpus_core::stream::encode_chunk_stream;
use tracing::{error, info, warn};

use crate::config::{Config, SourceConfig};
use crate::manifest::{
    version_id_for, BuildOutcome, BuildRequest, ManifestBuilder, Processing, SourceInput,
    STAGING_DIR,
};
use crate::progress::{format_number, IngestProgressEvent, IngestProgressReporter};
use crate::store::VersionStore;
use crate::traits::{ChunkIndexer, ReloadHook};

#[derive(Debug, Clone, Default)]
pub struct IngestOptions {
    /// Consolidation date of the build; defaults to the primary (first
    /// configured) source's `current-date`.
    pub consolidation_date: Option<String>,
    /// Parse and chunk only; publish nothing.
    pub dry_run: bool,
    /// Make the new version current after publishing it.
    pub activate: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceReport {
    pub source: String,
    pub chunks: usize,
    pub over_budget: usize,
    pub consolidation_date: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFailure {
    pub source: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishState {
    DryRun,
    Created,
    Unchanged,
}

#[derive(Debug, Clone)]
pub struct IngestSummary {
    pub version_id: String,
    pub sources: Vec<SourceReport>,
    pub failures: Vec<SourceFailure>,
    pub chunk_count: usize,
    pub state: PublishState,
    pub activated: bool,
}

struct ChunkedSource {
    config: SourceConfig,
    consolidation_date: Option<String>,
    stream: ChunkStream,
}

/// Parse and chunk one file. Used by the pipeline and by `corpus chunk`.
pub fn chunk_file(path: &Path, source: &str, chunking: &ChunkingConfig) -> Result<ChunkStream> {
    let bytes =
        fs::read(path).with_context(|| format!("Failed to read source file: {}", path.display()))?;
    let document = parse_document(source, &bytes)?;
    Ok(chunk_document(&document, chunking))
}

fn chunk_source(config: SourceConfig, chunking: ChunkingConfig) -> Result<ChunkedSource> {
    let bytes = fs::read(&config.path)
        .with_context(|| format!("Failed to read source file: {}", config.path.display()))?;
    let document = parse_document(&config.name, &bytes)?;
    let mut stream = chunk_document(&document, &chunking);
    for chunk in &mut stream.chunks {
        chunk.attribute(
            config.citation_prefix(),
            config.title.as_deref(),
            config.document_type.as_deref(),
        );
    }
    Ok(ChunkedSource {
        consolidation_date: document.consolidation_date,
        config,
        stream,
    })
}

pub async fn run_ingest(
    config: &Config,
    options: &IngestOptions,
    indexer: &dyn ChunkIndexer,
    hook: &dyn ReloadHook,
    progress: &dyn IngestProgressReporter,
) -> Result<IngestSummary> {
    let chunking = config.chunking.to_chunking_config();
    let handles: Vec<_> = config
        .sources
        .iter()
        .cloned()
        .map(|source| tokio::task::spawn_blocking(move || chunk_source(source, chunking)))
        .collect();

    let total = handles.len();
    let mut chunked = Vec::new();
    let mut failures = Vec::new();
    for (i, (handle, source)) in handles.into_iter().zip(&config.sources).enumerate() {
        match handle.await? {
            Ok(done) => {
                for warning in &done.stream.warnings {
                    warn!(
                        source = %warning.source,
                        reference = %warning.reference,
                        tokens = warning.token_estimate,
                        max_tokens = warning.max_tokens,
                        "chunk exceeds token budget; emitted whole"
                    );
                }
                info!(
                    source = %source.name,
                    chunks = done.stream.chunks.len(),
                    "chunked source"
                );
                progress.report(IngestProgressEvent::Chunked {
                    source: source.name.clone(),
                    chunks: done.stream.chunks.len(),
                    n: i + 1,
                    total,
                });
                chunked.push(done);
            }
            Err(e) => {
                error!(source = %source.name, error = %format!("{:#}", e), "source ingestion failed");
                progress.report(IngestProgressEvent::Failed {
                    source: source.name.clone(),
                    n: i + 1,
                    total,
                });
                failures.push(SourceFailure {
                    source: source.name.clone(),
                    error: format!("{:#}", e),
                });
            }
        }
    }

    if chunked.is_empty() {
        bail!(
            "no source could be ingested ({} failed): {}",
            failures.len(),
            failures
                .iter()
                .map(|f| f.error.as_str())
                .collect::<Vec<_>>()
                .join("; ")
        );
    }

    let consolidation_date = match &options.consolidation_date {
        Some(date) => date.clone(),
        None => primary_date(config, &chunked)?,
    };
    let version_id = version_id_for(&consolidation_date)?;

    let sources: Vec<SourceReport> = chunked
        .iter()
        .map(|c| SourceReport {
            source: c.config.name.clone(),
            chunks: c.stream.chunks.len(),
            over_budget: c.stream.warnings.len(),
            consolidation_date: c.consolidation_date.clone(),
        })
        .collect();
    let chunk_count = sources.iter().map(|s| s.chunks).sum();

    let mut summary = IngestSummary {
        version_id: version_id.clone(),
        sources,
        failures,
        chunk_count,
        state: PublishState::DryRun,
        activated: false,
    };
    if options.dry_run {
        return Ok(summary);
    }

    let inputs: Vec<SourceInput> = chunked
        .iter()
        .map(|c| SourceInput {
            name: c.config.name.clone(),
            path: c.config.path.clone(),
            consolidation_date: c.consolidation_date.clone(),
        })
        .collect();
    let processing = Processing {
        chunk_count,
        over_budget_count: summary.sources.iter().map(|s| s.over_budget).sum(),
        documents: summary.sources.iter().map(|s| s.source.clone()).collect(),
        chunking_config: chunking,
        embedding_model: indexer.model().map(str::to_string),
    };
    let chunks: Vec<Chunk> = chunked.into_iter().flat_map(|c| c.stream.chunks).collect();
    let chunk_stream = encode_chunk_stream(&chunks).context("Failed to encode chunk stream")?;

    let work_dir = work_dir(&config.corpus.root);
    let index_dir = work_dir.join("index");
    fs::create_dir_all(&index_dir)
        .with_context(|| format!("Failed to create {}", index_dir.display()))?;
    progress.report(IngestProgressEvent::Indexing {
        indexer: indexer.name().to_string(),
        chunks: chunks.len(),
    });
    let indexed = indexer.index(&chunks, &index_dir).await;
    let outcome = indexed.and_then(|()| {
        progress.report(IngestProgressEvent::Publishing {
            version_id: version_id.clone(),
        });
        let request = BuildRequest {
            consolidation_date,
            sources: inputs,
            chunk_stream,
            index_dir: Some(index_dir),
            processing,
        };
        Ok(ManifestBuilder::new(&config.corpus.root).build(&request)?)
    });
    let _ = fs::remove_dir_all(&work_dir);
    summary.state = match outcome? {
        BuildOutcome::Created(_) => PublishState::Created,
        BuildOutcome::Unchanged(_) => PublishState::Unchanged,
    };

    if options.activate {
        if !summary.failures.is_empty() {
            bail!(
                "{} was published without {} failed source(s) and was not activated",
                version_id,
                summary.failures.len()
            );
        }
        let store = VersionStore::open(&config.corpus.root)?;
        store.activate(&version_id, hook)?;
        summary.activated = true;
    }

    Ok(summary)
}

/// Consolidation date of the primary (first configured) source. The
/// version is never named after a secondary source.
fn primary_date(config: &Config, chunked: &[ChunkedSource]) -> Result<String> {
    let primary = config
        .sources
        .first()
        .context("at least one [[sources]] entry is required")?;
    let Some(done) = chunked.iter().find(|c| c.config.name == primary.name) else {
        bail!(
            "primary source '{}' failed to ingest; pass --date YYYY-MM-DD to publish the remaining sources",
            primary.name
        );
    };
    done.consolidation_date.clone().with_context(|| {
        format!(
            "primary source '{}' carries no consolidation date; pass --date YYYY-MM-DD",
            primary.name
        )
    })
}

fn work_dir(root: &Path) -> PathBuf {
    let stamp = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    root.join(STAGING_DIR)
        .join(format!("work.{}.{}", std::process::id(), stamp))
}

pub fn print_summary(summary: &IngestSummary) {
    let state = match summary.state {
        PublishState::DryRun => "dry-run",
        PublishState::Created => "created",
        PublishState::Unchanged => "unchanged",
    };
    println!("ingest {} ({})", summary.version_id, state);
    for source in &summary.sources {
        print!("  {}: {} chunks", source.source, format_number(source.chunks as u64));
        if source.over_budget > 0 {
            print!(" ({} over budget)", source.over_budget);
        }
        println!();
    }
    for failure in &summary.failures {
        println!("  {}: FAILED: {}", failure.source, failure.error);
    }
    println!("  total chunks: {}", format_number(summary.chunk_count as u64));
    if summary.activated {
        println!("  activated: {}", summary.version_id);
    }
    println!("ok");
}
