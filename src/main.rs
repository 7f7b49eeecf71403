//! # Statute Corpus CLI (`corpus`)
//!
//! ## Usage
//!
//! ```bash
//! corpus --config ./config/corpus.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `corpus ingest` | Parse, chunk, index and publish a corpus version |
//! | `corpus chunk <file>` | Print the chunk stream of one XML file (JSON Lines) |
//! | `corpus list` | List published versions |
//! | `corpus verify <version>` | Recompute a version's checksums |
//! | `corpus activate <version>` | Make a version current |
//! | `corpus rollback [version]` | Return to a previously current version |
//! | `corpus prune [--keep N]` | Delete old versions |
//! | `corpus check --source ITA --remote-date 2025-01-15` | Is a newer consolidation available? |
//!
//! Logging goes to stderr and is filtered with `RUST_LOG` (default `info`).

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use statute_corpus::config::{self, Config};
use statute_corpus::ingest::{self, IngestOptions};
use statute_corpus::progress::ProgressMode;
use statute_corpus::store::VersionStore;
use statute_corpus::traits::{
    ArtifactDirIndexer, ChunkIndexer, CommandReloadHook, NoReload, ReferenceIndexer, ReloadHook,
};
use statute_corpus::update;
use statute_corpus_core::chunk::ChunkingConfig;
use statute_corpus_core::stream::encode_chunk_stream;
use std::io::Write;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Statute Corpus: structure-aware ingestion and versioned corpus
/// snapshots for consolidated statutes.
#[derive(Parser)]
#[command(
    name = "corpus",
    about = "Structure-aware ingestion and versioned corpus snapshots for consolidated statutes",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/corpus.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse and chunk every configured source and publish a version.
    ///
    /// The version id is derived from the consolidation date. Rebuilding
    /// an existing version with identical content is a no-op.
    Ingest {
        /// Consolidation date (YYYY-MM-DD). Defaults to the primary (first) source's.
        #[arg(long)]
        date: Option<String>,

        /// Copy prebuilt index artifacts from this directory.
        #[arg(long)]
        index_dir: Option<PathBuf>,

        /// Embedding model that produced `--index-dir`, recorded in the manifest.
        #[arg(long, requires = "index_dir")]
        model: Option<String>,

        /// Activate the version once published.
        #[arg(long)]
        activate: bool,

        /// Parse and chunk only; publish nothing.
        #[arg(long)]
        dry_run: bool,

        /// Progress output on stderr: `off`, `human` or `json`.
        /// Defaults to `human` on a terminal.
        #[arg(long, value_parser = parse_progress)]
        progress: Option<ProgressMode>,
    },

    /// Chunk a single XML file and print the chunks as JSON Lines.
    ///
    /// Does not need a config file; chunking settings come from the
    /// config when it loads, otherwise from the defaults.
    Chunk {
        file: PathBuf,

        /// Logical source name used in chunk ids.
        #[arg(long, default_value = "document")]
        source: String,

        #[arg(long)]
        max_tokens: Option<usize>,

        #[arg(long)]
        overlap_tokens: Option<usize>,
    },

    /// List published versions, newest first.
    List,

    /// Recompute and compare every checksum of a version.
    Verify { version: String },

    /// Verify a version and make it current.
    Activate { version: String },

    /// Return to a previously current version (default: the most recent one).
    Rollback { version: Option<String> },

    /// Delete all but the newest versions. The current version is kept.
    Prune {
        /// Versions to keep; defaults to `retention.keep`.
        #[arg(long)]
        keep: Option<usize>,
    },

    /// Compare a remote consolidation date with the current version.
    Check {
        #[arg(long)]
        source: String,

        #[arg(long)]
        remote_date: String,
    },
}

fn parse_progress(s: &str) -> Result<ProgressMode, String> {
    ProgressMode::parse(s).ok_or_else(|| format!("invalid progress mode '{}': use off, human or json", s))
}

fn reload_hook(cfg: &Config) -> Result<Box<dyn ReloadHook>> {
    Ok(match &cfg.reload.command {
        Some(command) => Box::new(CommandReloadHook::new(command)?),
        None => Box::new(NoReload),
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Commands that don't require config
    if let Commands::Chunk {
        file,
        source,
        max_tokens,
        overlap_tokens,
    } = &cli.command
    {
        let mut chunking = config::load_config(&cli.config)
            .map(|cfg| cfg.chunking.to_chunking_config())
            .unwrap_or_default();
        if let Some(max) = max_tokens {
            chunking.max_tokens = *max;
        }
        if let Some(overlap) = overlap_tokens {
            chunking.overlap_tokens = *overlap;
        }
        return run_chunk(file, source, &chunking);
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Ingest {
            date,
            index_dir,
            model,
            activate,
            dry_run,
            progress,
        } => {
            let indexer: Box<dyn ChunkIndexer> = match index_dir {
                Some(dir) => Box::new(ArtifactDirIndexer::new(dir, model)),
                None => Box::new(ReferenceIndexer),
            };
            let hook = reload_hook(&cfg)?;
            let reporter = progress.unwrap_or_else(ProgressMode::default_for_tty).reporter();
            let options = IngestOptions {
                consolidation_date: date,
                dry_run,
                activate,
            };
            let summary = ingest::run_ingest(
                &cfg,
                &options,
                indexer.as_ref(),
                hook.as_ref(),
                reporter.as_ref(),
            )
            .await?;
            ingest::print_summary(&summary);
        }
        Commands::List => {
            let store = VersionStore::open(&cfg.corpus.root)?;
            let versions = store.list()?;
            if versions.is_empty() {
                println!("no versions in {}", cfg.corpus.root.display());
            }
            for v in versions {
                println!(
                    "{} {}  {} chunks  {} sources  created {}",
                    if v.is_current { "*" } else { " " },
                    v.version_id,
                    v.chunk_count,
                    v.source_count,
                    v.created_at.format("%Y-%m-%d %H:%M:%S")
                );
            }
        }
        Commands::Verify { version } => {
            let store = VersionStore::open(&cfg.corpus.root)?;
            let report = store.verify(&version)?;
            if !report.passed() {
                for mismatch in &report.mismatches {
                    println!("  MISMATCH {}", mismatch);
                }
                bail!(
                    "{} failed verification ({} of {} files)",
                    version,
                    report.mismatches.len(),
                    report.checked
                );
            }
            println!("{}: {} files verified", version, report.checked);
        }
        Commands::Activate { version } => {
            let store = VersionStore::open(&cfg.corpus.root)?;
            let hook = reload_hook(&cfg)?;
            store.activate(&version, hook.as_ref())?;
            println!("activated {}", version);
        }
        Commands::Rollback { version } => {
            let store = VersionStore::open(&cfg.corpus.root)?;
            let hook = reload_hook(&cfg)?;
            let target = store.rollback(version.as_deref(), hook.as_ref())?;
            println!("rolled back to {}", target);
        }
        Commands::Prune { keep } => {
            let store = VersionStore::open(&cfg.corpus.root)?;
            let removed = store.prune(keep.unwrap_or(cfg.retention.keep))?;
            for id in &removed {
                println!("removed {}", id);
            }
            println!("pruned {} version(s)", removed.len());
        }
        Commands::Check {
            source,
            remote_date,
        } => {
            if cfg.source(&source).is_none() {
                bail!("unknown source '{}'", source);
            }
            let store = VersionStore::open(&cfg.corpus.root)?;
            let local = update::local_consolidation_date(&store, &source)?;
            if update::needs_update(local.as_deref(), &remote_date)? {
                println!(
                    "update available: {} {} -> {}",
                    source,
                    local.as_deref().unwrap_or("none"),
                    remote_date
                );
            } else {
                println!("up to date: {} {}", source, local.as_deref().unwrap_or("none"));
            }
        }
        Commands::Chunk { .. } => {
            // Handled above (before config loading)
            unreachable!()
        }
    }

    Ok(())
}

fn run_chunk(file: &std::path::Path, source: &str, chunking: &ChunkingConfig) -> Result<()> {
    if chunking.max_tokens == 0 || chunking.overlap_tokens >= chunking.max_tokens {
        bail!("overlap_tokens must be smaller than max_tokens, and max_tokens > 0");
    }
    let stream = ingest::chunk_file(file, source, chunking)?;
    for warning in &stream.warnings {
        tracing::warn!("{}", warning);
    }
    let bytes = encode_chunk_stream(&stream.chunks).context("Failed to encode chunk stream")?;
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(&bytes)?;
    stdout.flush()?;
    Ok(())
}
