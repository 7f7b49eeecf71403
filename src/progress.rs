//! Ingest progress reporting.
//!
//! Progress is emitted on **stderr** so stdout remains parseable for
//! scripts (e.g. `corpus chunk` piping JSON Lines).

use std::io::Write;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IngestProgressEvent {
    /// Source `n` of `total` parsed and chunked.
    Chunked {
        source: String,
        chunks: usize,
        n: usize,
        total: usize,
    },
    /// Source could not be ingested; the run continues without it.
    Failed { source: String, n: usize, total: usize },
    /// Indexer is running over the combined chunk stream.
    Indexing { indexer: String, chunks: usize },
    /// Version directory is being staged and published.
    Publishing { version_id: String },
}

/// Reports ingest progress. Implementations write to stderr (human or JSON).
pub trait IngestProgressReporter: Send + Sync {
    fn report(&self, event: IngestProgressEvent);
}

/// Human-friendly progress: "ingest ITA  2 / 3 sources  4,180 chunks".
pub struct StderrProgress;

impl IngestProgressReporter for StderrProgress {
    fn report(&self, event: IngestProgressEvent) {
        let line = match &event {
            IngestProgressEvent::Chunked {
                source,
                chunks,
                n,
                total,
            } => format!(
                "ingest {}  {} / {} sources  {} chunks\n",
                source,
                n,
                total,
                format_number(*chunks as u64)
            ),
            IngestProgressEvent::Failed { source, n, total } => {
                format!("ingest {}  {} / {} sources  FAILED\n", source, n, total)
            }
            IngestProgressEvent::Indexing { indexer, chunks } => format!(
                "index {}  {} chunks\n",
                indexer,
                format_number(*chunks as u64)
            ),
            IngestProgressEvent::Publishing { version_id } => {
                format!("publish {}\n", version_id)
            }
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl IngestProgressReporter for JsonProgress {
    fn report(&self, event: IngestProgressEvent) {
        let obj = match &event {
            IngestProgressEvent::Chunked {
                source,
                chunks,
                n,
                total,
            } => serde_json::json!({
                "event": "progress",
                "phase": "chunked",
                "source": source,
                "chunks": chunks,
                "n": n,
                "total": total
            }),
            IngestProgressEvent::Failed { source, n, total } => serde_json::json!({
                "event": "progress",
                "phase": "failed",
                "source": source,
                "n": n,
                "total": total
            }),
            IngestProgressEvent::Indexing { indexer, chunks } => serde_json::json!({
                "event": "progress",
                "phase": "indexing",
                "indexer": indexer,
                "chunks": chunks
            }),
            IngestProgressEvent::Publishing { version_id } => serde_json::json!({
                "event": "progress",
                "phase": "publishing",
                "version": version_id
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

pub struct NoProgress;

impl IngestProgressReporter for NoProgress {
    fn report(&self, _event: IngestProgressEvent) {}
}

pub(crate) fn format_number(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "off" | "none" => Some(ProgressMode::Off),
            "human" => Some(ProgressMode::Human),
            "json" => Some(ProgressMode::Json),
            _ => None,
        }
    }

    pub fn reporter(&self) -> Box<dyn IngestProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
