//! Chunk-stream artifact codec.
//!
//! A corpus version stores its chunks as JSON Lines: one [`Chunk`] per
//! line, fields in declaration order, in stream order. The encoding is a
//! pure function of the chunks, so identical chunk streams produce
//! identical bytes and therefore identical manifest checksums.

use thiserror::Error;

use crate::model::Chunk;

/// File name of the chunk-stream artifact inside a version directory.
pub const CHUNK_STREAM_FILE: &str = "chunks.jsonl";

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("invalid chunk record on line {line}: {error}")]
    Record {
        line: usize,
        #[source]
        error: serde_json::Error,
    },
    #[error("chunk on line {line}: overlap_bytes {overlap_bytes} is not a character boundary of its text")]
    Overlap { line: usize, overlap_bytes: usize },
}

impl StreamError {
    /// 1-based line of the offending record.
    pub fn line(&self) -> usize {
        match self {
            StreamError::Record { line, .. } | StreamError::Overlap { line, .. } => *line,
        }
    }
}

/// Serialize chunks as JSON Lines.
pub fn encode_chunk_stream<'a, I>(chunks: I) -> Result<Vec<u8>, serde_json::Error>
where
    I: IntoIterator<Item = &'a Chunk>,
{
    let mut out = Vec::new();
    for chunk in chunks {
        serde_json::to_writer(&mut out, chunk)?;
        out.push(b'\n');
    }
    Ok(out)
}

/// Parse a JSON Lines chunk stream. Blank lines are skipped. Records whose
/// `overlap_bytes` does not split `text` on a character boundary are
/// rejected.
pub fn decode_chunk_stream(bytes: &[u8]) -> Result<Vec<Chunk>, StreamError> {
    let mut chunks = Vec::new();
    for (index, line) in bytes.split(|&b| b == b'\n').enumerate() {
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        let chunk: Chunk = serde_json::from_slice(line).map_err(|error| StreamError::Record {
            line: index + 1,
            error,
        })?;
        if !chunk.has_valid_overlap() {
            return Err(StreamError::Overlap {
                line: index + 1,
                overlap_bytes: chunk.overlap_bytes,
            });
        }
        chunks.push(chunk);
    }
    Ok(chunks)
}
