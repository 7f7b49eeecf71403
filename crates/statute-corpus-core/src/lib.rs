//! # Statute Corpus Core
//!
//! Pure ingestion logic for Statute Corpus: the structure model, the
//! consolidated-statute parser, the structure-aware chunker, and the
//! chunk-stream codec.
//!
//! This crate performs no filesystem or network I/O. Every function takes
//! bytes or values and returns values, so independent source documents can
//! be parsed and chunked in parallel without shared state.
//!
//! ```text
//! bytes ──read_xml──▶ MarkupElement ──build_document──▶ ParsedDocument
//!                                                          │
//!                                          chunk_document  ▼
//!                                                      ChunkStream ──encode──▶ chunks.jsonl
//! ```

pub mod chunk;
pub mod error;
pub mod markup;
pub mod model;
pub mod parser;
pub mod stream;
