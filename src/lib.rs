//! # Statute Corpus
//!
//! Structure-aware ingestion and versioned corpus snapshots for
//! consolidated statutes.
//!
//! Source XML is parsed into a structure tree and cut into chunks along
//! statutory boundaries (section, subsection, paragraph, …) by
//! [`statute_corpus_core`]. This crate adds everything with side effects:
//! publishing immutable, checksummed corpus versions and switching the
//! current version atomically, with rollback.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────────────────┐   ┌─────────────┐   ┌──────────────┐
//! │ XML files  │──▶│ parse + chunk    │──▶│ ChunkIndexer │──▶│ Manifest     │
//! │ (sources)  │   │ (core, parallel) │   │ index/       │   │ Builder      │
//! └────────────┘   └──────────────────┘   └─────────────┘   └──────┬───────┘
//!                                                                  ▼
//!                                        ┌──────────────┐   corpus-YYYY-MM-DD/
//!                                        │ VersionStore │── CURRENT, audit log
//!                                        └──────┬───────┘
//!                                               ▼
//!                                          ReloadHook
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`ingest`] | Ingestion pipeline |
//! | [`manifest`] | Manifests and the two-phase version builder |
//! | [`store`] | Current pointer, activation, rollback, retention |
//! | [`lock`] | Single-writer lock |
//! | [`traits`] | Indexer and reload-hook extension points |
//! | [`update`] | Newer-consolidation detection |
//! | [`checksum`] | SHA-256 helpers |
//! | [`progress`] | Progress reporting on stderr |
//! | [`error`] | Store errors |

pub mod checksum;
pub mod config;
pub mod error;
pub mod ingest;
pub mod lock;
pub mod manifest;
pub mod progress;
pub mod store;
pub mod traits;
pub mod update;
