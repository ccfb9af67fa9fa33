//! # Contact Ledger Core
//!
//! Storage-agnostic logic for Contact Ledger: the canonical contact schema,
//! row normalization, duplicate detection, redaction, typed filters, the
//! store abstraction, and the ingestion and snapshot engines.
//!
//! This crate contains no tokio, sqlx, filesystem I/O, or other
//! native-only dependencies. Engines take a `&dyn` [`store::RecordStore`]
//! and run unchanged against SQLite or [`store::memory::InMemoryStore`].

pub mod dedup;
pub mod error;
pub mod filter;
pub mod ingest;
pub mod models;
pub mod normalize;
pub mod redact;
pub mod report;
pub mod schema;
pub mod snapshot;
pub mod store;

pub use error::{LedgerError, Result};
