//! # Contact Ledger
//!
//! Contact spreadsheet ingestion with duplicate reporting, idempotent
//! upserts keyed on `EmailID`, and replayable export snapshots.
//!
//! Uploaded CSV/XLSX files are normalized into canonical records and
//! upserted into SQLite. Every upload leaves an audit report; every export
//! leaves a snapshot of exactly which records it contained, which can be
//! paged through later with sensitive fields masked.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────────┐   ┌──────────┐
//! │ CSV / XLSX  │──▶│ Normalize+Dedup  │──▶│  SQLite   │
//! │   upload    │   │  Upsert+Report   │   │ records   │
//! └─────────────┘   └──────────────────┘   └────┬─────┘
//!                                               │
//!                      ┌────────────────────────┤
//!                      ▼                        ▼
//!                 ┌──────────┐           ┌────────────┐
//!                 │  Export  │──────────▶│ Snapshots  │
//!                 │ CSV/XLSX │           │  (replay)  │
//!                 └──────────┘           └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! cledger init                          # create database
//! cledger import ./people.xlsx          # ingest a file
//! cledger export --format xlsx -f Country=UK
//! cledger snapshots list
//! cledger serve                         # start HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite implementation of the record store |
//! | [`tabular`] | CSV/XLSX decoding |
//! | [`render`] | CSV/XLSX export rendering |
//! | [`upload`] | Upload staging and file ingestion |
//! | [`export`] | Filtered export with snapshot capture |
//! | [`audit`] | Report and snapshot views for the CLI |
//! | [`stats`] | Database statistics |
//! | [`server`] | HTTP server |

pub mod audit;
pub mod config;
pub mod db;
pub mod export;
pub mod migrate;
pub mod render;
pub mod server;
pub mod sqlite_store;
pub mod stats;
pub mod tabular;
pub mod upload;
