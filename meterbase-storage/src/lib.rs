//! # meterbase Storage
//!
//! Metering and alarm storage over a column-family store.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Write Path                              │
//! │                                                              │
//! │  Sample ──> keys (rts, composite) ──> entry (cells) ──> put  │
//! │                                                              │
//! └─────────────────────────────────────────────────────────────┘
//!
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Read Path                               │
//! │                                                              │
//! │  SampleFilter ──> query (row range, columns, filter text)   │
//! │                      │                                       │
//! │                      ▼                                       │
//! │               Table::scan ──> entry (decode) ──> records    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Any [`Connection`](meterbase_core::traits::Connection) works as a
//! backend; [`memory::MemoryConnection`] is the in-process one.

pub mod alarm;
pub mod entry;
pub mod filter;
pub mod keys;
pub mod memory;
pub mod metering;
pub mod migration;
pub mod query;
pub mod schema;

pub use alarm::AlarmStore;
pub use entry::{deserialize_entry, serialize_entry, DecodedEntry, Entry};
pub use filter::{Comparator, CompareOp, FilterExpr, Predicate};
pub use memory::{Dump, MemoryConnection, MemoryTable};
pub use metering::MeteringStore;
pub use migration::{migrate_tables, MigrationReport};
pub use query::{make_query, make_sample_query_from_filter, SampleQuery};
