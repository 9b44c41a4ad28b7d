//! # Store Emulator
//!
//! An in-process column-family store with the scan and filter semantics of
//! the real thing, for deterministic tests and offline tooling.
//!
//! ## Module Structure
//!
//! - `table.rs` - Row storage, version buckets, scans
//! - `connection.rs` - Table registry
//! - `dump.rs` - JSON export/import
//!
//! ## Scan Path
//!
//! ```text
//! ScanRequest
//!     │
//!     ▼
//! parse filter text ──(error)──> InvalidFilter, filter_errors += 1
//!     │
//!     ▼
//! read lock: range [start, stop) ──> merge buckets ──> project columns
//!     │
//!     ▼
//! release lock ──> apply predicates left to right ──> truncate to limit
//! ```
//!
//! Rows keep their version buckets: a put without a timestamp lands in
//! bucket 0, reads merge buckets oldest to newest so the newest value of
//! each qualifier wins.

mod connection;
mod dump;
mod table;

pub use connection::MemoryConnection;
pub use dump::{Dump, DumpRow};
pub use table::{MemoryTable, DEFAULT_BUCKET};
