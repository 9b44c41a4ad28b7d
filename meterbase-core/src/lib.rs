//! # meterbase Core
//!
//! This crate provides the fundamental building blocks for meterbase:
//! - Record models and query filters
//! - Cell value codec (JSON with date/binary markers)
//! - Backend traits for column-family stores
//! - Error types, configuration and metrics
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                 meterbase-core                  │
//! ├─────────────────────────────────────────────────┤
//! │  • types    - Samples, alarms, filters          │
//! │  • value    - Extended-JSON cell values         │
//! │  • traits   - Connection / Table boundary       │
//! │  • error    - Error handling                    │
//! │  • config   - TOML configuration                │
//! │  • metrics  - Atomic counters                   │
//! └─────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod metrics;
pub mod traits;
pub mod types;
pub mod value;

// Re-export commonly used types
pub use error::{Error, Result};
pub use types::{
    Alarm, AlarmChange, AlarmChangeFilter, AlarmChangeType, AlarmFilter, Meter, Resource, Sample,
    SampleFilter, Timestamp, TimestampOp,
};
pub use value::{Metadata, Value};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
