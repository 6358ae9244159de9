//! # LodeKV
//!
//! An embedded, ordered, persistent key-value store built on a
//! log-structured merge tree:
//! - Writes land in an in-memory sorted MemTable
//! - Full MemTables are flushed to immutable sorted segment files
//! - Reads merge the MemTable with every segment, newest data winning
//! - Full compaction rewrites everything into one segment
//! - Segments are published with temp file + fsync + atomic rename
//!
//! ## Architecture Overview
//!
//! ```text
//!            upsert / remove                 get / range
//!                  │                              │
//! ┌────────────────▼──────────────┐   ┌───────────▼────────────┐
//! │            Engine             │   │     Merge Iterator     │
//! │  (write lock, sequence ctr)   │   │ (k-way, dedup by rank) │
//! └────────────────┬──────────────┘   └───────────▲────────────┘
//!                  │                              │
//!                  ▼                              │
//!           ┌─────────────┐   scan                │
//!           │  MemTable   ├───────────────────────┤
//!           │  (RwLock)   │                       │
//!           └──────┬──────┘                       │
//!                  │ flush / compact              │
//!                  ▼                              │
//!           ┌─────────────┐   scan                │
//!           │  Segments   ├───────────────────────┘
//!           │ (immutable) │
//!           └─────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod cell;
pub mod memtable;
pub mod storage;
pub mod iterator;
pub mod engine;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use cell::{Cell, Value};
pub use error::{LodeError, Result};
pub use config::Config;
pub use engine::{Engine, Range};
pub use storage::CompactionReport;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of LodeKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
