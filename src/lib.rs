//! # EmberKV
//!
//! An embedded, log-structured hash table key-value store with:
//! - Append-only data files with checksummed records
//! - A sharded in-memory index mapping every key to its freshest record
//! - Crash detection and repair of the files a crash can tear
//! - Background compaction that moves live records with compare-and-replace
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Engine                               │
//! │          put / get / delete / iter / stats / close           │
//! └───────┬─────────────────────┬────────────────────┬──────────┘
//!         │                     │                    │
//!         ▼                     ▼                    ▼
//!  ┌─────────────┐      ┌──────────────┐     ┌──────────────┐
//!  │  File Set   │      │   In-Memory  │     │  Compaction  │
//!  │ .data/.index│◄─────│    Index     │◄────│    worker    │
//!  │ .tombstone  │      │  (sharded)   │ CAS │   (thread)   │
//!  └─────────────┘      └──────────────┘     └──────────────┘
//!         ▲                                          │
//!         └───────────── transfer live records ──────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use emberkv::{Config, Engine};
//!
//! let engine = Engine::open("./emberkv_data", Config::default())?;
//! engine.put(b"a", b"1")?;
//! assert_eq!(engine.get(b"a")?, Some(b"1".to_vec()));
//! engine.delete(b"a")?;
//! engine.close()?;
//! # Ok::<(), emberkv::EmberError>(())
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;
pub mod sequence;

pub mod record;
pub mod storage;
pub mod index;
pub mod engine;
pub mod compaction;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{EmberError, Result};
pub use config::{Config, ConfigBuilder, FlushPolicy};
pub use engine::{DbState, Engine, EngineIterator, Stats};
pub use record::Record;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of EmberKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
