//! # DriftMQ Core Library
//!
//! DriftMQ is a lightweight STOMP-compatible message broker written in Rust.
//! This crate provides the broker's core engine: the pieces that carry the
//! hard invariants and that the connection, session, and journal layers are
//! built on.
//!
//! ## Architecture Overview
//!
//! The core is three independent, composable subsystems:
//!
//! - [`settings`] - Hierarchical wildcard repository mapping destination
//!   addresses to per-address policies, with a lock-free cache probe and a
//!   reader/writer-locked match set
//! - [`protocol`] - Incremental STOMP 1.0 wire decoder that tolerates
//!   arbitrary TCP fragmentation and flags frames that need a newer-version
//!   decoder
//! - [`journal`] - Sequential file factory for the write-ahead journal:
//!   append-only files, a timed write-coalescing buffer, and an asynchronous
//!   writer with ordered completion callbacks
//!
//! A broker instance uses all three simultaneously but they never call each
//! other; data flows between them through the layers above.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use driftmq::settings::{AddressSettings, HierarchicalRepository};
//!
//! let repo: HierarchicalRepository<AddressSettings> = HierarchicalRepository::merging();
//! repo.set_default(AddressSettings::default());
//! repo.add_match("queues.#", AddressSettings::default()).unwrap();
//! let settings = repo.get_match("queues.orders.eu");
//! ```

pub mod config;
pub mod journal;
pub mod protocol;
pub mod settings;

pub use config::BrokerConfig;
pub use journal::{
    FsSequentialFileFactory, IoCallback, IoCriticalErrorListener, SequentialFile,
    SequentialFileFactory, TimedBuffer,
};
pub use protocol::{Command, Frame, StompDecoder, StompError};
pub use settings::{
    HierarchicalRepository, HierarchicalRepositoryChangeListener, InvalidPattern, Mergeable,
};

use thiserror::Error;

/// DriftMQ error types
///
/// All error conditions surfaced by the core crate. Subsystem errors keep
/// their own enums and are folded in here so callers can hold a single
/// error type at the broker boundary.
#[derive(Debug, Error)]
pub enum DriftmqError {
    /// Storage subsystem errors including file I/O and journal directory failures
    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),

    /// Configuration validation and parsing errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// STOMP wire protocol decode errors
    #[error("Frame decode error: {0}")]
    Stomp(#[from] protocol::StompError),

    /// Rejected wildcard pattern in the settings repository
    #[error(transparent)]
    InvalidPattern(#[from] settings::InvalidPattern),
}

/// Result type alias used throughout the DriftMQ codebase.
pub type Result<T> = std::result::Result<T, DriftmqError>;
