//! # STOMP Wire Protocol
//!
//! Frame types and the incremental STOMP 1.0 decoder. The transport layer
//! feeds raw TCP bytes into a per-connection [`StompDecoder`]; each call
//! yields at most one complete [`Frame`]. Encoding for outbound frames
//! lives on [`Frame`] itself.
//!
//! ## Modules
//!
//! - [`frame`] - `Command` and `Frame` wire types plus encoding
//! - [`decoder`] - resumable byte-stream state machine and decode errors

pub mod decoder;
pub mod frame;

pub use decoder::{StompDecoder, StompError};
pub use frame::{Command, Frame};
