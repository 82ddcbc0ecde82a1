//! # DQR Common Library
//!
//! Shared code for the review dashboard client crates including:
//! - File record model and queue names
//! - Event types (ReviewEvent enum) and the EventBus
//! - Client configuration loading
//! - Server-Sent Events frame decoding

pub mod config;
pub mod error;
pub mod events;
pub mod records;
pub mod sse;

pub use error::{Error, Result};
pub use records::{FileRecord, QueueName, RecordPatch, ReviewStatus};
