//! # DQR Review Sync Library (dqr-sync)
//!
//! Keeps the pending, approved and rejected review queues consistent with
//! the review backend while the reviewer approves and rejects files.
//!
//! **Architecture:** one owned record store; a sync orchestrator that loads
//! queue snapshots with out-of-order discard; a mutation coordinator with
//! optimistic moves and revert; a push-channel listener that turns remote
//! change signals into resyncs; a filter view over all three queues.

pub mod coordinator;
pub mod engine;
pub mod error;
pub mod filter;
pub mod http;
pub mod listener;
pub mod orchestrator;
pub mod remote;
pub mod store;

pub use engine::ReviewEngine;
pub use error::{Error, Result};
