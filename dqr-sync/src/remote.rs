//! Remote authority interface
//!
//! The engine talks to the review backend only through these traits so the
//! orchestration logic can run against the HTTP client in production and a
//! scripted fake in tests.

use async_trait::async_trait;
use dqr_common::{FileRecord, QueueName};
use futures::stream::BoxStream;

use crate::error::Result;

/// Review backend operations
#[async_trait]
pub trait RemoteAuthority: Send + Sync {
    /// Full ordered contents of one queue
    async fn fetch_queue(&self, queue: QueueName) -> Result<Vec<FileRecord>>;

    /// Approve a pending record on behalf of `approver`
    async fn approve(&self, object_id: &str, approver: &str) -> Result<()>;

    /// Reject a pending record on behalf of `rejector` with `feedback`
    async fn reject(&self, object_id: &str, rejector: &str, feedback: &str) -> Result<()>;
}

/// One item from the push channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeSignal {
    /// Something changed remotely; refetch everything
    Changed,
    /// Keep-alive with no meaning beyond "connection is healthy"
    KeepAlive,
}

pub type ChangeStream = BoxStream<'static, Result<ChangeSignal>>;

/// Source of invalidation signals
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    /// Open the push channel; the stream ends or errors when the connection drops
    async fn connect(&self) -> Result<ChangeStream>;
}
