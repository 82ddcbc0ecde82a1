//! Test helper modules for dqr-sync integration tests
//!
//! - ScriptedAuthority: in-memory review backend with gated responses
//! - ChannelFeed: push channel driven from the test
//! - ReviewBackend: axum server speaking the real HTTP wire format

#![allow(dead_code)]

pub mod channel_feed;
pub mod scripted_authority;
pub mod test_server;

use std::future::Future;
use std::time::Duration;

use dqr_common::FileRecord;

pub use channel_feed::ChannelFeed;
pub use scripted_authority::{MutationCall, ScriptedAuthority};
pub use test_server::{RecordedCall, ReviewBackend};

/// Record with the attributes the filter looks at
pub fn record(id: &str, project: &str, uploader: &str) -> FileRecord {
    FileRecord::new(id)
        .with_name(format!("{}.csv", id))
        .with_project(project)
        .with_uploader(uploader)
}

pub fn ids(records: &[FileRecord]) -> Vec<String> {
    records.iter().map(|r| r.object_id.clone()).collect()
}

/// Poll `condition` until it holds, failing the test after two seconds
pub async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let result = tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(result.is_ok(), "timed out waiting for {}", what);
}

/// Await `future`, failing the test after two seconds
pub async fn within<T>(what: &str, future: impl Future<Output = T>) -> T {
    match tokio::time::timeout(Duration::from_secs(2), future).await {
        Ok(value) => value,
        Err(_) => panic!("timed out waiting for {}", what),
    }
}
