//! In-memory review backend
//!
//! Serves listings from memory and applies successful approvals and
//! rejections to them, like the real backend. Individual calls can be
//! held open with a gate and answered later from the test, which is how
//! out-of-order responses are produced.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use dqr_common::{FileRecord, QueueName, RecordPatch};
use dqr_sync::error::{Error, Result};
use dqr_sync::remote::RemoteAuthority;
use tokio::sync::oneshot;

/// Reply handed to a gated fetch: the listing, or an error message
pub type FetchReply = std::result::Result<Vec<FileRecord>, String>;

/// Reply handed to a gated approve/reject
pub type MutationReply = std::result::Result<(), String>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationCall {
    pub action: &'static str,
    pub object_id: String,
    pub reviewer: String,
    pub feedback: Option<String>,
}

#[derive(Default)]
pub struct ScriptedAuthority {
    listings: Mutex<[Vec<FileRecord>; 3]>,
    failing: Mutex<HashSet<QueueName>>,
    fetch_gates: Mutex<[VecDeque<oneshot::Receiver<FetchReply>>; 3]>,
    mutation_gates: Mutex<VecDeque<oneshot::Receiver<MutationReply>>>,
    fail_mutations: AtomicBool,
    fetches: AtomicUsize,
    mutations: Mutex<Vec<MutationCall>>,
}

impl ScriptedAuthority {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_listing(&self, queue: QueueName, records: Vec<FileRecord>) {
        let records = records
            .into_iter()
            .map(|r| r.with_status(queue.status()))
            .collect();
        self.listings.lock().unwrap()[queue.index()] = records;
    }

    pub fn listing(&self, queue: QueueName) -> Vec<FileRecord> {
        self.listings.lock().unwrap()[queue.index()].clone()
    }

    /// Make every ungated fetch of `queue` fail until healed
    pub fn fail_queue(&self, queue: QueueName) {
        self.failing.lock().unwrap().insert(queue);
    }

    pub fn heal_queue(&self, queue: QueueName) {
        self.failing.lock().unwrap().remove(&queue);
    }

    /// Hold the next fetch of `queue` open until the returned sender answers
    ///
    /// Gates queue up per queue and are taken in call order.
    pub fn gate_fetch(&self, queue: QueueName) -> oneshot::Sender<FetchReply> {
        let (tx, rx) = oneshot::channel();
        self.fetch_gates.lock().unwrap()[queue.index()].push_back(rx);
        tx
    }

    /// Hold the next approve/reject open until the returned sender answers
    pub fn gate_mutation(&self) -> oneshot::Sender<MutationReply> {
        let (tx, rx) = oneshot::channel();
        self.mutation_gates.lock().unwrap().push_back(rx);
        tx
    }

    pub fn fail_mutations(&self, fail: bool) {
        self.fail_mutations.store(fail, Ordering::SeqCst);
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn mutation_calls(&self) -> Vec<MutationCall> {
        self.mutations.lock().unwrap().clone()
    }

    async fn mutate(&self, call: MutationCall, target: QueueName, patch: RecordPatch) -> Result<()> {
        let object_id = call.object_id.clone();
        self.mutations.lock().unwrap().push(call);

        let gate = self.mutation_gates.lock().unwrap().pop_front();
        let reply = match gate {
            Some(rx) => rx
                .await
                .unwrap_or_else(|_| Err("mutation gate dropped".to_string())),
            None if self.fail_mutations.load(Ordering::SeqCst) => {
                Err("HTTP 500 Internal Server Error".to_string())
            }
            None => Ok(()),
        };
        reply.map_err(Error::Remote)?;

        // Success: the backend now holds the record in the target folder
        let mut listings = self.listings.lock().unwrap();
        let pending = &mut listings[QueueName::Pending.index()];
        if let Some(pos) = pending.iter().position(|r| r.object_id == object_id) {
            let mut record = pending.remove(pos);
            patch.apply(&mut record);
            listings[target.index()].push(record);
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteAuthority for ScriptedAuthority {
    async fn fetch_queue(&self, queue: QueueName) -> Result<Vec<FileRecord>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);

        let gate = self.fetch_gates.lock().unwrap()[queue.index()].pop_front();
        if let Some(rx) = gate {
            return rx
                .await
                .unwrap_or_else(|_| Err("fetch gate dropped".to_string()))
                .map_err(Error::Remote);
        }

        if self.failing.lock().unwrap().contains(&queue) {
            return Err(Error::Remote(format!("HTTP 503 listing {} unavailable", queue)));
        }
        Ok(self.listing(queue))
    }

    async fn approve(&self, object_id: &str, approver: &str) -> Result<()> {
        let call = MutationCall {
            action: "approve",
            object_id: object_id.to_string(),
            reviewer: approver.to_string(),
            feedback: None,
        };
        self.mutate(call, QueueName::Approved, RecordPatch::approved())
            .await
    }

    async fn reject(&self, object_id: &str, rejector: &str, feedback: &str) -> Result<()> {
        let call = MutationCall {
            action: "reject",
            object_id: object_id.to_string(),
            reviewer: rejector.to_string(),
            feedback: Some(feedback.to_string()),
        };
        self.mutate(call, QueueName::Rejected, RecordPatch::rejected(feedback))
            .await
    }
}
