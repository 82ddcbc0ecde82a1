//! Filter view
//!
//! Derives the visible subset of each queue from the store and the current
//! predicate. Derivation is a linear scan; the only cache is one memo per
//! queue keyed by (queue revision, predicate), so repeated reads with
//! neither changed reuse the previous result.

use std::sync::{Arc, Mutex, PoisonError, RwLock};

use dqr_common::{FileRecord, QueueName};

use crate::store::RecordStore;

/// Case-insensitive substring match on project and uploader
///
/// An empty substring matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct FilterPredicate {
    project: String,
    uploader: String,
}

impl FilterPredicate {
    pub fn new(project: &str, uploader: &str) -> Self {
        Self {
            project: project.trim().to_lowercase(),
            uploader: uploader.trim().to_lowercase(),
        }
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn uploader(&self) -> &str {
        &self.uploader
    }

    pub fn is_empty(&self) -> bool {
        self.project.is_empty() && self.uploader.is_empty()
    }

    pub fn matches(&self, record: &FileRecord) -> bool {
        contains_folded(&record.project_id, &self.project)
            && contains_folded(&record.uploader, &self.uploader)
    }

    /// Lazy, restartable projection of `records` through this predicate
    pub fn apply<'a>(
        &'a self,
        records: &'a [FileRecord],
    ) -> impl Iterator<Item = &'a FileRecord> + Clone + 'a {
        records.iter().filter(move |r| self.matches(r))
    }
}

fn contains_folded(haystack: &str, needle: &str) -> bool {
    needle.is_empty() || haystack.to_lowercase().contains(needle)
}

#[derive(Debug)]
struct Memo {
    revision: u64,
    predicate: FilterPredicate,
    visible: Arc<[FileRecord]>,
}

/// Per-queue visible records for the current predicate
pub struct FilterView {
    store: Arc<RecordStore>,
    predicate: RwLock<FilterPredicate>,
    memo: Mutex<[Option<Memo>; 3]>,
}

impl FilterView {
    pub fn new(store: Arc<RecordStore>) -> Self {
        Self {
            store,
            predicate: RwLock::new(FilterPredicate::default()),
            memo: Mutex::new([None, None, None]),
        }
    }

    pub fn set_filter(&self, project: &str, uploader: &str) {
        let predicate = FilterPredicate::new(project, uploader);
        *self.predicate.write().unwrap_or_else(PoisonError::into_inner) = predicate;
    }

    pub fn predicate(&self) -> FilterPredicate {
        self.predicate
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Visible records of `queue`, in store order
    pub fn visible(&self, queue: QueueName) -> Arc<[FileRecord]> {
        let predicate = self.predicate();

        self.store.with_queue(queue, |revision, records| {
            let mut memo = self.memo.lock().unwrap_or_else(PoisonError::into_inner);
            let slot = &mut memo[queue.index()];

            if let Some(cached) = slot.as_ref() {
                if cached.revision == revision && cached.predicate == predicate {
                    return Arc::clone(&cached.visible);
                }
            }

            let visible: Arc<[FileRecord]> = predicate.apply(records).cloned().collect();
            *slot = Some(Memo {
                revision,
                predicate: predicate.clone(),
                visible: Arc::clone(&visible),
            });
            visible
        })
    }

    /// Visible records of all three queues, in `QueueName::ALL` order
    pub fn visible_all(&self) -> [Arc<[FileRecord]>; 3] {
        QueueName::ALL.map(|queue| self.visible(queue))
    }
}
