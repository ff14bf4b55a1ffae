//! In-memory remote store with fault injection.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use crate::remote::{
    ChangeBatch, ChangeKind, ChangeStream, Cursor, DocumentChange, Page, RemoteDocument,
    RemoteError, RemoteFilter, RemoteQuery, RemoteResult, RemoteStore,
};

struct Listener {
    filter: RemoteFilter,
    tx: mpsc::UnboundedSender<RemoteResult<ChangeBatch>>,
}

#[derive(Default)]
struct Inner {
    docs: BTreeMap<String, RemoteDocument>,
    listeners: Vec<Listener>,
}

impl Inner {
    fn selected(&self, filter: &RemoteFilter) -> Vec<(String, RemoteDocument)> {
        let mut docs: Vec<(String, RemoteDocument)> = self
            .docs
            .iter()
            .filter(|(_, doc)| filter.matches(doc))
            .map(|(id, doc)| (id.clone(), doc.clone()))
            .collect();
        docs.sort_by(|a, b| (a.1.timestamp, &a.0).cmp(&(b.1.timestamp, &b.0)));
        docs
    }

    /// Push changes to every listener whose filter selects them. Closed
    /// listeners are pruned.
    fn fan_out(&mut self, changes: &[DocumentChange]) {
        self.listeners.retain(|listener| {
            let mut selected: Vec<DocumentChange> = changes
                .iter()
                .filter(|c| listener.filter.matches(&c.document))
                .cloned()
                .collect();
            if selected.is_empty() {
                return !listener.tx.is_closed();
            }
            selected.sort_by_key(|c| c.document.timestamp);
            listener
                .tx
                .send(Ok(ChangeBatch {
                    changes: selected,
                    from_cache: false,
                }))
                .is_ok()
        });
    }
}

/// Remote store held in memory.
///
/// Writes fan out to live subscriptions synchronously, like a local emulator.
#[derive(Default)]
pub struct MemoryRemoteStore {
    inner: Mutex<Inner>,
    offline: AtomicBool,
    failing_batch_calls: Mutex<HashSet<usize>>,
    batch_calls: AtomicUsize,
    set_calls: AtomicUsize,
    query_calls: AtomicUsize,
    subscribe_calls: AtomicUsize,
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every call with `Unavailable` while set.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Fail the given `batch_set` calls, numbered from 1 since creation.
    pub fn fail_batch_calls(&self, calls: impl IntoIterator<Item = usize>) {
        self.failing_batch_calls
            .lock()
            .expect("lock poisoned")
            .extend(calls);
    }

    /// Break every live subscription selected by `filter` with a listen error.
    pub fn fail_listeners(&self, filter: &RemoteFilter) -> usize {
        let mut inner = self.inner.lock().expect("lock poisoned");
        let before = inner.listeners.len();
        inner.listeners.retain(|listener| {
            if listener.filter != *filter {
                return true;
            }
            let _ = listener
                .tx
                .send(Err(RemoteError::Listen("permission denied".to_string())));
            false
        });
        before - inner.listeners.len()
    }

    /// Deliver the current snapshot again to matching subscriptions, as a
    /// store does after a reconnect of its own.
    pub fn redeliver_snapshot(&self, filter: &RemoteFilter) {
        let mut inner = self.inner.lock().expect("lock poisoned");
        let changes: Vec<DocumentChange> = inner
            .selected(filter)
            .into_iter()
            .map(|(id, document)| DocumentChange {
                kind: ChangeKind::Added,
                id,
                document,
            })
            .collect();
        inner.listeners.retain(|listener| {
            if listener.filter != *filter {
                return true;
            }
            listener
                .tx
                .send(Ok(ChangeBatch {
                    changes: changes.clone(),
                    from_cache: true,
                }))
                .is_ok()
        });
    }

    /// Delete a document, notifying subscribers with a `Removed` change.
    pub fn delete(&self, id: &str) -> bool {
        let mut inner = self.inner.lock().expect("lock poisoned");
        match inner.docs.remove(id) {
            Some(document) => {
                inner.fan_out(&[DocumentChange {
                    kind: ChangeKind::Removed,
                    id: id.to_string(),
                    document,
                }]);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("lock poisoned").docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ids(&self) -> Vec<String> {
        self.inner
            .lock()
            .expect("lock poisoned")
            .docs
            .keys()
            .cloned()
            .collect()
    }

    pub fn document(&self, id: &str) -> Option<RemoteDocument> {
        self.inner.lock().expect("lock poisoned").docs.get(id).cloned()
    }

    /// Live subscriptions whose receiver is still open.
    pub fn listener_count(&self) -> usize {
        let mut inner = self.inner.lock().expect("lock poisoned");
        inner.listeners.retain(|l| !l.tx.is_closed());
        inner.listeners.len()
    }

    pub fn batch_calls(&self) -> usize {
        self.batch_calls.load(Ordering::SeqCst)
    }

    pub fn set_calls(&self) -> usize {
        self.set_calls.load(Ordering::SeqCst)
    }

    pub fn query_calls(&self) -> usize {
        self.query_calls.load(Ordering::SeqCst)
    }

    pub fn subscribe_calls(&self) -> usize {
        self.subscribe_calls.load(Ordering::SeqCst)
    }

    fn check_online(&self) -> RemoteResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(RemoteError::Unavailable("offline".to_string()));
        }
        Ok(())
    }

    fn upsert(inner: &mut Inner, docs: &[(String, RemoteDocument)]) {
        let changes: Vec<DocumentChange> = docs
            .iter()
            .map(|(id, doc)| {
                let kind = match inner.docs.insert(id.clone(), doc.clone()) {
                    Some(_) => ChangeKind::Modified,
                    None => ChangeKind::Added,
                };
                DocumentChange {
                    kind,
                    id: id.clone(),
                    document: doc.clone(),
                }
            })
            .collect();
        inner.fan_out(&changes);
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn set(&self, id: &str, doc: &RemoteDocument) -> RemoteResult<()> {
        self.set_calls.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;
        let mut inner = self.inner.lock().expect("lock poisoned");
        Self::upsert(&mut inner, &[(id.to_string(), doc.clone())]);
        Ok(())
    }

    async fn batch_set(&self, docs: &[(String, RemoteDocument)]) -> RemoteResult<()> {
        let call = self.batch_calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.check_online()?;
        if self
            .failing_batch_calls
            .lock()
            .expect("lock poisoned")
            .contains(&call)
        {
            return Err(RemoteError::Rejected(format!("batch call {} rejected", call)));
        }

        let mut inner = self.inner.lock().expect("lock poisoned");
        Self::upsert(&mut inner, docs);
        debug!(call, documents = docs.len(), "Batch committed");
        Ok(())
    }

    async fn get(&self, id: &str) -> RemoteResult<Option<RemoteDocument>> {
        self.check_online()?;
        Ok(self.document(id))
    }

    async fn query(&self, query: &RemoteQuery) -> RemoteResult<Page> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;

        let inner = self.inner.lock().expect("lock poisoned");
        let documents: Vec<(String, RemoteDocument)> = inner
            .selected(&query.filter)
            .into_iter()
            .filter(|(_, doc)| query.after_timestamp.map_or(true, |ts| doc.timestamp > ts))
            .filter(|(id, doc)| {
                query.cursor.as_ref().map_or(true, |cursor| {
                    (doc.timestamp, id.as_str()) > (cursor.timestamp, cursor.id.as_str())
                })
            })
            .take(query.limit)
            .collect();

        let next_cursor = documents.last().map(|(id, doc)| Cursor {
            timestamp: doc.timestamp,
            id: id.clone(),
        });
        Ok(Page {
            documents,
            next_cursor,
        })
    }

    async fn count(&self, filter: &RemoteFilter) -> RemoteResult<usize> {
        self.check_online()?;
        let inner = self.inner.lock().expect("lock poisoned");
        Ok(inner.docs.values().filter(|doc| filter.matches(doc)).count())
    }

    async fn subscribe(&self, filter: &RemoteFilter) -> RemoteResult<ChangeStream> {
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;

        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock().expect("lock poisoned");
        let snapshot: Vec<DocumentChange> = inner
            .selected(filter)
            .into_iter()
            .map(|(id, document)| DocumentChange {
                kind: ChangeKind::Added,
                id,
                document,
            })
            .collect();
        let _ = tx.send(Ok(ChangeBatch {
            changes: snapshot,
            from_cache: false,
        }));
        inner.listeners.push(Listener {
            filter: filter.clone(),
            tx,
        });
        Ok(ChangeStream::new(rx))
    }
}
