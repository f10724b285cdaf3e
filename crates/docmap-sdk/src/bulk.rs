//! Batched writes.
//!
//! Operations are queued until `batch_size` of them are pending, then
//! submitted in queue order. Consecutive operations on the same collection
//! share one submission. Document state is updated only for the items the
//! store accepted; nothing that already reached the store is rolled back.

use std::collections::BTreeSet;

use docmap_document::{
    to_storage, Binding, Document, EncodeOptions, LogEntry, OdmError, OdmResult, Pending, ID_FIELD,
};
use docmap_store::{BulkOp, BulkResult, Criteria};
use docmap_types::{ObjectId, Raw};
use tracing::{debug, warn};

use crate::error::SdkResult;
use crate::session::{require_stored, stored_collection, stored_id, Session};

/// State change applied to a document once its bulk item succeeded.
enum Followup {
    Nothing,
    Inserted(Document, ObjectId),
    Saved(Document, ObjectId),
    Removed(Document, ObjectId),
}

impl Followup {
    fn apply(self, binding: &Binding) {
        match self {
            Self::Nothing => {}
            Self::Inserted(doc, id) => {
                doc.mark_inserted(id);
                if !doc.is_bound() {
                    doc.bind(binding.clone());
                }
                doc.log_event(LogEntry::Insert { id });
            }
            Self::Saved(doc, id) => {
                doc.mark_saved();
                doc.log_event(LogEntry::Save { id });
            }
            Self::Removed(doc, id) => doc.log_event(LogEntry::Remove { id }),
        }
    }
}

struct Queued {
    collection: String,
    op: BulkOp,
    followup: Followup,
}

/// Consecutive queued items on one collection, submitted together.
struct Run {
    collection: String,
    ops: Vec<BulkOp>,
    followups: Vec<Followup>,
}

/// What is left of a [`Run`] once its ops went to the store.
struct Submitted {
    collection: String,
    followups: Vec<Followup>,
}

/// Queue and bookkeeping shared by both writers.
struct BulkQueue {
    batch_size: usize,
    ordered: bool,
    raise_on_error: bool,
    binding: Binding,
    queued: Vec<Queued>,
    /// Ops handed to the store so far; offsets later error indices.
    submitted: usize,
    result: BulkResult,
}

impl BulkQueue {
    fn new(session: &Session) -> Self {
        let config = session.config();
        Self {
            batch_size: config.bulk_batch_size.max(1),
            ordered: config.bulk_ordered,
            raise_on_error: config.bulk_raise_on_error,
            binding: Binding::new(session.backend().clone()),
            queued: Vec::new(),
            submitted: 0,
            result: BulkResult::default(),
        }
    }

    /// Queue an item; true when the batch is full.
    fn push(&mut self, collection: String, op: BulkOp, followup: Followup) -> bool {
        self.queued.push(Queued {
            collection,
            op,
            followup,
        });
        self.queued.len() >= self.batch_size
    }

    /// The id is assigned here so the document can be updated once the item
    /// succeeds, without waiting for the store to report it.
    fn insert(&mut self, doc: &Document) -> OdmResult<bool> {
        let collection = stored_collection(doc)?;
        let id = doc.id().unwrap_or_else(ObjectId::new);
        let mut record = to_storage(doc, &EncodeOptions::default())?;
        record.insert(ID_FIELD.to_string(), Raw::Id(id));
        Ok(self.push(
            collection,
            BulkOp::Insert(record),
            Followup::Inserted(doc.clone(), id),
        ))
    }

    fn save(&mut self, doc: &Document) -> OdmResult<bool> {
        let Some(id) = stored_id(doc) else {
            return self.insert(doc);
        };
        let collection = stored_collection(doc)?;
        let ops = doc.save_ops()?;
        if ops.is_empty() {
            return Ok(false);
        }
        let op = BulkOp::UpdateOne {
            criteria: Criteria::id(id),
            ops,
            upsert: false,
        };
        Ok(self.push(collection, op, Followup::Saved(doc.clone(), id)))
    }

    fn remove(&mut self, doc: &Document) -> OdmResult<bool> {
        let (collection, id) = require_stored(doc, "remove")?;
        Ok(self.push(
            collection,
            BulkOp::DeleteOne(Criteria::id(id)),
            Followup::Removed(doc.clone(), id),
        ))
    }

    fn take_runs(&mut self) -> Vec<Run> {
        let mut runs: Vec<Run> = Vec::new();
        for item in self.queued.drain(..) {
            match runs.last_mut() {
                Some(run) if run.collection == item.collection => {
                    run.ops.push(item.op);
                    run.followups.push(item.followup);
                }
                _ => runs.push(Run {
                    collection: item.collection,
                    ops: vec![item.op],
                    followups: vec![item.followup],
                }),
            }
        }
        runs
    }

    fn submit(&self, run: Run, session: &Session) -> (Pending<'static, BulkResult>, Submitted) {
        debug!(collection = %run.collection, ops = run.ops.len(), ordered = self.ordered, "bulk flush");
        let pending = session
            .backend()
            .bulk_submit(run.collection.clone(), run.ops, self.ordered);
        let rest = Submitted {
            collection: run.collection,
            followups: run.followups,
        };
        (pending, rest)
    }

    /// Record the outcome of a submitted run. Returns false when an ordered
    /// writer must stop.
    fn apply(&mut self, run: Submitted, result: BulkResult) -> bool {
        let failed: BTreeSet<usize> = result.errors.iter().map(|e| e.index).collect();
        let cut = if self.ordered {
            failed.first().copied()
        } else {
            None
        };
        let len = run.followups.len();
        for (index, followup) in run.followups.into_iter().enumerate() {
            if failed.contains(&index) || cut.is_some_and(|cut| index > cut) {
                continue;
            }
            followup.apply(&self.binding);
        }
        for error in &result.errors {
            warn!(
                collection = %run.collection,
                index = error.index + self.submitted,
                error = %error.message,
                "bulk item failed"
            );
        }
        self.result.merge(result, self.submitted);
        self.submitted += len;
        cut.is_none()
    }

    fn check(&self, errors_before: usize) -> OdmResult<()> {
        if self.raise_on_error && self.result.errors.len() > errors_before {
            return Err(OdmError::BulkWrite(Box::new(self.result.clone())));
        }
        Ok(())
    }
}

/// Bulk writer over a blocking collaborator. Ops still queued when the
/// writer is dropped are discarded; call [`BulkWriter::finish`].
pub struct BulkWriter<'db> {
    session: &'db Session,
    queue: BulkQueue,
}

impl<'db> BulkWriter<'db> {
    pub(crate) fn new(session: &'db Session) -> Self {
        Self {
            session,
            queue: BulkQueue::new(session),
        }
    }

    /// Queue `doc` for insertion. Its id is assigned now and applied once
    /// the item succeeds.
    pub fn insert(&mut self, doc: &Document) -> SdkResult<()> {
        let full = self.queue.insert(doc)?;
        self.flush_if(full)
    }

    /// Queue the pending changes of `doc`. Unstored documents are inserted,
    /// unchanged ones are skipped.
    pub fn save(&mut self, doc: &Document) -> SdkResult<()> {
        let full = self.queue.save(doc)?;
        self.flush_if(full)
    }

    pub fn remove(&mut self, doc: &Document) -> SdkResult<()> {
        let full = self.queue.remove(doc)?;
        self.flush_if(full)
    }

    /// Queue an op with no document attached.
    pub fn raw(&mut self, collection: impl Into<String>, op: BulkOp) -> SdkResult<()> {
        let full = self.queue.push(collection.into(), op, Followup::Nothing);
        self.flush_if(full)
    }

    /// Number of queued, unsubmitted ops.
    pub fn pending(&self) -> usize {
        self.queue.queued.len()
    }

    /// Accumulated outcome of everything flushed so far.
    pub fn result(&self) -> &BulkResult {
        &self.queue.result
    }

    fn flush_if(&mut self, full: bool) -> SdkResult<()> {
        if full {
            self.flush()?;
        }
        Ok(())
    }

    /// Submit everything queued.
    pub fn flush(&mut self) -> SdkResult<()> {
        let errors_before = self.queue.result.errors.len();
        for run in self.queue.take_runs() {
            let (pending, rest) = self.queue.submit(run, self.session);
            let result = pending.wait()?;
            if !self.queue.apply(rest, result) {
                break;
            }
        }
        self.queue.check(errors_before)?;
        Ok(())
    }

    /// Flush and return the accumulated result.
    pub fn finish(mut self) -> SdkResult<BulkResult> {
        self.flush()?;
        Ok(self.queue.result)
    }
}

/// Bulk writer over a suspending collaborator. Every queueing call is a
/// suspension point, since a full batch is flushed before it returns.
pub struct AsyncBulkWriter<'db> {
    session: &'db Session,
    queue: BulkQueue,
}

impl<'db> AsyncBulkWriter<'db> {
    pub(crate) fn new(session: &'db Session) -> Self {
        Self {
            session,
            queue: BulkQueue::new(session),
        }
    }

    pub async fn insert(&mut self, doc: &Document) -> SdkResult<()> {
        let full = self.queue.insert(doc)?;
        self.flush_if(full).await
    }

    pub async fn save(&mut self, doc: &Document) -> SdkResult<()> {
        let full = self.queue.save(doc)?;
        self.flush_if(full).await
    }

    pub async fn remove(&mut self, doc: &Document) -> SdkResult<()> {
        let full = self.queue.remove(doc)?;
        self.flush_if(full).await
    }

    pub async fn raw(&mut self, collection: impl Into<String>, op: BulkOp) -> SdkResult<()> {
        let full = self.queue.push(collection.into(), op, Followup::Nothing);
        self.flush_if(full).await
    }

    pub fn pending(&self) -> usize {
        self.queue.queued.len()
    }

    pub fn result(&self) -> &BulkResult {
        &self.queue.result
    }

    async fn flush_if(&mut self, full: bool) -> SdkResult<()> {
        if full {
            self.flush().await?;
        }
        Ok(())
    }

    pub async fn flush(&mut self) -> SdkResult<()> {
        let errors_before = self.queue.result.errors.len();
        for run in self.queue.take_runs() {
            let (pending, rest) = self.queue.submit(run, self.session);
            let result = pending.await?;
            if !self.queue.apply(rest, result) {
                break;
            }
        }
        self.queue.check(errors_before)?;
        Ok(())
    }

    pub async fn finish(mut self) -> SdkResult<BulkResult> {
        self.flush().await?;
        Ok(self.queue.result)
    }
}
