use doc_model::{Annotation, AnnotationId};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncOperation {
    Save,
    Delete,
}

/// Remote call waiting to be made. Save jobs point at a local record by its
/// current (temporary) id; the record itself stays in the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SyncJob {
    pub(crate) operation: SyncOperation,
    pub(crate) id: AnnotationId,
}

/// A delete that exhausted its attempts. Saves keep their failure on the
/// record instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FailedDelete {
    pub(crate) id: AnnotationId,
    pub(crate) attempts: u32,
    pub(crate) error: String,
}

#[derive(Debug, Default)]
pub(crate) struct Outbox {
    queue: VecDeque<SyncJob>,
    failed_deletes: Vec<FailedDelete>,
}

impl Outbox {
    pub(crate) fn push(&mut self, operation: SyncOperation, id: AnnotationId) {
        let job = SyncJob { operation, id };
        if !self.queue.contains(&job) {
            self.queue.push_back(job);
        }
    }

    /// Drops a queued save, returning whether one was queued.
    pub(crate) fn cancel_save(&mut self, id: &AnnotationId) -> bool {
        let before = self.queue.len();
        self.queue.retain(|job| !(job.operation == SyncOperation::Save && job.id == *id));
        before != self.queue.len()
    }

    pub(crate) fn drain(&mut self) -> Vec<SyncJob> {
        self.queue.drain(..).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.queue.len()
    }

    pub(crate) fn queued(&self) -> impl Iterator<Item = &SyncJob> {
        self.queue.iter()
    }

    pub(crate) fn record_failed_delete(&mut self, failed: FailedDelete) {
        self.failed_deletes.retain(|existing| existing.id != failed.id);
        self.failed_deletes.push(failed);
    }

    pub(crate) fn failed_deletes(&self) -> &[FailedDelete] {
        &self.failed_deletes
    }

    pub(crate) fn take_failed_delete(&mut self, id: &AnnotationId) -> Option<FailedDelete> {
        let index = self.failed_deletes.iter().position(|failed| failed.id == *id)?;
        Some(self.failed_deletes.remove(index))
    }
}

/// Local changes not yet acknowledged by the persistence side, in a form that
/// survives a restart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum PendingChange {
    Save { annotation: Annotation },
    Delete { id: AnnotationId },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_jobs_are_collapsed() {
        let mut outbox = Outbox::default();
        outbox.push(SyncOperation::Delete, AnnotationId::new("a"));
        outbox.push(SyncOperation::Delete, AnnotationId::new("a"));

        assert_eq!(outbox.len(), 1);
    }

    #[test]
    fn cancel_save_leaves_deletes_alone() {
        let mut outbox = Outbox::default();
        outbox.push(SyncOperation::Save, AnnotationId::temporary(1));
        outbox.push(SyncOperation::Delete, AnnotationId::new("r1"));

        assert!(outbox.cancel_save(&AnnotationId::temporary(1)));
        assert!(!outbox.cancel_save(&AnnotationId::temporary(1)));
        assert_eq!(
            outbox.drain(),
            vec![SyncJob { operation: SyncOperation::Delete, id: AnnotationId::new("r1") }]
        );
    }

    #[test]
    fn pending_change_json_is_tagged() {
        let change = PendingChange::Delete { id: AnnotationId::new("r1") };
        let json = serde_json::to_string(&change).expect("serialize");

        assert_eq!(json, r#"{"op":"delete","id":"r1"}"#);
    }
}
