use crate::outbox::{FailedDelete, Outbox, PendingChange, SyncOperation};
use crate::{AnnotationRemote, DocumentKey, RemoteError, StoreError};
use doc_model::{
    valid_opacity, valid_scale, Annotation, AnnotationId, AnnotationKind, Bbox, PendingSelection,
    SaveReceipt, StyleDefaults, SyncStatus,
};
use tracing::{debug, info, instrument, warn};

/// One annotation with its persistence state.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredAnnotation {
    pub annotation: Annotation,
    pub status: SyncStatus,
}

/// Something the persistence side has not accepted after every attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedSync {
    pub id: AnnotationId,
    pub operation: SyncOperation,
    pub attempts: u32,
    pub error: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub saved: usize,
    pub deleted: usize,
    pub failed: usize,
}

/// In-memory annotations of one document, in insertion order.
///
/// Mutations apply locally first and queue a remote call; [`sync`] drains the
/// queue. A failed remote call never rolls the local state back.
///
/// [`sync`]: AnnotationStore::sync
#[derive(Debug)]
pub struct AnnotationStore {
    key: DocumentKey,
    records: Vec<StoredAnnotation>,
    outbox: Outbox,
    next_temporary: u64,
    max_attempts: u32,
}

impl AnnotationStore {
    pub fn new(key: DocumentKey, max_attempts: u32) -> Self {
        Self {
            key,
            records: Vec::new(),
            outbox: Outbox::default(),
            next_temporary: 1,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Starts from what the persistence side already holds.
    #[instrument(skip(remote), fields(file = %key.file_id))]
    pub fn load(
        remote: &dyn AnnotationRemote,
        key: DocumentKey,
        max_attempts: u32,
    ) -> Result<Self, RemoteError> {
        let annotations = remote.load_annotations(&key.user_id, &key.file_id)?;
        debug!(count = annotations.len(), "loaded annotations");

        let mut store = Self::new(key, max_attempts);
        store.records = annotations
            .into_iter()
            .map(|annotation| StoredAnnotation { annotation, status: SyncStatus::Synced })
            .collect();
        store.bump_temporary_counter();
        Ok(store)
    }

    pub fn key(&self) -> &DocumentKey {
        &self.key
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[StoredAnnotation] {
        &self.records
    }

    pub fn annotations(&self) -> impl Iterator<Item = &Annotation> {
        self.records.iter().map(|record| &record.annotation)
    }

    /// Owned copy of every annotation in order, as export consumes it.
    pub fn snapshot(&self) -> Vec<Annotation> {
        self.annotations().cloned().collect()
    }

    pub fn for_page(&self, page: u32) -> impl Iterator<Item = &Annotation> {
        self.annotations().filter(move |annotation| annotation.page == page)
    }

    pub fn get(&self, id: &AnnotationId) -> Option<&StoredAnnotation> {
        self.records.iter().find(|record| record.annotation.id == *id)
    }

    /// One highlight per line rectangle, all sharing text, style and page.
    pub fn create_highlight(
        &mut self,
        selection: PendingSelection,
        style: StyleDefaults,
        capture_scale: f32,
    ) -> Result<Vec<AnnotationId>, StoreError> {
        check_style(style, capture_scale)?;
        let PendingSelection { page, text, line_rects, .. } = selection;

        let ids: Vec<AnnotationId> = line_rects
            .into_iter()
            .map(|bbox| {
                let text = text.clone();
                self.insert(AnnotationKind::Highlight, page, bbox, text, style, capture_scale)
            })
            .collect();

        info!(page, count = ids.len(), "created highlight");
        Ok(ids)
    }

    /// No-op for blank text.
    pub fn create_note(
        &mut self,
        page: u32,
        x: f32,
        y: f32,
        text: &str,
        style: StyleDefaults,
        capture_scale: f32,
    ) -> Result<Option<AnnotationId>, StoreError> {
        check_style(style, capture_scale)?;
        let text = text.trim();
        if text.is_empty() {
            debug!(page, "ignoring note without text");
            return Ok(None);
        }

        let bbox = Bbox::at_point(x, y);
        let text = text.to_owned();
        let id = self.insert(AnnotationKind::Note, page, bbox, text, style, capture_scale);
        info!(page, annotation_id = %id, "created note");
        Ok(Some(id))
    }

    /// Removes the record locally. Remote records get a queued remote delete;
    /// unacknowledged ones just lose their queued save. Unknown ids are
    /// ignored, so deleting twice is the same as deleting once.
    pub fn delete(&mut self, id: &AnnotationId) -> bool {
        let Some(index) = self.records.iter().position(|record| record.annotation.id == *id) else {
            return false;
        };
        self.records.remove(index);

        if id.is_temporary() {
            self.outbox.cancel_save(id);
        } else {
            self.outbox.push(SyncOperation::Delete, id.clone());
        }

        info!(annotation_id = %id, "deleted annotation");
        true
    }

    /// Queued remote calls, for a "saving" indicator.
    pub fn in_flight(&self) -> usize {
        self.outbox.len()
    }

    pub fn failed(&self) -> Vec<FailedSync> {
        let saves = self.records.iter().filter_map(|record| match &record.status {
            SyncStatus::Failed { attempts, error } => Some(FailedSync {
                id: record.annotation.id.clone(),
                operation: SyncOperation::Save,
                attempts: *attempts,
                error: error.clone(),
            }),
            _ => None,
        });
        let deletes = self.outbox.failed_deletes().iter().map(|failed| FailedSync {
            id: failed.id.clone(),
            operation: SyncOperation::Delete,
            attempts: failed.attempts,
            error: failed.error.clone(),
        });

        saves.chain(deletes).collect()
    }

    /// Queues a failed save or delete again.
    pub fn retry(&mut self, id: &AnnotationId) -> Result<(), StoreError> {
        if let Some(record) = self.records.iter_mut().find(|record| record.annotation.id == *id) {
            if !record.status.is_failed() {
                return Err(StoreError::NotFailed(id.clone()));
            }
            record.status = SyncStatus::Pending;
            self.outbox.push(SyncOperation::Save, id.clone());
            return Ok(());
        }

        match self.outbox.take_failed_delete(id) {
            Some(_) => {
                self.outbox.push(SyncOperation::Delete, id.clone());
                Ok(())
            }
            None => Err(StoreError::UnknownAnnotation(id.clone())),
        }
    }

    /// Queues every failed item again.
    pub fn retry_failed(&mut self) -> usize {
        let failed = self.failed();
        failed.iter().filter(|item| self.retry(&item.id).is_ok()).count()
    }

    /// Drains the outbox against the persistence side. Each job is attempted
    /// up to the configured number of times; what still fails is surfaced
    /// through [`failed`](Self::failed).
    #[instrument(skip(self, remote), fields(file = %self.key.file_id, queued = self.outbox.len()))]
    pub fn sync(&mut self, remote: &dyn AnnotationRemote) -> SyncReport {
        let mut report = SyncReport::default();

        for job in self.outbox.drain() {
            match job.operation {
                SyncOperation::Save => {
                    let Some(index) = self.index_of(&job.id) else {
                        continue;
                    };
                    let annotation = &self.records[index].annotation;
                    let outcome = self.attempt(&job.id, |key| {
                        remote.save_annotation(&key.user_id, &key.file_id, annotation)
                    });
                    let record = &mut self.records[index];
                    match outcome {
                        Ok(receipt) => {
                            apply_receipt(&mut record.annotation, receipt);
                            record.status = SyncStatus::Synced;
                            report.saved += 1;
                        }
                        Err((attempts, error)) => {
                            record.status = SyncStatus::Failed { attempts, error };
                            report.failed += 1;
                        }
                    }
                }
                SyncOperation::Delete => {
                    let outcome = self.attempt(&job.id, |key| {
                        match remote.delete_annotation(&key.user_id, &key.file_id, &job.id) {
                            Err(RemoteError::NotFound(_)) => Ok(()),
                            other => other,
                        }
                    });
                    match outcome {
                        Ok(()) => report.deleted += 1,
                        Err((attempts, error)) => {
                            let failed = FailedDelete { id: job.id, attempts, error };
                            self.outbox.record_failed_delete(failed);
                            report.failed += 1;
                        }
                    }
                }
            }
        }

        if report.failed > 0 {
            warn!(failed = report.failed, "some annotation changes were not persisted");
        }
        report
    }

    /// Changes the persistence side has not acknowledged: unsynced records
    /// and deletes still queued or failed.
    pub fn pending_changes(&self) -> Vec<PendingChange> {
        let saves = self
            .records
            .iter()
            .filter(|record| !record.status.is_synced())
            .map(|record| PendingChange::Save { annotation: record.annotation.clone() });
        let queued_deletes = self
            .outbox
            .queued()
            .filter(|job| job.operation == SyncOperation::Delete)
            .map(|job| PendingChange::Delete { id: job.id.clone() });
        let failed_deletes = self
            .outbox
            .failed_deletes()
            .iter()
            .map(|failed| PendingChange::Delete { id: failed.id.clone() });

        saves.chain(queued_deletes).chain(failed_deletes).collect()
    }

    /// Replays changes saved by [`pending_changes`](Self::pending_changes)
    /// on top of the loaded records.
    pub fn restore(&mut self, changes: Vec<PendingChange>) {
        for change in changes {
            match change {
                PendingChange::Save { annotation } => {
                    if self.index_of(&annotation.id).is_some() {
                        continue;
                    }
                    let id = annotation.id.clone();
                    self.records.push(StoredAnnotation { annotation, status: SyncStatus::Pending });
                    self.outbox.push(SyncOperation::Save, id);
                }
                PendingChange::Delete { id } => {
                    if let Some(index) = self.index_of(&id) {
                        self.records.remove(index);
                    }
                    self.outbox.push(SyncOperation::Delete, id);
                }
            }
        }
        self.bump_temporary_counter();
    }

    fn insert(
        &mut self,
        kind: AnnotationKind,
        page: u32,
        bbox: Bbox,
        text: String,
        style: StyleDefaults,
        capture_scale: f32,
    ) -> AnnotationId {
        let id = AnnotationId::temporary(self.next_temporary);
        self.next_temporary += 1;

        self.records.push(StoredAnnotation {
            annotation: Annotation {
                id: id.clone(),
                page,
                bbox,
                kind,
                text,
                color: style.color,
                opacity: style.opacity,
                capture_scale: Some(capture_scale),
                author: None,
                created_at: None,
                updated_at: None,
            },
            status: SyncStatus::Pending,
        });
        self.outbox.push(SyncOperation::Save, id.clone());
        id
    }

    fn attempt<T>(
        &self,
        id: &AnnotationId,
        mut call: impl FnMut(&DocumentKey) -> Result<T, RemoteError>,
    ) -> Result<T, (u32, String)> {
        let mut last_error = String::new();
        for attempt in 1..=self.max_attempts {
            match call(&self.key) {
                Ok(value) => return Ok(value),
                Err(err) => {
                    warn!(annotation_id = %id, attempt, error = %err, "persistence call failed");
                    last_error = err.to_string();
                }
            }
        }
        Err((self.max_attempts, last_error))
    }

    fn index_of(&self, id: &AnnotationId) -> Option<usize> {
        self.records.iter().position(|record| record.annotation.id == *id)
    }

    fn bump_temporary_counter(&mut self) {
        let highest = self
            .records
            .iter()
            .filter_map(|record| record.annotation.id.temporary_sequence())
            .max()
            .unwrap_or(0);
        self.next_temporary = self.next_temporary.max(highest + 1);
    }
}

fn apply_receipt(annotation: &mut Annotation, receipt: SaveReceipt) {
    annotation.id = receipt.id;
    annotation.author = receipt.author.or(annotation.author.take());
    annotation.created_at = receipt.created_at.or(annotation.created_at);
    annotation.updated_at = receipt.updated_at.or(annotation.updated_at);
}

/// Opacity and capture scale end up in persisted records, which must stay
/// loadable.
fn check_style(style: StyleDefaults, capture_scale: f32) -> Result<(), StoreError> {
    if !valid_opacity(style.opacity) {
        return Err(StoreError::InvalidOpacity(style.opacity));
    }
    if !valid_scale(capture_scale) {
        return Err(StoreError::InvalidCaptureScale(capture_scale));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use doc_model::{Point, Rgb};
    use std::cell::{Cell, RefCell};

    /// Remote double: assigns sequential ids, can fail the first `n` calls.
    #[derive(Default)]
    struct FakeRemote {
        stored: RefCell<Vec<Annotation>>,
        deleted: RefCell<Vec<AnnotationId>>,
        fail_next: Cell<u32>,
        calls: Cell<u32>,
    }

    impl FakeRemote {
        fn failing(times: u32) -> Self {
            let remote = Self::default();
            remote.fail_next.set(times);
            remote
        }

        fn call(&self) -> Result<(), RemoteError> {
            self.calls.set(self.calls.get() + 1);
            if self.fail_next.get() > 0 {
                self.fail_next.set(self.fail_next.get() - 1);
                return Err(RemoteError::Unavailable("offline".to_owned()));
            }
            Ok(())
        }
    }

    impl AnnotationRemote for FakeRemote {
        fn load_annotations(
            &self,
            _user: &str,
            _file: &str,
        ) -> Result<Vec<Annotation>, RemoteError> {
            Ok(self.stored.borrow().clone())
        }

        fn save_annotation(
            &self,
            _user: &str,
            _file: &str,
            annotation: &Annotation,
        ) -> Result<SaveReceipt, RemoteError> {
            self.call()?;
            let id = AnnotationId::new(format!("r{}", self.stored.borrow().len() + 1));
            self.stored.borrow_mut().push(Annotation { id: id.clone(), ..annotation.clone() });
            Ok(SaveReceipt {
                id,
                author: Some("reader".to_owned()),
                created_at: Some(1),
                updated_at: None,
            })
        }

        fn delete_annotation(
            &self,
            _user: &str,
            _file: &str,
            id: &AnnotationId,
        ) -> Result<(), RemoteError> {
            self.call()?;
            self.deleted.borrow_mut().push(id.clone());
            Ok(())
        }
    }

    fn key() -> DocumentKey {
        DocumentKey::new("u1", "f1")
    }

    fn style() -> StyleDefaults {
        StyleDefaults { color: Rgb::new(0xFF, 0xEB, 0x3B), opacity: 0.4 }
    }

    fn selection(lines: usize) -> PendingSelection {
        PendingSelection {
            page: 3,
            text: "across lines".to_owned(),
            line_rects: (0..lines)
                .map(|line| Bbox::new(10.0, 20.0 * line as f32, 100.0, 18.0))
                .collect(),
            anchor: Point::new(60.0, 0.0),
        }
    }

    #[test]
    fn multi_line_selection_creates_one_highlight_per_line() {
        let mut store = AnnotationStore::new(key(), 3);

        let ids = store.create_highlight(selection(3), style(), 1.3).expect("valid style");

        assert_eq!(ids.len(), 3);
        let records = store.records();
        assert_eq!(records.len(), 3);
        for (line, record) in records.iter().enumerate() {
            let annotation = &record.annotation;
            assert_eq!(annotation.text, "across lines");
            assert_eq!(annotation.page, 3);
            assert_eq!(annotation.color, style().color);
            assert_eq!(annotation.opacity, 0.4);
            assert_eq!(annotation.capture_scale, Some(1.3));
            assert_eq!(annotation.bbox.y, 20.0 * line as f32);
            assert!(annotation.id.is_temporary());
        }
        assert_eq!(store.in_flight(), 3);
    }

    #[test]
    fn blank_note_creates_nothing_and_queues_nothing() {
        let mut store = AnnotationStore::new(key(), 3);

        assert_eq!(store.create_note(1, 5.0, 5.0, "   \n\t", style(), 1.0), Ok(None));
        assert!(store.is_empty());
        assert_eq!(store.in_flight(), 0);

        let remote = FakeRemote::default();
        store.sync(&remote);
        assert_eq!(remote.calls.get(), 0);
    }

    #[test]
    fn note_is_zero_sized_at_anchor() {
        let mut store = AnnotationStore::new(key(), 3);

        let id = store
            .create_note(2, 40.0, 70.0, "  remember  ", style(), 1.3)
            .expect("valid style")
            .expect("note created");

        let annotation = &store.get(&id).expect("stored").annotation;
        assert_eq!(annotation.bbox, Bbox::at_point(40.0, 70.0));
        assert_eq!(annotation.text, "remember");
        assert_eq!(annotation.kind, AnnotationKind::Note);
    }

    #[test]
    fn nan_or_out_of_range_opacity_is_refused() {
        let mut store = AnnotationStore::new(key(), 3);

        for opacity in [f32::NAN, -0.1, 1.5] {
            let bad = StyleDefaults { opacity, ..style() };
            assert!(matches!(
                store.create_highlight(selection(1), bad, 1.0),
                Err(StoreError::InvalidOpacity(_))
            ));
            assert!(matches!(
                store.create_note(1, 0.0, 0.0, "n", bad, 1.0),
                Err(StoreError::InvalidOpacity(_))
            ));
        }
        assert!(store.is_empty());
        assert_eq!(store.in_flight(), 0);
    }

    #[test]
    fn non_positive_or_non_finite_capture_scale_is_refused() {
        let mut store = AnnotationStore::new(key(), 3);

        for scale in [0.0, -2.0, f32::NAN, f32::INFINITY] {
            assert!(matches!(
                store.create_highlight(selection(2), style(), scale),
                Err(StoreError::InvalidCaptureScale(_))
            ));
            assert!(matches!(
                store.create_note(1, 0.0, 0.0, "n", style(), scale),
                Err(StoreError::InvalidCaptureScale(_))
            ));
        }
        assert!(store.is_empty());
        assert_eq!(store.in_flight(), 0);
    }

    #[test]
    fn delete_twice_matches_delete_once() {
        let remote = FakeRemote::default();
        let mut store = AnnotationStore::new(key(), 3);
        store.create_highlight(selection(2), style(), 1.0).expect("valid style");
        store.sync(&remote);
        let target = store.records()[0].annotation.id.clone();

        assert!(store.delete(&target));
        let once = (store.snapshot(), store.in_flight());
        assert!(!store.delete(&target));

        assert_eq!((store.snapshot(), store.in_flight()), once);
    }

    #[test]
    fn deleting_unacknowledged_record_never_reaches_remote() {
        let remote = FakeRemote::default();
        let mut store = AnnotationStore::new(key(), 3);
        let ids = store.create_highlight(selection(1), style(), 1.0).expect("valid style");

        store.delete(&ids[0]);
        let report = store.sync(&remote);

        assert_eq!(report, SyncReport::default());
        assert_eq!(remote.calls.get(), 0);
    }

    #[test]
    fn sync_assigns_remote_ids_and_provenance() {
        let remote = FakeRemote::default();
        let mut store = AnnotationStore::new(key(), 3);
        store.create_highlight(selection(2), style(), 1.0).expect("valid style");

        let report = store.sync(&remote);

        assert_eq!(report.saved, 2);
        let ids: Vec<&str> = store.annotations().map(|annotation| annotation.id.as_str()).collect();
        assert_eq!(ids, vec!["r1", "r2"]);
        assert_eq!(store.records()[0].annotation.author.as_deref(), Some("reader"));
        assert!(store.records().iter().all(|record| record.status.is_synced()));
        assert_eq!(store.in_flight(), 0);
    }

    #[test]
    fn transient_failure_is_retried_up_to_max_attempts() {
        let remote = FakeRemote::failing(2);
        let mut store = AnnotationStore::new(key(), 3);
        store.create_note(1, 0.0, 0.0, "n", style(), 1.0).expect("valid style");

        let report = store.sync(&remote);

        assert_eq!(report.saved, 1);
        assert_eq!(remote.calls.get(), 3);
    }

    #[test]
    fn exhausted_save_stays_local_and_is_surfaced() {
        let remote = FakeRemote::failing(10);
        let mut store = AnnotationStore::new(key(), 2);
        let id = store
            .create_note(1, 0.0, 0.0, "n", style(), 1.0)
            .expect("valid style")
            .expect("note created");

        let report = store.sync(&remote);

        assert_eq!(report.failed, 1);
        assert_eq!(store.len(), 1, "no rollback on failure");
        let failed = store.failed();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].id, id);
        assert_eq!(failed[0].attempts, 2);
        assert_eq!(failed[0].operation, SyncOperation::Save);

        remote.fail_next.set(0);
        store.retry(&id).expect("retry queues the save");
        assert_eq!(store.sync(&remote).saved, 1);
        assert!(store.failed().is_empty());
    }

    #[test]
    fn failed_delete_can_be_retried() {
        let remote = FakeRemote::default();
        let mut store = AnnotationStore::new(key(), 1);
        store.create_note(1, 0.0, 0.0, "n", style(), 1.0).expect("valid style");
        store.sync(&remote);
        let id = store.records()[0].annotation.id.clone();

        store.delete(&id);
        remote.fail_next.set(1);
        store.sync(&remote);
        assert_eq!(store.failed()[0].operation, SyncOperation::Delete);

        assert_eq!(store.retry_failed(), 1);
        assert_eq!(store.sync(&remote).deleted, 1);
        assert_eq!(remote.deleted.borrow().as_slice(), &[id]);
    }

    #[test]
    fn retry_rejects_unknown_and_healthy_records() {
        let mut store = AnnotationStore::new(key(), 3);
        let id = store
            .create_note(1, 0.0, 0.0, "n", style(), 1.0)
            .expect("valid style")
            .expect("note created");

        assert!(matches!(store.retry(&id), Err(StoreError::NotFailed(_))));
        assert!(matches!(
            store.retry(&AnnotationId::new("nope")),
            Err(StoreError::UnknownAnnotation(_))
        ));
    }

    #[test]
    fn page_filter_preserves_insertion_order() {
        let mut store = AnnotationStore::new(key(), 3);
        store.create_note(2, 0.0, 0.0, "first", style(), 1.0).expect("valid style");
        store.create_note(1, 0.0, 0.0, "other page", style(), 1.0).expect("valid style");
        store.create_note(2, 0.0, 0.0, "second", style(), 1.0).expect("valid style");

        let texts: Vec<&str> =
            store.for_page(2).map(|annotation| annotation.text.as_str()).collect();
        assert_eq!(texts, vec!["first", "second"]);
    }

    #[test]
    fn pending_changes_survive_restore() {
        let remote = FakeRemote::default();
        let mut store = AnnotationStore::new(key(), 3);
        store.create_note(1, 0.0, 0.0, "kept", style(), 1.0).expect("valid style");
        store.sync(&remote);
        let synced = store.records()[0].annotation.id.clone();
        store.delete(&synced);
        store.create_note(1, 0.0, 0.0, "offline", style(), 1.0).expect("valid style");

        let changes = store.pending_changes();
        assert_eq!(changes.len(), 2);

        let mut reloaded = AnnotationStore::load(&remote, key(), 3).expect("load");
        reloaded.restore(changes);

        let texts: Vec<&str> =
            reloaded.annotations().map(|annotation| annotation.text.as_str()).collect();
        assert_eq!(texts, vec!["offline"]);
        assert_eq!(reloaded.in_flight(), 2);

        let next = reloaded
            .create_note(1, 0.0, 0.0, "fresh", style(), 1.0)
            .expect("valid style")
            .expect("note created");
        assert_eq!(next, AnnotationId::temporary(3));
    }
}
