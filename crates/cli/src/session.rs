use annotations::{AnnotationStore, DocumentKey, SyncReport};
use anyhow::{Context, Result};
use doc_model::Settings;
use std::path::Path;
use storage::{document_id_for_path, Storage};
use tracing::debug;

/// Annotations of one document, backed by the data directory. Changes the
/// directory did not accept are kept aside and replayed on the next run.
pub(crate) struct DocumentSession {
    storage: Storage,
    store: AnnotationStore,
}

impl DocumentSession {
    pub(crate) fn open(
        storage: Storage,
        user: &str,
        file: &Path,
        settings: &Settings,
    ) -> Result<Self> {
        let key = DocumentKey::new(user, document_id_for_path(file));
        let mut store = AnnotationStore::load(&storage, key.clone(), settings.sync_max_attempts)
            .context("failed to load annotations")?;

        let pending = storage.load_pending(&key).context("failed to read unsynced changes")?;
        if !pending.is_empty() {
            debug!(count = pending.len(), "replaying unsynced changes");
            store.restore(pending);
        }

        Ok(Self { storage, store })
    }

    pub(crate) fn store(&self) -> &AnnotationStore {
        &self.store
    }

    pub(crate) fn store_mut(&mut self) -> &mut AnnotationStore {
        &mut self.store
    }

    pub(crate) fn sync(&mut self) -> Result<SyncReport> {
        let report = self.store.sync(&self.storage);
        self.storage
            .save_pending(self.store.key(), &self.store.pending_changes())
            .context("failed to record unsynced changes")?;
        Ok(report)
    }
}
