use crate::{check_version, read_json, write_json, Storage, StorageError};
use annotations::{AnnotationRemote, DocumentKey, PendingChange, RemoteError};
use doc_model::{Annotation, AnnotationId, SaveReceipt};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, instrument};
use uuid::Uuid;

const ANNOTATIONS_SCHEMA_VERSION: u32 = 1;
const PENDING_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct AnnotationsEnvelope {
    version: u32,
    annotations: Vec<Annotation>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PendingEnvelope {
    version: u32,
    changes: Vec<PendingChange>,
}

impl Storage {
    pub fn annotations_path(&self, user_id: &str, file_id: &str) -> PathBuf {
        self.root
            .join("annotations")
            .join(path_segment(user_id))
            .join(format!("{}.json", path_segment(file_id)))
    }

    pub fn pending_path(&self, key: &DocumentKey) -> PathBuf {
        self.root
            .join("pending")
            .join(path_segment(&key.user_id))
            .join(format!("{}.json", path_segment(&key.file_id)))
    }

    pub fn read_annotations(
        &self,
        user_id: &str,
        file_id: &str,
    ) -> Result<Vec<Annotation>, StorageError> {
        let path = self.annotations_path(user_id, file_id);
        match read_json::<AnnotationsEnvelope>(&path)? {
            Some(envelope) => {
                check_version(&path, envelope.version, ANNOTATIONS_SCHEMA_VERSION)?;
                Ok(envelope.annotations)
            }
            None => Ok(Vec::new()),
        }
    }

    fn write_annotations(
        &self,
        user_id: &str,
        file_id: &str,
        annotations: Vec<Annotation>,
    ) -> Result<(), StorageError> {
        let envelope = AnnotationsEnvelope { version: ANNOTATIONS_SCHEMA_VERSION, annotations };
        write_json(&self.annotations_path(user_id, file_id), &envelope)
    }

    /// Unsynced changes left over from an earlier run.
    pub fn load_pending(&self, key: &DocumentKey) -> Result<Vec<PendingChange>, StorageError> {
        let path = self.pending_path(key);
        match read_json::<PendingEnvelope>(&path)? {
            Some(envelope) => {
                check_version(&path, envelope.version, PENDING_SCHEMA_VERSION)?;
                Ok(envelope.changes)
            }
            None => Ok(Vec::new()),
        }
    }

    /// Replaces the stored pending changes. An empty list removes the file.
    pub fn save_pending(
        &self,
        key: &DocumentKey,
        changes: &[PendingChange],
    ) -> Result<(), StorageError> {
        let path = self.pending_path(key);
        if changes.is_empty() {
            if path.exists() {
                fs::remove_file(path)?;
            }
            return Ok(());
        }

        let envelope =
            PendingEnvelope { version: PENDING_SCHEMA_VERSION, changes: changes.to_vec() };
        write_json(&path, &envelope)
    }
}

/// The data directory doubles as the persistence side for annotations. Saves
/// of temporary records are assigned a random permanent id; saves of known
/// ids update the record in place.
impl AnnotationRemote for Storage {
    fn load_annotations(
        &self,
        user_id: &str,
        file_id: &str,
    ) -> Result<Vec<Annotation>, RemoteError> {
        self.read_annotations(user_id, file_id).map_err(backend)
    }

    #[instrument(skip(self, annotation), fields(annotation_id = %annotation.id))]
    fn save_annotation(
        &self,
        user_id: &str,
        file_id: &str,
        annotation: &Annotation,
    ) -> Result<SaveReceipt, RemoteError> {
        let mut annotations = self.read_annotations(user_id, file_id).map_err(backend)?;
        let now = unix_now();

        let receipt = match annotations.iter_mut().find(|existing| existing.id == annotation.id) {
            Some(existing) if !annotation.id.is_temporary() => {
                let created_at = existing.created_at.or(Some(now));
                *existing = Annotation { created_at, updated_at: Some(now), ..annotation.clone() };
                SaveReceipt {
                    id: existing.id.clone(),
                    author: existing.author.clone(),
                    created_at,
                    updated_at: Some(now),
                }
            }
            _ => {
                let receipt = SaveReceipt {
                    id: AnnotationId::new(Uuid::new_v4().to_string()),
                    author: annotation.author.clone().or_else(|| Some(user_id.to_owned())),
                    created_at: Some(now),
                    updated_at: Some(now),
                };
                annotations.push(Annotation {
                    id: receipt.id.clone(),
                    author: receipt.author.clone(),
                    created_at: receipt.created_at,
                    updated_at: receipt.updated_at,
                    ..annotation.clone()
                });
                receipt
            }
        };

        self.write_annotations(user_id, file_id, annotations).map_err(backend)?;
        debug!(assigned = %receipt.id, "annotation stored");
        Ok(receipt)
    }

    fn delete_annotation(
        &self,
        user_id: &str,
        file_id: &str,
        id: &AnnotationId,
    ) -> Result<(), RemoteError> {
        if id.is_temporary() {
            return Err(RemoteError::Temporary(id.clone()));
        }

        let mut annotations = self.read_annotations(user_id, file_id).map_err(backend)?;
        let before = annotations.len();
        annotations.retain(|annotation| annotation.id != *id);
        if annotations.len() == before {
            return Err(RemoteError::NotFound(id.clone()));
        }

        self.write_annotations(user_id, file_id, annotations).map_err(backend)
    }
}

fn backend(err: StorageError) -> RemoteError {
    match err {
        StorageError::Io(io) => RemoteError::Unavailable(io.to_string()),
        other => RemoteError::Backend(other.to_string()),
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as i64)
        .unwrap_or_default()
}

/// Keeps ids from escaping their directory.
fn path_segment(id: &str) -> String {
    let cleaned: String = id
        .chars()
        .map(|ch| if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' { ch } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "_".to_owned()
    } else {
        cleaned
    }
}
