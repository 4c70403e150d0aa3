use doc_model::ExportPolicy;
use export::{FileRef, UploadError, UploadRequest, UploadSink};
use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Upload side backed by a local folder. Exports land next to the original
/// unless an output directory is given.
#[derive(Debug, Default)]
pub struct FolderSink {
    output_dir: Option<PathBuf>,
    written: RefCell<Vec<PathBuf>>,
}

impl FolderSink {
    pub fn new(output_dir: Option<PathBuf>) -> Self {
        Self { output_dir, written: RefCell::new(Vec::new()) }
    }

    fn target_dir(&self, parent: Option<&str>) -> PathBuf {
        self.output_dir
            .clone()
            .or_else(|| parent.map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("."))
    }

    fn was_written(&self, path: &Path) -> bool {
        let path = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        self.written.borrow().iter().any(|written| *written == path)
    }
}

impl UploadSink for FolderSink {
    fn upload(&self, request: UploadRequest) -> Result<FileRef, UploadError> {
        let dir = self.target_dir(request.parent.as_deref());
        fs::create_dir_all(&dir)?;

        let target = match request.policy {
            ExportPolicy::Copy => free_name(&dir, &request.filename),
            ExportPolicy::Replace => dir.join(&request.filename),
        };

        let staging = target.with_extension("pdf.part");
        fs::write(&staging, &request.bytes)?;
        fs::rename(&staging, &target)?;

        let target = target.canonicalize()?;
        info!(path = %target.display(), bytes = request.bytes.len(), "export written");
        self.written.borrow_mut().push(target.clone());

        let name = target
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or(request.filename);
        Ok(FileRef {
            id: target.to_string_lossy().into_owned(),
            name,
            parent: target.parent().map(|parent| parent.to_string_lossy().into_owned()),
        })
    }

    /// Deleting a path this sink just wrote is a no-op: a replace that lands
    /// on the original's own path has already overwritten it.
    fn delete(&self, file: &FileRef) -> Result<(), UploadError> {
        let path = Path::new(&file.id);
        if self.was_written(path) {
            debug!(path = %path.display(), "original was overwritten in place");
            return Ok(());
        }
        if !path.exists() {
            return Err(UploadError::NotFound(file.id.clone()));
        }

        fs::remove_file(path)?;
        info!(path = %path.display(), "original removed");
        Ok(())
    }
}

/// `name`, or `stem (2).ext`, `stem (3).ext`, ... if taken.
fn free_name(dir: &Path, name: &str) -> PathBuf {
    let candidate = dir.join(name);
    if !candidate.exists() {
        return candidate;
    }

    let path = Path::new(name);
    let stem = path.file_stem().map(|stem| stem.to_string_lossy().into_owned()).unwrap_or_default();
    let extension =
        path.extension().map(|ext| format!(".{}", ext.to_string_lossy())).unwrap_or_default();

    (2..)
        .map(|n| dir.join(format!("{stem} ({n}){extension}")))
        .find(|candidate| !candidate.exists())
        .unwrap_or(candidate)
}
