use export::FileRef;
use std::io;
use std::path::{Path, PathBuf};
use uuid::Uuid;

const DOCUMENT_NAMESPACE: Uuid = Uuid::from_u128(0x7b2c58f1_99c6_5a5c_a6ea_50f9e7f1cc20);

/// Stable document id derived from the file's absolute path, so the same
/// file always maps to the same annotation set.
pub fn document_id_for_path(path: &Path) -> String {
    let absolute = absolute_path(path);
    Uuid::new_v5(&DOCUMENT_NAMESPACE, absolute.to_string_lossy().as_bytes()).to_string()
}

/// Describes a local file the way the upload side names files: the id is the
/// absolute path, the parent its directory.
pub fn local_file_ref(path: &Path) -> io::Result<FileRef> {
    let absolute = path.canonicalize()?;
    let name = absolute
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?;

    Ok(FileRef {
        id: absolute.to_string_lossy().into_owned(),
        name,
        parent: absolute.parent().map(|parent| parent.to_string_lossy().into_owned()),
    })
}

fn absolute_path(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir().map(|cwd| cwd.join(path)).unwrap_or_else(|_| path.to_path_buf())
        }
    })
}
