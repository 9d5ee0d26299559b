use std::{
    io,
    path::{Path, PathBuf},
};

use axum::body::Bytes;
use tracing::{debug, warn};
use uuid::Uuid;

const MAX_EXTENSION_LEN: usize = 16;

/// An uploaded image on disk. The file is deleted when the value is dropped,
/// whichever way the request ends.
#[derive(Debug)]
pub struct UploadedFile {
    path: PathBuf,
}

impl UploadedFile {
    /// Writes `bytes` under `dir` as `<uuid>.<ext>`, keeping only a short
    /// alphanumeric extension from `filename`.
    ///
    /// The guard moves into the blocking task before the write starts, so if
    /// the caller goes away mid-write the finished file is still removed when
    /// the task's output is dropped.
    pub async fn save(dir: &Path, filename: &str, bytes: Bytes) -> io::Result<Self> {
        let upload = UploadedFile {
            path: dir.join(stored_name(filename)),
        };
        let upload = tokio::task::spawn_blocking(move || {
            std::fs::write(&upload.path, &bytes)?;
            debug!(path = %upload.path.display(), size = bytes.len(), "Saved uploaded file");
            Ok::<_, io::Error>(upload)
        })
        .await
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))??;
        Ok(upload)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for UploadedFile {
    // A single unlink; cheap enough to run on the runtime thread.
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Removed uploaded file"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                path = %self.path.display(),
                error = %e,
                "Failed to remove uploaded file"
            ),
        }
    }
}

fn stored_name(filename: &str) -> String {
    let extension = Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| ext.len() <= MAX_EXTENSION_LEN)
        .filter(|ext| ext.chars().all(|c| c.is_ascii_alphanumeric()));

    match extension {
        Some(ext) => format!("{}.{}", Uuid::new_v4(), ext.to_ascii_lowercase()),
        None => Uuid::new_v4().to_string(),
    }
}
