/// Post-job cleanup
///
/// Runs unconditionally after a job reaches a terminal state and removes,
/// in parallel and best-effort, the uploaded source, any resumable-store
/// sidecar metadata, and the transcoder work directory. A missing file is
/// routine; nothing here may alter the job's terminal state.
use std::io::ErrorKind;
use std::path::Path;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub async fn cleanup_job(upload_path: &Path, upload_id: Uuid, source: &Path, work_dir: &Path) {
    let sidecar = upload_path.join(format!("{}.info", upload_id));

    tokio::join!(
        remove_file(source),
        remove_file(&sidecar),
        remove_dir(work_dir),
    );
}

async fn remove_file(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "Removed file"),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            info!(path = %path.display(), "File already absent")
        }
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove file"),
    }
}

async fn remove_dir(path: &Path) {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => debug!(path = %path.display(), "Removed directory"),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            info!(path = %path.display(), "Directory already absent")
        }
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove directory"),
    }
}
