//! Bounded background media downloads.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chatmirror_core::Store;
use chatmirror_core::models::MediaDescriptor;
use chatmirror_core::{Error, Result};
use chrono::Utc;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::session::Session;

/// One pending download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaJob {
    pub chat_jid: String,
    pub msg_id: String,
}

/// Cheap handle for submitting jobs.
#[derive(Clone)]
pub struct MediaQueue {
    tx: mpsc::Sender<MediaJob>,
    intake: CancellationToken,
}

impl MediaQueue {
    /// Submit a job without blocking. When the queue is full a detached task
    /// waits for capacity, giving up once intake stops.
    pub fn enqueue(&self, job: MediaJob) {
        if job.chat_jid.is_empty() || job.msg_id.is_empty() || self.intake.is_cancelled() {
            return;
        }

        match self.tx.try_send(job) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(job)) => {
                let tx = self.tx.clone();
                let intake = self.intake.clone();
                tokio::spawn(async move {
                    tokio::select! {
                        () = intake.cancelled() => {}
                        res = tx.send(job) => {
                            if res.is_err() {
                                tracing::debug!("Media queue closed before job was accepted");
                            }
                        }
                    }
                });
            }
            Err(mpsc::error::TrySendError::Closed(job)) => {
                tracing::debug!(chat = %job.chat_jid, id = %job.msg_id, "Media queue closed");
            }
        }
    }
}

/// Fixed worker pool draining a bounded job queue.
pub struct MediaCoordinator {
    queue: MediaQueue,
    workers: Vec<JoinHandle<()>>,
}

impl MediaCoordinator {
    /// Start `workers` download workers over a queue of `capacity` jobs.
    /// `cancel` aborts in-flight downloads.
    pub fn start(
        store: Store,
        session: Arc<dyn Session>,
        media_dir: PathBuf,
        workers: usize,
        capacity: usize,
        cancel: CancellationToken,
    ) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let intake = cancel.child_token();
        let ctx = Arc::new(WorkerContext {
            store,
            session,
            media_dir,
        });

        let count = workers.max(1);
        let workers = (0..count)
            .map(|worker| {
                let rx = Arc::clone(&rx);
                let ctx = Arc::clone(&ctx);
                let intake = intake.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move { run_worker(worker, ctx, rx, intake, cancel).await })
            })
            .collect();

        tracing::debug!(workers = count, capacity, "Started media coordinator");

        Self {
            queue: MediaQueue { tx, intake },
            workers,
        }
    }

    pub fn queue(&self) -> MediaQueue {
        self.queue.clone()
    }

    pub fn enqueue(&self, job: MediaJob) {
        self.queue.enqueue(job);
    }

    /// Stop accepting jobs and wait for in-flight downloads. Jobs still
    /// queued are abandoned.
    pub async fn shutdown(self) {
        self.queue.intake.cancel();
        for worker in self.workers {
            if let Err(e) = worker.await {
                tracing::warn!("Media worker ended abnormally: {e}");
            }
        }
    }
}

struct WorkerContext {
    store: Store,
    session: Arc<dyn Session>,
    media_dir: PathBuf,
}

async fn run_worker(
    worker: usize,
    ctx: Arc<WorkerContext>,
    rx: Arc<Mutex<mpsc::Receiver<MediaJob>>>,
    intake: CancellationToken,
    cancel: CancellationToken,
) {
    loop {
        let job = {
            let mut rx = rx.lock().await;
            tokio::select! {
                () = intake.cancelled() => None,
                job = rx.recv() => job,
            }
        };
        let Some(job) = job else {
            break;
        };

        tokio::select! {
            () = cancel.cancelled() => break,
            res = download(&ctx, &job) => {
                match res {
                    Ok(Some(path)) => {
                        tracing::debug!(worker, chat = %job.chat_jid, id = %job.msg_id, path = %path.display(), "Downloaded media");
                    }
                    Ok(None) => {}
                    Err(e) => {
                        tracing::warn!(chat = %job.chat_jid, id = %job.msg_id, "Media download failed: {e}");
                    }
                }
            }
        }
    }
}

async fn download(ctx: &WorkerContext, job: &MediaJob) -> Result<Option<PathBuf>> {
    let Some(info) = ctx
        .store
        .media_download_info(&job.chat_jid, &job.msg_id)
        .await?
    else {
        return Ok(None);
    };
    if !info.needs_download() {
        return Ok(None);
    }
    let media = info
        .media
        .as_ref()
        .ok_or_else(|| Error::NotFound(format!("media for {}", job.msg_id)))?;

    let target = media_path(&ctx.media_dir, &job.chat_jid, &job.msg_id, media);
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    ctx.session.download_media(&info, &target).await?;
    ctx.store
        .mark_media_downloaded(
            &job.chat_jid,
            &job.msg_id,
            &target.display().to_string(),
            Utc::now(),
        )
        .await?;
    Ok(Some(target))
}

/// Deterministic destination `<media_dir>/<chat>/<msg id>.<ext>`.
pub fn media_path(media_dir: &Path, chat_jid: &str, msg_id: &str, media: &MediaDescriptor) -> PathBuf {
    media_dir
        .join(safe_component(chat_jid))
        .join(format!("{}.{}", safe_component(msg_id), extension_for(media)))
}

fn safe_component(value: &str) -> String {
    let cleaned: String = value
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches('.').to_string();
    if cleaned.is_empty() {
        "unknown".to_string()
    } else {
        cleaned
    }
}

/// Extension from the filename, then the MIME type, then the media kind.
fn extension_for(media: &MediaDescriptor) -> String {
    if let Some(ext) = media
        .filename
        .as_deref()
        .and_then(|name| Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .map(|ext| safe_component(&ext.to_lowercase()))
        .filter(|ext| ext != "unknown")
    {
        return ext;
    }

    if let Some(mime) = media.mime_type.as_deref() {
        let essence = mime.split(';').next().unwrap_or_default().trim();
        let known = match essence {
            "image/jpeg" => Some("jpg"),
            "image/png" => Some("png"),
            "image/webp" => Some("webp"),
            "image/gif" => Some("gif"),
            "video/mp4" => Some("mp4"),
            "audio/ogg" => Some("ogg"),
            "audio/mpeg" => Some("mp3"),
            "audio/mp4" => Some("m4a"),
            "application/pdf" => Some("pdf"),
            _ => mime_guess::get_mime_extensions_str(essence).and_then(|exts| exts.first().copied()),
        };
        if let Some(ext) = known {
            return ext.to_string();
        }
    }

    media.kind.default_extension().to_string()
}

#[cfg(test)]
#[path = "media_tests.rs"]
mod tests;
