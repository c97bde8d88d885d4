/**
 * VIDEO PIPELINE - Camera ingest, QR annotation and MJPEG re-broadcast
 *
 * ROLE : Own the pieces of the pipeline (source, annotator, frame slot,
 * broadcaster) and supervise the single ingest worker: lazy or explicit start,
 * cancellable stop, status snapshot for the HTTP layer.
 */

pub mod annotate;
pub mod broadcast;
pub mod detect;
pub mod ingest;

use crate::catalog::SharedProductNameCache;
use crate::config::VideoConf;
use annotate::FrameAnnotator;
use broadcast::{FrameBroadcaster, FrameSlot};
use detect::CodeDetector;
use ingest::{
    BackoffPolicy, ByteSource, IngestSettings, IngestStatus, SharedIngestStatus, StreamIngestor,
};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

struct Worker {
    cancel: CancellationToken,
    handle: JoinHandle<ingest::IngestorState>,
}

#[derive(Debug, Serialize)]
pub struct VideoStatus {
    pub camera_url: String,
    pub stream_running: bool,
    pub cached_products: usize,
    pub viewers: usize,
    pub ingestor: IngestStatus,
}

pub struct VideoPipeline {
    source: Arc<dyn ByteSource>,
    annotator: FrameAnnotator,
    slot: Arc<FrameSlot>,
    broadcaster: FrameBroadcaster,
    settings: IngestSettings,
    status: SharedIngestStatus,
    worker: Mutex<Option<Worker>>,
    shutdown: CancellationToken,
}

pub type SharedVideoPipeline = Arc<VideoPipeline>;

impl VideoPipeline {
    pub fn new(
        conf: &VideoConf,
        source: Arc<dyn ByteSource>,
        detector: Arc<dyn CodeDetector>,
        cache: SharedProductNameCache,
        shutdown: CancellationToken,
    ) -> Self {
        let slot = Arc::new(FrameSlot::default());
        Self {
            source,
            annotator: FrameAnnotator::new(detector, cache),
            broadcaster: FrameBroadcaster::new(
                slot.clone(),
                conf.frame_interval(),
                conf.jpeg_quality,
                shutdown.clone(),
            ),
            slot,
            settings: IngestSettings {
                backoff: BackoffPolicy::fixed(conf.backoff()),
                read_timeout: std::time::Duration::from_millis(conf.read_timeout_ms.max(1)),
                max_buffer: conf.max_buffer_bytes,
            },
            status: SharedIngestStatus::default(),
            worker: Mutex::new(None),
            shutdown,
        }
    }

    /// Start the ingest worker unless one is already running. Returns true if started.
    pub fn start(&self) -> bool {
        let mut worker = self.worker.lock();
        if worker.as_ref().is_some_and(|w| !w.handle.is_finished()) {
            return false;
        }

        let cancel = self.shutdown.child_token();
        let ingestor = StreamIngestor::new(
            self.source.clone(),
            self.annotator.clone(),
            self.slot.clone(),
            self.settings.clone(),
            self.status.clone(),
        );
        let handle = tokio::spawn(ingestor.run(cancel.clone()));
        *worker = Some(Worker { cancel, handle });
        true
    }

    /// Cancel the worker and wait for it to finish. Returns false if nothing was running.
    pub async fn stop(&self) -> bool {
        let Some(worker) = self.worker.lock().take() else {
            return false;
        };
        worker.cancel.cancel();
        if let Err(e) = worker.handle.await {
            tracing::warn!(error = %e, "video ingestor task failed");
        }
        true
    }

    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .as_ref()
            .is_some_and(|w| !w.handle.is_finished())
    }

    pub fn broadcaster(&self) -> &FrameBroadcaster {
        &self.broadcaster
    }

    pub fn cache(&self) -> &SharedProductNameCache {
        self.annotator.cache()
    }

    pub fn status(&self) -> VideoStatus {
        VideoStatus {
            camera_url: self.source.describe(),
            stream_running: self.is_running(),
            cached_products: self.cache().len(),
            viewers: self.broadcaster.viewers(),
            ingestor: self.status.lock().clone(),
        }
    }
}
