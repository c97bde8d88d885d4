/**
 * STREAM INGESTOR - Pull the camera's MJPEG stream and feed the frame slot
 *
 * ROLE : Open the source, cut the byte stream into JPEGs, decode + detect on a
 * blocking thread, resolve names, publish the annotated frame. Every cycle ends
 * with a typed outcome; the backoff policy decides whether and when to reconnect.
 *
 * STATES : idle -> connecting -> streaming -> backoff -> connecting ...
 *          plus stopped (cancelled) and failed (fatal source error).
 */

use super::annotate::FrameAnnotator;
use super::broadcast::FrameSlot;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use parking_lot::Mutex;
use reqwest::StatusCode;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use warehouse_media::{Frame, FrameAssembler};

#[derive(Debug, Clone, thiserror::Error)]
pub enum IngestError {
    #[error("invalid source URL {0}")]
    BadUrl(String),
    #[error("cannot reach camera source: {0}")]
    Connect(String),
    #[error("camera source answered {0}")]
    Status(StatusCode),
    #[error("stream read failed: {0}")]
    Read(String),
    #[error("no data from camera source for {0:?}")]
    Stalled(Duration),
}

impl IngestError {
    /// Faults that reconnecting cannot fix
    pub fn is_fatal(&self) -> bool {
        match self {
            IngestError::BadUrl(_) => true,
            IngestError::Status(code) => {
                code.is_client_error()
                    && *code != StatusCode::REQUEST_TIMEOUT
                    && *code != StatusCode::TOO_MANY_REQUESTS
            }
            _ => false,
        }
    }
}

pub type ByteStream = BoxStream<'static, Result<Bytes, IngestError>>;

#[async_trait]
pub trait ByteSource: Send + Sync {
    fn describe(&self) -> String;
    async fn open(&self) -> Result<ByteStream, IngestError>;
}

/// Camera reachable over HTTP (multipart MJPEG or any byte stream of JPEGs)
pub struct HttpSource {
    client: reqwest::Client,
    url: reqwest::Url,
}

impl HttpSource {
    pub fn new(url: &str, connect_timeout: Duration) -> Result<Self, IngestError> {
        let url = reqwest::Url::parse(url).map_err(|_| IngestError::BadUrl(url.to_string()))?;
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| IngestError::Connect(e.to_string()))?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl ByteSource for HttpSource {
    fn describe(&self) -> String {
        self.url.to_string()
    }

    async fn open(&self) -> Result<ByteStream, IngestError> {
        let response = self
            .client
            .get(self.url.clone())
            .send()
            .await
            .map_err(|e| IngestError::Connect(e.to_string()))?;
        if !response.status().is_success() {
            return Err(IngestError::Status(response.status()));
        }
        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| IngestError::Read(e.to_string())))
            .boxed())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestorState {
    Idle,
    Connecting,
    Streaming,
    Backoff,
    Stopped,
    Failed,
}

impl IngestorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestorState::Idle => "idle",
            IngestorState::Connecting => "connecting",
            IngestorState::Streaming => "streaming",
            IngestorState::Backoff => "backoff",
            IngestorState::Stopped => "stopped",
            IngestorState::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestStatus {
    pub state: IngestorState,
    pub frames_published: u64,
    pub frames_dropped: u64,
    pub reconnects: u64,
    pub resyncs: u64,
    pub last_error: Option<String>,
}

impl Default for IngestStatus {
    fn default() -> Self {
        Self {
            state: IngestorState::Idle,
            frames_published: 0,
            frames_dropped: 0,
            reconnects: 0,
            resyncs: 0,
            last_error: None,
        }
    }
}

pub type SharedIngestStatus = Arc<Mutex<IngestStatus>>;

/// How one connect-and-stream attempt ended
#[derive(Debug)]
pub enum CycleOutcome {
    Ended,
    Transient(IngestError),
    Fatal(IngestError),
    Cancelled,
}

/// Fixed-delay reconnect policy
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub delay: Duration,
}

impl BackoffPolicy {
    pub fn fixed(delay: Duration) -> Self {
        Self { delay }
    }

    /// Delay before the next attempt, `None` when the worker must stop.
    pub fn next_delay(&self, outcome: &CycleOutcome) -> Option<Duration> {
        match outcome {
            CycleOutcome::Ended | CycleOutcome::Transient(_) => Some(self.delay),
            CycleOutcome::Fatal(_) | CycleOutcome::Cancelled => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IngestSettings {
    pub backoff: BackoffPolicy,
    pub read_timeout: Duration,
    pub max_buffer: usize,
}

pub struct StreamIngestor {
    source: Arc<dyn ByteSource>,
    annotator: FrameAnnotator,
    slot: Arc<FrameSlot>,
    settings: IngestSettings,
    status: SharedIngestStatus,
}

impl StreamIngestor {
    pub fn new(
        source: Arc<dyn ByteSource>,
        annotator: FrameAnnotator,
        slot: Arc<FrameSlot>,
        settings: IngestSettings,
        status: SharedIngestStatus,
    ) -> Self {
        Self {
            source,
            annotator,
            slot,
            settings,
            status,
        }
    }

    fn set_state(&self, state: IngestorState) {
        self.status.lock().state = state;
    }

    /// Run until cancelled or a fatal fault; returns the final state.
    pub async fn run(self, cancel: CancellationToken) -> IngestorState {
        let source = self.source.describe();
        tracing::info!(%source, "video ingestor started");

        loop {
            if cancel.is_cancelled() {
                break;
            }
            self.set_state(IngestorState::Connecting);
            let outcome = self.run_cycle(&cancel).await;

            match &outcome {
                CycleOutcome::Ended => tracing::info!(%source, "camera stream ended"),
                CycleOutcome::Transient(e) => {
                    tracing::warn!(%source, error = %e, "camera stream interrupted");
                    self.status.lock().last_error = Some(e.to_string());
                }
                CycleOutcome::Fatal(e) => {
                    tracing::error!(%source, error = %e, "camera source unusable, ingestor giving up");
                    let mut status = self.status.lock();
                    status.last_error = Some(e.to_string());
                    status.state = IngestorState::Failed;
                    return IngestorState::Failed;
                }
                CycleOutcome::Cancelled => break,
            }

            let Some(delay) = self.settings.backoff.next_delay(&outcome) else {
                break;
            };
            {
                let mut status = self.status.lock();
                status.state = IngestorState::Backoff;
                status.reconnects += 1;
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.set_state(IngestorState::Stopped);
        tracing::info!(%source, "video ingestor stopped");
        IngestorState::Stopped
    }

    async fn run_cycle(&self, cancel: &CancellationToken) -> CycleOutcome {
        let opened = tokio::select! {
            _ = cancel.cancelled() => return CycleOutcome::Cancelled,
            opened = self.source.open() => opened,
        };
        let mut stream = match opened {
            Ok(stream) => stream,
            Err(e) if e.is_fatal() => return CycleOutcome::Fatal(e),
            Err(e) => return CycleOutcome::Transient(e),
        };

        self.set_state(IngestorState::Streaming);
        tracing::info!(source = %self.source.describe(), "camera stream open");
        let mut assembler = FrameAssembler::new(self.settings.max_buffer);

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return CycleOutcome::Cancelled,
                next = tokio::time::timeout(self.settings.read_timeout, stream.next()) => next,
            };

            let chunk = match next {
                Err(_) => return CycleOutcome::Transient(IngestError::Stalled(self.settings.read_timeout)),
                Ok(None) => return CycleOutcome::Ended,
                Ok(Some(Err(e))) => return CycleOutcome::Transient(e),
                Ok(Some(Ok(chunk))) => chunk,
            };

            let resyncs_before = assembler.resyncs();
            for jpeg in assembler.push(&chunk) {
                self.process(jpeg).await;
            }
            let resynced = assembler.resyncs() - resyncs_before;
            if resynced > 0 {
                self.status.lock().resyncs += resynced;
            }
        }
    }

    async fn process(&self, jpeg: Bytes) {
        let annotator = self.annotator.clone();
        let decoded = tokio::task::spawn_blocking(move || {
            let frame = Frame::decode_jpeg(&jpeg)?;
            let codes = annotator.detect(&frame);
            Ok::<_, warehouse_media::MediaError>((frame, codes))
        })
        .await;

        match decoded {
            Ok(Ok((frame, codes))) => {
                let annotated = self.annotator.apply(frame, &codes).await;
                self.slot.publish(annotated);
                self.status.lock().frames_published += 1;
            }
            Ok(Err(e)) => {
                tracing::debug!(error = %e, "dropping undecodable frame");
                self.status.lock().frames_dropped += 1;
            }
            Err(e) => {
                tracing::warn!(error = %e, "frame worker failed");
                self.status.lock().frames_dropped += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ProductNameCache, StaticCatalog};
    use crate::video::detect::{CodeDetector, DetectedCode};
    use std::collections::VecDeque;
    use warehouse_devkit::{gradient_jpeg, mjpeg_stream, split_random};

    struct NoCodes;

    impl CodeDetector for NoCodes {
        fn detect(&self, _frame: &Frame) -> Vec<DetectedCode> {
            Vec::new()
        }
    }

    /// Serves a scripted sequence of open() results
    struct ScriptedSource {
        opens: Mutex<VecDeque<Result<Vec<Bytes>, IngestError>>>,
        calls: std::sync::atomic::AtomicUsize,
    }

    impl ScriptedSource {
        fn new(script: Vec<Result<Vec<Bytes>, IngestError>>) -> Self {
            Self {
                opens: Mutex::new(script.into()),
                calls: Default::default(),
            }
        }
    }

    #[async_trait]
    impl ByteSource for ScriptedSource {
        fn describe(&self) -> String {
            "scripted".into()
        }

        async fn open(&self) -> Result<ByteStream, IngestError> {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            let next = self.opens.lock().pop_front();
            match next {
                Some(Ok(chunks)) => Ok(futures::stream::iter(chunks.into_iter().map(Ok)).boxed()),
                Some(Err(e)) => Err(e),
                // script exhausted: a stream that never yields
                None => Ok(futures::stream::pending().boxed()),
            }
        }
    }

    fn ingestor(source: Arc<dyn ByteSource>, backoff_ms: u64) -> (StreamIngestor, Arc<FrameSlot>, SharedIngestStatus) {
        let cache = Arc::new(ProductNameCache::new(Arc::new(StaticCatalog::default())));
        let annotator = FrameAnnotator::new(Arc::new(NoCodes), cache);
        let slot = Arc::new(FrameSlot::default());
        let status = SharedIngestStatus::default();
        let settings = IngestSettings {
            backoff: BackoffPolicy::fixed(Duration::from_millis(backoff_ms)),
            read_timeout: Duration::from_secs(5),
            max_buffer: 1 << 20,
        };
        (
            StreamIngestor::new(source, annotator, slot.clone(), settings, status.clone()),
            slot,
            status,
        )
    }

    async fn wait_for(status: &SharedIngestStatus, pred: impl Fn(&IngestStatus) -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !pred(&*status.lock()) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("ingestor status condition not reached");
    }

    #[test]
    fn test_fatal_classification() {
        assert!(IngestError::Status(StatusCode::NOT_FOUND).is_fatal());
        assert!(!IngestError::Status(StatusCode::TOO_MANY_REQUESTS).is_fatal());
        assert!(!IngestError::Status(StatusCode::SERVICE_UNAVAILABLE).is_fatal());
        assert!(!IngestError::Connect("refused".into()).is_fatal());
        assert!(HttpSource::new("::nope::", Duration::from_secs(1)).is_err());
    }

    #[test]
    fn test_backoff_policy() {
        let policy = BackoffPolicy::fixed(Duration::from_secs(2));
        assert_eq!(policy.next_delay(&CycleOutcome::Ended), Some(Duration::from_secs(2)));
        assert_eq!(
            policy.next_delay(&CycleOutcome::Transient(IngestError::Read("reset".into()))),
            Some(Duration::from_secs(2))
        );
        assert_eq!(policy.next_delay(&CycleOutcome::Cancelled), None);
        assert_eq!(
            policy.next_delay(&CycleOutcome::Fatal(IngestError::BadUrl("x".into()))),
            None
        );
    }

    #[tokio::test]
    async fn test_frames_published_across_reconnect() {
        let a = gradient_jpeg(48, 32, 0);
        let b = gradient_jpeg(48, 32, 120);
        let stream = mjpeg_stream(&[a.clone(), b.clone()]);
        let source = Arc::new(ScriptedSource::new(vec![
            Err(IngestError::Connect("refused".into())),
            Ok(split_random(&stream, 7, 97)),
        ]));
        let (ingestor, slot, status) = ingestor(source.clone(), 10);

        let cancel = CancellationToken::new();
        let worker = tokio::spawn(ingestor.run(cancel.clone()));

        wait_for(&status, |s| s.frames_published == 2).await;
        let (seq, frame) = slot.latest().unwrap();
        assert_eq!(seq, 2);
        assert_eq!((frame.width(), frame.height()), (48, 32));
        assert!(status.lock().reconnects >= 1);

        cancel.cancel();
        assert_eq!(worker.await.unwrap(), IngestorState::Stopped);
        assert_eq!(status.lock().state, IngestorState::Stopped);
        assert!(source.calls.load(std::sync::atomic::Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_undecodable_frame_is_dropped() {
        let mut stream = mjpeg_stream(&[vec![0xFF, 0xD8, 0x01, 0x02, 0xFF, 0xD9]]);
        stream.extend_from_slice(&mjpeg_stream(&[gradient_jpeg(16, 16, 3)]));
        let source = Arc::new(ScriptedSource::new(vec![Ok(vec![Bytes::from(stream)])]));
        let (ingestor, slot, status) = ingestor(source, 10);

        let cancel = CancellationToken::new();
        let worker = tokio::spawn(ingestor.run(cancel.clone()));
        wait_for(&status, |s| s.frames_published == 1 && s.frames_dropped == 1).await;
        assert_eq!(slot.latest().unwrap().0, 1);

        cancel.cancel();
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn test_fatal_status_stops_worker() {
        let source = Arc::new(ScriptedSource::new(vec![Err(IngestError::Status(StatusCode::NOT_FOUND))]));
        let (ingestor, slot, status) = ingestor(source, 10);
        let state = ingestor.run(CancellationToken::new()).await;
        assert_eq!(state, IngestorState::Failed);
        assert_eq!(status.lock().state, IngestorState::Failed);
        assert!(status.lock().last_error.as_deref().unwrap_or_default().contains("404"));
        assert!(slot.latest().is_none());
    }

    #[tokio::test]
    async fn test_cancel_during_backoff() {
        let source = Arc::new(ScriptedSource::new(vec![Err(IngestError::Connect("refused".into()))]));
        let (ingestor, _slot, status) = ingestor(source, 60_000);
        let cancel = CancellationToken::new();
        let worker = tokio::spawn(ingestor.run(cancel.clone()));

        wait_for(&status, |s| s.state == IngestorState::Backoff).await;
        cancel.cancel();
        let state = tokio::time::timeout(Duration::from_secs(2), worker).await.unwrap().unwrap();
        assert_eq!(state, IngestorState::Stopped);
    }
}
