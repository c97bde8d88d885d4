//! Latest-frame slot and per-viewer MJPEG loops.

use async_stream::stream;
use bytes::Bytes;
use futures::Stream;
use parking_lot::Mutex;
use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use warehouse_media::draw::{self, WHITE};
use warehouse_media::mjpeg::encode_part;
use warehouse_media::Frame;

const PLACEHOLDER_SIZE: (u32, u32) = (640, 480);
const PLACEHOLDER_TEXT: &str = "Waiting for camera stream...";

/// Single slot holding the most recent annotated frame, tagged with a sequence number.
#[derive(Debug, Default)]
pub struct FrameSlot {
    latest: Mutex<Option<(u64, Arc<Frame>)>>,
}

impl FrameSlot {
    pub fn publish(&self, frame: Frame) -> u64 {
        let frame = Arc::new(frame);
        let mut latest = self.latest.lock();
        let seq = latest.as_ref().map_or(1, |(seq, _)| seq + 1);
        *latest = Some((seq, frame));
        seq
    }

    pub fn latest(&self) -> Option<(u64, Arc<Frame>)> {
        self.latest.lock().clone()
    }
}

/// 640x480 black frame captioned while no camera frame has arrived yet
pub fn placeholder_frame() -> Frame {
    let (w, h) = PLACEHOLDER_SIZE;
    let mut frame = Frame::new(w, h);
    let (_, th) = draw::text_size(PLACEHOLDER_TEXT, 2);
    draw::draw_text(&mut frame, 100, 240 - th as i32, PLACEHOLDER_TEXT, WHITE, 2);
    frame
}

#[derive(Clone)]
pub struct FrameBroadcaster {
    slot: Arc<FrameSlot>,
    interval: Duration,
    quality: u8,
    placeholder: Bytes,
    viewers: Arc<AtomicUsize>,
    shutdown: CancellationToken,
}

struct ViewerGuard(Arc<AtomicUsize>);

impl ViewerGuard {
    fn enter(count: Arc<AtomicUsize>) -> Self {
        let now = count.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::info!(viewers = now, "viewer connected");
        Self(count)
    }
}

impl Drop for ViewerGuard {
    fn drop(&mut self) {
        let left = self.0.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
        tracing::info!(viewers = left, "viewer disconnected");
    }
}

impl FrameBroadcaster {
    pub fn new(
        slot: Arc<FrameSlot>,
        interval: Duration,
        quality: u8,
        shutdown: CancellationToken,
    ) -> Self {
        let placeholder = match placeholder_frame().encode_jpeg(quality) {
            Ok(jpeg) => encode_part(&jpeg),
            Err(e) => {
                tracing::warn!(error = %e, "placeholder frame could not be encoded");
                Bytes::new()
            }
        };
        Self {
            slot,
            interval,
            quality,
            placeholder,
            viewers: Arc::new(AtomicUsize::new(0)),
            shutdown,
        }
    }

    pub fn viewers(&self) -> usize {
        self.viewers.load(Ordering::SeqCst)
    }

    /// Multipart body for one viewer; ends when the consumer drops it or on shutdown.
    pub fn viewer_stream(&self) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
        let slot = self.slot.clone();
        let period = self.interval;
        let quality = self.quality;
        let placeholder = self.placeholder.clone();
        let shutdown = self.shutdown.clone();
        let guard = ViewerGuard::enter(self.viewers.clone());

        stream! {
            let _guard = guard;
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut last: Option<(u64, Bytes)> = None;

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let part = match slot.latest() {
                    None => placeholder.clone(),
                    Some((seq, frame)) => match &last {
                        Some((last_seq, part)) if *last_seq == seq => part.clone(),
                        _ => match encode_frame(frame, quality).await {
                            Some(part) => {
                                last = Some((seq, part.clone()));
                                part
                            }
                            None => continue,
                        },
                    },
                };
                if part.is_empty() {
                    continue;
                }
                yield Ok(part);
            }
        }
    }
}

async fn encode_frame(frame: Arc<Frame>, quality: u8) -> Option<Bytes> {
    let encoded = tokio::task::spawn_blocking(move || frame.encode_jpeg(quality)).await;
    match encoded {
        Ok(Ok(jpeg)) => Some(encode_part(&jpeg)),
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "frame encode failed");
            None
        }
        Err(e) => {
            tracing::warn!(error = %e, "frame encoder task failed");
            None
        }
    }
}
