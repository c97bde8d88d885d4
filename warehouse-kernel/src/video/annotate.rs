//! Detection overlays: outline, label box and resolved product name per code.

use super::detect::{CodeDetector, DetectedCode};
use crate::catalog::SharedProductNameCache;
use std::sync::Arc;
use warehouse_media::draw::{self, BLACK, GREEN};
use warehouse_media::Frame;

const OUTLINE_PX: u32 = 3;
const TEXT_SCALE: u32 = 2;

#[derive(Clone)]
pub struct FrameAnnotator {
    detector: Arc<dyn CodeDetector>,
    cache: SharedProductNameCache,
}

impl FrameAnnotator {
    pub fn new(detector: Arc<dyn CodeDetector>, cache: SharedProductNameCache) -> Self {
        Self { detector, cache }
    }

    pub fn cache(&self) -> &SharedProductNameCache {
        &self.cache
    }

    /// CPU-bound; callers on the runtime should run it on a blocking thread.
    pub fn detect(&self, frame: &Frame) -> Vec<DetectedCode> {
        self.detector.detect(frame)
    }

    /// Resolve every code's display name and draw the overlays.
    pub async fn apply(&self, mut frame: Frame, codes: &[DetectedCode]) -> Frame {
        for code in codes {
            let label = self.cache.resolve(&code.payload).await;
            draw_overlay(&mut frame, code, &label);
        }
        frame
    }
}

/// Green outline on the code's bounding box, with `label` in black on a green tab above it.
pub fn draw_overlay(frame: &mut Frame, code: &DetectedCode, label: &str) {
    let rect = code.bounds();
    draw::draw_rect(frame, rect, GREEN, OUTLINE_PX);

    let (tw, th) = draw::text_size(label, TEXT_SCALE);
    let (tw, th) = (tw as i32, th as i32);
    let (x_min, y_min) = (rect.left, rect.top);
    draw::fill_rect(frame, x_min, y_min - th - 15, x_min + tw + 10, y_min - 5, GREEN);
    // baseline at y_min - 10
    draw::draw_text(frame, x_min + 5, y_min - 10 - th, label, BLACK, TEXT_SCALE);
}
