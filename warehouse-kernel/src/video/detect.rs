//! Optical code detection.

use warehouse_media::draw::Rect;
use warehouse_media::Frame;

/// One decoded code and the four corners of its outline (pixel coordinates)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedCode {
    pub payload: String,
    pub corners: [(i32, i32); 4],
}

impl DetectedCode {
    pub fn bounds(&self) -> Rect {
        let [a, b, c, d] = self.corners;
        Rect::bounding(&[a, b, c, d]).unwrap_or(Rect::new(a.0, a.1, a.0, a.1))
    }
}

pub trait CodeDetector: Send + Sync {
    /// Every code found in `frame`; undecodable candidates are skipped.
    fn detect(&self, frame: &Frame) -> Vec<DetectedCode>;
}

/// QR decoder over the frame's grey levels
#[derive(Debug, Default, Clone, Copy)]
pub struct QrDetector;

impl CodeDetector for QrDetector {
    fn detect(&self, frame: &Frame) -> Vec<DetectedCode> {
        let mut prepared = rqrr::PreparedImage::prepare_from_greyscale(
            frame.width() as usize,
            frame.height() as usize,
            |x, y| frame.luma(x as u32, y as u32),
        );

        prepared
            .detect_grids()
            .into_iter()
            .filter_map(|grid| {
                let corners = [0, 1, 2, 3].map(|i| (grid.bounds[i].x, grid.bounds[i].y));
                match grid.decode() {
                    Ok((_, payload)) => Some(DetectedCode { payload, corners }),
                    Err(e) => {
                        tracing::trace!(error = ?e, "QR candidate not decodable");
                        None
                    }
                }
            })
            .collect()
    }
}
