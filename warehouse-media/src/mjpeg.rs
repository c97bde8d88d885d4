//! Motion-JPEG framing.
//!
//! Incoming camera streams are cut into frames by scanning for the JPEG
//! start-of-image (`FF D8`) and end-of-image (`FF D9`) markers, whatever
//! multipart headers surround them. Outgoing streams use the classic
//! `multipart/x-mixed-replace` layout with a fixed `frame` boundary.

use bytes::{Buf, Bytes, BytesMut};

pub const BOUNDARY: &str = "frame";
pub const CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";
pub const DEFAULT_MAX_BUFFER: usize = 8 * 1024 * 1024;

const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: [u8; 2] = [0xFF, 0xD9];
const PART_HEADER: &[u8] = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n";

/// Wrap one JPEG into a multipart chunk.
pub fn encode_part(jpeg: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(PART_HEADER.len() + jpeg.len() + 2);
    out.extend_from_slice(PART_HEADER);
    out.extend_from_slice(jpeg);
    out.extend_from_slice(b"\r\n");
    out.freeze()
}

/// Incremental JPEG reassembler.
///
/// Bytes before a start marker are dropped. Once inside a frame the buffer grows
/// until the next end marker; if it outgrows `max_len` first, everything is
/// discarded and scanning resumes at the next start marker.
#[derive(Debug)]
pub struct FrameAssembler {
    buf: BytesMut,
    in_frame: bool,
    scanned: usize,
    max_len: usize,
    resyncs: u64,
}

impl FrameAssembler {
    pub fn new(max_len: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            in_frame: false,
            scanned: 0,
            max_len: max_len.max(SOI.len() + EOI.len()),
            resyncs: 0,
        }
    }

    /// Feed one network chunk, returning every frame it completed, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Bytes> {
        self.buf.extend_from_slice(chunk);
        let mut frames = Vec::new();

        loop {
            if !self.in_frame {
                match find_marker(&self.buf, SOI, 0) {
                    Some(start) => {
                        self.buf.advance(start);
                        self.in_frame = true;
                        self.scanned = SOI.len();
                    }
                    None => {
                        // a lone trailing 0xFF may be the first half of the next marker
                        let keep = usize::from(self.buf.last() == Some(&0xFF));
                        let discard = self.buf.len() - keep;
                        self.buf.advance(discard);
                        break;
                    }
                }
            }

            let from = self.scanned.saturating_sub(1).max(SOI.len());
            match find_marker(&self.buf, EOI, from) {
                Some(pos) => {
                    let frame = self.buf.split_to(pos + EOI.len()).freeze();
                    frames.push(frame);
                    self.in_frame = false;
                    self.scanned = 0;
                }
                None => {
                    self.scanned = self.buf.len();
                    break;
                }
            }
        }

        if self.buf.len() > self.max_len {
            tracing::warn!(
                buffered = self.buf.len(),
                max = self.max_len,
                "no frame boundary within buffer cap, resyncing"
            );
            self.reset();
            self.resyncs += 1;
        }

        frames
    }

    /// Drop any partial frame (used when the underlying stream is reopened).
    pub fn reset(&mut self) {
        self.buf.clear();
        self.in_frame = false;
        self.scanned = 0;
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Number of times the buffer cap forced a resync
    pub fn resyncs(&self) -> u64 {
        self.resyncs
    }
}

impl Default for FrameAssembler {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_BUFFER)
    }
}

fn find_marker(haystack: &[u8], marker: [u8; 2], from: usize) -> Option<usize> {
    haystack
        .get(from..)?
        .windows(2)
        .position(|w| w == marker)
        .map(|pos| pos + from)
}
