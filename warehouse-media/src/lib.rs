//! Warehouse media primitives
//!
//! Building blocks shared by the kernel video pipeline and the camera source server:
//! - `Frame`: decoded RGB bitmap with JPEG decode/encode
//! - `mjpeg`: start/end-of-image reassembly and multipart part framing
//! - `draw`: outlines, filled boxes and a small bitmap font for overlays

pub mod draw;
pub mod frame;
pub mod mjpeg;

pub use frame::{Frame, MediaError};
pub use mjpeg::FrameAssembler;
