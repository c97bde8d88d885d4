/*!
# Warehouse DevKit - fixtures for media and device tests

Helpers shared by the workspace test suites:
- synthetic JPEG frames and QR-code frames
- MJPEG byte streams as a camera would send them
- chunk splitters that imitate arbitrary network reads
*/

pub mod fixtures;
pub mod stream;

pub use fixtures::{gradient_jpeg, qr_frame, qr_side, solid_jpeg};
pub use stream::{mjpeg_stream, split_every, split_random};
