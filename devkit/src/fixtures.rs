//! Synthetic frames.

use image::Rgb;
use qrcode::{Color, QrCode};
use warehouse_media::Frame;

const QUIET_ZONE: u32 = 4;

/// Single-colour JPEG.
pub fn solid_jpeg(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
    Frame::filled(width, height, Rgb(color))
        .encode_jpeg(90)
        .unwrap_or_default()
}

/// JPEG with a diagonal gradient, so two fixtures of the same size still differ byte-wise.
pub fn gradient_jpeg(width: u32, height: u32, seed: u8) -> Vec<u8> {
    let mut frame = Frame::new(width, height);
    for (x, y, px) in frame.image_mut().enumerate_pixels_mut() {
        let v = ((x + y) as u8).wrapping_add(seed);
        *px = Rgb([v, v.wrapping_mul(3), 255 - v]);
    }
    frame.encode_jpeg(90).unwrap_or_default()
}

/// Side length in pixels of the rendered code for `payload`, quiet zone excluded.
pub fn qr_side(payload: &str, module_px: u32) -> u32 {
    QrCode::new(payload.as_bytes())
        .map(|code| code.width() as u32 * module_px)
        .unwrap_or(0)
}

/// White canvas with a black-on-white QR code whose first module sits at `origin`.
///
/// The quiet zone around the code is kept white; `origin` must leave room for it.
pub fn qr_frame(payload: &str, canvas: (u32, u32), origin: (u32, u32), module_px: u32) -> Frame {
    let mut frame = Frame::filled(canvas.0, canvas.1, Rgb([255, 255, 255]));
    let Ok(code) = QrCode::new(payload.as_bytes()) else {
        return frame;
    };
    debug_assert!(origin.0 >= QUIET_ZONE * module_px && origin.1 >= QUIET_ZONE * module_px);

    let width = code.width() as u32;
    let image = frame.image_mut();
    for (idx, color) in code.to_colors().into_iter().enumerate() {
        if color != Color::Dark {
            continue;
        }
        let mx = idx as u32 % width;
        let my = idx as u32 / width;
        for dy in 0..module_px {
            for dx in 0..module_px {
                let x = origin.0 + mx * module_px + dx;
                let y = origin.1 + my * module_px + dy;
                if x < canvas.0 && y < canvas.1 {
                    image.put_pixel(x, y, Rgb([0, 0, 0]));
                }
            }
        }
    }
    frame
}
