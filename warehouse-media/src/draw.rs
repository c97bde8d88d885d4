//! Overlay drawing on frames: outlines, filled boxes and a 5x7 bitmap font.
//!
//! All coordinates are signed; anything outside the frame is clipped.

use crate::frame::Frame;
use image::Rgb;

pub const GREEN: Rgb<u8> = Rgb([0, 255, 0]);
pub const BLACK: Rgb<u8> = Rgb([0, 0, 0]);
pub const WHITE: Rgb<u8> = Rgb([255, 255, 255]);
pub const RED: Rgb<u8> = Rgb([255, 0, 0]);

const GLYPH_WIDTH: i32 = 5;
const GLYPH_HEIGHT: i32 = 7;
const GLYPH_ADVANCE: i32 = GLYPH_WIDTH + 1;

/// Axis-aligned rectangle, inclusive on all four edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Rect {
    pub fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left: left.min(right),
            top: top.min(bottom),
            right: left.max(right),
            bottom: top.max(bottom),
        }
    }

    /// Smallest rectangle containing every point; `None` for an empty slice.
    pub fn bounding(points: &[(i32, i32)]) -> Option<Self> {
        let (first, rest) = points.split_first()?;
        let mut rect = Self::new(first.0, first.1, first.0, first.1);
        for &(x, y) in rest {
            rect.left = rect.left.min(x);
            rect.top = rect.top.min(y);
            rect.right = rect.right.max(x);
            rect.bottom = rect.bottom.max(y);
        }
        Some(rect)
    }

    pub fn width(&self) -> i32 {
        self.right - self.left + 1
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top + 1
    }
}

/// Fill the inclusive box `(left, top)..=(right, bottom)`.
pub fn fill_rect(frame: &mut Frame, left: i32, top: i32, right: i32, bottom: i32, color: Rgb<u8>) {
    let max_x = frame.width() as i32 - 1;
    let max_y = frame.height() as i32 - 1;
    let (l, r) = (left.min(right).max(0), left.max(right).min(max_x));
    let (t, b) = (top.min(bottom).max(0), top.max(bottom).min(max_y));
    if l > r || t > b {
        return;
    }

    let image = frame.image_mut();
    for y in t..=b {
        for x in l..=r {
            image.put_pixel(x as u32, y as u32, color);
        }
    }
}

/// Outline centred on the rectangle edges.
pub fn draw_rect(frame: &mut Frame, rect: Rect, color: Rgb<u8>, thickness: u32) {
    let half = (thickness.max(1) / 2) as i32;
    for off in -half..=half {
        let (l, t, r, b) = (
            rect.left + off,
            rect.top + off,
            rect.right - off,
            rect.bottom - off,
        );
        if l > r || t > b {
            continue;
        }
        fill_rect(frame, l, t, r, t, color);
        fill_rect(frame, l, b, r, b, color);
        fill_rect(frame, l, t, l, b, color);
        fill_rect(frame, r, t, r, b, color);
    }
}

/// Pixel size of `text` rendered at `scale`.
pub fn text_size(text: &str, scale: u32) -> (u32, u32) {
    let scale = scale.max(1);
    let chars = text.chars().count() as u32;
    let width = if chars == 0 {
        0
    } else {
        (chars * GLYPH_ADVANCE as u32 - 1) * scale
    };
    (width, GLYPH_HEIGHT as u32 * scale)
}

/// Render `text` with its top-left corner at `(x, y)`. Lowercase is drawn as uppercase.
pub fn draw_text(frame: &mut Frame, x: i32, y: i32, text: &str, color: Rgb<u8>, scale: u32) {
    let scale = scale.max(1) as i32;
    let mut pen_x = x;
    for ch in text.chars().flat_map(char::to_uppercase) {
        let rows = glyph(ch);
        for (row, bits) in rows.iter().enumerate() {
            for col in 0..GLYPH_WIDTH {
                if (bits >> (GLYPH_WIDTH - 1 - col)) & 1 == 1 {
                    let px = pen_x + col * scale;
                    let py = y + row as i32 * scale;
                    fill_rect(frame, px, py, px + scale - 1, py + scale - 1, color);
                }
            }
        }
        pen_x += GLYPH_ADVANCE * scale;
    }
}

fn glyph(ch: char) -> [u8; 7] {
    match ch {
        ' ' => [0; 7],
        'A' => [0b01110, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'B' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10001, 0b10001, 0b11110],
        'C' => [0b01110, 0b10001, 0b10000, 0b10000, 0b10000, 0b10001, 0b01110],
        'D' => [0b11110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b11110],
        'E' => [0b11111, 0b10000, 0b10000, 0b11110, 0b10000, 0b10000, 0b11111],
        'F' => [0b11111, 0b10000, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000],
        'G' => [0b01110, 0b10001, 0b10000, 0b10111, 0b10001, 0b10001, 0b01111],
        'H' => [0b10001, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'I' => [0b01110, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        'J' => [0b00111, 0b00010, 0b00010, 0b00010, 0b00010, 0b10010, 0b01100],
        'K' => [0b10001, 0b10010, 0b10100, 0b11000, 0b10100, 0b10010, 0b10001],
        'L' => [0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b11111],
        'M' => [0b10001, 0b11011, 0b10101, 0b10101, 0b10001, 0b10001, 0b10001],
        'N' => [0b10001, 0b10001, 0b11001, 0b10101, 0b10011, 0b10001, 0b10001],
        'O' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'P' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10000, 0b10000, 0b10000],
        'Q' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10101, 0b10010, 0b01101],
        'R' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10100, 0b10010, 0b10001],
        'S' => [0b01111, 0b10000, 0b10000, 0b01110, 0b00001, 0b00001, 0b11110],
        'T' => [0b11111, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100],
        'U' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'V' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01010, 0b00100],
        'W' => [0b10001, 0b10001, 0b10001, 0b10101, 0b10101, 0b10101, 0b01010],
        'X' => [0b10001, 0b10001, 0b01010, 0b00100, 0b01010, 0b10001, 0b10001],
        'Y' => [0b10001, 0b10001, 0b01010, 0b00100, 0b00100, 0b00100, 0b00100],
        'Z' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b10000, 0b11111],
        '0' => [0b01110, 0b10001, 0b10011, 0b10101, 0b11001, 0b10001, 0b01110],
        '1' => [0b00100, 0b01100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        '2' => [0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b01000, 0b11111],
        '3' => [0b11111, 0b00010, 0b00100, 0b00010, 0b00001, 0b10001, 0b01110],
        '4' => [0b00010, 0b00110, 0b01010, 0b10010, 0b11111, 0b00010, 0b00010],
        '5' => [0b11111, 0b10000, 0b11110, 0b00001, 0b00001, 0b10001, 0b01110],
        '6' => [0b00110, 0b01000, 0b10000, 0b11110, 0b10001, 0b10001, 0b01110],
        '7' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b01000, 0b01000],
        '8' => [0b01110, 0b10001, 0b10001, 0b01110, 0b10001, 0b10001, 0b01110],
        '9' => [0b01110, 0b10001, 0b10001, 0b01111, 0b00001, 0b00010, 0b01100],
        '-' => [0b00000, 0b00000, 0b00000, 0b11111, 0b00000, 0b00000, 0b00000],
        '_' => [0b00000, 0b00000, 0b00000, 0b00000, 0b00000, 0b00000, 0b11111],
        '.' => [0b00000, 0b00000, 0b00000, 0b00000, 0b00000, 0b01100, 0b01100],
        ',' => [0b00000, 0b00000, 0b00000, 0b00000, 0b01100, 0b00100, 0b01000],
        ':' => [0b00000, 0b01100, 0b01100, 0b00000, 0b01100, 0b01100, 0b00000],
        '/' => [0b00001, 0b00001, 0b00010, 0b00100, 0b01000, 0b10000, 0b10000],
        '%' => [0b11000, 0b11001, 0b00010, 0b00100, 0b01000, 0b10011, 0b00011],
        '(' => [0b00010, 0b00100, 0b01000, 0b01000, 0b01000, 0b00100, 0b00010],
        ')' => [0b01000, 0b00100, 0b00010, 0b00010, 0b00010, 0b00100, 0b01000],
        '!' => [0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b00000, 0b00100],
        '#' => [0b01010, 0b01010, 0b11111, 0b01010, 0b11111, 0b01010, 0b01010],
        '+' => [0b00000, 0b00100, 0b00100, 0b11111, 0b00100, 0b00100, 0b00000],
        '=' => [0b00000, 0b00000, 0b11111, 0b00000, 0b11111, 0b00000, 0b00000],
        '\'' => [0b00100, 0b00100, 0b01000, 0b00000, 0b00000, 0b00000, 0b00000],
        _ => [0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b00000, 0b00100],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounding_rect() {
        let rect = Rect::bounding(&[(40, 60), (140, 58), (142, 160), (38, 161)]).unwrap();
        assert_eq!(rect, Rect::new(38, 58, 142, 161));
        assert_eq!(rect.width(), 105);
        assert!(Rect::bounding(&[]).is_none());
    }

    #[test]
    fn test_draw_rect_hits_edges_only() {
        let mut frame = Frame::filled(100, 100, WHITE);
        draw_rect(&mut frame, Rect::new(20, 20, 80, 80), GREEN, 3);
        for (x, y) in [(20, 50), (80, 50), (50, 20), (50, 80), (19, 50), (21, 50)] {
            assert_eq!(frame.pixel(x, y), Some(GREEN), "edge pixel ({x},{y})");
        }
        assert_eq!(frame.pixel(50, 50), Some(WHITE));
        assert_eq!(frame.pixel(17, 50), Some(WHITE));
    }

    #[test]
    fn test_fill_rect_clips_outside_frame() {
        let mut frame = Frame::new(10, 10);
        fill_rect(&mut frame, -5, -5, 2, 2, RED);
        assert_eq!(frame.pixel(0, 0), Some(RED));
        assert_eq!(frame.pixel(2, 2), Some(RED));
        assert_eq!(frame.pixel(3, 3), Some(BLACK));
        fill_rect(&mut frame, 20, 20, 30, 30, RED);
    }

    #[test]
    fn test_text_size_and_render() {
        assert_eq!(text_size("", 2), (0, 14));
        assert_eq!(text_size("AB", 1), (11, 7));
        assert_eq!(text_size("AB", 2), (22, 14));

        let mut frame = Frame::new(40, 20);
        draw_text(&mut frame, 1, 1, "i", WHITE, 1);
        // top bar of the I glyph spans columns 1..=3 of the cell
        assert_eq!(frame.pixel(2, 1), Some(WHITE));
        assert_eq!(frame.pixel(1, 1), Some(BLACK));
        assert_eq!(frame.pixel(3, 4), Some(WHITE));
    }
}
