//! Frame sources for the camera server.
//!
//! A source hands out one JPEG per call. The synthetic test pattern needs no
//! hardware; the directory source loops over still images, which is how the
//! pipeline is exercised with recorded shelf footage.

use image::Rgb;
use std::path::{Path, PathBuf};
use warehouse_media::draw::{self, Rect, BLACK, GREEN, RED, WHITE};
use warehouse_media::{Frame, MediaError};

#[derive(Debug, thiserror::Error)]
pub enum CameraError {
    #[error("unknown camera source {0:?} (expected \"pattern\" or \"dir:<path>\")")]
    UnknownSource(String),
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("no JPEG files in {0}")]
    EmptyDirectory(PathBuf),
    #[error(transparent)]
    Media(#[from] MediaError),
}

pub trait FrameSource: Send {
    fn describe(&self) -> String;
    /// Next frame, already JPEG-encoded.
    fn next_jpeg(&mut self) -> Result<Vec<u8>, CameraError>;
}

/// Parse `pattern` or `dir:<path>` into a source.
pub fn open_source(spec: &str, size: (u32, u32), quality: u8) -> Result<Box<dyn FrameSource>, CameraError> {
    match spec.split_once(':') {
        _ if spec == "pattern" => Ok(Box::new(TestPattern::new(size, quality))),
        Some(("dir", path)) => Ok(Box::new(DirectorySource::open(Path::new(path))?)),
        _ => Err(CameraError::UnknownSource(spec.to_string())),
    }
}

/// Moving bar with a frame counter
pub struct TestPattern {
    size: (u32, u32),
    quality: u8,
    tick: u64,
}

impl TestPattern {
    pub fn new(size: (u32, u32), quality: u8) -> Self {
        Self { size, quality, tick: 0 }
    }

    fn render(&self) -> Frame {
        let (w, h) = self.size;
        let mut frame = Frame::filled(w, h, Rgb([40, 40, 48]));
        let bar_w = (w / 8).max(1) as i32;
        let x = ((self.tick * 8) % u64::from(w.max(1))) as i32;
        draw::fill_rect(&mut frame, x, 0, x + bar_w - 1, h as i32 - 1, Rgb([70, 90, 160]));
        draw::draw_rect(&mut frame, Rect::new(4, 4, w as i32 - 5, h as i32 - 5), GREEN, 1);
        draw::draw_text(&mut frame, 16, 16, &format!("TEST PATTERN #{}", self.tick), WHITE, 2);
        frame
    }
}

impl FrameSource for TestPattern {
    fn describe(&self) -> String {
        format!("test pattern {}x{}", self.size.0, self.size.1)
    }

    fn next_jpeg(&mut self) -> Result<Vec<u8>, CameraError> {
        let jpeg = self.render().encode_jpeg(self.quality)?;
        self.tick += 1;
        Ok(jpeg)
    }
}

/// Loops over the `.jpg` / `.jpeg` files of a directory in name order
pub struct DirectorySource {
    dir: PathBuf,
    files: Vec<PathBuf>,
    next: usize,
}

impl DirectorySource {
    pub fn open(dir: &Path) -> Result<Self, CameraError> {
        let io_err = |source| CameraError::Io {
            path: dir.to_path_buf(),
            source,
        };
        let mut files = Vec::new();
        for entry in std::fs::read_dir(dir).map_err(io_err)? {
            let path = entry.map_err(io_err)?.path();
            let is_jpeg = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case("jpg") || e.eq_ignore_ascii_case("jpeg"));
            if is_jpeg {
                files.push(path);
            }
        }
        if files.is_empty() {
            return Err(CameraError::EmptyDirectory(dir.to_path_buf()));
        }
        files.sort();
        Ok(Self {
            dir: dir.to_path_buf(),
            files,
            next: 0,
        })
    }
}

impl FrameSource for DirectorySource {
    fn describe(&self) -> String {
        format!("{} ({} files)", self.dir.display(), self.files.len())
    }

    fn next_jpeg(&mut self) -> Result<Vec<u8>, CameraError> {
        let path = &self.files[self.next % self.files.len()];
        self.next = (self.next + 1) % self.files.len();
        std::fs::read(path).map_err(|source| CameraError::Io {
            path: path.clone(),
            source,
        })
    }
}

/// Black 640x480 frame reading "No Camera Found" in red
pub fn no_camera_frame(quality: u8) -> Result<Vec<u8>, MediaError> {
    let mut frame = Frame::filled(640, 480, BLACK);
    let (_, th) = draw::text_size("No Camera Found", 3);
    draw::draw_text(&mut frame, 150, 240 - th as i32, "No Camera Found", RED, 3);
    frame.encode_jpeg(quality)
}
