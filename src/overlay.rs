use crate::error::Result;
use crate::frame::Frame;
use crate::geometry::Estimate;
use crate::ranker::Candidate;
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_cross_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;
use std::path::{Path, PathBuf};
use tracing::debug;

const BOX_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const CENTER_COLOR: Rgb<u8> = Rgb([255, 255, 0]);
const AIM_COLOR: Rgb<u8> = Rgb([0, 160, 255]);

/// Copy of the frame with candidate boxes and their centers drawn on. A valid
/// estimate also gets an aim line at the x-center it was computed from, the
/// midpoint of all candidates in dual mode.
pub fn annotate(frame: &Frame, candidates: &[Candidate], estimate: &Estimate) -> RgbImage {
    let mut canvas = frame.image.clone();

    if estimate.valid && !candidates.is_empty() {
        let aim_x = candidates.iter().map(|c| c.bbox.center_x()).sum::<f64>() / candidates.len() as f64;
        let x = aim_x as u32;
        if x < canvas.width() {
            for y in 0..canvas.height() {
                canvas.put_pixel(x, y, AIM_COLOR);
            }
        }
    }

    for candidate in candidates {
        let bbox = candidate.bbox;
        if bbox.width <= 0 || bbox.height <= 0 {
            continue;
        }
        let rect = Rect::at(bbox.x, bbox.y).of_size(bbox.width as u32, bbox.height as u32);
        draw_hollow_rect_mut(&mut canvas, rect, BOX_COLOR);
        draw_cross_mut(
            &mut canvas,
            CENTER_COLOR,
            bbox.center_x() as i32,
            bbox.center_y() as i32,
        );
    }

    canvas
}

/// Writes every Nth annotated frame into a directory.
#[derive(Debug, Clone)]
pub struct OverlayWriter {
    dir: PathBuf,
    every: u64,
}

impl OverlayWriter {
    pub fn new<P: AsRef<Path>>(dir: P, every: u64) -> Result<Self> {
        std::fs::create_dir_all(dir.as_ref())?;
        Ok(Self {
            dir: dir.as_ref().to_path_buf(),
            every: every.max(1),
        })
    }

    pub fn wants(&self, frame_number: u64) -> bool {
        frame_number % self.every == 0
    }

    pub fn write(&self, frame_number: u64, image: &RgbImage) -> Result<PathBuf> {
        let path = self.dir.join(format!("frame_{:06}.png", frame_number));
        image.save(&path)?;
        debug!("Wrote overlay {}", path.display());
        Ok(path)
    }
}
