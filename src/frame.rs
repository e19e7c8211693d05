use image::{GrayImage, RgbImage};
use std::time::SystemTime;

/// One captured RGB image. Owned by the pipeline for a single iteration.
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: RgbImage,
    pub captured_at: SystemTime,
}

impl Frame {
    pub fn new(image: RgbImage) -> Self {
        Self {
            image,
            captured_at: SystemTime::now(),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Binary classification of a frame: 255 where the target color matched, 0 elsewhere.
#[derive(Debug, Clone)]
pub struct Mask {
    pub image: GrayImage,
}

impl Mask {
    pub const ON: u8 = 255;

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn count_on(&self) -> usize {
        self.image.pixels().filter(|p| p[0] != 0).count()
    }

    pub fn is_empty(&self) -> bool {
        self.image.pixels().all(|p| p[0] == 0)
    }
}
