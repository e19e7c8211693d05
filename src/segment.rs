use crate::config::ThresholdConfig;
use crate::frame::{Frame, Mask};
use image::{GrayImage, Luma, Rgb};
use tracing::debug;

/// 8-bit HSV pixel: hue in 0..180 (degrees halved), saturation and value in 0..=255.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hsv {
    pub h: u8,
    pub s: u8,
    pub v: u8,
}

impl Hsv {
    pub fn from_rgb(pixel: &Rgb<u8>) -> Self {
        let [r, g, b] = pixel.0;
        let (rf, gf, bf) = (r as f32, g as f32, b as f32);
        let max = r.max(g).max(b);
        let min = r.min(g).min(b);
        let delta = (max - min) as f32;

        let s = if max == 0 {
            0
        } else {
            (255.0 * delta / max as f32).round() as u8
        };

        let h = if delta == 0.0 {
            0.0
        } else if max == r {
            60.0 * (gf - bf) / delta
        } else if max == g {
            120.0 + 60.0 * (bf - rf) / delta
        } else {
            240.0 + 60.0 * (rf - gf) / delta
        };
        let h = if h < 0.0 { h + 360.0 } else { h };
        let h = (h / 2.0).round() as u16 % 180;

        Self { h: h as u8, s, v: max }
    }

    fn within(&self, lower: &[u8; 3], upper: &[u8; 3]) -> bool {
        (lower[0]..=upper[0]).contains(&self.h)
            && (lower[1]..=upper[1]).contains(&self.s)
            && (lower[2]..=upper[2]).contains(&self.v)
    }
}

/// Marks every pixel whose HSV value falls inside an inclusive range.
#[derive(Debug, Clone)]
pub struct ColorSegmenter {
    lower: [u8; 3],
    upper: [u8; 3],
}

impl ColorSegmenter {
    pub fn new(lower: [u8; 3], upper: [u8; 3]) -> Self {
        Self { lower, upper }
    }

    pub fn from_config(config: &ThresholdConfig) -> Self {
        Self::new(config.lower, config.upper)
    }

    pub fn segment(&self, frame: &Frame) -> Mask {
        let image = &frame.image;
        let mask = GrayImage::from_fn(image.width(), image.height(), |x, y| {
            if Hsv::from_rgb(image.get_pixel(x, y)).within(&self.lower, &self.upper) {
                Luma([Mask::ON])
            } else {
                Luma([0])
            }
        });
        let mask = Mask { image: mask };
        debug!("Segmented {} matching pixels", mask.count_on());
        mask
    }
}
