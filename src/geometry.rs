use crate::config::{AngleModel, GeometryConfig, TargetMode};
use crate::ranker::Candidate;
use std::time::SystemTime;
use tracing::debug;

/// Bearing and range to the target as seen in one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Estimate {
    pub angle_degrees: f64,
    pub range_mm: f64,
    pub valid: bool,
    pub timestamp: SystemTime,
}

impl Estimate {
    pub const NO_TARGET_ANGLE: f64 = 0.0;
    pub const NO_TARGET_RANGE: f64 = -1.0;

    pub fn new(angle_degrees: f64, range_mm: f64, timestamp: SystemTime) -> Self {
        Self {
            angle_degrees,
            range_mm,
            valid: true,
            timestamp,
        }
    }

    /// No usable target this frame.
    pub fn invalid(timestamp: SystemTime) -> Self {
        Self {
            angle_degrees: Self::NO_TARGET_ANGLE,
            range_mm: Self::NO_TARGET_RANGE,
            valid: false,
            timestamp,
        }
    }
}

impl Default for Estimate {
    fn default() -> Self {
        Self::invalid(SystemTime::UNIX_EPOCH)
    }
}

/// Turns ranked candidates into an [`Estimate`].
#[derive(Debug, Clone)]
pub struct GeometryEstimator {
    mode: TargetMode,
    angle_model: AngleModel,
    horizontal_fov_deg: f64,
    vertical_fov_deg: f64,
    focal_length_px: f64,
    target_height_mm: f64,
}

impl GeometryEstimator {
    pub fn from_config(config: &GeometryConfig) -> Self {
        Self {
            mode: config.mode,
            angle_model: config.angle_model,
            horizontal_fov_deg: config.horizontal_fov_deg,
            vertical_fov_deg: config.vertical_fov_deg,
            focal_length_px: config.focal_length_px,
            target_height_mm: config.target_height_mm,
        }
    }

    pub fn mode(&self) -> TargetMode {
        self.mode
    }

    /// Horizontal bearing of a pixel column, positive to the right of center.
    pub fn angle_at(&self, x_center: f64, image_width: u32) -> f64 {
        let width = image_width as f64;
        let offset = x_center - width / 2.0;
        match self.angle_model {
            AngleModel::Linear => offset * (self.horizontal_fov_deg / width),
            AngleModel::Pinhole => (offset / self.focal_length_px).atan().to_degrees(),
        }
    }

    /// Distance to a target of known physical height spanning `pixel_height` rows.
    /// `None` when the height is not positive.
    pub fn range_for(&self, pixel_height: f64, image_height: u32) -> Option<f64> {
        if !(pixel_height > 0.0) {
            return None;
        }
        let half_fov = (self.vertical_fov_deg / 2.0).to_radians();
        let range = self.target_height_mm * image_height as f64 / (2.0 * pixel_height * half_fov.tan());
        range.is_finite().then_some(range)
    }

    /// Angle and range for one candidate, or `None` if its geometry is degenerate.
    pub fn locate(&self, candidate: &Candidate, image_width: u32, image_height: u32) -> Option<(f64, f64)> {
        let angle = self.angle_at(candidate.bbox.center_x(), image_width);
        let range = self.range_for(candidate.bbox.height as f64, image_height)?;
        Some((angle, range))
    }

    /// Estimate for the candidates of one frame, largest first.
    ///
    /// Single mode uses the largest candidate. Dual mode needs two candidates
    /// that both locate, and averages their angles and ranges; with only one
    /// usable candidate the result is invalid.
    pub fn estimate(
        &self,
        candidates: &[Candidate],
        image_width: u32,
        image_height: u32,
        timestamp: SystemTime,
    ) -> Estimate {
        let located = match self.mode {
            TargetMode::Single => candidates
                .first()
                .and_then(|c| self.locate(c, image_width, image_height)),
            TargetMode::Dual => match candidates {
                [first, second, ..] => {
                    let a = self.locate(first, image_width, image_height);
                    let b = self.locate(second, image_width, image_height);
                    a.zip(b).map(|(a, b)| fuse(a, b))
                }
                _ => None,
            },
        };

        match located {
            Some((angle, range)) => {
                debug!("Target at {:.2} deg, {:.0} mm", angle, range);
                Estimate::new(angle, range, timestamp)
            }
            None => Estimate::invalid(timestamp),
        }
    }
}

/// Midpoint of two (angle, range) pairs.
pub fn fuse(a: (f64, f64), b: (f64, f64)) -> (f64, f64) {
    ((a.0 + b.0) / 2.0, (a.1 + b.1) / 2.0)
}
