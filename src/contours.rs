use crate::config::ContourConfig;
use crate::frame::Mask;
use imageproc::contours::find_contours;
use imageproc::edges::canny;
use imageproc::filter::median_filter;
use imageproc::point::Point;
use tracing::debug;

/// A closed region border traced from a mask, in pixel coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct Boundary {
    pub points: Vec<Point<i32>>,
}

impl Boundary {
    pub fn new(points: Vec<Point<i32>>) -> Self {
        Self { points }
    }

    /// Axis-aligned rectangle as a boundary with the given corners, for callers
    /// that already know their region.
    pub fn rectangle(x: i32, y: i32, width: i32, height: i32) -> Self {
        let (x1, y1) = (x + width - 1, y + height - 1);
        Self::new(vec![
            Point::new(x, y),
            Point::new(x1, y),
            Point::new(x1, y1),
            Point::new(x, y1),
        ])
    }

    /// Enclosed polygon area (shoelace over the traced points).
    pub fn area(&self) -> f64 {
        let n = self.points.len();
        if n < 3 {
            return 0.0;
        }
        let twice: i64 = (0..n)
            .map(|i| {
                let p = self.points[i];
                let q = self.points[(i + 1) % n];
                p.x as i64 * q.y as i64 - q.x as i64 * p.y as i64
            })
            .sum();
        twice.abs() as f64 / 2.0
    }

    /// Smallest enclosing rectangle as (x, y, width, height), counting pixels inclusively.
    pub fn bounding_rect(&self) -> Option<(i32, i32, i32, i32)> {
        let first = self.points.first()?;
        let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.x, first.y, first.x, first.y);
        for p in &self.points[1..] {
            min_x = min_x.min(p.x);
            min_y = min_y.min(p.y);
            max_x = max_x.max(p.x);
            max_y = max_y.max(p.y);
        }
        Some((min_x, min_y, max_x - min_x + 1, max_y - min_y + 1))
    }
}

/// Denoises a mask and traces every border in it. Outer borders and hole
/// borders come back in one flat list; nesting is dropped.
#[derive(Debug, Clone)]
pub struct ContourExtractor {
    median_radius: u32,
    edges: Option<(f32, f32)>,
}

impl ContourExtractor {
    pub fn new(median_radius: u32, edges: Option<(f32, f32)>) -> Self {
        Self {
            median_radius,
            edges,
        }
    }

    pub fn from_config(config: &ContourConfig) -> Self {
        let edges = config.canny.then_some((config.canny_low, config.canny_high));
        Self::new(config.median_radius, edges)
    }

    pub fn extract(&self, mask: &Mask) -> Vec<Boundary> {
        if mask.is_empty() {
            return Vec::new();
        }

        let smoothed = if self.median_radius > 0 {
            median_filter(&mask.image, self.median_radius, self.median_radius)
        } else {
            mask.image.clone()
        };

        let traced = match self.edges {
            Some((low, high)) => canny(&smoothed, low, high),
            None => smoothed,
        };

        let boundaries: Vec<Boundary> = find_contours::<i32>(&traced)
            .into_iter()
            .map(|contour| Boundary::new(contour.points))
            .collect();

        debug!("Extracted {} boundaries", boundaries.len());
        boundaries
    }
}
