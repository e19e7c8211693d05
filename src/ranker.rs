use crate::contours::Boundary;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl BoundingBox {
    pub fn center_x(&self) -> f64 {
        self.x as f64 + self.width as f64 / 2.0
    }

    pub fn center_y(&self) -> f64 {
        self.y as f64 + self.height as f64 / 2.0
    }
}

/// A region chosen as a possible target in the current frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub bbox: BoundingBox,
    pub area: f64,
    /// Index of the source boundary in the extractor output
    pub source: usize,
}

/// Keeps the `k` largest boundaries by enclosed area.
#[derive(Debug, Clone)]
pub struct CandidateRanker {
    min_area: f64,
}

impl Default for CandidateRanker {
    fn default() -> Self {
        Self::new(0.0)
    }
}

impl CandidateRanker {
    pub fn new(min_area: f64) -> Self {
        Self { min_area }
    }

    /// Returns up to `k` candidates, largest first, in one pass over `boundaries`.
    ///
    /// A boundary takes slot `i` only when its area is strictly greater than the
    /// current holder, which shifts the holder and everything after it down one
    /// slot. Equal areas never displace, so the first boundary seen at a given
    /// area keeps its rank. Boundaries at or below `min_area` are skipped.
    pub fn rank(&self, boundaries: &[Boundary], k: usize) -> Vec<Candidate> {
        let mut top: Vec<Candidate> = Vec::with_capacity(k.min(boundaries.len()).saturating_add(1));
        if k == 0 {
            return top;
        }

        for (source, boundary) in boundaries.iter().enumerate() {
            let area = boundary.area();
            if area <= self.min_area {
                continue;
            }
            let slot = top
                .iter()
                .position(|held| area > held.area)
                .unwrap_or(top.len());
            if slot >= k {
                continue;
            }
            let Some((x, y, width, height)) = boundary.bounding_rect() else {
                continue;
            };
            top.insert(
                slot,
                Candidate {
                    bbox: BoundingBox { x, y, width, height },
                    area,
                    source,
                },
            );
            top.truncate(k);
        }

        debug!(
            "Ranked {} of {} boundaries: areas {:?}",
            top.len(),
            boundaries.len(),
            top.iter().map(|c| c.area).collect::<Vec<_>>()
        );
        top
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::seq::SliceRandom;
    use rand::SeedableRng;

    /// Square boundary whose shoelace area is `side * side`.
    fn square(x: i32, side: i32) -> Boundary {
        Boundary::rectangle(x, 0, side + 1, side + 1)
    }

    fn areas(candidates: &[Candidate]) -> Vec<f64> {
        candidates.iter().map(|c| c.area).collect()
    }

    #[test]
    fn test_single_returns_global_max() {
        let boundaries = vec![square(0, 5), square(10, 12), square(30, 3), square(40, 8)];
        let top = CandidateRanker::default().rank(&boundaries, 1);
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].area, 144.0);
        assert_eq!(top[0].source, 1);
        assert_eq!(top[0].bbox, BoundingBox { x: 10, y: 0, width: 13, height: 13 });
    }

    #[test]
    fn test_tie_keeps_first_encountered() {
        let boundaries = vec![square(0, 4), square(10, 9), square(30, 9), square(50, 9)];
        let top = CandidateRanker::default().rank(&boundaries, 1);
        assert_eq!(top[0].source, 1);

        let top = CandidateRanker::default().rank(&boundaries, 2);
        assert_eq!(top.iter().map(|c| c.source).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn test_second_largest_before_largest() {
        // The naive "area > max1 / elif area > max2" pass loses the 81 here
        let boundaries = vec![square(0, 9), square(20, 10), square(40, 2)];
        let top = CandidateRanker::default().rank(&boundaries, 2);
        assert_eq!(areas(&top), vec![100.0, 81.0]);
        assert_eq!(top.iter().map(|c| c.source).collect::<Vec<_>>(), vec![1, 0]);
    }

    #[test]
    fn test_top_two_independent_of_order() {
        let mut boundaries: Vec<Boundary> = (1..=12).map(|side| square(side * 20, side)).collect();
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        for _ in 0..50 {
            boundaries.shuffle(&mut rng);
            let top = CandidateRanker::default().rank(&boundaries, 2);
            assert_eq!(areas(&top), vec![144.0, 121.0]);
        }
    }

    #[test]
    fn test_fewer_boundaries_than_k() {
        let top = CandidateRanker::default().rank(&[square(0, 6)], 2);
        assert_eq!(top.len(), 1);
        assert!(CandidateRanker::default().rank(&[], 2).is_empty());
        assert!(CandidateRanker::default().rank(&[square(0, 6)], 0).is_empty());
    }

    #[test]
    fn test_unbounded_k_returns_all() {
        let boundaries = vec![square(0, 3), square(10, 5), square(20, 4)];
        let top = CandidateRanker::default().rank(&boundaries, usize::MAX);
        assert_eq!(areas(&top), vec![25.0, 16.0, 9.0]);
    }

    #[test]
    fn test_min_area_filters_degenerate() {
        let line = Boundary::rectangle(0, 0, 10, 1);
        assert!(CandidateRanker::default().rank(&[line.clone()], 1).is_empty());

        let boundaries = vec![line, square(20, 3), square(40, 5)];
        let top = CandidateRanker::new(10.0).rank(&boundaries, 2);
        assert_eq!(areas(&top), vec![25.0]);
    }
}
