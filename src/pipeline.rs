use crate::camera::FrameSource;
use crate::config::TargetingConfig;
use crate::contours::ContourExtractor;
use crate::error::Result;
use crate::frame::Frame;
use crate::geometry::{Estimate, GeometryEstimator};
use crate::overlay::{self, OverlayWriter};
use crate::ranker::{Candidate, CandidateRanker};
use crate::segment::ColorSegmenter;
use crate::telemetry::TelemetryPublisher;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Everything one iteration learned about its frame.
#[derive(Debug, Clone)]
pub struct FrameReport {
    pub matched_pixels: usize,
    pub boundary_count: usize,
    pub candidates: Vec<Candidate>,
    pub estimate: Estimate,
}

/// What happened to one iteration.
#[derive(Debug, Clone)]
pub enum StepOutcome {
    Processed(FrameReport),
    /// No frame this time; the previous estimate stays in place
    Skipped,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub frames_processed: u64,
    pub frames_skipped: u64,
    pub targets_found: u64,
}

/// The stateless per-frame stages: segment, extract, rank, estimate.
#[derive(Debug, Clone)]
pub struct TargetDetector {
    segmenter: ColorSegmenter,
    extractor: ContourExtractor,
    ranker: CandidateRanker,
    estimator: GeometryEstimator,
}

impl TargetDetector {
    pub fn from_config(config: &TargetingConfig) -> Self {
        Self {
            segmenter: ColorSegmenter::from_config(&config.threshold),
            extractor: ContourExtractor::from_config(&config.contours),
            ranker: CandidateRanker::new(config.contours.min_area),
            estimator: GeometryEstimator::from_config(&config.geometry),
        }
    }

    pub fn process(&self, frame: &Frame) -> FrameReport {
        let mask = self.segmenter.segment(frame);
        let boundaries = self.extractor.extract(&mask);
        let k = self.estimator.mode().candidate_count();
        let candidates = self.ranker.rank(&boundaries, k);
        let estimate = self
            .estimator
            .estimate(&candidates, frame.width(), frame.height(), frame.captured_at);

        FrameReport {
            matched_pixels: mask.count_on(),
            boundary_count: boundaries.len(),
            candidates,
            estimate,
        }
    }
}

pub struct TargetingPipeline {
    source: Box<dyn FrameSource>,
    detector: TargetDetector,
    publisher: Arc<TelemetryPublisher>,
    overlay: Option<OverlayWriter>,
    interval: Duration,
    stats_interval: u64,
    stats: PipelineStats,
}

impl TargetingPipeline {
    pub fn new(
        config: &TargetingConfig,
        source: Box<dyn FrameSource>,
        publisher: Arc<TelemetryPublisher>,
    ) -> Result<Self> {
        info!("Initializing targeting pipeline with {}", source.describe());

        let overlay = match &config.debug.overlay_dir {
            Some(dir) => Some(OverlayWriter::new(dir, config.debug.overlay_every)?),
            None => None,
        };

        Ok(Self {
            source,
            detector: TargetDetector::from_config(config),
            publisher,
            overlay,
            interval: Duration::from_millis(config.performance.processing_interval_ms),
            stats_interval: config.performance.stats_interval_frames.max(1),
            stats: PipelineStats::default(),
        })
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    pub fn publisher(&self) -> &Arc<TelemetryPublisher> {
        &self.publisher
    }

    /// One iteration: acquire, detect, store the estimate, maybe draw.
    pub fn step(&mut self) -> StepOutcome {
        let frame = match self.source.capture() {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Frame acquisition failed, skipping iteration: {}", e);
                self.stats.frames_skipped += 1;
                return StepOutcome::Skipped;
            }
        };

        let report = self.detector.process(&frame);
        self.publisher.update(report.estimate);

        let frame_number = self.stats.frames_processed;
        self.stats.frames_processed += 1;
        if report.estimate.valid {
            self.stats.targets_found += 1;
        }

        debug!(
            "Frame {}: {} px matched, {} boundaries, {} candidates, valid: {}",
            frame_number,
            report.matched_pixels,
            report.boundary_count,
            report.candidates.len(),
            report.estimate.valid
        );

        if let Some(ref writer) = self.overlay {
            if writer.wants(frame_number) {
                let canvas = overlay::annotate(&frame, &report.candidates, &report.estimate);
                if let Err(e) = writer.write(frame_number, &canvas) {
                    warn!("Failed to write overlay: {}", e);
                }
            }
        }

        StepOutcome::Processed(report)
    }

    /// Runs until `shutdown` turns true or its sender goes away.
    ///
    /// Capture blocks the calling thread. The pipeline is not `Send`, so it is
    /// driven from the thread that owns the runtime (`block_on`), never from a
    /// worker; spawned tasks keep running while a capture waits.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!("Starting targeting loop");

        let mut last_stats_time = Instant::now();
        let mut last_stats_frames = 0;

        loop {
            if *shutdown.borrow() {
                break;
            }

            let started = Instant::now();
            if let StepOutcome::Processed(_) = self.step() {
                let processed = self.stats.frames_processed;
                if processed % self.stats_interval == 0 {
                    let elapsed = last_stats_time.elapsed().as_secs_f32();
                    let fps = (processed - last_stats_frames) as f32 / elapsed.max(f32::EPSILON);
                    info!(
                        "Processed {} frames ({} skipped, {} with target), current FPS: {:.2}, publishes: {}",
                        processed,
                        self.stats.frames_skipped,
                        self.stats.targets_found,
                        fps,
                        self.publisher.publish_count()
                    );
                    last_stats_time = Instant::now();
                    last_stats_frames = processed;
                }
            }

            let remaining = self.interval.saturating_sub(started.elapsed());
            tokio::select! {
                _ = tokio::time::sleep(remaining) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        info!("Shutdown sender dropped, stopping");
                        break;
                    }
                }
            }
        }

        info!(
            "Pipeline stopped after processing {} frames",
            self.stats.frames_processed
        );
        Ok(())
    }
}
