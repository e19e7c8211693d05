use crate::config::CameraSettings;
use crate::error::{Result, VisionError};
use crate::frame::Frame;
use image::RgbImage;
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType, Resolution};
use nokhwa::Camera;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// Anything that hands the pipeline one frame at a time.
pub trait FrameSource {
    /// Blocks until the next frame is available. An error means this
    /// iteration has no frame; the caller may try again.
    fn capture(&mut self) -> Result<Frame>;

    fn describe(&self) -> String;
}

pub struct CameraSystem {
    settings: CameraSettings,
    camera: Option<Camera>,
}

impl CameraSystem {
    pub fn new(settings: CameraSettings) -> Self {
        Self {
            settings,
            camera: None,
        }
    }

    /// Opens the configured camera, falling back to any other detected device.
    pub fn initialize(&mut self) -> Result<()> {
        info!("Initializing camera system - scanning for available cameras");

        let available_cameras = Self::detect_cameras();
        if available_cameras.is_empty() {
            return Err(VisionError::Camera("No cameras detected on this system".to_string()));
        }
        info!("Found {} camera(s): {:?}", available_cameras.len(), available_cameras);

        let camera_indices = if available_cameras.contains(&self.settings.index) {
            vec![self.settings.index]
        } else {
            warn!(
                "Camera {} not found, trying the others",
                self.settings.index
            );
            available_cameras
        };

        for cam_id in camera_indices {
            match self.try_initialize_camera(cam_id) {
                Ok(_) => {
                    self.settings.index = cam_id;
                    info!("Successfully initialized camera {}", cam_id);
                    return Ok(());
                }
                Err(e) => {
                    warn!("Failed to initialize camera {}: {}", cam_id, e);
                }
            }
        }

        Err(VisionError::Camera("Failed to initialize any available camera".to_string()))
    }

    fn requested_format(&self) -> RequestedFormat<'static> {
        let format = CameraFormat::new(
            Resolution::new(self.settings.width, self.settings.height),
            FrameFormat::MJPEG,
            self.settings.fps,
        );
        RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(format))
    }

    fn try_initialize_camera(&mut self, camera_id: u32) -> Result<()> {
        let mut camera = Camera::new(CameraIndex::Index(camera_id), self.requested_format())?;
        camera.open_stream()?;

        // Make sure the stream actually delivers
        let _test_frame = camera.frame()?;

        let resolution = camera.resolution();
        if resolution.width() != self.settings.width || resolution.height() != self.settings.height {
            warn!(
                "Camera {} negotiated {}x{} instead of {}x{}",
                camera_id,
                resolution.width(),
                resolution.height(),
                self.settings.width,
                self.settings.height
            );
        }

        self.camera = Some(camera);
        Ok(())
    }

    pub fn detect_cameras() -> Vec<u32> {
        (0..10)
            .filter(|&cam_id| {
                let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestFrameRate);
                Camera::new(CameraIndex::Index(cam_id), requested).is_ok()
            })
            .collect()
    }
}

impl FrameSource for CameraSystem {
    fn capture(&mut self) -> Result<Frame> {
        let camera = self
            .camera
            .as_mut()
            .ok_or_else(|| VisionError::Camera("Camera not initialized".to_string()))?;

        let buffer = camera.frame().map_err(|e| {
            error!("Camera frame capture failed: {}", e);
            VisionError::Camera(format!("Camera frame capture error: {}", e))
        })?;
        let decoded = buffer.decode_image::<RgbFormat>()?;
        let (width, height) = (decoded.width(), decoded.height());

        // Rebuild through raw bytes so the image crate versions never have to match
        let image = RgbImage::from_raw(width, height, decoded.into_raw())
            .ok_or_else(|| VisionError::Camera("Decoded frame has the wrong length".to_string()))?;
        debug!("Captured camera frame: {}x{}", width, height);

        Ok(Frame::new(image))
    }

    fn describe(&self) -> String {
        match self.camera {
            Some(_) => format!("Camera {} - Active", self.settings.index),
            None => "No camera active".to_string(),
        }
    }
}

impl Drop for CameraSystem {
    fn drop(&mut self) {
        if let Some(ref mut camera) = self.camera {
            info!("Stopping camera {}", self.settings.index);
            if let Err(e) = camera.stop_stream() {
                warn!("Error stopping camera stream: {}", e);
            }
        }
    }
}

/// Plays the images of a directory in file-name order, over and over.
pub struct ReplaySource {
    dir: PathBuf,
    files: Vec<PathBuf>,
    next: usize,
}

impl ReplaySource {
    const EXTENSIONS: [&'static str; 4] = ["png", "jpg", "jpeg", "bmp"];

    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let mut files: Vec<PathBuf> = std::fs::read_dir(&dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| Self::EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                    .unwrap_or(false)
            })
            .collect();
        files.sort();

        if files.is_empty() {
            return Err(VisionError::Camera(format!("No images found in {}", dir.display())));
        }
        info!("Replaying {} frames from {}", files.len(), dir.display());

        Ok(Self { dir, files, next: 0 })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl FrameSource for ReplaySource {
    fn capture(&mut self) -> Result<Frame> {
        let path = &self.files[self.next];
        self.next = (self.next + 1) % self.files.len();
        let image = image::open(path)?.to_rgb8();
        debug!("Replayed {}", path.display());
        Ok(Frame::new(image))
    }

    fn describe(&self) -> String {
        format!("Replay of {} ({} frames)", self.dir.display(), self.files.len())
    }
}
