use crate::error::{Result, VisionError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

/// Environment prefix for overrides, e.g. `TARGETVISION__CAMERA__INDEX=1`.
pub const ENV_PREFIX: &str = "TARGETVISION";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetingConfig {
    pub camera: CameraSettings,
    pub threshold: ThresholdConfig,
    pub contours: ContourConfig,
    pub geometry: GeometryConfig,
    pub telemetry: TelemetryConfig,
    pub performance: PerformanceConfig,
    pub debug: DebugConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraSettings {
    /// Camera device index
    pub index: u32,
    /// Requested capture width
    pub width: u32,
    /// Requested capture height
    pub height: u32,
    /// Requested frames per second
    pub fps: u32,
    /// Replay frames from this directory instead of opening a camera
    pub replay_dir: Option<PathBuf>,
}

/// Inclusive HSV bounds, hue in 0..=180, saturation and value in 0..=255.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdConfig {
    pub lower: [u8; 3],
    pub upper: [u8; 3],
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContourConfig {
    /// Median filter radius; 2 gives a 5x5 kernel
    pub median_radius: u32,
    /// Trace Canny edges instead of the filtered mask
    pub canny: bool,
    pub canny_low: f32,
    pub canny_high: f32,
    /// Boundaries must enclose strictly more than this many square pixels
    pub min_area: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetMode {
    /// One blob is the target
    Single,
    /// Two strips of one physical target, fused at their midpoint
    Dual,
}

impl TargetMode {
    pub fn candidate_count(self) -> usize {
        match self {
            TargetMode::Single => 1,
            TargetMode::Dual => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AngleModel {
    /// Degrees per pixel spread linearly across the horizontal field of view
    Linear,
    /// atan of the pixel offset over the focal length
    Pinhole,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeometryConfig {
    pub mode: TargetMode,
    pub angle_model: AngleModel,
    pub horizontal_fov_deg: f64,
    pub vertical_fov_deg: f64,
    /// Focal length in pixel units, used by the pinhole model
    pub focal_length_px: f64,
    /// Physical height of one target blob in millimeters
    pub target_height_mm: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Mirror the table to a remote server over TCP
    pub enabled: bool,
    pub server: String,
    pub reconnect_interval_ms: u64,
    pub angle_key: String,
    pub distance_key: String,
    pub request_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    /// Minimum time between iteration starts; 0 runs unpaced
    pub processing_interval_ms: u64,
    /// Log throughput every this many frames
    pub stats_interval_frames: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    /// Write annotated frames here when set
    pub overlay_dir: Option<PathBuf>,
    /// Write every Nth frame
    pub overlay_every: u64,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            index: 0,
            width: 320,
            height: 240,
            fps: 30,
            replay_dir: None,
        }
    }
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        // Retroreflective tape under a green ring light
        Self {
            lower: [50, 50, 0],
            upper: [80, 255, 255],
        }
    }
}

impl Default for ContourConfig {
    fn default() -> Self {
        Self {
            median_radius: 2,
            canny: false,
            canny_low: 100.0,
            canny_high: 200.0,
            min_area: 0.0,
        }
    }
}

impl Default for GeometryConfig {
    fn default() -> Self {
        Self {
            mode: TargetMode::Single,
            angle_model: AngleModel::Linear,
            horizontal_fov_deg: 55.67,
            vertical_fov_deg: 43.2,
            focal_length_px: 303.0,
            target_height_mm: 127.0,
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            server: "127.0.0.1:5800".to_string(),
            reconnect_interval_ms: 3000,
            angle_key: "targetAngle".to_string(),
            distance_key: "targetDistance".to_string(),
            request_key: "request".to_string(),
        }
    }
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            processing_interval_ms: 0,
            stats_interval_frames: 100,
        }
    }
}

impl TargetingConfig {
    /// Loads the config file, writing a default one first if it does not exist.
    /// Environment variables prefixed with `TARGETVISION__` override file values.
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            let default_config = Self::default();
            default_config.save(path).await?;
            return Ok(default_config);
        }

        let settings = ::config::Config::builder()
            .add_source(::config::File::from(path).format(::config::FileFormat::Toml))
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        let loaded: Self = settings.try_deserialize()?;
        Ok(loaded)
    }

    pub async fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content).await?;
        Ok(())
    }

    /// Startup checks. Anything rejected here would otherwise surface as a
    /// division by zero or a meaningless estimate inside the loop.
    pub fn validate(&self) -> Result<()> {
        let camera = &self.camera;
        if camera.width == 0 || camera.height == 0 {
            return Err(VisionError::Config("camera resolution must be non-zero".to_string()));
        }

        let threshold = &self.threshold;
        for (channel, (lo, hi)) in ["hue", "saturation", "value"]
            .iter()
            .zip(threshold.lower.iter().zip(threshold.upper.iter()))
        {
            if lo > hi {
                return Err(VisionError::Config(format!(
                    "{} lower bound {} exceeds upper bound {}",
                    channel, lo, hi
                )));
            }
        }
        if threshold.lower[0] > 180 || threshold.upper[0] > 180 {
            return Err(VisionError::Config("hue bounds must be within 0..=180".to_string()));
        }

        let contours = &self.contours;
        if contours.canny && contours.canny_low > contours.canny_high {
            return Err(VisionError::Config("canny_low must not exceed canny_high".to_string()));
        }
        if !contours.min_area.is_finite() || contours.min_area < 0.0 {
            return Err(VisionError::Config("min_area must be a non-negative number".to_string()));
        }

        let geometry = &self.geometry;
        check_fov("horizontal_fov_deg", geometry.horizontal_fov_deg)?;
        check_fov("vertical_fov_deg", geometry.vertical_fov_deg)?;
        if geometry.angle_model == AngleModel::Pinhole
            && !(geometry.focal_length_px.is_finite() && geometry.focal_length_px > 0.0)
        {
            return Err(VisionError::Config(
                "focal_length_px must be positive for the pinhole model".to_string(),
            ));
        }
        if !(geometry.target_height_mm.is_finite() && geometry.target_height_mm > 0.0) {
            return Err(VisionError::Config("target_height_mm must be positive".to_string()));
        }

        let telemetry = &self.telemetry;
        if telemetry.angle_key.is_empty()
            || telemetry.distance_key.is_empty()
            || telemetry.request_key.is_empty()
        {
            return Err(VisionError::Config("telemetry keys must not be empty".to_string()));
        }

        Ok(())
    }
}

fn check_fov(name: &str, degrees: f64) -> Result<()> {
    if degrees.is_finite() && degrees > 0.0 && degrees < 180.0 {
        Ok(())
    } else {
        Err(VisionError::Config(format!("{} must be in (0, 180), got {}", name, degrees)))
    }
}
