//! Error types for the targeting pipeline

use thiserror::Error;

pub type Result<T> = std::result::Result<T, VisionError>;

#[derive(Error, Debug)]
pub enum VisionError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Camera error: {0}")]
    Camera(String),

    #[error("Telemetry error: {0}")]
    Telemetry(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Config source error: {0}")]
    ConfigSource(#[from] ::config::ConfigError),

    #[error("Config serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl From<nokhwa::NokhwaError> for VisionError {
    fn from(err: nokhwa::NokhwaError) -> Self {
        VisionError::Camera(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = VisionError::Config("horizontal_fov_deg must be in (0, 180)".to_string());
        assert!(err.to_string().contains("Configuration error"));
        assert!(err.to_string().contains("horizontal_fov_deg"));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "no such device");
        let err: VisionError = io_err.into();
        match err {
            VisionError::Io(_) => {}
            _ => panic!("Expected Io error"),
        }
    }
}
