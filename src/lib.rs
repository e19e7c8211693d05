pub mod config;
pub mod error;
pub mod frame;
pub mod camera;
pub mod segment;
pub mod contours;
pub mod ranker;
pub mod geometry;
pub mod telemetry;
pub mod link;
pub mod overlay;
pub mod pipeline;

pub use error::{Result, VisionError};
