//! Camera frame types for the capture pipeline

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::time::Instant;

/// One image plane as delivered by the platform camera pipeline.
///
/// Mirrors the `YUV_420_888` plane description: a byte buffer plus the
/// distance between rows and between horizontally adjacent samples.
#[derive(Debug, Clone)]
pub struct Plane {
    /// Plane bytes (zero-copy via Arc)
    pub data: Arc<[u8]>,

    /// Bytes between the starts of two consecutive rows
    pub row_stride: usize,

    /// Bytes between two horizontally adjacent samples
    pub pixel_stride: usize,
}

impl Plane {
    /// Create a new plane
    pub fn new(data: impl Into<Arc<[u8]>>, row_stride: usize, pixel_stride: usize) -> Self {
        Self { data: data.into(), row_stride, pixel_stride }
    }

    /// Create a tightly packed plane (`pixel_stride == 1`)
    pub fn packed(data: impl Into<Arc<[u8]>>, width: usize) -> Self {
        Self::new(data, width, 1)
    }
}

/// Pixel layout of a raw camera frame
#[derive(Debug, Clone)]
pub enum PixelFormat {
    /// Three-plane YUV 4:2:0 with per-plane strides
    Yuv420 { y: Plane, u: Plane, v: Plane },

    /// Full-resolution Y followed by interleaved V/U at quarter resolution
    Nv21(Arc<[u8]>),

    /// Frame already compressed by the platform
    Jpeg(Arc<[u8]>),
}

impl PixelFormat {
    /// Short name used in log messages
    pub fn name(&self) -> &'static str {
        match self {
            PixelFormat::Yuv420 { .. } => "yuv420",
            PixelFormat::Nv21(_) => "nv21",
            PixelFormat::Jpeg(_) => "jpeg",
        }
    }
}

/// A camera frame exactly as the platform delivered it
#[derive(Debug, Clone)]
pub struct RawFrame {
    /// Width in pixels, before reorientation
    pub width: u32,

    /// Height in pixels, before reorientation
    pub height: u32,

    /// Pixel data
    pub pixels: PixelFormat,

    /// Monotonic acquisition time, used for throttling
    pub captured_at: Instant,

    /// Wall-clock acquisition time, used for the envelope timestamp
    pub captured_wall: DateTime<Utc>,
}

impl RawFrame {
    /// Create a raw frame stamped with the current time
    pub fn new(width: u32, height: u32, pixels: PixelFormat) -> Self {
        Self::captured(width, height, pixels, Instant::now(), Utc::now())
    }

    /// Create a raw frame with explicit acquisition timestamps
    pub fn captured(
        width: u32,
        height: u32,
        pixels: PixelFormat,
        captured_at: Instant,
        captured_wall: DateTime<Utc>,
    ) -> Self {
        Self { width, height, pixels, captured_at, captured_wall }
    }
}

/// One throttled, transport-ready camera frame.
///
/// Immutable once published; the next accepted frame supersedes it.
#[derive(Debug, Clone)]
pub struct SensorFrame {
    /// JPEG bytes at transport quality
    pub image: Arc<[u8]>,

    /// Width after reorientation
    pub width: u32,

    /// Height after reorientation
    pub height: u32,

    /// Monotonic acquisition time of the source raw frame
    pub captured_at: Instant,

    /// Wall-clock acquisition time of the source raw frame
    pub captured_wall: DateTime<Utc>,
}

impl SensorFrame {
    /// Create a new sensor frame
    pub fn new(
        image: Vec<u8>,
        width: u32,
        height: u32,
        captured_at: Instant,
        captured_wall: DateTime<Utc>,
    ) -> Self {
        Self { image: image.into(), width, height, captured_at, captured_wall }
    }
}
