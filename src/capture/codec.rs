//! Frame conversion: platform pixel formats to RGB, reorientation and JPEG.

use image::codecs::jpeg::JpegEncoder;
use image::{ImageFormat, RgbImage, imageops};

use crate::types::{PixelFormat, Plane, RawFrame};
use crate::{Result, StreamError};

/// Clockwise rotation applied to correct for device mounting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Rotation {
    None,
    #[default]
    Cw90,
    Cw180,
    Cw270,
}

impl Rotation {
    /// Map a multiple of 90 degrees to a rotation
    pub fn from_degrees(degrees: u16) -> Result<Self> {
        match degrees % 360 {
            0 => Ok(Rotation::None),
            90 => Ok(Rotation::Cw90),
            180 => Ok(Rotation::Cw180),
            270 => Ok(Rotation::Cw270),
            other => Err(StreamError::config_error(
                "capture.rotation_degrees",
                format!("{} is not a multiple of 90", other),
            )),
        }
    }

    pub fn apply(self, image: RgbImage) -> RgbImage {
        match self {
            Rotation::None => image,
            Rotation::Cw90 => imageops::rotate90(&image),
            Rotation::Cw180 => imageops::rotate180(&image),
            Rotation::Cw270 => imageops::rotate270(&image),
        }
    }
}

/// Stateless per-frame converter shared by the producer worker
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    rotation: Rotation,
    quality: u8,
}

impl FrameCodec {
    pub fn new(rotation: Rotation, quality: u8) -> Self {
        Self { rotation, quality: quality.clamp(1, 100) }
    }

    /// Decode and reorient a raw frame into the full-quality preview image
    pub fn decode_oriented(&self, raw: &RawFrame) -> Result<RgbImage> {
        Ok(self.rotation.apply(decode(raw)?))
    }

    /// Encode an image at transport quality
    pub fn encode_transport(&self, image: &RgbImage) -> Result<Vec<u8>> {
        encode_jpeg(image, self.quality)
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }
}

/// Decode a raw platform frame into packed RGB
pub fn decode(raw: &RawFrame) -> Result<RgbImage> {
    let (width, height) = (raw.width as usize, raw.height as usize);
    if width == 0 || height == 0 {
        return Err(StreamError::decode_failed(format!(
            "empty {} frame ({}x{})",
            raw.pixels.name(),
            raw.width,
            raw.height
        )));
    }

    match &raw.pixels {
        PixelFormat::Yuv420 { y, u, v } => decode_yuv420(width, height, y, u, v),
        PixelFormat::Nv21(data) => decode_nv21(width, height, data),
        PixelFormat::Jpeg(data) => {
            let image = image::load_from_memory_with_format(data, ImageFormat::Jpeg)
                .map_err(|e| StreamError::decode_failed(format!("jpeg: {}", e)))?;
            Ok(image.to_rgb8())
        }
    }
}

/// Encode RGB as baseline JPEG at `quality` (1-100)
pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(image.as_raw().len() / 8);
    JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100))
        .encode_image(image)
        .map_err(|e| StreamError::encode_failed(e.to_string()))?;
    Ok(out)
}

fn decode_yuv420(
    width: usize,
    height: usize,
    y: &Plane,
    u: &Plane,
    v: &Plane,
) -> Result<RgbImage> {
    let (chroma_width, chroma_height) = (width.div_ceil(2), height.div_ceil(2));
    check_plane("y", y, width, height)?;
    check_plane("u", u, chroma_width, chroma_height)?;
    check_plane("v", v, chroma_width, chroma_height)?;

    let mut rgb = Vec::with_capacity(width * height * 3);
    for row in 0..height {
        for col in 0..width {
            let luma = y.data[row * y.row_stride + col * y.pixel_stride];
            let chroma_at = |plane: &Plane| plane.data[(row / 2) * plane.row_stride + (col / 2) * plane.pixel_stride];
            rgb.extend_from_slice(&yuv_to_rgb(luma, chroma_at(u), chroma_at(v)));
        }
    }
    into_image(width, height, rgb)
}

fn decode_nv21(width: usize, height: usize, data: &[u8]) -> Result<RgbImage> {
    let chroma_row = width.div_ceil(2) * 2;
    let required = width * height + chroma_row * height.div_ceil(2);
    if data.len() < required {
        return Err(StreamError::decode_failed(format!(
            "nv21 buffer holds {} bytes, {}x{} needs {}",
            data.len(),
            width,
            height,
            required
        )));
    }

    let (luma, chroma) = data.split_at(width * height);
    let mut rgb = Vec::with_capacity(width * height * 3);
    for row in 0..height {
        for col in 0..width {
            let pair = (row / 2) * chroma_row + (col / 2) * 2;
            rgb.extend_from_slice(&yuv_to_rgb(luma[row * width + col], chroma[pair + 1], chroma[pair]));
        }
    }
    into_image(width, height, rgb)
}

fn check_plane(name: &str, plane: &Plane, width: usize, height: usize) -> Result<()> {
    if plane.pixel_stride == 0 || plane.row_stride < (width - 1) * plane.pixel_stride + 1 {
        return Err(StreamError::decode_failed(format!(
            "{} plane strides (row {}, pixel {}) cannot hold {} samples per row",
            name, plane.row_stride, plane.pixel_stride, width
        )));
    }
    let required = (height - 1) * plane.row_stride + (width - 1) * plane.pixel_stride + 1;
    if plane.data.len() < required {
        return Err(StreamError::decode_failed(format!(
            "{} plane holds {} bytes, needs {}",
            name,
            plane.data.len(),
            required
        )));
    }
    Ok(())
}

fn into_image(width: usize, height: usize, rgb: Vec<u8>) -> Result<RgbImage> {
    RgbImage::from_raw(width as u32, height as u32, rgb)
        .ok_or_else(|| StreamError::decode_failed("rgb buffer size mismatch"))
}

/// BT.601 full-range conversion in 16.16 fixed point
fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let y = i32::from(y);
    let u = i32::from(u) - 128;
    let v = i32::from(v) - 128;

    let r = y + ((91_881 * v) >> 16);
    let g = y - ((22_554 * u + 46_802 * v) >> 16);
    let b = y + ((116_130 * u) >> 16);

    [r.clamp(0, 255) as u8, g.clamp(0, 255) as u8, b.clamp(0, 255) as u8]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{gradient_yuv_frame, jpeg_frame, nv21_frame};
    use std::sync::Arc;

    #[test]
    fn neutral_chroma_is_gray() {
        assert_eq!(yuv_to_rgb(128, 128, 128), [128, 128, 128]);
        assert_eq!(yuv_to_rgb(0, 128, 128), [0, 0, 0]);
        assert_eq!(yuv_to_rgb(255, 128, 128), [255, 255, 255]);
    }

    #[test]
    fn saturated_chroma_clamps() {
        let [r, _, b] = yuv_to_rgb(255, 255, 255);
        assert_eq!((r, b), (255, 255));
        let [r, _, b] = yuv_to_rgb(0, 0, 0);
        assert_eq!((r, b), (0, 0));
    }

    #[test]
    fn yuv420_decodes_with_padded_strides() {
        let raw = gradient_yuv_frame(6, 4);
        let image = decode(&raw).unwrap();
        assert_eq!(image.dimensions(), (6, 4));

        // Row padding and interleaved chroma (pixel_stride 2) are honored
        let PixelFormat::Yuv420 { y, .. } = &raw.pixels else { unreachable!() };
        assert!(y.row_stride > 6);
        assert_eq!(image.get_pixel(0, 0).0, yuv_to_rgb(y.data[0], 128, 128));
    }

    #[test]
    fn rotation_swaps_dimensions() {
        let codec = FrameCodec::new(Rotation::Cw90, 50);
        let image = codec.decode_oriented(&gradient_yuv_frame(8, 4)).unwrap();
        assert_eq!(image.dimensions(), (4, 8));

        let upright = FrameCodec::new(Rotation::Cw180, 50);
        assert_eq!(upright.decode_oriented(&gradient_yuv_frame(8, 4)).unwrap().dimensions(), (8, 4));
    }

    #[test]
    fn rotation_from_degrees() {
        assert_eq!(Rotation::from_degrees(0).unwrap(), Rotation::None);
        assert_eq!(Rotation::from_degrees(90).unwrap(), Rotation::Cw90);
        assert_eq!(Rotation::from_degrees(270).unwrap(), Rotation::Cw270);
        assert!(Rotation::from_degrees(45).is_err());
    }

    #[test]
    fn nv21_matches_equivalent_yuv420() {
        let image = decode(&nv21_frame(4, 4, 100, 90, 160)).unwrap();
        assert_eq!(image.dimensions(), (4, 4));
        assert!(image.pixels().all(|p| p.0 == yuv_to_rgb(100, 90, 160)));
    }

    #[test]
    fn jpeg_frames_decode() {
        let image = decode(&jpeg_frame(16, 8)).unwrap();
        assert_eq!(image.dimensions(), (16, 8));
    }

    #[test]
    fn short_planes_fail_to_decode() {
        let mut raw = gradient_yuv_frame(8, 8);
        if let PixelFormat::Yuv420 { y, .. } = &mut raw.pixels {
            y.data = Arc::from(vec![0u8; 10]);
        }
        assert!(matches!(decode(&raw), Err(StreamError::Decode { .. })));

        let mut raw = nv21_frame(4, 4, 0, 0, 0);
        raw.pixels = PixelFormat::Nv21(Arc::from(vec![0u8; 5]));
        assert!(matches!(decode(&raw), Err(StreamError::Decode { .. })));

        let mut raw = jpeg_frame(4, 4);
        raw.pixels = PixelFormat::Jpeg(Arc::from(vec![0xFFu8, 0xD8, 0x00]));
        assert!(matches!(decode(&raw), Err(StreamError::Decode { .. })));

        let mut raw = gradient_yuv_frame(4, 4);
        raw.width = 0;
        assert!(matches!(decode(&raw), Err(StreamError::Decode { .. })));
    }

    #[test]
    fn transport_encoding_is_smaller_than_high_quality() {
        let image = decode(&gradient_yuv_frame(64, 64)).unwrap();
        let transport = FrameCodec::new(Rotation::None, 50).encode_transport(&image).unwrap();
        let high = encode_jpeg(&image, 95).unwrap();

        assert_eq!(&transport[..2], &[0xFF, 0xD8]);
        assert!(transport.len() < high.len());

        let decoded = image::load_from_memory_with_format(&transport, ImageFormat::Jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (64, 64));
    }
}
