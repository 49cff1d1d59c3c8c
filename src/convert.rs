// Pixel conversion and JPEG compression
//
// The conversion step turns camera-owned pixel data into an owned RGB image.
// After `convert` returns, nothing references the camera buffer any more, so
// callers can release the frame before compressing.

use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;

use crate::frame::{FrameBuffer, PixelFormat};

/// Error type for conversion and encoding
#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
    #[error("Unsupported pixel format: {0}")]
    UnsupportedFormat(PixelFormat),

    #[error("Buffer too small: need {needed} bytes, have {available}")]
    ShortBuffer { needed: usize, available: usize },

    #[error("Empty frame ({width}x{height})")]
    Empty { width: u32, height: u32 },

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Encode error: {0}")]
    Encode(String),
}

/// Converts a captured frame into a displayable image
pub trait FrameConverter: Send + Sync {
    fn convert(&self, frame: &FrameBuffer) -> Result<RgbImage, ConvertError>;
}

/// Formats the default converter understands
pub fn can_convert(format: PixelFormat) -> bool {
    matches!(
        format,
        PixelFormat::YUYV
            | PixelFormat::UYVY
            | PixelFormat::RGB24
            | PixelFormat::BGR24
            | PixelFormat::GREY
            | PixelFormat::MJPEG
    )
}

/// Software converter for common packed formats and MJPEG
#[derive(Debug, Default, Clone, Copy)]
pub struct PixelConverter;

impl FrameConverter for PixelConverter {
    fn convert(&self, frame: &FrameBuffer) -> Result<RgbImage, ConvertError> {
        if frame.width == 0 || frame.height == 0 {
            return Err(ConvertError::Empty {
                width: frame.width,
                height: frame.height,
            });
        }

        match frame.pixel_format {
            PixelFormat::MJPEG => decode_mjpeg(frame),
            PixelFormat::YUYV => convert_yuv422(frame, [0, 1, 2, 3]),
            PixelFormat::UYVY => convert_yuv422(frame, [1, 0, 3, 2]),
            PixelFormat::RGB24 => convert_rgb(frame, false),
            PixelFormat::BGR24 => convert_rgb(frame, true),
            PixelFormat::GREY => convert_grey(frame),
            other => Err(ConvertError::UnsupportedFormat(other)),
        }
    }
}

/// Compress an image as baseline JPEG
pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>, ConvertError> {
    let mut out = Cursor::new(Vec::with_capacity(image.as_raw().len() / 8));
    JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100))
        .encode_image(image)
        .map_err(|e| ConvertError::Encode(e.to_string()))?;
    Ok(out.into_inner())
}

fn check_len(frame: &FrameBuffer, stride: usize, row_bytes: usize) -> Result<&[u8], ConvertError> {
    let data = frame.payload();
    let height = frame.height as usize;
    let needed = stride * (height - 1) + row_bytes;
    if data.len() < needed {
        return Err(ConvertError::ShortBuffer {
            needed,
            available: data.len(),
        });
    }
    Ok(data)
}

fn decode_mjpeg(frame: &FrameBuffer) -> Result<RgbImage, ConvertError> {
    let decoded = image::load_from_memory_with_format(frame.payload(), image::ImageFormat::Jpeg)
        .map_err(|e| ConvertError::Decode(e.to_string()))?;
    Ok(decoded.to_rgb8())
}

/// `order` gives the byte positions of [Y0, U, Y1, V] inside each 4-byte macropixel
fn convert_yuv422(frame: &FrameBuffer, order: [usize; 4]) -> Result<RgbImage, ConvertError> {
    let width = frame.width as usize;
    let stride = frame.stride().max(width * 2);
    let data = check_len(frame, stride, width * 2)?;

    let mut image = RgbImage::new(frame.width, frame.height);
    for (y, row) in image.rows_mut().enumerate() {
        let line = &data[y * stride..y * stride + width * 2];
        let mut pixels = row;
        for macro_px in line.chunks_exact(4) {
            let y0 = macro_px[order[0]];
            let u = macro_px[order[1]];
            let y1 = macro_px[order[2]];
            let v = macro_px[order[3]];
            if let Some(px) = pixels.next() {
                px.0 = yuv_to_rgb(y0, u, v);
            }
            if let Some(px) = pixels.next() {
                px.0 = yuv_to_rgb(y1, u, v);
            }
        }
    }
    Ok(image)
}

fn convert_rgb(frame: &FrameBuffer, swap: bool) -> Result<RgbImage, ConvertError> {
    let width = frame.width as usize;
    let stride = frame.stride().max(width * 3);
    let data = check_len(frame, stride, width * 3)?;

    let mut image = RgbImage::new(frame.width, frame.height);
    for (y, row) in image.rows_mut().enumerate() {
        let line = &data[y * stride..y * stride + width * 3];
        for (px, src) in row.zip(line.chunks_exact(3)) {
            px.0 = if swap {
                [src[2], src[1], src[0]]
            } else {
                [src[0], src[1], src[2]]
            };
        }
    }
    Ok(image)
}

fn convert_grey(frame: &FrameBuffer) -> Result<RgbImage, ConvertError> {
    let width = frame.width as usize;
    let stride = frame.stride().max(width);
    let data = check_len(frame, stride, width)?;

    let mut image = RgbImage::new(frame.width, frame.height);
    for (y, row) in image.rows_mut().enumerate() {
        let line = &data[y * stride..y * stride + width];
        for (px, &luma) in row.zip(line) {
            px.0 = [luma, luma, luma];
        }
    }
    Ok(image)
}

// BT.601 limited range, integer approximation
fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = (y as i32 - 16).max(0) * 298;
    let d = u as i32 - 128;
    let e = v as i32 - 128;
    let clamp = |x: i32| ((x + 128) >> 8).clamp(0, 255) as u8;
    [
        clamp(c + 409 * e),
        clamp(c - 100 * d - 208 * e),
        clamp(c + 516 * d),
    ]
}
