//! Camera image frames and their normalization for the detector.
//!
//! Frames arrive with a sensor encoding string (`bgr8`, `rgb8`, `mono8`,
//! `bgra8`, `rgba8`, `nv12`). The detector always receives an 8-bit luma
//! image that has been histogram-equalized.

use image::{GrayImage, Luma};
use serde::{Deserialize, Serialize};

use crate::error::{TrackError, TrackResult};
use crate::wire::{hex_bytes, Header};

/// Pixel encodings accepted from the camera.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Encoding {
    Mono8,
    Rgb8,
    Bgr8,
    Rgba8,
    Bgra8,
    Nv12,
}

impl Encoding {
    pub fn parse(name: &str) -> TrackResult<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "mono8" | "8uc1" => Ok(Self::Mono8),
            "rgb8" => Ok(Self::Rgb8),
            "bgr8" | "8uc3" => Ok(Self::Bgr8),
            "rgba8" => Ok(Self::Rgba8),
            "bgra8" | "8uc4" => Ok(Self::Bgra8),
            "nv12" => Ok(Self::Nv12),
            other => Err(TrackError::conversion(format!(
                "unsupported encoding '{}'",
                other
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mono8 => "mono8",
            Self::Rgb8 => "rgb8",
            Self::Bgr8 => "bgr8",
            Self::Rgba8 => "rgba8",
            Self::Bgra8 => "bgra8",
            Self::Nv12 => "nv12",
        }
    }

    /// Bytes per pixel of the first (or only) plane.
    fn bytes_per_pixel(&self) -> usize {
        match self {
            Self::Mono8 | Self::Nv12 => 1,
            Self::Rgb8 | Self::Bgr8 => 3,
            Self::Rgba8 | Self::Bgra8 => 4,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImageFrame {
    pub header: Header,
    pub height: u32,
    pub width: u32,
    pub encoding: String,
    /// Bytes per row of the first plane.
    pub step: u32,
    #[serde(with = "hex_bytes")]
    pub data: Vec<u8>,
}

impl ImageFrame {
    /// Tightly packed frame in the given encoding.
    pub fn packed(header: Header, width: u32, height: u32, encoding: Encoding, data: Vec<u8>) -> Self {
        Self {
            header,
            height,
            width,
            encoding: encoding.as_str().to_string(),
            step: width * encoding.bytes_per_pixel() as u32,
            data,
        }
    }

    /// Convert to 8-bit luma using BT.601 weights for color encodings.
    pub fn to_gray(&self) -> TrackResult<GrayImage> {
        let encoding = Encoding::parse(&self.encoding)?;
        if self.width == 0 || self.height == 0 {
            return Err(TrackError::conversion("image has zero width or height"));
        }

        let width = self.width as usize;
        let height = self.height as usize;
        let step = self.step as usize;
        let bpp = encoding.bytes_per_pixel();

        let row_bytes = width
            .checked_mul(bpp)
            .ok_or_else(|| TrackError::conversion("image dimensions overflow"))?;
        if step < row_bytes {
            return Err(TrackError::conversion(format!(
                "step {} is smaller than a {}-pixel {} row",
                step,
                width,
                encoding.as_str()
            )));
        }

        // NV12 carries a half-height interleaved chroma plane after luma.
        let rows = match encoding {
            Encoding::Nv12 => height + height.div_ceil(2),
            _ => height,
        };
        let expected = step
            .checked_mul(rows)
            .ok_or_else(|| TrackError::conversion("image dimensions overflow"))?;
        if self.data.len() < expected {
            return Err(TrackError::conversion(format!(
                "{} frame length mismatch: expected {}, got {}",
                encoding.as_str(),
                expected,
                self.data.len()
            )));
        }

        let data = &self.data;
        let gray = GrayImage::from_fn(self.width, self.height, |x, y| {
            let offset = y as usize * step + x as usize * bpp;
            let px = &data[offset..offset + bpp];
            let value = match encoding {
                Encoding::Mono8 | Encoding::Nv12 => px[0],
                Encoding::Rgb8 | Encoding::Rgba8 => luma(px[0], px[1], px[2]),
                Encoding::Bgr8 | Encoding::Bgra8 => luma(px[2], px[1], px[0]),
            };
            Luma([value])
        });
        Ok(gray)
    }
}

fn luma(r: u8, g: u8, b: u8) -> u8 {
    let weighted = 299 * u32::from(r) + 587 * u32::from(g) + 114 * u32::from(b);
    ((weighted + 500) / 1000) as u8
}

/// Spread the intensity histogram to improve detector robustness under
/// exposure changes.
pub fn equalize(gray: &GrayImage) -> GrayImage {
    imageproc::contrast::equalize_histogram(gray)
}

/// Grayscale conversion followed by histogram equalization.
pub fn prepare_for_detection(frame: &ImageFrame) -> TrackResult<GrayImage> {
    let gray = frame.to_gray()?;
    Ok(equalize(&gray))
}
