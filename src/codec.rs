use image::DynamicImage;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Rgb8,
    Luma8,
}

impl PixelFormat {
    pub fn channels(self) -> usize {
        match self {
            PixelFormat::Rgb8 => 3,
            PixelFormat::Luma8 => 1,
        }
    }
}

/// Tightly packed, row-major raster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Raster {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub data: Vec<u8>,
}

/// Turns an encoded image payload into a raster.
///
/// Must only fail on structurally invalid input; a heavily compressed but
/// well-formed image still decodes.
pub trait FrameDecoder: Send + Sync + 'static {
    fn decode(&self, payload: &[u8]) -> Result<Raster>;
}

/// Decodes any format the `image` crate recognizes (JPEG, PNG, ...).
/// Grayscale images such as disparity maps stay single channel.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageCodec;

impl FrameDecoder for ImageCodec {
    fn decode(&self, payload: &[u8]) -> Result<Raster> {
        let image = image::load_from_memory(payload).map_err(|e| Error::Decode(e.to_string()))?;
        let (width, height) = (image.width(), image.height());
        let raster = match image {
            DynamicImage::ImageLuma8(gray) => Raster {
                width,
                height,
                format: PixelFormat::Luma8,
                data: gray.into_raw(),
            },
            other => Raster {
                width,
                height,
                format: PixelFormat::Rgb8,
                data: other.to_rgb8().into_raw(),
            },
        };
        Ok(raster)
    }
}
