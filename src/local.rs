//! In-process fallback used when no Tinify API key is configured.
//!
//! Textures are decoded, resized with `fast_image_resize` and re-encoded with
//! `image`. When the re-encode does not save at least 5% it is redone once as
//! a JPEG.

use std::io::Write;

use image::{
    DynamicImage, ExtendedColorType, ImageEncoder, ImageFormat, RgbaImage,
    codecs::{jpeg::JpegEncoder, png::PngEncoder, webp::WebPEncoder},
};
use tracing::debug;

use crate::{
    compress::{CompressedImage, ResizeSpec, TextureCompressor, Transform},
    error::{Error, Result},
};

const JPEG_QUALITY: u8 = 90;
const FALLBACK_JPEG_QUALITY: u8 = 85;
/// A re-encode has to land below this share of the input to be kept.
const MIN_SAVINGS_RATIO: f64 = 0.95;
/// Largest output side accepted by the local resizer.
const MAX_DIMENSION: f64 = 16384.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputFormat {
    Png,
    Jpeg,
    WebP,
}

impl OutputFormat {
    fn parse(format: &str) -> Result<Self> {
        match format {
            "png" => Ok(OutputFormat::Png),
            "jpeg" | "jpg" => Ok(OutputFormat::Jpeg),
            "webp" => Ok(OutputFormat::WebP),
            other => Err(Error::compression(format!(
                "Format '{other}' cannot be encoded locally"
            ))),
        }
    }

    fn from_source(format: ImageFormat) -> Self {
        match format {
            ImageFormat::Jpeg => OutputFormat::Jpeg,
            ImageFormat::WebP => OutputFormat::WebP,
            _ => OutputFormat::Png,
        }
    }

    fn mime_type(self) -> &'static str {
        match self {
            OutputFormat::Png => "image/png",
            OutputFormat::Jpeg => "image/jpeg",
            OutputFormat::WebP => "image/webp",
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LocalCompressor;

impl TextureCompressor for LocalCompressor {
    async fn compress(
        &self,
        _api_key: &str,
        image: &[u8],
        transform: &Transform,
    ) -> Result<CompressedImage> {
        let data = image.to_vec();
        let transform = transform.clone();
        tokio::task::spawn_blocking(move || recompress(&data, &transform))
            .await
            .map_err(|err| Error::compression(format!("local compression task failed: {err}")))?
    }
}

/// Resizes and re-encodes one image according to `transform`.
pub fn recompress(data: &[u8], transform: &Transform) -> Result<CompressedImage> {
    let source_format = image::guess_format(data)?;
    let img = image::load_from_memory_with_format(data, source_format)?;
    let has_alpha = img.color().has_alpha();

    let output_format = match transform {
        Transform::Convert(format) => OutputFormat::parse(format)?,
        _ => OutputFormat::from_source(source_format),
    };

    let (width, height) = match transform {
        Transform::Resize(spec) => target_dimensions(img.width(), img.height(), spec)?,
        _ => (img.width(), img.height()),
    };
    let img = if (width, height) == (img.width(), img.height()) {
        img
    } else {
        resize(&img, width, height)?
    };

    let mut encoded = Vec::new();
    encode(&img, output_format, JPEG_QUALITY, has_alpha, &mut encoded)?;
    let mut format = output_format;

    if encoded.len() as f64 > data.len() as f64 * MIN_SAVINGS_RATIO {
        debug!(
            original = data.len(),
            encoded = encoded.len(),
            "re-encode saved too little, retrying as jpeg"
        );
        encoded.clear();
        encode(&img, OutputFormat::Jpeg, FALLBACK_JPEG_QUALITY, false, &mut encoded)?;
        format = OutputFormat::Jpeg;
    }

    Ok(CompressedImage {
        data: encoded,
        mime_type: format.mime_type().to_string(),
        format_changed: format != OutputFormat::from_source(source_format),
    })
}

/// Computes the output size for a resize request.
///
/// With the aspect ratio locked, a single dimension drives the other one and
/// a width/height pair is treated as a bounding box.
pub fn target_dimensions(width: u32, height: u32, spec: &ResizeSpec) -> Result<(u32, u32)> {
    let aspect = f64::from(width) / f64::from(height.max(1));

    let (w, h) = if let Some(percentage) = spec.percentage {
        let factor = f64::from(percentage) / 100.0;
        (f64::from(width) * factor, f64::from(height) * factor)
    } else {
        match (spec.width, spec.height) {
            (Some(w), Some(h)) if spec.aspect_ratio_locked => {
                let factor = (f64::from(w) / f64::from(width.max(1)))
                    .min(f64::from(h) / f64::from(height.max(1)));
                (f64::from(width) * factor, f64::from(height) * factor)
            }
            (Some(w), Some(h)) => (f64::from(w), f64::from(h)),
            (Some(w), None) if spec.aspect_ratio_locked => (f64::from(w), f64::from(w) / aspect),
            (Some(w), None) => (f64::from(w), f64::from(height)),
            (None, Some(h)) if spec.aspect_ratio_locked => (f64::from(h) * aspect, f64::from(h)),
            (None, Some(h)) => (f64::from(width), f64::from(h)),
            (None, None) => return Err(Error::compression("No resize options provided")),
        }
    };

    let (w, h) = (w.round(), h.round());
    if w > MAX_DIMENSION || h > MAX_DIMENSION {
        return Err(Error::compression(format!(
            "Resize to {w}x{h} exceeds the {MAX_DIMENSION}px limit"
        )));
    }

    Ok(((w as u32).max(1), (h as u32).max(1)))
}

fn resize(img: &DynamicImage, width: u32, height: u32) -> Result<DynamicImage> {
    let src_img = fast_image_resize::images::Image::from_vec_u8(
        img.width(),
        img.height(),
        img.to_rgba8().into_raw(),
        fast_image_resize::PixelType::U8x4,
    )?;

    let mut dst_img =
        fast_image_resize::images::Image::new(width, height, fast_image_resize::PixelType::U8x4);

    let mut resizer = fast_image_resize::Resizer::new();
    resizer.resize(&src_img, &mut dst_img, None)?;

    let rgba = RgbaImage::from_raw(width, height, dst_img.buffer().to_vec())
        .ok_or_else(|| Error::Resize("resized buffer has the wrong length".to_string()))?;
    Ok(DynamicImage::ImageRgba8(rgba))
}

/// `has_alpha` reflects the source image; resizing always yields RGBA.
fn encode<W: Write>(
    img: &DynamicImage,
    format: OutputFormat,
    quality: u8,
    has_alpha: bool,
    mut buf: W,
) -> Result<()> {
    let (width, height) = (img.width(), img.height());

    match format {
        OutputFormat::Jpeg => {
            let rgb = img.to_rgb8();
            JpegEncoder::new_with_quality(&mut buf, quality).write_image(
                rgb.as_raw(),
                width,
                height,
                ExtendedColorType::Rgb8,
            )?;
        }
        OutputFormat::Png if has_alpha => {
            let rgba = img.to_rgba8();
            PngEncoder::new(&mut buf).write_image(rgba.as_raw(), width, height, ExtendedColorType::Rgba8)?;
        }
        OutputFormat::Png => {
            let rgb = img.to_rgb8();
            PngEncoder::new(&mut buf).write_image(rgb.as_raw(), width, height, ExtendedColorType::Rgb8)?;
        }
        OutputFormat::WebP if has_alpha => {
            let rgba = img.to_rgba8();
            WebPEncoder::new_lossless(&mut buf).write_image(
                rgba.as_raw(),
                width,
                height,
                ExtendedColorType::Rgba8,
            )?;
        }
        OutputFormat::WebP => {
            let rgb = img.to_rgb8();
            WebPEncoder::new_lossless(&mut buf).write_image(
                rgb.as_raw(),
                width,
                height,
                ExtendedColorType::Rgb8,
            )?;
        }
    }

    Ok(())
}
