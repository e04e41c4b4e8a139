//! The compression capability shared by the remote Tinify client and the
//! in-process fallback.
//!
//! Every texture in a request is sent through one [`TextureCompressor`] with
//! the same [`Transform`]. The remote and local backends differ only in where
//! the bytes are crunched.

use std::future::Future;

use serde::Serialize;

use crate::{
    error::{Error, Result},
    local::LocalCompressor,
    tinify::TinifyClient,
};

/// What to do with a texture besides compressing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transform {
    Compress,
    /// Convert to the named format (`png`, `jpeg`, `webp`, `avif`).
    Convert(String),
    Resize(ResizeSpec),
}

impl Transform {
    pub fn is_conversion(&self) -> bool {
        matches!(self, Transform::Convert(_))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResizeSpec {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub percentage: Option<u32>,
    pub aspect_ratio_locked: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResizeMethod {
    Fit,
    Scale,
}

/// The `resize` object understood by the Tinify transform endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResizeDirective {
    pub method: ResizeMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

impl ResizeSpec {
    pub fn is_empty(&self) -> bool {
        self.width.is_none() && self.height.is_none() && self.percentage.is_none()
    }

    pub fn validate(&self) -> Result<()> {
        if self.is_empty() {
            return Err(Error::compression("No resize options provided"));
        }
        Ok(())
    }

    /// Resolves the requested size against the original dimensions of an image.
    ///
    /// A percentage wins over explicit dimensions and always uses `fit`.
    /// A single dimension selects `scale` so the other one follows.
    pub fn directive(&self, original_width: u32, original_height: u32) -> Result<ResizeDirective> {
        if let Some(percentage) = self.percentage {
            return Ok(ResizeDirective {
                method: ResizeMethod::Fit,
                width: Some(scale_dimension(original_width, percentage)),
                height: Some(scale_dimension(original_height, percentage)),
            });
        }

        match (self.width, self.height) {
            (Some(width), Some(height)) => Ok(ResizeDirective {
                method: ResizeMethod::Fit,
                width: Some(width),
                height: Some(height),
            }),
            (None, None) => Err(Error::compression("No resize options provided")),
            (width, height) => Ok(ResizeDirective {
                method: ResizeMethod::Scale,
                width,
                height,
            }),
        }
    }
}

fn scale_dimension(dimension: u32, percentage: u32) -> u32 {
    (f64::from(dimension) * f64::from(percentage) / 100.0).round() as u32
}

/// Bytes handed back by a compression backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressedImage {
    pub data: Vec<u8>,
    pub mime_type: String,
    /// Set when the backend re-encoded into a different container format
    /// than the one it was given, even though no conversion was asked for.
    pub format_changed: bool,
}

pub trait TextureCompressor: Send + Sync {
    fn compress(
        &self,
        api_key: &str,
        image: &[u8],
        transform: &Transform,
    ) -> impl Future<Output = Result<CompressedImage>> + Send;
}

/// Picks the remote service when a key is available, otherwise crunches locally.
#[derive(Debug, Clone)]
pub enum Backend {
    Tinify(TinifyClient),
    Local(LocalCompressor),
}

impl TextureCompressor for Backend {
    async fn compress(
        &self,
        api_key: &str,
        image: &[u8],
        transform: &Transform,
    ) -> Result<CompressedImage> {
        match self {
            Backend::Tinify(client) => client.compress(api_key, image, transform).await,
            Backend::Local(local) => local.compress(api_key, image, transform).await,
        }
    }
}

pub fn mime_type_for_format(format: &str) -> &'static str {
    match format {
        "png" => "image/png",
        "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "avif" => "image/avif",
        _ => "image/jpeg",
    }
}
