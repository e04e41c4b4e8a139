use crate::compress::{ResizeSpec, Transform};

/// Sentinel sent by clients that only want compression.
pub const COMPRESS_ONLY: &str = "compress";

/// Texture settings of one request, applied to every texture in it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextureOptions {
    pub target_format: Option<String>,
    pub custom_width: Option<u32>,
    pub custom_height: Option<u32>,
    pub aspect_ratio_locked: bool,
    pub resize_percentage: Option<u32>,
}

impl TextureOptions {
    /// Format conversion takes precedence over resizing; with neither set
    /// the textures are only compressed.
    pub fn transform(&self) -> Transform {
        if let Some(format) = &self.target_format {
            return Transform::Convert(format.clone());
        }

        let spec = ResizeSpec {
            width: self.custom_width,
            height: self.custom_height,
            percentage: self.resize_percentage,
            aspect_ratio_locked: self.aspect_ratio_locked,
        };
        if spec.is_empty() {
            Transform::Compress
        } else {
            Transform::Resize(spec)
        }
    }
}

/// Normalizes a target format field; empty and `compress` mean no conversion.
pub fn parse_format(value: &str) -> Option<String> {
    let format = value.trim().to_ascii_lowercase();
    if format.is_empty() || format == COMPRESS_ONLY {
        None
    } else {
        Some(format)
    }
}

/// Reads the leading integer of a decimal field. Zero counts as unset.
pub fn parse_positive(value: &str) -> Option<u32> {
    let value = value.trim();
    let digits = value
        .find(|c: char| !c.is_ascii_digit())
        .map_or(value, |end| &value[..end]);
    digits.parse().ok().filter(|&n| n > 0)
}

pub fn parse_flag(value: &str) -> bool {
    value == "true"
}
