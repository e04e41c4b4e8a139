//! JSON envelope returned to clients.

use base64::{Engine, prelude::BASE64_STANDARD};
use serde::{Serialize, Serializer};

use crate::simplify::SimplificationReport;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizedTexture {
    pub name: String,
    #[serde(serialize_with = "as_base64")]
    pub data: Vec<u8>,
    pub mime_type: String,
    pub original_size: usize,
    pub optimized_size: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedGlb {
    #[serde(serialize_with = "as_base64")]
    pub processed_glb_data: Vec<u8>,
    pub processed_size: usize,
    pub filename: String,
    pub textures_optimized: usize,
    pub original_texture_size: usize,
    pub optimized_texture_size: usize,
    pub optimized_textures: Vec<OptimizedTexture>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mesh_simplification: Option<SimplificationReport>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<ProcessedGlb>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProcessResponse {
    pub fn ok(data: ProcessedGlb) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }
}

fn as_base64<T, S>(bytes: &T, serializer: S) -> Result<S::Ok, S::Error>
where
    T: AsRef<[u8]>,
    S: Serializer,
{
    serializer.serialize_str(&BASE64_STANDARD.encode(bytes.as_ref()))
}
