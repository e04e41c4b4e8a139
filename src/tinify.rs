//! Client for the TinyPNG ("Tinify") shrink API.
//!
//! Every mode starts with the same upload: the raw image is POSTed to the
//! shrink endpoint and the service answers with the URL of the compressed
//! output. That URL is then fetched as-is, or POSTed a `convert` / `resize`
//! directive. Nothing is retried.

use reqwest::{
    Response,
    header::{CONTENT_TYPE, HeaderMap},
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    compress::{
        CompressedImage, ResizeDirective, ResizeSpec, TextureCompressor, Transform,
        mime_type_for_format,
    },
    error::{Error, Result},
};

pub const DEFAULT_ENDPOINT: &str = "https://api.tinify.com/shrink";

const API_USER: &str = "api";
const DEFAULT_MIME_TYPE: &str = "image/jpeg";
const GENERIC_API_ERROR: &str = "TinyPNG API error";

#[derive(Debug, Clone)]
pub struct TinifyClient {
    http: reqwest::Client,
    endpoint: String,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    output: UploadOutput,
}

#[derive(Debug, Deserialize)]
struct UploadOutput {
    url: String,
    #[serde(default)]
    size: u64,
    #[serde(default, rename = "type")]
    mime_type: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: Option<String>,
    error: Option<String>,
}

#[derive(Serialize)]
struct ConvertRequest<'a> {
    convert: ConvertTarget<'a>,
}

#[derive(Serialize)]
struct ConvertTarget<'a> {
    #[serde(rename = "type")]
    format: &'a str,
}

#[derive(Serialize)]
struct ResizeRequest {
    resize: ResizeDirective,
}

impl Default for TinifyClient {
    fn default() -> Self {
        Self::new(DEFAULT_ENDPOINT)
    }
}

impl TinifyClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self::with_http_client(reqwest::Client::new(), endpoint)
    }

    pub fn with_http_client(http: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Uploads the raw image and returns the URL of the compressed output.
    pub async fn upload(&self, api_key: &str, image: &[u8]) -> Result<String> {
        let response = self
            .http
            .post(&self.endpoint)
            .basic_auth(API_USER, Some(api_key))
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(image.to_vec())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::compression(format!(
                "{GENERIC_API_ERROR} ({}): {}",
                status.as_u16(),
                api_error_message(&body)
            )));
        }

        let upload: UploadResponse = response.json().await?;
        debug!(
            input = image.len(),
            output = upload.output.size,
            mime_type = %upload.output.mime_type,
            "tinify upload finished"
        );
        Ok(upload.output.url)
    }

    async fn download(&self, api_key: &str, output_url: &str) -> Result<CompressedImage> {
        let response = self
            .http
            .get(output_url)
            .basic_auth(API_USER, Some(api_key))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::compression("Failed to download compressed texture"));
        }

        let mime_type = content_type(response.headers()).unwrap_or(DEFAULT_MIME_TYPE.to_string());
        let data = response.bytes().await?.to_vec();
        Ok(CompressedImage {
            data,
            mime_type,
            format_changed: false,
        })
    }

    async fn convert(
        &self,
        api_key: &str,
        output_url: &str,
        format: &str,
    ) -> Result<CompressedImage> {
        let response = self
            .http
            .post(output_url)
            .basic_auth(API_USER, Some(api_key))
            .json(&ConvertRequest {
                convert: ConvertTarget { format },
            })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::compression(format!(
                "Failed to convert texture: {}",
                response.status().as_u16()
            )));
        }

        let mime_type = content_type(response.headers())
            .unwrap_or_else(|| mime_type_for_format(format).to_string());
        let data = response.bytes().await?.to_vec();
        Ok(CompressedImage {
            data,
            mime_type,
            format_changed: false,
        })
    }

    /// Reads the dimensions of the uploaded image from the output's headers.
    async fn dimensions(&self, api_key: &str, output_url: &str) -> Result<(u32, u32)> {
        let response = self
            .http
            .head(output_url)
            .basic_auth(API_USER, Some(api_key))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(failure("Failed to read texture dimensions", response).await);
        }

        let headers = response.headers();
        Ok((
            header_u32(headers, "Image-Width"),
            header_u32(headers, "Image-Height"),
        ))
    }

    async fn resize(
        &self,
        api_key: &str,
        output_url: &str,
        spec: &ResizeSpec,
    ) -> Result<CompressedImage> {
        let (width, height) = self.dimensions(api_key, output_url).await?;
        let directive = spec.directive(width, height)?;
        debug!(width, height, ?directive, "resizing texture");

        let response = self
            .http
            .post(output_url)
            .basic_auth(API_USER, Some(api_key))
            .json(&ResizeRequest { resize: directive })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(failure("Failed to resize texture", response).await);
        }

        let mime_type = content_type(response.headers()).unwrap_or(DEFAULT_MIME_TYPE.to_string());
        let data = response.bytes().await?.to_vec();
        Ok(CompressedImage {
            data,
            mime_type,
            format_changed: false,
        })
    }
}

impl TextureCompressor for TinifyClient {
    async fn compress(
        &self,
        api_key: &str,
        image: &[u8],
        transform: &Transform,
    ) -> Result<CompressedImage> {
        if let Transform::Resize(spec) = transform {
            spec.validate()?;
        }

        let output_url = self.upload(api_key, image).await?;
        match transform {
            Transform::Compress => self.download(api_key, &output_url).await,
            Transform::Convert(format) => self.convert(api_key, &output_url, format).await,
            Transform::Resize(spec) => self.resize(api_key, &output_url, spec).await,
        }
    }
}

async fn failure(what: &str, response: Response) -> Error {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    Error::compression(format!("{what} ({status}): {body}"))
}

fn api_error_message(body: &str) -> String {
    match serde_json::from_str::<ApiErrorBody>(body) {
        Ok(parsed) => parsed
            .message
            .or(parsed.error)
            .unwrap_or(GENERIC_API_ERROR.to_string()),
        Err(_) if !body.is_empty() => body.to_string(),
        Err(_) => GENERIC_API_ERROR.to_string(),
    }
}

fn content_type(headers: &HeaderMap) -> Option<String> {
    headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

fn header_u32(headers: &HeaderMap, name: &str) -> u32 {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(0)
}
