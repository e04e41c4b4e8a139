use axum::http::StatusCode;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The request was rejected before any processing started.
    #[error("{0}")]
    Validation(String),

    /// The compression backend refused or failed to process an image.
    #[error("{0}")]
    Compression(String),

    #[error("invalid glb container: {0}")]
    Glb(#[from] gltf::Error),

    #[error("unsupported glb layout: {0}")]
    Unsupported(String),

    #[error("failed to serialize glTF json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("image codec error: {0}")]
    Image(#[from] image::ImageError),

    #[error("image resize error: {0}")]
    Resize(String),

    #[error("mesh simplification failed: {0}")]
    Simplify(String),

    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    pub fn compression(msg: impl Into<String>) -> Self {
        Error::Compression(msg.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<fast_image_resize::ResizeError> for Error {
    fn from(err: fast_image_resize::ResizeError) -> Self {
        Error::Resize(err.to_string())
    }
}

impl From<fast_image_resize::ImageBufferError> for Error {
    fn from(err: fast_image_resize::ImageBufferError) -> Self {
        Error::Resize(err.to_string())
    }
}
