//! Shrinks the textures embedded in GLB files through the TinyPNG API, with
//! an in-process fallback, and optionally simplifies their meshes.
//!
//! ```ignore
//! use glb_squeeze::prelude::*;
//!
//! let client = TinifyClient::default();
//! let options = ProcessOptions {
//!     textures: Some(TextureOptions::default()),
//!     simplify: None,
//! };
//! let processed = process_glb("model.glb", glb, &client, &api_key, &options).await?;
//! std::fs::write(&processed.filename, &processed.processed_glb_data)?;
//! ```

pub mod compress;
pub mod config;
pub mod error;
pub mod glb;
pub mod local;
pub mod options;
pub mod pipeline;
pub mod response;
pub mod server;
pub mod simplify;
pub mod tinify;

pub mod prelude {
    pub use crate::compress::{Backend, CompressedImage, ResizeSpec, TextureCompressor, Transform};
    pub use crate::config::ServerConfig;
    pub use crate::error::{Error, Result};
    pub use crate::glb::GlbDocument;
    pub use crate::local::LocalCompressor;
    pub use crate::options::TextureOptions;
    pub use crate::pipeline::{ProcessOptions, optimize_textures, output_filename, process_glb};
    pub use crate::response::{OptimizedTexture, ProcessResponse, ProcessedGlb};
    pub use crate::simplify::{SimplifySettings, simplify_glb};
    pub use crate::tinify::TinifyClient;
}
