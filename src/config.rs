//! Server configuration.
//!
//! Every field has a default, so an empty (or missing) TOML file is a valid
//! configuration. Command-line flags are applied on top by the binary.

use std::{net::SocketAddr, path::Path};

use serde::Deserialize;

use crate::{
    error::{Error, Result},
    tinify::DEFAULT_ENDPOINT,
};

pub const MIB: usize = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    /// Largest accepted `glbFile` upload in bytes.
    pub max_upload_bytes: usize,
    pub tinify_endpoint: String,
    /// Default `tracing` filter when `RUST_LOG` is not set.
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 8787)),
            max_upload_bytes: 100 * MIB,
            tinify_endpoint: DEFAULT_ENDPOINT.to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl ServerConfig {
    pub fn from_toml(source: &str) -> Result<Self> {
        toml::from_str(source).map_err(|err| Error::Config(err.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml(&source)
    }

    /// The size limit phrased for error messages, e.g. `100MB`.
    pub fn max_upload_label(&self) -> String {
        format!("{}MB", self.max_upload_bytes / MIB)
    }
}
