use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
};

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand};
use futures_util::future::join_all;
use glb_squeeze::{
    config::MIB,
    prelude::*,
    tinify::DEFAULT_ENDPOINT,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Most files accepted by one `optimize` run.
const MAX_FILES: usize = 10;

#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Accept multipart glb uploads over HTTP.
    Serve(ServeArgs),
    /// Optimize glb files on disk.
    Optimize(OptimizeArgs),
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Upload ceiling in MiB.
    #[arg(long)]
    max_upload_mb: Option<usize>,

    #[arg(long)]
    tinify_endpoint: Option<String>,
}

#[derive(Args, Debug)]
struct OptimizeArgs {
    /// Files to process; anything without a .glb extension is ignored.
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// TinyPNG API key. Textures are compressed locally without one.
    #[arg(long, env = "TINYPNG_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    #[arg(long, default_value = DEFAULT_ENDPOINT)]
    tinify_endpoint: String,

    /// Convert textures to png, jpeg, webp or avif.
    #[arg(long)]
    format: Option<String>,

    #[arg(long)]
    width: Option<u32>,

    #[arg(long)]
    height: Option<u32>,

    /// Let --width and --height change the aspect ratio.
    #[arg(long)]
    unlock_aspect: bool,

    /// Resize textures to this percentage of their size.
    #[arg(long, conflicts_with_all = ["width", "height"])]
    percentage: Option<u32>,

    /// Leave textures untouched.
    #[arg(long)]
    no_textures: bool,

    /// Simplify meshes after the texture step.
    #[arg(long)]
    simplify: bool,

    /// Share of triangles to keep when simplifying.
    #[arg(long, default_value_t = 0.5)]
    ratio: f32,

    /// Error threshold for simplification.
    #[arg(long, default_value_t = 0.01)]
    error: f32,

    /// Output directory, next to each input by default.
    #[arg(short, long)]
    out_dir: Option<PathBuf>,

    /// Also write every optimized texture as its own file.
    #[arg(long)]
    dump_textures: bool,
}

impl OptimizeArgs {
    fn process_options(&self) -> ProcessOptions {
        let textures = TextureOptions {
            target_format: self
                .format
                .as_deref()
                .and_then(glb_squeeze::options::parse_format),
            custom_width: self.width.filter(|&w| w > 0),
            custom_height: self.height.filter(|&h| h > 0),
            aspect_ratio_locked: !self.unlock_aspect,
            resize_percentage: self.percentage.filter(|&p| p > 0),
        };

        ProcessOptions {
            textures: (!self.no_textures).then_some(textures),
            simplify: self.simplify.then_some(SimplifySettings {
                ratio: self.ratio,
                error: self.error,
            }),
        }
    }
}

fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve(args) => serve(args).await,
        Command::Optimize(args) => {
            init_tracing("info");
            optimize(args).await
        }
    }
}

impl ServeArgs {
    /// Applies the command-line overrides on top of a loaded configuration.
    fn apply(self, mut config: ServerConfig) -> anyhow::Result<ServerConfig> {
        if let Some(bind) = self.bind {
            config.bind = bind;
        }
        if let Some(mb) = self.max_upload_mb {
            let Some(bytes) = mb.checked_mul(MIB) else {
                bail!("--max-upload-mb {mb} is too large");
            };
            config.max_upload_bytes = bytes;
        }
        if let Some(endpoint) = self.tinify_endpoint {
            config.tinify_endpoint = endpoint;
        }
        Ok(config)
    }
}

async fn serve(args: ServeArgs) -> anyhow::Result<()> {
    let config = match &args.config {
        Some(path) => ServerConfig::load(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => ServerConfig::default(),
    };
    let config = args.apply(config)?;

    init_tracing(&config.log_level);
    glb_squeeze::server::serve(config).await?;
    Ok(())
}

async fn optimize(args: OptimizeArgs) -> anyhow::Result<()> {
    let files: Vec<&PathBuf> = args.files.iter().filter(|path| is_glb(path)).collect();
    if files.is_empty() {
        bail!("Please select GLB files only");
    }
    if files.len() > MAX_FILES {
        bail!("Maximum {MAX_FILES} files allowed at once");
    }

    let backend = match &args.api_key {
        Some(_) => Backend::Tinify(TinifyClient::new(args.tinify_endpoint.clone())),
        None => {
            warn!("no TinyPNG API key given, compressing textures locally");
            Backend::Local(LocalCompressor)
        }
    };
    let api_key = args.api_key.clone().unwrap_or_default();
    let options = args.process_options();

    let results = join_all(
        files
            .iter()
            .map(|path| optimize_file(path, &backend, &api_key, &options, &args)),
    )
    .await;

    let mut failed = 0;
    for (path, result) in files.iter().zip(results) {
        if let Err(err) = result {
            error!(file = %path.display(), "{err:#}");
            failed += 1;
        }
    }

    if failed > 0 {
        bail!("{failed} of {} files failed", files.len());
    }
    Ok(())
}

async fn optimize_file(
    path: &Path,
    backend: &Backend,
    api_key: &str,
    options: &ProcessOptions,
    args: &OptimizeArgs,
) -> anyhow::Result<()> {
    let glb = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    let original_size = glb.len();
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .context("file name is not valid UTF-8")?;

    let processed = process_glb(file_name, glb, backend, api_key, options).await?;

    let out_dir = match &args.out_dir {
        Some(dir) => dir.clone(),
        None => path.parent().map(Path::to_path_buf).unwrap_or_default(),
    };
    tokio::fs::create_dir_all(&out_dir).await?;

    let out_path = out_dir.join(&processed.filename);
    tokio::fs::write(&out_path, &processed.processed_glb_data)
        .await
        .with_context(|| format!("failed to write {}", out_path.display()))?;

    if args.dump_textures {
        let stem = processed.filename.trim_end_matches(".glb");
        for texture in &processed.optimized_textures {
            let texture_path = out_dir.join(format!(
                "{stem}_{}.{}",
                texture.name.replace(['/', '\\'], "_"),
                extension_for(&texture.mime_type)
            ));
            tokio::fs::write(&texture_path, &texture.data).await?;
        }
    }

    info!(
        file = %out_path.display(),
        original_size,
        processed_size = processed.processed_size,
        textures_optimized = processed.textures_optimized,
        texture_bytes_before = processed.original_texture_size,
        texture_bytes_after = processed.optimized_texture_size,
        triangles_after = processed.mesh_simplification.map(|report| report.after.triangles),
        "wrote optimized glb"
    );
    Ok(())
}

fn is_glb(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("glb"))
}

fn extension_for(mime_type: &str) -> &'static str {
    match mime_type {
        "image/png" => "png",
        "image/webp" => "webp",
        "image/avif" => "avif",
        _ => "jpg",
    }
}
