//! HTTP front end.
//!
//! One endpoint takes a multipart upload, runs it through the pipeline and
//! answers with the JSON envelope from [`crate::response`]. The handler keeps
//! no state between requests; the compressor it holds is immutable.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{
        DefaultBodyLimit, Multipart, State,
        multipart::{MultipartError, MultipartRejection},
    },
    http::{HeaderValue, StatusCode, header},
    middleware,
    response::{IntoResponse, Response},
    routing::{MethodRouter, post},
};
use tracing::{error, info, warn};

use crate::{
    compress::TextureCompressor,
    config::ServerConfig,
    error::{Error, Result},
    options::{TextureOptions, parse_flag, parse_format, parse_positive},
    pipeline::{self, ProcessOptions},
    response::ProcessResponse,
    simplify::SimplifySettings,
    tinify::TinifyClient,
};

/// Room for the non-file form fields on top of the upload ceiling.
const FORM_OVERHEAD: usize = 1024 * 1024;

pub struct AppState<C> {
    compressor: Arc<C>,
    max_upload_bytes: usize,
    max_upload_label: String,
}

impl<C> Clone for AppState<C> {
    fn clone(&self) -> Self {
        Self {
            compressor: Arc::clone(&self.compressor),
            max_upload_bytes: self.max_upload_bytes,
            max_upload_label: self.max_upload_label.clone(),
        }
    }
}

/// Builds the application with the given compression backend.
pub fn router<C: TextureCompressor + 'static>(compressor: C, config: &ServerConfig) -> Router {
    let state = AppState {
        compressor: Arc::new(compressor),
        max_upload_bytes: config.max_upload_bytes,
        max_upload_label: config.max_upload_label(),
    };

    let endpoint: MethodRouter<AppState<C>> = post(process_upload::<C>)
        .options(preflight)
        .fallback(method_not_allowed);

    Router::new()
        .route("/", endpoint.clone())
        .route("/{*path}", endpoint)
        .layer(DefaultBodyLimit::max(
            config.max_upload_bytes.saturating_add(FORM_OVERHEAD),
        ))
        .layer(middleware::map_response(with_cors_headers))
        .with_state(state)
}

/// Serves the Tinify-backed application until ctrl-c.
pub async fn serve(config: ServerConfig) -> Result<()> {
    let app = router(TinifyClient::new(config.tinify_endpoint.clone()), &config);
    let listener = tokio::net::TcpListener::bind(config.bind).await?;
    info!(
        addr = %listener.local_addr()?,
        max_upload = %config.max_upload_label(),
        "listening for glb uploads"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(%err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

async fn with_cors_headers(mut response: Response) -> Response {
    let headers = response.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, PUT, DELETE, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type, Authorization"),
    );
    response
}

async fn preflight() -> StatusCode {
    StatusCode::OK
}

async fn method_not_allowed() -> Response {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        Json(ProcessResponse::failure("Method not allowed")),
    )
        .into_response()
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(err = %self, "error processing glb file");
        } else {
            warn!(err = %self, "rejected upload");
        }
        (status, Json(ProcessResponse::failure(self.to_string()))).into_response()
    }
}

/// The form fields of one upload.
#[derive(Debug, Default)]
struct UploadForm {
    file_name: Option<String>,
    glb: Option<Vec<u8>>,
    api_key: Option<String>,
    texture_optimization: bool,
    textures: TextureOptions,
    simplify: bool,
    simplify_ratio: Option<f32>,
    simplify_error: Option<f32>,
}

impl UploadForm {
    fn set_text(&mut self, name: &str, value: String) {
        match name {
            "apiKey" => self.api_key = Some(value).filter(|key| !key.is_empty()),
            "textureOptimizationEnabled" => self.texture_optimization = parse_flag(&value),
            "targetFormat" => self.textures.target_format = parse_format(&value),
            "customWidth" => self.textures.custom_width = parse_positive(&value),
            "customHeight" => self.textures.custom_height = parse_positive(&value),
            "aspectRatioLocked" => self.textures.aspect_ratio_locked = parse_flag(&value),
            "resizePercentage" => self.textures.resize_percentage = parse_positive(&value),
            "meshSimplificationEnabled" => self.simplify = parse_flag(&value),
            "simplifyRatio" => self.simplify_ratio = value.trim().parse().ok(),
            "simplifyError" => self.simplify_error = value.trim().parse().ok(),
            _ => {}
        }
    }

    fn process_options(&self) -> ProcessOptions {
        let defaults = SimplifySettings::default();
        ProcessOptions {
            textures: self.texture_optimization.then(|| self.textures.clone()),
            simplify: self.simplify.then(|| SimplifySettings {
                ratio: self.simplify_ratio.unwrap_or(defaults.ratio),
                error: self.simplify_error.unwrap_or(defaults.error),
            }),
        }
    }
}

async fn process_upload<C: TextureCompressor + 'static>(
    State(state): State<AppState<C>>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Response {
    let result = match multipart {
        Ok(multipart) => handle_upload(&state, multipart).await,
        Err(rejection) => Err(Error::validation(rejection.body_text())),
    };

    match result {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn handle_upload<C: TextureCompressor>(
    state: &AppState<C>,
    mut multipart: Multipart,
) -> Result<ProcessResponse> {
    let form = read_form(state, &mut multipart).await?;

    let glb_file = match (&form.file_name, &form.glb) {
        (Some(name), Some(glb)) => format!("{name} ({} bytes)", glb.len()),
        _ => "null".to_string(),
    };
    let (has_file, has_key) = (form.glb.is_some(), form.api_key.is_some());
    info!(
        %glb_file,
        api_key = if has_key { "present" } else { "missing" },
        "received upload"
    );

    let options = form.process_options();
    let (Some(file_name), Some(glb), Some(api_key)) = (form.file_name, form.glb, form.api_key)
    else {
        return Err(Error::validation(format!(
            "Missing GLB file or API key. GlbFile: {has_file}, ApiKey: {has_key}"
        )));
    };

    if !file_name.to_lowercase().ends_with(".glb") {
        return Err(Error::validation(
            "Invalid file type. Only GLB files are allowed.",
        ));
    }

    if glb.len() > state.max_upload_bytes {
        return Err(too_large(state));
    }

    info!(
        texture_optimization = options.textures.is_some(),
        mesh_simplification = options.simplify.is_some(),
        "starting glb processing"
    );

    let processed = pipeline::process_glb(
        &file_name,
        glb,
        state.compressor.as_ref(),
        &api_key,
        &options,
    )
    .await?;

    Ok(ProcessResponse::ok(processed))
}

async fn read_form<C>(state: &AppState<C>, multipart: &mut Multipart) -> Result<UploadForm> {
    let mut form = UploadForm::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| multipart_error(state, err))?
    {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };

        if name == "glbFile" {
            form.file_name = Some(field.file_name().unwrap_or_default().to_string());
            let data = field
                .bytes()
                .await
                .map_err(|err| multipart_error(state, err))?;
            form.glb = Some(data.to_vec());
        } else {
            let value = field
                .text()
                .await
                .map_err(|err| multipart_error(state, err))?;
            form.set_text(&name, value);
        }
    }

    Ok(form)
}

fn too_large<C>(state: &AppState<C>) -> Error {
    Error::validation(format!(
        "File too large. Maximum size is {}.",
        state.max_upload_label
    ))
}

fn multipart_error<C>(state: &AppState<C>, err: MultipartError) -> Error {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        too_large(state)
    } else {
        Error::validation(format!("Malformed form data: {}", err.body_text()))
    }
}
