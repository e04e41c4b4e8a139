//! The texture rewrite pipeline.
//!
//! Textures are sent through the compressor one at a time, in document
//! order. A texture that fails is logged and left as it was; the others
//! still go through. The per-texture outcomes are folded into the totals
//! once everything has run.

use std::{sync::Arc, time::Instant};

use tracing::{debug, info, warn};

use crate::{
    compress::{TextureCompressor, Transform},
    error::{Error, Result},
    glb::GlbDocument,
    options::TextureOptions,
    response::{OptimizedTexture, ProcessedGlb},
    simplify::{self, SimplificationReport, SimplifySettings},
};

/// What happened to one texture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextureOutcome {
    Optimized(OptimizedTexture),
    /// The texture has no embedded image data.
    Skipped,
    Failed { original_size: usize, reason: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextureReport {
    pub glb: Vec<u8>,
    pub textures_optimized: usize,
    pub original_texture_size: usize,
    pub optimized_texture_size: usize,
    pub optimized_textures: Vec<OptimizedTexture>,
}

impl TextureReport {
    /// A report for bytes that went through untouched.
    pub fn passthrough(glb: Vec<u8>) -> Self {
        Self {
            glb,
            ..Default::default()
        }
    }

    fn fold(glb: Vec<u8>, outcomes: Vec<TextureOutcome>) -> Self {
        let mut report = Self::passthrough(glb);
        for outcome in outcomes {
            match outcome {
                TextureOutcome::Optimized(texture) => {
                    report.original_texture_size += texture.original_size;
                    report.optimized_texture_size += texture.optimized_size;
                    report.textures_optimized += 1;
                    report.optimized_textures.push(texture);
                }
                TextureOutcome::Failed { original_size, .. } => {
                    report.original_texture_size += original_size;
                }
                TextureOutcome::Skipped => {}
            }
        }
        report
    }
}

/// Settings for one run of [`process_glb`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessOptions {
    /// `None` leaves the textures alone.
    pub textures: Option<TextureOptions>,
    /// `None` leaves the geometry alone.
    pub simplify: Option<SimplifySettings>,
}

/// Compresses every embedded texture of a GLB and re-serializes it.
pub async fn optimize_textures<C: TextureCompressor>(
    glb: &[u8],
    compressor: &C,
    api_key: &str,
    options: &TextureOptions,
) -> Result<TextureReport> {
    let mut doc = GlbDocument::from_slice(glb)?;
    let texture_count = doc.texture_count();
    if texture_count == 0 {
        info!("no textures found");
        return Ok(TextureReport::passthrough(glb.to_vec()));
    }

    let transform = options.transform();
    info!(texture_count, ?transform, "optimizing textures");

    let mut outcomes = Vec::with_capacity(texture_count);
    for index in 0..texture_count {
        let outcome = optimize_texture(&mut doc, index, compressor, api_key, &transform).await;
        if let TextureOutcome::Failed { reason, .. } = &outcome {
            warn!(index, %reason, "failed to process texture");
        }
        outcomes.push(outcome);
    }

    let glb = doc.to_vec()?;
    let report = TextureReport::fold(glb, outcomes);
    info!(
        optimized = report.textures_optimized,
        total = texture_count,
        original = report.original_texture_size,
        optimized_size = report.optimized_texture_size,
        "texture optimization complete"
    );
    Ok(report)
}

async fn optimize_texture<C: TextureCompressor>(
    doc: &mut GlbDocument,
    index: usize,
    compressor: &C,
    api_key: &str,
    transform: &Transform,
) -> TextureOutcome {
    let (name, original_size, result) = {
        let Some(texture) = doc.texture(index) else {
            return TextureOutcome::Skipped;
        };
        let Some(data) = texture.data.as_deref().filter(|data| !data.is_empty()) else {
            debug!(index, "texture has no image data, skipping");
            return TextureOutcome::Skipped;
        };

        let original_size = data.len();
        match imagesize::blob_size(data) {
            Ok(size) => debug!(
                index,
                original_size,
                width = size.width,
                height = size.height,
                "processing texture"
            ),
            Err(_) => debug!(index, original_size, "processing texture"),
        }

        let result = compressor.compress(api_key, data, transform).await;
        (texture.display_name(), original_size, result)
    };

    let compressed = match result {
        Ok(compressed) if compressed.data.is_empty() => {
            return TextureOutcome::Failed {
                original_size,
                reason: "compressor returned no data".to_string(),
            };
        }
        Ok(compressed) => compressed,
        Err(err) => {
            return TextureOutcome::Failed {
                original_size,
                reason: err.to_string(),
            };
        }
    };

    let optimized_size = compressed.data.len();
    debug!(
        index,
        original_size,
        optimized_size,
        reduction = %format!("{:.0}%", (1.0 - optimized_size as f64 / original_size as f64) * 100.0),
        "texture compressed"
    );

    let mime_type = (transform.is_conversion() || compressed.format_changed)
        .then_some(compressed.mime_type.as_str());
    if let Err(err) = doc.set_texture_image(index, compressed.data.clone(), mime_type) {
        return TextureOutcome::Failed {
            original_size,
            reason: err.to_string(),
        };
    }

    TextureOutcome::Optimized(OptimizedTexture {
        name,
        data: compressed.data,
        mime_type: compressed.mime_type,
        original_size,
        optimized_size,
    })
}

/// Derives the download name: the last extension is replaced by `_optimized.glb`.
pub fn output_filename(original: &str) -> String {
    let stem = match original.rfind('.') {
        Some(dot) if !original[dot + 1..].contains('/') && dot + 1 < original.len() => {
            &original[..dot]
        }
        _ => original,
    };
    format!("{stem}_optimized.glb")
}

/// Runs the texture step and then the optional mesh step on one GLB.
pub async fn process_glb<C: TextureCompressor>(
    file_name: &str,
    glb: Vec<u8>,
    compressor: &C,
    api_key: &str,
    options: &ProcessOptions,
) -> Result<ProcessedGlb> {
    let started = Instant::now();
    info!(file_name, size = glb.len(), "processing glb");

    let report = match &options.textures {
        Some(texture_options) => {
            optimize_textures(&glb, compressor, api_key, texture_options).await?
        }
        None => {
            info!("texture optimization disabled, keeping original glb data");
            TextureReport::passthrough(glb)
        }
    };

    let TextureReport {
        glb,
        textures_optimized,
        original_texture_size,
        optimized_texture_size,
        optimized_textures,
    } = report;

    let (glb, mesh_simplification) = match options.simplify {
        Some(settings) => simplify_or_passthrough(glb, settings).await,
        None => (glb, None),
    };

    info!(
        file_name,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "glb processing completed"
    );

    Ok(ProcessedGlb {
        processed_size: glb.len(),
        processed_glb_data: glb,
        filename: output_filename(file_name),
        textures_optimized,
        original_texture_size,
        optimized_texture_size,
        optimized_textures,
        mesh_simplification,
    })
}

/// Runs the mesh step off the runtime. Any failure, including a panic in the
/// task, hands the input back untouched.
pub async fn simplify_or_passthrough(
    glb: Vec<u8>,
    settings: SimplifySettings,
) -> (Vec<u8>, Option<SimplificationReport>) {
    let input = Arc::new(glb);
    let task_input = Arc::clone(&input);
    let result =
        tokio::task::spawn_blocking(move || simplify::simplify_glb(&task_input, &settings)).await;

    let err = match result {
        Ok(Ok((out, report))) => return (out, Some(report)),
        Ok(Err(err)) => err,
        Err(err) => Error::Simplify(err.to_string()),
    };
    warn!(%err, "mesh simplification failed, keeping the original geometry");
    let glb = Arc::try_unwrap(input).unwrap_or_else(|shared| shared.as_ref().clone());
    (glb, None)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn optimized(original_size: usize, optimized_size: usize) -> TextureOutcome {
        TextureOutcome::Optimized(OptimizedTexture {
            name: "albedo".to_string(),
            data: vec![0; optimized_size],
            mime_type: "image/png".to_string(),
            original_size,
            optimized_size,
        })
    }

    #[test]
    fn fold_counts_failures_towards_original_size_only() {
        let outcomes = vec![
            optimized(100, 40),
            TextureOutcome::Skipped,
            TextureOutcome::Failed {
                original_size: 50,
                reason: "boom".to_string(),
            },
            optimized(200, 120),
        ];
        let report = TextureReport::fold(vec![1, 2, 3], outcomes);
        assert_eq!(report.textures_optimized, 2);
        assert_eq!(report.original_texture_size, 350);
        assert_eq!(report.optimized_texture_size, 160);
        assert_eq!(report.optimized_textures.len(), 2);
        assert_eq!(report.glb, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn garbage_input_passes_through_the_mesh_step() {
        let input = b"definitely not a glb".to_vec();
        let (out, report) = simplify_or_passthrough(input.clone(), SimplifySettings::default()).await;
        assert_eq!(out, input);
        assert!(report.is_none());
    }

    #[test]
    fn output_names_replace_the_extension() {
        assert_eq!(output_filename("model.glb"), "model_optimized.glb");
        assert_eq!(output_filename("Model.GLB"), "Model_optimized.glb");
        assert_eq!(output_filename("scene.v2.glb"), "scene.v2_optimized.glb");
        assert_eq!(output_filename("noext"), "noext_optimized.glb");
    }
}
