//! Mesh simplification on top of `meshopt`.
//!
//! Each triangle primitive is welded (vertices whose attributes are all
//! byte-identical are merged) and its index buffer is simplified towards a
//! ratio of the original index count. Vertex buffers are left as they are.

use std::collections::{HashMap, HashSet};

use gltf::{
    Semantic,
    json::{
        Index,
        accessor::{ComponentType, GenericComponentType, Type},
        buffer::Target,
        validation::Checked,
    },
    mesh::Mode,
};
use meshopt::{SimplifyOptions, VertexDataAdapter};
use serde::Serialize;
use tracing::{debug, warn};

use crate::{
    error::{Error, Result},
    glb::GlbDocument,
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimplifySettings {
    /// Share of the original index count to aim for, in `(0, 1]`.
    pub ratio: f32,
    /// Maximum deviation relative to the mesh extents.
    pub error: f32,
}

impl Default for SimplifySettings {
    fn default() -> Self {
        Self {
            ratio: 0.5,
            error: 0.01,
        }
    }
}

impl SimplifySettings {
    pub fn validate(&self) -> Result<()> {
        if !(self.ratio > 0.0 && self.ratio <= 1.0) {
            return Err(Error::Simplify(format!(
                "ratio must be in (0, 1], got {}",
                self.ratio
            )));
        }
        if !(self.error >= 0.0) {
            return Err(Error::Simplify(format!(
                "error threshold must not be negative, got {}",
                self.error
            )));
        }
        Ok(())
    }
}

/// Vertex and triangle totals over every triangle primitive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MeshStats {
    /// Distinct vertices referenced by triangles.
    pub vertices: usize,
    pub triangles: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimplificationReport {
    pub before: MeshStats,
    pub after: MeshStats,
}

struct PrimitiveUpdate {
    mesh: usize,
    primitive: usize,
    indices: Vec<u32>,
    index_accessor: Option<usize>,
    position_accessor: usize,
}

pub fn mesh_stats(doc: &GlbDocument) -> MeshStats {
    let document = doc.document();
    let bin = doc.bin();
    let mut stats = MeshStats::default();

    for mesh in document.meshes() {
        for primitive in mesh.primitives() {
            if primitive.mode() != Mode::Triangles {
                continue;
            }
            let reader = primitive.reader(|buffer| (buffer.index() == 0).then_some(bin));

            match reader.read_indices() {
                Some(indices) => {
                    let indices: Vec<u32> = indices.into_u32().collect();
                    stats.triangles += indices.len() / 3;
                    stats.vertices += indices.iter().collect::<HashSet<_>>().len();
                }
                None => {
                    let count = primitive
                        .get(&Semantic::Positions)
                        .map_or(0, |accessor| accessor.count());
                    stats.vertices += count;
                    stats.triangles += count / 3;
                }
            }
        }
    }

    stats
}

/// Simplifies every triangle primitive of a GLB.
pub fn simplify_glb(glb: &[u8], settings: &SimplifySettings) -> Result<(Vec<u8>, SimplificationReport)> {
    settings.validate()?;

    let mut doc = GlbDocument::from_slice(glb)?;
    let before = mesh_stats(&doc);
    let document = doc.document();
    let bin = doc.bin();

    let mut updates = Vec::new();
    for mesh in document.meshes() {
        for primitive in mesh.primitives() {
            if primitive.mode() != Mode::Triangles || primitive.morph_targets().next().is_some() {
                continue;
            }
            let Some(position_accessor) = primitive.get(&Semantic::Positions) else {
                continue;
            };

            let reader = primitive.reader(|buffer| (buffer.index() == 0).then_some(bin));
            let Some(positions) = reader.read_positions() else {
                continue;
            };
            let positions: Vec<[f32; 3]> = positions.collect();
            let indices: Vec<u32> = match reader.read_indices() {
                Some(indices) => indices.into_u32().collect(),
                None => (0..positions.len() as u32).collect(),
            };

            if let Some(&bad) = indices.iter().find(|&&i| i as usize >= positions.len()) {
                warn!(
                    mesh = mesh.index(),
                    primitive = primitive.index(),
                    index = bad,
                    vertices = positions.len(),
                    "index out of range, skipping primitive"
                );
                continue;
            }

            let target_count = (indices.len() as f32 * settings.ratio) as usize / 3 * 3;
            if target_count < 3 || target_count >= indices.len() {
                continue;
            }

            let welded = weld(&doc, &primitive, &indices, positions.len());
            let adapter = VertexDataAdapter::new(bytemuck::cast_slice(&positions), 12, 0)
                .map_err(|err| Error::Simplify(err.to_string()))?;
            let simplified = meshopt::simplify(
                &welded,
                &adapter,
                target_count,
                settings.error,
                SimplifyOptions::None,
                None,
            );

            debug!(
                mesh = mesh.index(),
                primitive = primitive.index(),
                before = indices.len() / 3,
                after = simplified.len() / 3,
                "simplified primitive"
            );

            if simplified.is_empty() || simplified.len() >= indices.len() {
                continue;
            }

            updates.push(PrimitiveUpdate {
                mesh: mesh.index(),
                primitive: primitive.index(),
                indices: simplified,
                index_accessor: primitive.indices().map(|accessor| accessor.index()),
                position_accessor: position_accessor.index(),
            });
        }
    }

    for update in updates {
        write_indices(&mut doc, update)?;
    }

    let out = doc.to_vec()?;
    let after = mesh_stats(&GlbDocument::from_slice(&out)?);
    Ok((out, SimplificationReport { before, after }))
}

/// Points every index at the first vertex whose attributes are byte-identical.
fn weld(
    doc: &GlbDocument,
    primitive: &gltf::Primitive<'_>,
    indices: &[u32],
    vertex_count: usize,
) -> Vec<u32> {
    let root = doc.root();
    let bin = doc.bin();

    let mut streams = Vec::new();
    for (_, accessor) in primitive.attributes() {
        let acc = &root.accessors[accessor.index()];
        let Some(view) = acc.buffer_view.and_then(|v| root.buffer_views.get(v.value())) else {
            return indices.to_vec();
        };
        if view.buffer.value() != 0 || acc.sparse.is_some() || accessor.count() != vertex_count {
            return indices.to_vec();
        }
        let size = accessor.size();
        let stride = view.byte_stride.map_or(size, |stride| stride.0);
        let base = usize::try_from(view.byte_offset.map_or(0, |o| o.0))
            .ok()
            .zip(usize::try_from(acc.byte_offset.map_or(0, |o| o.0)).ok())
            .and_then(|(view_offset, offset)| view_offset.checked_add(offset));
        let Some(base) = base else {
            return indices.to_vec();
        };
        streams.push((base, stride, size));
    }

    let mut first_seen: HashMap<Vec<u8>, u32> = HashMap::with_capacity(vertex_count);
    let mut remap = Vec::with_capacity(vertex_count);
    for vertex in 0..vertex_count {
        let mut key = Vec::new();
        for &(base, stride, size) in &streams {
            let bytes = vertex
                .checked_mul(stride)
                .and_then(|step| base.checked_add(step))
                .and_then(|start| Some(start..start.checked_add(size)?))
                .and_then(|range| bin.get(range));
            match bytes {
                Some(bytes) => key.extend_from_slice(bytes),
                None => return indices.to_vec(),
            }
        }
        let id = *first_seen.entry(key).or_insert(vertex as u32);
        remap.push(id);
    }

    indices
        .iter()
        .map(|&i| remap.get(i as usize).copied().unwrap_or(i))
        .collect()
}

fn write_indices(doc: &mut GlbDocument, update: PrimitiveUpdate) -> Result<()> {
    let max_index = update.indices.iter().copied().max().unwrap_or(0);
    let (bytes, component_type) = if max_index <= u32::from(u16::MAX) {
        let narrow: Vec<u16> = update.indices.iter().map(|&i| i as u16).collect();
        (bytemuck::cast_slice::<u16, u8>(&narrow).to_vec(), ComponentType::U16)
    } else {
        (bytemuck::cast_slice::<u32, u8>(&update.indices).to_vec(), ComponentType::U32)
    };
    let count = update.indices.len();

    let reusable = update.index_accessor.and_then(|accessor| {
        let view = doc.root().accessors[accessor].buffer_view?.value();
        (primitive_uses(doc, accessor) == 1).then_some((accessor, view))
    });

    let accessor = match reusable {
        Some((accessor, view)) if doc.replace_view(view, bytes.clone()) => accessor,
        _ => {
            let view = doc.push_view(bytes, Some(Target::ElementArrayBuffer))?;
            let template = update.index_accessor.unwrap_or(update.position_accessor);
            let mut n_acc = doc.root().accessors[template].clone();
            n_acc.buffer_view = Some(view);
            n_acc.name = None;
            doc.root_mut().push(n_acc).value()
        }
    };

    let acc = &mut doc.root_mut().accessors[accessor];
    acc.byte_offset = None;
    acc.count = count.into();
    acc.component_type = Checked::Valid(GenericComponentType(component_type));
    acc.type_ = Checked::Valid(Type::Scalar);
    acc.min = None;
    acc.max = None;
    acc.normalized = false;
    acc.sparse = None;

    doc.root_mut().meshes[update.mesh].primitives[update.primitive].indices =
        Some(Index::new(accessor as u32));

    Ok(())
}

/// Number of primitives using an accessor as their index buffer.
fn primitive_uses(doc: &GlbDocument, accessor: usize) -> usize {
    doc.root()
        .meshes
        .iter()
        .flat_map(|mesh| mesh.primitives.iter())
        .filter(|p| p.indices.map(|i| i.value()) == Some(accessor))
        .count()
}
