#![allow(dead_code)]

use std::{borrow::Cow, io::Cursor};

use base64::{Engine, prelude::BASE64_STANDARD};
use image::{ImageFormat, Rgba, RgbaImage};
use serde_json::{Value, json};

const FLOAT: u32 = 5126;
const UNSIGNED_SHORT: u32 = 5123;
const ARRAY_BUFFER: u32 = 34962;
const ELEMENT_ARRAY_BUFFER: u32 = 34963;

/// A patterned RGBA image encoded as PNG.
pub fn png(width: u32, height: u32) -> Vec<u8> {
    let img = RgbaImage::from_fn(width, height, |x, y| {
        Rgba([
            (x * 7 % 256) as u8,
            (y * 13 % 256) as u8,
            ((x ^ y) % 256) as u8,
            255,
        ])
    });
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png).unwrap();
    out.into_inner()
}

/// Assembles small GLB files with embedded textures and a grid mesh.
#[derive(Default)]
pub struct GlbBuilder {
    bin: Vec<u8>,
    views: Vec<Value>,
    accessors: Vec<Value>,
    images: Vec<Value>,
    meshes: Vec<Value>,
}

impl GlbBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn texture(mut self, name: &str, data: &[u8]) -> Self {
        let view = self.push_view(data, None);
        self.images.push(json!({
            "name": name,
            "bufferView": view,
            "mimeType": "image/png",
        }));
        self
    }

    /// An image embedded as a base64 `data:` URI instead of a buffer view.
    pub fn data_uri_texture(mut self, name: &str, data: &[u8]) -> Self {
        self.images.push(json!({
            "name": name,
            "uri": format!("data:image/png;base64,{}", BASE64_STANDARD.encode(data)),
        }));
        self
    }

    /// An image that lives next to the file rather than inside it.
    pub fn external_texture(mut self, name: &str, uri: &str) -> Self {
        self.images.push(json!({ "name": name, "uri": uri }));
        self
    }

    /// One primitive with the given positions and `u16` indices, used as-is.
    pub fn triangles(mut self, positions: &[[f32; 3]], indices: &[u16]) -> Self {
        let position_view =
            self.push_view(bytemuck::cast_slice(positions), Some(ARRAY_BUFFER));
        let index_view = self.push_view(bytemuck::cast_slice(indices), Some(ELEMENT_ARRAY_BUFFER));

        let mut min = [f32::MAX; 3];
        let mut max = [f32::MIN; 3];
        for position in positions {
            for axis in 0..3 {
                min[axis] = min[axis].min(position[axis]);
                max[axis] = max[axis].max(position[axis]);
            }
        }

        let position_accessor = self.accessors.len();
        self.accessors.push(json!({
            "bufferView": position_view,
            "componentType": FLOAT,
            "count": positions.len(),
            "type": "VEC3",
            "min": min,
            "max": max,
        }));
        let index_accessor = self.accessors.len();
        self.accessors.push(json!({
            "bufferView": index_view,
            "componentType": UNSIGNED_SHORT,
            "count": indices.len(),
            "type": "SCALAR",
        }));

        self.meshes.push(json!({
            "primitives": [{
                "attributes": { "POSITION": position_accessor },
                "indices": index_accessor,
            }],
        }));
        self
    }

    /// A flat square of `cells` x `cells` quads, two triangles each.
    pub fn grid(mut self, cells: u32) -> Self {
        let side = cells + 1;
        let mut positions = Vec::with_capacity((side * side * 3) as usize);
        for y in 0..side {
            for x in 0..side {
                positions.push(x as f32 / cells as f32);
                positions.push(y as f32 / cells as f32);
                positions.push(0.0f32);
            }
        }

        let mut indices: Vec<u16> = Vec::with_capacity((cells * cells * 6) as usize);
        for y in 0..cells {
            for x in 0..cells {
                let a = (y * side + x) as u16;
                let b = a + 1;
                let c = a + side as u16;
                let d = c + 1;
                indices.extend_from_slice(&[a, c, b, b, c, d]);
            }
        }

        let position_view = self.push_view(bytemuck::cast_slice(&positions), Some(ARRAY_BUFFER));
        let index_view = self.push_view(bytemuck::cast_slice(&indices), Some(ELEMENT_ARRAY_BUFFER));

        let position_accessor = self.accessors.len();
        self.accessors.push(json!({
            "bufferView": position_view,
            "componentType": FLOAT,
            "count": side * side,
            "type": "VEC3",
            "min": [0.0, 0.0, 0.0],
            "max": [1.0, 1.0, 0.0],
        }));
        let index_accessor = self.accessors.len();
        self.accessors.push(json!({
            "bufferView": index_view,
            "componentType": UNSIGNED_SHORT,
            "count": indices.len(),
            "type": "SCALAR",
        }));

        self.meshes.push(json!({
            "name": "grid",
            "primitives": [{
                "attributes": { "POSITION": position_accessor },
                "indices": index_accessor,
            }],
        }));
        self
    }

    pub fn build(mut self) -> Vec<u8> {
        pad(&mut self.bin);

        let textures: Vec<Value> = (0..self.images.len())
            .map(|source| json!({ "source": source }))
            .collect();
        let nodes: Vec<Value> = (0..self.meshes.len())
            .map(|mesh| json!({ "mesh": mesh }))
            .collect();
        let scene_nodes: Vec<usize> = (0..nodes.len()).collect();

        let mut root = json!({
            "asset": { "version": "2.0", "generator": "fixture" },
            "scene": 0,
            "scenes": [{ "nodes": scene_nodes }],
            "nodes": nodes,
            "meshes": self.meshes,
            "accessors": self.accessors,
            "bufferViews": self.views,
            "images": self.images,
            "textures": textures,
        });
        if !self.bin.is_empty() {
            root["buffers"] = json!([{ "byteLength": self.bin.len() }]);
        }

        raw_glb(&root, self.bin)
    }

    fn push_view(&mut self, data: &[u8], target: Option<u32>) -> usize {
        pad(&mut self.bin);
        let mut view = json!({
            "buffer": 0,
            "byteOffset": self.bin.len(),
            "byteLength": data.len(),
        });
        if let Some(target) = target {
            view["target"] = json!(target);
        }
        self.bin.extend_from_slice(data);
        self.views.push(view);
        self.views.len() - 1
    }
}

/// Packs a JSON document and BIN chunk without any consistency checks.
pub fn raw_glb(root: &Value, bin: Vec<u8>) -> Vec<u8> {
    let json = serde_json::to_vec(root).unwrap();
    let glb = gltf::binary::Glb {
        header: gltf::binary::Header {
            magic: *b"glTF",
            version: 2,
            length: 0,
        },
        json: Cow::Owned(json),
        bin: (!bin.is_empty()).then_some(Cow::Owned(bin)),
    };
    glb.to_vec().unwrap()
}

fn pad(bin: &mut Vec<u8>) {
    while bin.len() % 4 != 0 {
        bin.push(0);
    }
}

/// A `multipart/form-data` body.
pub struct Form {
    boundary: &'static str,
    body: Vec<u8>,
}

impl Form {
    pub fn new() -> Self {
        Self {
            boundary: "glb-squeeze-test-boundary",
            body: Vec::new(),
        }
    }

    pub fn text(mut self, name: &str, value: &str) -> Self {
        self.body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n",
                self.boundary
            )
            .as_bytes(),
        );
        self
    }

    pub fn file(mut self, name: &str, file_name: &str, data: &[u8]) -> Self {
        self.body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{name}\"; filename=\"{file_name}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
                self.boundary
            )
            .as_bytes(),
        );
        self.body.extend_from_slice(data);
        self.body.extend_from_slice(b"\r\n");
        self
    }

    /// Returns the `Content-Type` header value and the encoded body.
    pub fn finish(mut self) -> (String, Vec<u8>) {
        self.body
            .extend_from_slice(format!("--{}--\r\n", self.boundary).as_bytes());
        (
            format!("multipart/form-data; boundary={}", self.boundary),
            self.body,
        )
    }
}
