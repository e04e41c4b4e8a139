//! Reading and rewriting binary glTF containers.
//!
//! The JSON side is owned by `gltf::json`. This module keeps track of the
//! BIN chunk: buffer views can be given new contents or appended, and
//! [`GlbDocument::to_vec`] lays every view of the BIN buffer out again so
//! accessor, image and view indices never move.

use std::{
    borrow::Cow,
    collections::HashMap,
    io::Cursor,
};

use base64::{Engine, prelude::BASE64_STANDARD};
use gltf::json::{
    Index, Root,
    buffer::{Buffer, Target, View},
    image::MimeType,
    validation::Checked,
};

use crate::error::{Error, Result};

/// A texture image as stored in the container.
#[derive(Debug, Clone)]
pub struct TextureRef<'a> {
    pub index: usize,
    pub name: Option<&'a str>,
    pub mime_type: Option<&'a str>,
    /// `None` when the pixels live outside the container.
    pub data: Option<Cow<'a, [u8]>>,
}

impl TextureRef<'_> {
    pub fn display_name(&self) -> String {
        match self.name {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => format!("texture_{}", self.index),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GlbDocument {
    root: Root,
    blob: Vec<u8>,
    /// New contents for buffer views of the BIN buffer, keyed by view index.
    replaced: HashMap<usize, Vec<u8>>,
}

impl GlbDocument {
    pub fn from_slice(data: &[u8]) -> Result<Self> {
        let gltf::Gltf { document, blob } = gltf::Gltf::from_slice(data)?;
        Ok(Self {
            root: document.into_json(),
            blob: blob.unwrap_or_default(),
            replaced: HashMap::new(),
        })
    }

    pub fn root(&self) -> &Root {
        &self.root
    }

    pub fn root_mut(&mut self) -> &mut Root {
        &mut self.root
    }

    /// A validated-free view of the document for the `gltf` accessor readers.
    pub fn document(&self) -> gltf::Document {
        gltf::Document::from_json_without_validation(self.root.clone())
    }

    /// Contents of the BIN buffer as last laid out; appended views are not
    /// visible here until the document is re-read.
    pub fn bin(&self) -> &[u8] {
        &self.blob
    }

    pub fn texture_count(&self) -> usize {
        self.root.images.len()
    }

    pub fn texture(&self, index: usize) -> Option<TextureRef<'_>> {
        let img = self.root.images.get(index)?;
        let data = match (img.buffer_view, img.uri.as_deref()) {
            (Some(view), _) => self.view_data(view.value()).map(Cow::Borrowed),
            (None, Some(uri)) => decode_data_uri(uri).map(|(_, bytes)| Cow::Owned(bytes)),
            (None, None) => None,
        };

        Some(TextureRef {
            index,
            name: img.name.as_deref(),
            mime_type: img.mime_type.as_ref().map(|m| m.0.as_str()),
            data,
        })
    }

    /// Replaces the pixels of a texture, and its MIME type when given.
    pub fn set_texture_image(
        &mut self,
        index: usize,
        data: Vec<u8>,
        mime_type: Option<&str>,
    ) -> Result<()> {
        let img = self
            .root
            .images
            .get(index)
            .ok_or_else(|| Error::Unsupported(format!("texture {index} does not exist")))?;

        let new_mime = mime_type
            .map(str::to_string)
            .or_else(|| img.mime_type.as_ref().map(|m| m.0.clone()))
            .or_else(|| img.uri.as_deref().and_then(decode_data_uri).map(|(mime, _)| mime))
            .or_else(|| sniff_mime_type(&data));

        match (img.buffer_view, img.uri.is_some()) {
            (Some(view), _)
                if self.view_refcount(view.value()) == 1 && self.is_bin_view(view.value()) =>
            {
                self.replaced.insert(view.value(), data);
            }
            (None, true) => {
                let mime = new_mime.clone().unwrap_or("application/octet-stream".to_string());
                let uri = format!("data:{mime};base64,{}", BASE64_STANDARD.encode(&data));
                self.root.images[index].uri = Some(uri);
            }
            _ => {
                let view = self.push_view(data, None)?;
                let img = &mut self.root.images[index];
                img.buffer_view = Some(view);
                img.uri = None;
            }
        }

        if let Some(mime) = new_mime {
            if mime_type.is_some() || self.root.images[index].buffer_view.is_some() {
                self.root.images[index].mime_type = Some(MimeType(mime));
            }
        }

        Ok(())
    }

    /// Appends a buffer view holding `data` to the BIN buffer.
    pub fn push_view(&mut self, data: Vec<u8>, target: Option<Target>) -> Result<Index<View>> {
        let buffer = self.bin_buffer()?;
        let view = View {
            buffer,
            byte_length: data.len().into(),
            byte_offset: None,
            byte_stride: None,
            name: None,
            target: target.map(Checked::Valid),
            extensions: None,
            extras: Default::default(),
        };

        let idx = self.root.push(view);
        self.replaced.insert(idx.value(), data);
        Ok(idx)
    }

    /// Gives an existing buffer view new contents.
    ///
    /// Only allowed when the view belongs to the BIN buffer and nothing else
    /// points into it.
    pub fn replace_view(&mut self, view: usize, data: Vec<u8>) -> bool {
        if self.is_bin_view(view) && self.view_refcount(view) == 1 {
            self.replaced.insert(view, data);
            true
        } else {
            false
        }
    }

    /// Number of images and accessors reading from a buffer view.
    pub fn view_refcount(&self, view: usize) -> usize {
        let images = self
            .root
            .images
            .iter()
            .filter(|img| img.buffer_view.map(|v| v.value()) == Some(view))
            .count();

        let accessors = self
            .root
            .accessors
            .iter()
            .map(|acc| {
                let direct = usize::from(acc.buffer_view.map(|v| v.value()) == Some(view));
                let sparse = acc.sparse.as_ref().map_or(0, |sparse| {
                    usize::from(sparse.indices.buffer_view.value() == view)
                        + usize::from(sparse.values.buffer_view.value() == view)
                });
                direct + sparse
            })
            .sum::<usize>();

        images + accessors
    }

    fn has_bin(&self) -> bool {
        self.root.buffers.first().is_some_and(|buffer| buffer.uri.is_none())
    }

    fn is_bin_view(&self, view: usize) -> bool {
        self.has_bin()
            && self
                .root
                .buffer_views
                .get(view)
                .is_some_and(|v| v.buffer.value() == 0)
    }

    fn bin_buffer(&mut self) -> Result<Index<Buffer>> {
        if self.root.buffers.is_empty() {
            return Ok(self.root.push(Buffer {
                byte_length: 0usize.into(),
                name: None,
                uri: None,
                extensions: None,
                extras: Default::default(),
            }));
        }

        if self.has_bin() {
            Ok(Index::new(0))
        } else {
            Err(Error::Unsupported(
                "the first buffer is external, cannot embed data".to_string(),
            ))
        }
    }

    fn view_data(&self, view: usize) -> Option<&[u8]> {
        if !self.is_bin_view(view) {
            return None;
        }
        if let Some(data) = self.replaced.get(&view) {
            return Some(data.as_slice());
        }

        let view = self.root.buffer_views.get(view)?;
        let offset = match view.byte_offset {
            Some(o) => usize::try_from(o.0).ok()?,
            None => 0,
        };
        let length = usize::try_from(view.byte_length.0).ok()?;

        self.blob.get(offset..offset.checked_add(length)?)
    }

    /// Serializes the document into a GLB container.
    pub fn to_vec(&self) -> Result<Vec<u8>> {
        let mut n_json = self.root.clone();
        let has_bin = self.has_bin();
        let mut n_blob: Vec<u8> = Vec::with_capacity(self.blob.len());

        if has_bin {
            for idx in 0..n_json.buffer_views.len() {
                if n_json.buffer_views[idx].buffer.value() != 0 {
                    continue;
                }
                let data = self.view_data(idx).ok_or_else(|| {
                    Error::Unsupported(format!("buffer view {idx} points outside the BIN chunk"))
                })?;

                pad_to_4bytes(&mut n_blob);
                let offset = n_blob.len();
                n_blob.extend_from_slice(data);

                let view = &mut n_json.buffer_views[idx];
                view.byte_offset = if offset == 0 {
                    None
                } else {
                    Some(offset.into())
                };
                view.byte_length = data.len().into();
            }

            pad_to_4bytes(&mut n_blob);
            n_json.buffers[0].byte_length = n_blob.len().into();
        }

        let json_bytes = gltf::json::serialize::to_vec(&n_json)?;

        let n_glb = gltf::binary::Glb {
            header: gltf::binary::Header {
                magic: *b"glTF",
                version: 2,
                length: (json_bytes.len() + n_blob.len()) as u32,
            },
            json: Cow::Owned(json_bytes),
            bin: has_bin.then_some(Cow::Owned(n_blob)),
        };

        let mut result: Vec<u8> = Vec::new();
        let writer = Cursor::new(&mut result);

        n_glb.to_writer(writer)?;

        Ok(result)
    }
}

fn pad_to_4bytes(data: &mut Vec<u8>) {
    while data.len() % 4 != 0 {
        data.push(0);
    }
}

/// Splits a base64 `data:` URI into its MIME type and payload.
fn decode_data_uri(uri: &str) -> Option<(String, Vec<u8>)> {
    let rest = uri.strip_prefix("data:")?;
    let (header, payload) = rest.split_once(',')?;
    let mime = header.strip_suffix(";base64")?;
    let bytes = BASE64_STANDARD.decode(payload).ok()?;
    Some((mime.to_string(), bytes))
}

fn sniff_mime_type(data: &[u8]) -> Option<String> {
    image::guess_format(data)
        .ok()
        .map(|format| format.to_mime_type().to_string())
}
