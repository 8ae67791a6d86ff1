//! Ordered multi-layer raster store.
//!
//! Each layer exclusively owns its RGBA8 pixel buffer; the compositor
//! borrows buffers read-only and command execution is the only mutation
//! channel. Z-order is the position in the store's vector, so indices are a
//! contiguous permutation of the layer set by construction.

use protocol::{BlendMode, LayerId, Rect};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayerStoreError {
    LayerNotFound { layer_id: LayerId },
    DuplicateLayerId { layer_id: LayerId },
    /// Reorder list must name every live layer id exactly once.
    InvalidReorder,
    LayerLocked { layer_id: LayerId },
}

#[derive(Debug, Clone)]
pub struct Layer {
    id: LayerId,
    pub name: String,
    pub opacity: f32,
    pub blend_mode: BlendMode,
    pub visible: bool,
    pub locked: bool,
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl Layer {
    pub fn new(id: LayerId, width: u32, height: u32) -> Self {
        let name = format!("Layer {id}");
        Self {
            id,
            name,
            opacity: 1.0,
            blend_mode: BlendMode::Normal,
            visible: true,
            locked: false,
            width,
            height,
            pixels: vec![0; (width * height * 4) as usize],
        }
    }

    pub fn id(&self) -> &LayerId {
        &self.id
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn pixels_mut(&mut self) -> &mut [u8] {
        &mut self.pixels
    }

    pub fn clear(&mut self) {
        self.pixels.fill(0);
    }

    pub fn get_pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = ((y * self.width + x) * 4) as usize;
        let mut pixel = [0u8; 4];
        pixel.copy_from_slice(&self.pixels[offset..offset + 4]);
        Some(pixel)
    }

    pub fn set_pixel(&mut self, x: u32, y: u32, pixel: [u8; 4]) {
        if x >= self.width || y >= self.height {
            return;
        }
        let offset = ((y * self.width + x) * 4) as usize;
        self.pixels[offset..offset + 4].copy_from_slice(&pixel);
    }

    /// Copy a packed RGBA8 block into the layer. `pixels` must hold exactly
    /// `rect.width * rect.height * 4` bytes and the rect must lie inside the
    /// layer; callers validate both.
    pub fn write_rect(&mut self, rect: Rect, pixels: &[u8]) {
        let row_bytes = (rect.width * 4) as usize;
        for row in 0..rect.height {
            let source_offset = row as usize * row_bytes;
            let target_offset = (((rect.y + row) * self.width + rect.x) * 4) as usize;
            self.pixels[target_offset..target_offset + row_bytes]
                .copy_from_slice(&pixels[source_offset..source_offset + row_bytes]);
        }
    }

    /// Resize preserving the overlapping content, padding new area with
    /// transparency.
    pub fn resize(&mut self, width: u32, height: u32) {
        let mut resized = vec![0u8; (width * height * 4) as usize];
        let copy_width = self.width.min(width);
        let copy_height = self.height.min(height);
        for row in 0..copy_height {
            let source_offset = (row * self.width * 4) as usize;
            let target_offset = (row * width * 4) as usize;
            let row_bytes = (copy_width * 4) as usize;
            resized[target_offset..target_offset + row_bytes]
                .copy_from_slice(&self.pixels[source_offset..source_offset + row_bytes]);
        }
        self.width = width;
        self.height = height;
        self.pixels = resized;
    }
}

/// Ordered collection of layers, bottom-most first. All operations are
/// id-keyed and fail loudly on an absent id so caller-visible state can
/// never silently diverge from the store.
#[derive(Debug, Default)]
pub struct LayerStore {
    layers: Vec<Layer>,
}

impl LayerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn contains(&self, layer_id: &LayerId) -> bool {
        self.position(layer_id).is_some()
    }

    fn position(&self, layer_id: &LayerId) -> Option<usize> {
        self.layers.iter().position(|layer| layer.id() == layer_id)
    }

    pub fn insert(&mut self, layer: Layer, index: usize) -> Result<(), LayerStoreError> {
        if self.contains(layer.id()) {
            return Err(LayerStoreError::DuplicateLayerId {
                layer_id: layer.id().clone(),
            });
        }
        let index = index.min(self.layers.len());
        self.layers.insert(index, layer);
        Ok(())
    }

    pub fn remove(&mut self, layer_id: &LayerId) -> Result<Layer, LayerStoreError> {
        let index = self
            .position(layer_id)
            .ok_or_else(|| LayerStoreError::LayerNotFound {
                layer_id: layer_id.clone(),
            })?;
        Ok(self.layers.remove(index))
    }

    /// Apply a full permutation. The list must name every live id exactly
    /// once; anything else leaves the store untouched.
    pub fn reorder(&mut self, ordered_ids: &[LayerId]) -> Result<(), LayerStoreError> {
        if ordered_ids.len() != self.layers.len() {
            return Err(LayerStoreError::InvalidReorder);
        }
        let mut seen = std::collections::HashSet::with_capacity(ordered_ids.len());
        for layer_id in ordered_ids {
            if !self.contains(layer_id) || !seen.insert(layer_id) {
                return Err(LayerStoreError::InvalidReorder);
            }
        }
        let mut remaining = std::mem::take(&mut self.layers);
        for layer_id in ordered_ids {
            let index = remaining
                .iter()
                .position(|layer| layer.id() == layer_id)
                .expect("reorder list validated against the live layer set");
            self.layers.push(remaining.remove(index));
        }
        Ok(())
    }

    pub fn update_properties(
        &mut self,
        layer_id: &LayerId,
        opacity: f32,
        blend_mode: BlendMode,
        visible: bool,
        locked: bool,
    ) -> Result<(), LayerStoreError> {
        let layer = self.layer_mut(layer_id)?;
        layer.opacity = opacity;
        layer.blend_mode = blend_mode;
        layer.visible = visible;
        layer.locked = locked;
        Ok(())
    }

    pub fn layer(&self, layer_id: &LayerId) -> Result<&Layer, LayerStoreError> {
        self.layers
            .iter()
            .find(|layer| layer.id() == layer_id)
            .ok_or_else(|| LayerStoreError::LayerNotFound {
                layer_id: layer_id.clone(),
            })
    }

    pub fn layer_mut(&mut self, layer_id: &LayerId) -> Result<&mut Layer, LayerStoreError> {
        self.layers
            .iter_mut()
            .find(|layer| layer.id() == layer_id)
            .ok_or_else(|| LayerStoreError::LayerNotFound {
                layer_id: layer_id.clone(),
            })
    }

    /// Like [`layer_mut`](Self::layer_mut) but refuses locked layers; the
    /// accessor every pixel-mutating command goes through.
    pub fn unlocked_layer_mut(&mut self, layer_id: &LayerId) -> Result<&mut Layer, LayerStoreError> {
        let layer = self.layer_mut(layer_id)?;
        if layer.locked {
            return Err(LayerStoreError::LayerLocked {
                layer_id: layer_id.clone(),
            });
        }
        Ok(layer)
    }

    /// Ascending z-order, bottom-most first.
    pub fn ordered_layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn ordered_ids(&self) -> Vec<LayerId> {
        self.layers.iter().map(|layer| layer.id().clone()).collect()
    }

    pub fn resize_all(&mut self, width: u32, height: u32) {
        for layer in &mut self.layers {
            layer.resize(width, height);
        }
    }
}
