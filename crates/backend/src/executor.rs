//! Draw-command validation and application.
//!
//! Both backend implementations drive the same executor so command semantics
//! cannot diverge between them. Validation runs against a simulated layer
//! set before anything mutates, which is what makes batches all-or-nothing:
//! a batch with one invalid sub-command leaves the store and the dirty
//! accumulator untouched.

use compositor::{DirtyAccumulator, SelectionOverlay, selection_dirty_rect};
use document::{Layer, LayerStore, LayerStoreError};
use protocol::{DrawCommand, LayerId, PathPoint, Rect, Transform2D};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    InvalidInput { reason: &'static str },
    UnknownLayer { layer_id: LayerId },
    LayerLocked { layer_id: LayerId },
}

impl From<LayerStoreError> for CommandError {
    fn from(error: LayerStoreError) -> Self {
        match error {
            LayerStoreError::LayerNotFound { layer_id } => {
                CommandError::UnknownLayer { layer_id }
            }
            LayerStoreError::LayerLocked { layer_id } => CommandError::LayerLocked { layer_id },
            LayerStoreError::DuplicateLayerId { .. } => CommandError::InvalidInput {
                reason: "duplicate layer id",
            },
            LayerStoreError::InvalidReorder => CommandError::InvalidInput {
                reason: "reorder list is not a permutation of the live layer set",
            },
        }
    }
}

/// Layer set mirror used to validate a command sequence without mutating
/// the live store.
#[derive(Debug, Clone)]
struct SimulatedLayer {
    id: LayerId,
    locked: bool,
}

#[derive(Debug, Clone)]
struct SimulatedState {
    layers: Vec<SimulatedLayer>,
}

impl SimulatedState {
    fn from_store(store: &LayerStore) -> Self {
        Self {
            layers: store
                .ordered_layers()
                .iter()
                .map(|layer| SimulatedLayer {
                    id: layer.id().clone(),
                    locked: layer.locked,
                })
                .collect(),
        }
    }

    fn find(&self, layer_id: &LayerId) -> Option<&SimulatedLayer> {
        self.layers.iter().find(|layer| &layer.id == layer_id)
    }

    fn require_unlocked(&self, layer_id: &LayerId) -> Result<(), CommandError> {
        let layer = self.find(layer_id).ok_or_else(|| CommandError::UnknownLayer {
            layer_id: layer_id.clone(),
        })?;
        if layer.locked {
            return Err(CommandError::LayerLocked {
                layer_id: layer_id.clone(),
            });
        }
        Ok(())
    }

    fn require_present(&self, layer_id: &LayerId) -> Result<(), CommandError> {
        if self.find(layer_id).is_none() {
            return Err(CommandError::UnknownLayer {
                layer_id: layer_id.clone(),
            });
        }
        Ok(())
    }
}

pub struct CommandExecutor {
    store: LayerStore,
    selection: Option<SelectionOverlay>,
    dirty: DirtyAccumulator,
    surface_width: u32,
    surface_height: u32,
}

impl CommandExecutor {
    pub fn new(surface_width: u32, surface_height: u32) -> Self {
        Self {
            store: LayerStore::new(),
            selection: None,
            dirty: DirtyAccumulator::new(surface_width, surface_height),
            surface_width,
            surface_height,
        }
    }

    pub fn surface_width(&self) -> u32 {
        self.surface_width
    }

    pub fn surface_height(&self) -> u32 {
        self.surface_height
    }

    pub fn store(&self) -> &LayerStore {
        &self.store
    }

    pub fn selection(&self) -> Option<&SelectionOverlay> {
        self.selection.as_ref()
    }

    pub fn dirty(&self) -> &DirtyAccumulator {
        &self.dirty
    }

    pub fn dirty_mut(&mut self) -> &mut DirtyAccumulator {
        &mut self.dirty
    }

    pub fn resize(&mut self, surface_width: u32, surface_height: u32) {
        self.surface_width = surface_width;
        self.surface_height = surface_height;
        self.store.resize_all(surface_width, surface_height);
        self.dirty.resize(surface_width, surface_height);
    }

    /// Validate, then apply. No mutation is visible when validation fails,
    /// including for batches.
    pub fn execute(&mut self, command: &DrawCommand) -> Result<(), CommandError> {
        let mut simulated = SimulatedState::from_store(&self.store);
        self.validate(command, &mut simulated)?;
        self.apply(command)
    }

    fn validate(
        &self,
        command: &DrawCommand,
        simulated: &mut SimulatedState,
    ) -> Result<(), CommandError> {
        match command {
            DrawCommand::ClearCanvas { layer_id: Some(layer_id) } => {
                simulated.require_unlocked(layer_id)
            }
            DrawCommand::ClearCanvas { layer_id: None } => {
                // Clearing everything is atomic, so any locked layer vetoes it.
                for layer in &simulated.layers {
                    if layer.locked {
                        return Err(CommandError::LayerLocked {
                            layer_id: layer.id.clone(),
                        });
                    }
                }
                Ok(())
            }
            DrawCommand::DrawPath {
                layer_id,
                points,
                width,
                ..
            } => {
                if points.is_empty() {
                    return Err(CommandError::InvalidInput {
                        reason: "path has no points",
                    });
                }
                if points.iter().any(|point| !path_point_is_valid(point)) {
                    return Err(CommandError::InvalidInput {
                        reason: "path point has non-finite coordinates or out-of-range pressure",
                    });
                }
                if !width.is_finite() || *width <= 0.0 {
                    return Err(CommandError::InvalidInput {
                        reason: "stroke width must be finite and positive",
                    });
                }
                simulated.require_unlocked(layer_id)
            }
            DrawCommand::UpdateRasterArea {
                layer_id,
                rect,
                pixels,
            } => {
                if rect.is_empty() {
                    return Err(CommandError::InvalidInput {
                        reason: "raster area has zero dimensions",
                    });
                }
                if rect.right() > self.surface_width || rect.bottom() > self.surface_height {
                    return Err(CommandError::InvalidInput {
                        reason: "raster area extends beyond the surface",
                    });
                }
                let expected_bytes = (rect.width * rect.height * 4) as usize;
                if pixels.len() != expected_bytes {
                    return Err(CommandError::InvalidInput {
                        reason: "raster payload length does not match the rect",
                    });
                }
                simulated.require_unlocked(layer_id)
            }
            DrawCommand::AddLayer { layer_id, .. } => {
                if simulated.find(layer_id).is_some() {
                    return Err(CommandError::InvalidInput {
                        reason: "duplicate layer id",
                    });
                }
                simulated.layers.push(SimulatedLayer {
                    id: layer_id.clone(),
                    locked: false,
                });
                Ok(())
            }
            DrawCommand::RemoveLayer { layer_id } => {
                simulated.require_present(layer_id)?;
                simulated.layers.retain(|layer| &layer.id != layer_id);
                Ok(())
            }
            DrawCommand::ReorderLayers { ordered_ids } => {
                if ordered_ids.len() != simulated.layers.len() {
                    return Err(CommandError::InvalidInput {
                        reason: "reorder list is not a permutation of the live layer set",
                    });
                }
                let mut seen = std::collections::HashSet::with_capacity(ordered_ids.len());
                for layer_id in ordered_ids {
                    if simulated.find(layer_id).is_none() || !seen.insert(layer_id) {
                        return Err(CommandError::InvalidInput {
                            reason: "reorder list is not a permutation of the live layer set",
                        });
                    }
                }
                Ok(())
            }
            DrawCommand::UpdateLayerProperties {
                layer_id,
                opacity,
                locked,
                ..
            } => {
                if !opacity.is_finite() || !(0.0..=1.0).contains(opacity) {
                    return Err(CommandError::InvalidInput {
                        reason: "opacity must lie in [0, 1]",
                    });
                }
                simulated.require_present(layer_id)?;
                for layer in &mut simulated.layers {
                    if &layer.id == layer_id {
                        layer.locked = *locked;
                    }
                }
                Ok(())
            }
            DrawCommand::ShowSelection { rect } => {
                if rect.is_empty() {
                    return Err(CommandError::InvalidInput {
                        reason: "selection rect has zero dimensions",
                    });
                }
                Ok(())
            }
            DrawCommand::ClearSelection => Ok(()),
            DrawCommand::ApplyTransform {
                layer_id,
                transform,
            } => {
                if !transform.is_finite() {
                    return Err(CommandError::InvalidInput {
                        reason: "transform has non-finite components",
                    });
                }
                if transform.scale_x == 0.0 || transform.scale_y == 0.0 {
                    return Err(CommandError::InvalidInput {
                        reason: "transform scale must be non-zero",
                    });
                }
                simulated.require_unlocked(layer_id)
            }
            DrawCommand::Batch { commands } => {
                for sub_command in commands {
                    self.validate(sub_command, simulated)?;
                }
                Ok(())
            }
        }
    }

    fn apply(&mut self, command: &DrawCommand) -> Result<(), CommandError> {
        match command {
            DrawCommand::ClearCanvas { layer_id: Some(layer_id) } => {
                let surface_rect = self.dirty.surface_rect();
                self.store.unlocked_layer_mut(layer_id)?.clear();
                self.dirty.mark(layer_id, surface_rect);
                Ok(())
            }
            DrawCommand::ClearCanvas { layer_id: None } => {
                for layer_id in self.store.ordered_ids() {
                    self.store.unlocked_layer_mut(&layer_id)?.clear();
                }
                self.dirty.mark_full_surface();
                Ok(())
            }
            DrawCommand::DrawPath {
                layer_id,
                points,
                color,
                width,
                shape,
            } => {
                let surface_width = self.surface_width;
                let surface_height = self.surface_height;
                let layer = self.store.unlocked_layer_mut(layer_id)?;
                let touched = brush::paint_path(
                    layer.pixels_mut(),
                    surface_width,
                    surface_height,
                    points,
                    *color,
                    *width,
                    *shape,
                );
                if let Some(touched) = touched {
                    self.dirty.mark(layer_id, touched);
                }
                Ok(())
            }
            DrawCommand::UpdateRasterArea {
                layer_id,
                rect,
                pixels,
            } => {
                self.store.unlocked_layer_mut(layer_id)?.write_rect(*rect, pixels);
                self.dirty.mark(layer_id, *rect);
                Ok(())
            }
            DrawCommand::AddLayer { layer_id, index } => {
                let layer = Layer::new(layer_id.clone(), self.surface_width, self.surface_height);
                self.store.insert(layer, *index)?;
                self.dirty.mark_full_surface();
                Ok(())
            }
            DrawCommand::RemoveLayer { layer_id } => {
                self.store.remove(layer_id)?;
                self.dirty.mark_full_surface();
                Ok(())
            }
            DrawCommand::ReorderLayers { ordered_ids } => {
                self.store.reorder(ordered_ids)?;
                self.dirty.mark_full_surface();
                Ok(())
            }
            DrawCommand::UpdateLayerProperties {
                layer_id,
                opacity,
                blend_mode,
                visible,
                locked,
            } => {
                self.store
                    .update_properties(layer_id, *opacity, *blend_mode, *visible, *locked)?;
                self.dirty.mark(layer_id, self.dirty.surface_rect());
                Ok(())
            }
            DrawCommand::ShowSelection { rect } => {
                if let Some(previous) = self.selection.take() {
                    self.mark_selection_rect(previous.rect);
                }
                self.selection = Some(SelectionOverlay { rect: *rect });
                self.mark_selection_rect(*rect);
                Ok(())
            }
            DrawCommand::ClearSelection => {
                if let Some(previous) = self.selection.take() {
                    self.mark_selection_rect(previous.rect);
                }
                Ok(())
            }
            DrawCommand::ApplyTransform {
                layer_id,
                transform,
            } => {
                let surface_rect = self.dirty.surface_rect();
                let layer = self.store.unlocked_layer_mut(layer_id)?;
                transform_layer(layer, transform);
                self.dirty.mark(layer_id, surface_rect);
                Ok(())
            }
            DrawCommand::Batch { commands } => {
                for sub_command in commands {
                    self.apply(sub_command)?;
                }
                Ok(())
            }
        }
    }

    fn mark_selection_rect(&mut self, rect: Rect) {
        if let Some(dirty_rect) =
            selection_dirty_rect(rect, self.surface_width, self.surface_height)
        {
            self.dirty.mark_output(dirty_rect);
        }
    }
}

fn path_point_is_valid(point: &PathPoint) -> bool {
    point.x.is_finite()
        && point.y.is_finite()
        && point.pressure.is_finite()
        && (0.0..=1.0).contains(&point.pressure)
}

/// Resample a layer through the inverse affine mapping, rotating and scaling
/// about the layer center, then translating. Bilinear filtering; source
/// reads outside the layer come back transparent.
fn transform_layer(layer: &mut Layer, transform: &Transform2D) {
    let width = layer.width();
    let height = layer.height();
    let source = layer.pixels().to_vec();
    let center_x = width as f32 * 0.5;
    let center_y = height as f32 * 0.5;
    let cos_theta = transform.rotation_radians.cos();
    let sin_theta = transform.rotation_radians.sin();

    let target = layer.pixels_mut();
    for pixel_y in 0..height {
        for pixel_x in 0..width {
            // Invert: un-translate, un-rotate, un-scale about the center.
            let relative_x = pixel_x as f32 + 0.5 - center_x - transform.translate_x;
            let relative_y = pixel_y as f32 + 0.5 - center_y - transform.translate_y;
            let unrotated_x = relative_x * cos_theta + relative_y * sin_theta;
            let unrotated_y = -relative_x * sin_theta + relative_y * cos_theta;
            let source_x = unrotated_x / transform.scale_x + center_x - 0.5;
            let source_y = unrotated_y / transform.scale_y + center_y - 0.5;

            let sampled = sample_bilinear(&source, width, height, source_x, source_y);
            let offset = ((pixel_y * width + pixel_x) * 4) as usize;
            target[offset..offset + 4].copy_from_slice(&sampled);
        }
    }
}

fn sample_bilinear(source: &[u8], width: u32, height: u32, x: f32, y: f32) -> [u8; 4] {
    let floor_x = x.floor();
    let floor_y = y.floor();
    let fraction_x = x - floor_x;
    let fraction_y = y - floor_y;

    let mut accumulated = [0.0f32; 4];
    for (corner_dx, corner_dy, weight) in [
        (0.0, 0.0, (1.0 - fraction_x) * (1.0 - fraction_y)),
        (1.0, 0.0, fraction_x * (1.0 - fraction_y)),
        (0.0, 1.0, (1.0 - fraction_x) * fraction_y),
        (1.0, 1.0, fraction_x * fraction_y),
    ] {
        let sample_x = floor_x + corner_dx;
        let sample_y = floor_y + corner_dy;
        if sample_x < 0.0
            || sample_y < 0.0
            || sample_x >= width as f32
            || sample_y >= height as f32
        {
            continue;
        }
        let offset = ((sample_y as u32 * width + sample_x as u32) * 4) as usize;
        for channel in 0..4 {
            accumulated[channel] += source[offset + channel] as f32 * weight;
        }
    }
    [
        accumulated[0].round().clamp(0.0, 255.0) as u8,
        accumulated[1].round().clamp(0.0, 255.0) as u8,
        accumulated[2].round().clamp(0.0, 255.0) as u8,
        accumulated[3].round().clamp(0.0, 255.0) as u8,
    ]
}
