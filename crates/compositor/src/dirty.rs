//! Dirty-region accumulation.
//!
//! Command execution records the rects it touches here; the executor drains
//! the accumulator to drive bounded recomposition and diff shipping.

use protocol::{LayerId, Rect};

use crate::{MergedRects, merge_rects};

/// One rect known to have changed, tagged with the layer it belongs to.
/// Surface-level changes (selection overlay) carry no layer id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirtyRegion {
    pub layer_id: Option<LayerId>,
    pub rect: Rect,
}

#[derive(Debug)]
pub struct DirtyAccumulator {
    surface_width: u32,
    surface_height: u32,
    regions: Vec<DirtyRegion>,
    /// Structural changes (layer add/remove/reorder) force a full
    /// recomposition regardless of accumulated rects.
    full_surface_dirty: bool,
}

impl DirtyAccumulator {
    pub fn new(surface_width: u32, surface_height: u32) -> Self {
        Self {
            surface_width,
            surface_height,
            regions: Vec::new(),
            full_surface_dirty: false,
        }
    }

    pub fn surface_rect(&self) -> Rect {
        Rect::new(0, 0, self.surface_width, self.surface_height)
    }

    pub fn resize(&mut self, surface_width: u32, surface_height: u32) {
        self.surface_width = surface_width;
        self.surface_height = surface_height;
        self.regions.clear();
        self.full_surface_dirty = true;
    }

    /// Record a touched rect. Empty and fully out-of-bounds rects are
    /// dropped here so downstream consumers never see them.
    pub fn mark(&mut self, layer_id: &LayerId, rect: Rect) {
        self.mark_region(Some(layer_id.clone()), rect);
    }

    /// Surface-level dirt not attributable to a layer (selection overlay).
    pub fn mark_output(&mut self, rect: Rect) {
        self.mark_region(None, rect);
    }

    fn mark_region(&mut self, layer_id: Option<LayerId>, rect: Rect) {
        if self.full_surface_dirty {
            return;
        }
        let Some(clipped) = rect.clip_to(self.surface_width, self.surface_height) else {
            return;
        };
        self.regions.push(DirtyRegion {
            layer_id,
            rect: clipped,
        });
    }

    pub fn mark_full_surface(&mut self) {
        self.full_surface_dirty = true;
        self.regions.clear();
    }

    pub fn is_full_surface_dirty(&self) -> bool {
        self.full_surface_dirty
    }

    pub fn is_empty(&self) -> bool {
        !self.full_surface_dirty && self.regions.is_empty()
    }

    pub fn regions(&self) -> &[DirtyRegion] {
        &self.regions
    }

    /// Merged, clipped output-space rects covering everything accumulated.
    pub fn merged(&self) -> MergedRects {
        if self.full_surface_dirty {
            let mut full = MergedRects::new();
            full.push(self.surface_rect());
            return full;
        }
        merge_rects(self.regions.iter().map(|region| region.rect))
    }

    /// Single covering rect, used by bounded recomposition.
    pub fn union_rect(&self) -> Option<Rect> {
        if self.full_surface_dirty {
            return Some(self.surface_rect());
        }
        self.regions
            .iter()
            .map(|region| region.rect)
            .reduce(|accumulated, rect| accumulated.union(&rect))
    }

    /// Reset for the next command batch, returning what was accumulated.
    pub fn take_merged(&mut self) -> MergedRects {
        let merged = self.merged();
        self.regions.clear();
        self.full_surface_dirty = false;
        merged
    }
}
