//! Software layer compositing and dirty-region tracking.
//!
//! Merges visible layers in ascending z-order into one straight-alpha RGBA8
//! output buffer. Composition is deterministic: re-running it on an
//! unchanged layer stack produces byte-identical output. Bounded
//! recomposition restricted to a rect is pixel-identical to full
//! recomposition inside that rect, which is what makes incremental redraws
//! safe.

use document::LayerStore;
use protocol::{BlendMode, Rect};
use smallvec::SmallVec;

mod dirty;

pub use dirty::{DirtyAccumulator, DirtyRegion};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompositeError {
    /// Output slice length does not match `width * height * 4`.
    OutputSizeMismatch {
        expected_bytes: usize,
        actual_bytes: usize,
    },
    /// A layer's buffer is not sized to the surface.
    LayerSizeMismatch,
}

/// Active selection shown as a dashed outline over the composite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionOverlay {
    pub rect: Rect,
}

const SELECTION_DASH_PERIOD: u32 = 4;

/// Per-mode channel blend, inputs and output in [0, 1].
#[inline]
pub fn blend_channel(mode: BlendMode, src: f32, dst: f32) -> f32 {
    match mode {
        BlendMode::Normal => src,
        BlendMode::Multiply => src * dst,
        BlendMode::Screen => 1.0 - (1.0 - src) * (1.0 - dst),
        BlendMode::Overlay => {
            if dst < 0.5 {
                2.0 * src * dst
            } else {
                1.0 - 2.0 * (1.0 - src) * (1.0 - dst)
            }
        }
    }
}

/// Recompute the entire output buffer from the layer stack.
pub fn composite_full(
    store: &LayerStore,
    selection: Option<&SelectionOverlay>,
    width: u32,
    height: u32,
    output: &mut [u8],
) -> Result<(), CompositeError> {
    check_output(width, height, output)?;
    let full = Rect::new(0, 0, width, height);
    if full.is_empty() {
        return Ok(());
    }
    composite_region(store, selection, width, height, full, output)
}

/// Recompute only `region` (clipped to the surface); pixels outside are left
/// untouched.
pub fn composite_bounded(
    store: &LayerStore,
    selection: Option<&SelectionOverlay>,
    width: u32,
    height: u32,
    region: Rect,
    output: &mut [u8],
) -> Result<(), CompositeError> {
    check_output(width, height, output)?;
    let Some(clipped) = region.clip_to(width, height) else {
        return Ok(());
    };
    composite_region(store, selection, width, height, clipped, output)
}

fn check_output(width: u32, height: u32, output: &[u8]) -> Result<(), CompositeError> {
    let expected_bytes = (width * height * 4) as usize;
    if output.len() != expected_bytes {
        return Err(CompositeError::OutputSizeMismatch {
            expected_bytes,
            actual_bytes: output.len(),
        });
    }
    Ok(())
}

fn composite_region(
    store: &LayerStore,
    selection: Option<&SelectionOverlay>,
    width: u32,
    height: u32,
    region: Rect,
    output: &mut [u8],
) -> Result<(), CompositeError> {
    for layer in store.ordered_layers() {
        if layer.width() != width || layer.height() != height {
            return Err(CompositeError::LayerSizeMismatch);
        }
    }

    for pixel_y in region.y..region.bottom() {
        for pixel_x in region.x..region.right() {
            let offset = ((pixel_y * width + pixel_x) * 4) as usize;
            let mut dst_r = 0.0f32;
            let mut dst_g = 0.0f32;
            let mut dst_b = 0.0f32;
            let mut dst_a = 0.0f32;

            for layer in store.ordered_layers() {
                if !layer.visible || layer.opacity <= 0.0 {
                    continue;
                }
                let pixels = layer.pixels();
                let src_r = pixels[offset] as f32 / 255.0;
                let src_g = pixels[offset + 1] as f32 / 255.0;
                let src_b = pixels[offset + 2] as f32 / 255.0;
                let src_a = (pixels[offset + 3] as f32 / 255.0) * layer.opacity;
                if src_a <= 0.0 {
                    continue;
                }

                let mode = layer.blend_mode;
                let blended_r = blend_channel(mode, src_r, dst_r);
                let blended_g = blend_channel(mode, src_g, dst_g);
                let blended_b = blend_channel(mode, src_b, dst_b);

                let out_a = src_a + dst_a * (1.0 - src_a);
                if out_a > 0.0 {
                    dst_r = (blended_r * src_a + dst_r * dst_a * (1.0 - src_a)) / out_a;
                    dst_g = (blended_g * src_a + dst_g * dst_a * (1.0 - src_a)) / out_a;
                    dst_b = (blended_b * src_a + dst_b * dst_a * (1.0 - src_a)) / out_a;
                }
                dst_a = out_a;
            }

            output[offset] = (dst_r.clamp(0.0, 1.0) * 255.0).round() as u8;
            output[offset + 1] = (dst_g.clamp(0.0, 1.0) * 255.0).round() as u8;
            output[offset + 2] = (dst_b.clamp(0.0, 1.0) * 255.0).round() as u8;
            output[offset + 3] = (dst_a.clamp(0.0, 1.0) * 255.0).round() as u8;
        }
    }

    if let Some(selection) = selection {
        draw_selection_outline(selection.rect, width, height, region, output);
    }
    Ok(())
}

/// Dashed 1-px outline, clipped to both the surface and the recomposited
/// region so bounded passes restore overlay pixels they overwrote.
pub fn draw_selection_outline(
    selection_rect: Rect,
    width: u32,
    height: u32,
    clip: Rect,
    output: &mut [u8],
) {
    let Some(selection) = selection_rect.clip_to(width, height) else {
        return;
    };
    let mut paint = |x: u32, y: u32, along: u32| {
        if !clip.contains(x, y) {
            return;
        }
        let offset = ((y * width + x) * 4) as usize;
        let dash_on = (along / SELECTION_DASH_PERIOD) % 2 == 0;
        let value = if dash_on { 0 } else { 255 };
        output[offset] = value;
        output[offset + 1] = value;
        output[offset + 2] = value;
        output[offset + 3] = 255;
    };

    let last_x = selection.right() - 1;
    let last_y = selection.bottom() - 1;
    for x in selection.x..selection.right() {
        paint(x, selection.y, x - selection.x);
        paint(x, last_y, x - selection.x);
    }
    for y in selection.y..selection.bottom() {
        paint(selection.x, y, y - selection.y);
        paint(last_x, y, y - selection.y);
    }
}

/// Bounding rect of a selection outline change, used for dirty accounting.
pub fn selection_dirty_rect(selection_rect: Rect, width: u32, height: u32) -> Option<Rect> {
    selection_rect.clip_to(width, height)
}

pub type MergedRects = SmallVec<[Rect; 4]>;

/// Union of accumulated dirty rects for one layer id, kept by the executor
/// while a command batch runs.
pub fn merge_rects(rects: impl IntoIterator<Item = Rect>) -> MergedRects {
    let mut merged: MergedRects = SmallVec::new();
    for rect in rects {
        if rect.is_empty() {
            continue;
        }
        merged.push(rect);
        // Keep merging while any pair overlaps or touches; the result is a
        // small set of disjoint covering rects.
        loop {
            let mut merged_any = false;
            'scan: for first in 0..merged.len() {
                for second in (first + 1)..merged.len() {
                    if merged[first].touches(&merged[second]) {
                        let union = merged[first].union(&merged[second]);
                        merged.swap_remove(second);
                        merged[first] = union;
                        merged_any = true;
                        break 'scan;
                    }
                }
            }
            if !merged_any {
                break;
            }
        }
    }
    merged
}
