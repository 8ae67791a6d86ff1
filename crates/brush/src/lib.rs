//! Brush rasterization onto raw RGBA8 layer buffers.
//!
//! Stamps soft-edged circular dabs along stroke segments. Dab deposition is
//! always a straight alpha blend into the layer; layer-level blend modes are
//! applied later at composite time. The eraser shape removes coverage
//! instead of depositing color.

use protocol::{BrushShape, Color, PathPoint, Rect};

/// Spacing between dab centers when walking a segment, in pixels.
const SEGMENT_DAB_SPACING: f32 = 1.0;

/// Paint a full path (consecutive segments) into `buffer`. Returns the
/// touched rect clipped to the buffer, or `None` when nothing was painted.
pub fn paint_path(
    buffer: &mut [u8],
    buffer_width: u32,
    buffer_height: u32,
    points: &[PathPoint],
    color: Color,
    stroke_width: f32,
    shape: BrushShape,
) -> Option<Rect> {
    if points.is_empty() {
        return None;
    }
    if points.len() == 1 {
        stamp_dab(
            buffer,
            buffer_width,
            buffer_height,
            points[0],
            color,
            stroke_width,
            shape,
        );
    } else {
        for pair in points.windows(2) {
            paint_segment(
                buffer,
                buffer_width,
                buffer_height,
                pair[0],
                pair[1],
                color,
                stroke_width,
                shape,
            );
        }
    }
    path_bounds(points, stroke_width)
        .and_then(|bounds| bounds.clip_to(buffer_width, buffer_height))
}

/// Walk one segment at fixed spacing, stamping dabs with pressure
/// interpolated linearly between the endpoints. A zero-length segment
/// degenerates to a single dab.
pub fn paint_segment(
    buffer: &mut [u8],
    buffer_width: u32,
    buffer_height: u32,
    from: PathPoint,
    to: PathPoint,
    color: Color,
    stroke_width: f32,
    shape: BrushShape,
) {
    let segment_length = from.distance_to(&to);
    if segment_length == 0.0 {
        stamp_dab(buffer, buffer_width, buffer_height, from, color, stroke_width, shape);
        return;
    }
    let dab_count = (segment_length / SEGMENT_DAB_SPACING).ceil() as u32;
    for dab_index in 0..=dab_count {
        let interpolation_t = dab_index as f32 / dab_count as f32;
        let dab = PathPoint {
            x: from.x + (to.x - from.x) * interpolation_t,
            y: from.y + (to.y - from.y) * interpolation_t,
            pressure: from.pressure + (to.pressure - from.pressure) * interpolation_t,
        };
        stamp_dab(buffer, buffer_width, buffer_height, dab, color, stroke_width, shape);
    }
}

/// Stamp one circular dab centered on `dab`. Radius scales with pressure,
/// alpha falls off toward the edge.
pub fn stamp_dab(
    buffer: &mut [u8],
    buffer_width: u32,
    buffer_height: u32,
    dab: PathPoint,
    color: Color,
    stroke_width: f32,
    shape: BrushShape,
) {
    let radius = (stroke_width * 0.5 * dab.pressure).max(0.5);
    let radius_squared = radius * radius;
    let min_x = (dab.x - radius).floor().max(0.0) as i64;
    let min_y = (dab.y - radius).floor().max(0.0) as i64;
    let max_x = ((dab.x + radius).ceil() as i64).min(buffer_width as i64 - 1);
    let max_y = ((dab.y + radius).ceil() as i64).min(buffer_height as i64 - 1);

    for pixel_y in min_y..=max_y {
        for pixel_x in min_x..=max_x {
            let delta_x = pixel_x as f32 - dab.x;
            let delta_y = pixel_y as f32 - dab.y;
            let distance_squared = delta_x * delta_x + delta_y * delta_y;
            if distance_squared > radius_squared {
                continue;
            }
            let edge_softness = 1.0 - (distance_squared / radius_squared).sqrt();
            let coverage = (color.a * edge_softness).clamp(0.0, 1.0);
            if coverage <= 0.0 {
                continue;
            }
            let offset = ((pixel_y as u32 * buffer_width + pixel_x as u32) * 4) as usize;
            let pixel = &mut buffer[offset..offset + 4];
            match shape {
                BrushShape::Round => deposit(pixel, color, coverage),
                BrushShape::Eraser => erase(pixel, coverage),
            }
        }
    }
}

/// Bounding box of a path inflated by the brush radius.
pub fn path_bounds(points: &[PathPoint], stroke_width: f32) -> Option<Rect> {
    let first = points.first()?;
    let mut min_x = first.x;
    let mut min_y = first.y;
    let mut max_x = first.x;
    let mut max_y = first.y;
    for point in points {
        min_x = min_x.min(point.x);
        min_y = min_y.min(point.y);
        max_x = max_x.max(point.x);
        max_y = max_y.max(point.y);
    }
    let half_width = stroke_width * 0.5 + 1.0;
    Rect::from_float_bounds(
        min_x - half_width,
        min_y - half_width,
        max_x + half_width,
        max_y + half_width,
    )
}

fn deposit(pixel: &mut [u8], color: Color, coverage: f32) {
    let dst_r = pixel[0] as f32 / 255.0;
    let dst_g = pixel[1] as f32 / 255.0;
    let dst_b = pixel[2] as f32 / 255.0;
    let dst_a = pixel[3] as f32 / 255.0;

    let out_a = coverage + dst_a * (1.0 - coverage);
    if out_a <= 0.0 {
        return;
    }
    let out_r = (color.r * coverage + dst_r * dst_a * (1.0 - coverage)) / out_a;
    let out_g = (color.g * coverage + dst_g * dst_a * (1.0 - coverage)) / out_a;
    let out_b = (color.b * coverage + dst_b * dst_a * (1.0 - coverage)) / out_a;

    pixel[0] = (out_r.clamp(0.0, 1.0) * 255.0).round() as u8;
    pixel[1] = (out_g.clamp(0.0, 1.0) * 255.0).round() as u8;
    pixel[2] = (out_b.clamp(0.0, 1.0) * 255.0).round() as u8;
    pixel[3] = (out_a.clamp(0.0, 1.0) * 255.0).round() as u8;
}

fn erase(pixel: &mut [u8], coverage: f32) {
    let dst_a = pixel[3] as f32 / 255.0;
    pixel[3] = ((dst_a * (1.0 - coverage)).clamp(0.0, 1.0) * 255.0).round() as u8;
}

#[cfg(test)]
mod tests {
    use super::*;

    const WIDTH: u32 = 32;
    const HEIGHT: u32 = 32;

    fn blank_buffer() -> Vec<u8> {
        vec![0; (WIDTH * HEIGHT * 4) as usize]
    }

    fn alpha_at(buffer: &[u8], x: u32, y: u32) -> u8 {
        buffer[((y * WIDTH + x) * 4 + 3) as usize]
    }

    #[test]
    fn dab_paints_the_center_pixel_fully() {
        let mut buffer = blank_buffer();
        stamp_dab(
            &mut buffer,
            WIDTH,
            HEIGHT,
            PathPoint::new(16.0, 16.0, 1.0),
            Color::new(1.0, 0.0, 0.0, 1.0),
            4.0,
            BrushShape::Round,
        );
        let offset = ((16 * WIDTH + 16) * 4) as usize;
        assert_eq!(buffer[offset], 255);
        assert_eq!(buffer[offset + 3], 255);
    }

    #[test]
    fn segment_leaves_no_gap_between_distant_points() {
        let mut buffer = blank_buffer();
        paint_segment(
            &mut buffer,
            WIDTH,
            HEIGHT,
            PathPoint::new(4.0, 16.0, 1.0),
            PathPoint::new(28.0, 16.0, 1.0),
            Color::BLACK,
            4.0,
            BrushShape::Round,
        );
        for x in 4..=28 {
            assert!(
                alpha_at(&buffer, x, 16) > 0,
                "unpainted gap at x = {x}"
            );
        }
    }

    #[test]
    fn eraser_removes_coverage_without_depositing_color() {
        let mut buffer = blank_buffer();
        let center = PathPoint::new(16.0, 16.0, 1.0);
        stamp_dab(
            &mut buffer,
            WIDTH,
            HEIGHT,
            center,
            Color::new(0.0, 1.0, 0.0, 1.0),
            6.0,
            BrushShape::Round,
        );
        assert_eq!(alpha_at(&buffer, 16, 16), 255);

        stamp_dab(
            &mut buffer,
            WIDTH,
            HEIGHT,
            center,
            Color::new(1.0, 1.0, 1.0, 1.0),
            6.0,
            BrushShape::Eraser,
        );
        assert_eq!(alpha_at(&buffer, 16, 16), 0);
    }

    #[test]
    fn paint_path_reports_clipped_bounds() {
        let mut buffer = blank_buffer();
        let touched = paint_path(
            &mut buffer,
            WIDTH,
            HEIGHT,
            &[
                PathPoint::new(0.0, 0.0, 1.0),
                PathPoint::new(10.0, 0.0, 1.0),
            ],
            Color::BLACK,
            2.0,
            BrushShape::Round,
        )
        .expect("path touches the buffer");
        assert_eq!(touched.x, 0);
        assert_eq!(touched.y, 0);
        assert!(touched.right() <= WIDTH);
        assert!(touched.bottom() <= HEIGHT);
    }

    #[test]
    fn out_of_bounds_path_paints_nothing() {
        let mut buffer = blank_buffer();
        let touched = paint_path(
            &mut buffer,
            WIDTH,
            HEIGHT,
            &[
                PathPoint::new(-50.0, -50.0, 1.0),
                PathPoint::new(-40.0, -50.0, 1.0),
            ],
            Color::BLACK,
            2.0,
            BrushShape::Round,
        );
        assert!(touched.is_none());
        assert!(buffer.iter().all(|&byte| byte == 0));
    }
}
