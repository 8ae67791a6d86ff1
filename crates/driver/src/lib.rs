//! Stroke session tracking.
//!
//! Converts irregularly-spaced pointer samples into continuous stroke paths.
//! Session state is owned exclusively by the tracker; consumers only ever see
//! the emitted [`DrawCommand`] values.

use std::collections::HashMap;

use protocol::{Color, DrawCommand, LayerId, PathPoint, ToolParams};

pub type StrokeSessionId = u64;

/// Fixed interpolation step for gap filling, in surface pixels.
pub const RESAMPLE_STEP_PIXELS: f32 = 2.0;

/// A raw pointer sample as delivered by the input device. Pressure is absent
/// for devices that do not report it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawInputPoint {
    pub x: f32,
    pub y: f32,
    pub pressure: Option<f32>,
}

impl RawInputPoint {
    pub fn new(x: f32, y: f32) -> Self {
        Self {
            x,
            y,
            pressure: None,
        }
    }

    pub fn with_pressure(x: f32, y: f32, pressure: f32) -> Self {
        Self {
            x,
            y,
            pressure: Some(pressure),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrokeInputError {
    /// Non-finite coordinates or pressure outside [0, 1].
    InvalidInput,
    UnknownSession { session_id: StrokeSessionId },
}

#[derive(Debug)]
struct StrokeSession {
    layer_id: LayerId,
    tool: ToolParams,
    color: Color,
    points: Vec<PathPoint>,
    preview_cursor: usize,
}

/// Owner of every in-progress freehand gesture.
///
/// `begin`/`add_point` accumulate resampled points, `end` consumes the
/// session into exactly one committed [`DrawCommand::DrawPath`], and
/// `cancel` discards it without emitting anything.
#[derive(Debug, Default)]
pub struct StrokeTracker {
    sessions: HashMap<StrokeSessionId, StrokeSession>,
    next_session_id: StrokeSessionId,
}

impl StrokeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active_session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn begin(
        &mut self,
        layer_id: LayerId,
        point: RawInputPoint,
        tool: ToolParams,
        color: Color,
    ) -> Result<StrokeSessionId, StrokeInputError> {
        let first = validate_point(point, &tool)?;
        let session_id = self.next_session_id;
        self.next_session_id += 1;
        self.sessions.insert(
            session_id,
            StrokeSession {
                layer_id,
                tool,
                color,
                points: vec![first],
                preview_cursor: 0,
            },
        );
        Ok(session_id)
    }

    pub fn add_point(
        &mut self,
        session_id: StrokeSessionId,
        point: RawInputPoint,
    ) -> Result<(), StrokeInputError> {
        let session = self
            .sessions
            .get_mut(&session_id)
            .ok_or(StrokeInputError::UnknownSession { session_id })?;
        let next = validate_point(point, &session.tool)?;
        let previous = *session
            .points
            .last()
            .expect("session always holds its begin point");

        // Gap filling: inputs farther apart than the tool-dependent threshold
        // are interpolated at the fixed step so no visible gap remains.
        let distance = previous.distance_to(&next);
        if distance > resample_threshold(&session.tool) {
            let step_count = (distance / RESAMPLE_STEP_PIXELS).floor() as u32;
            for step in 1..=step_count {
                let interpolation_t = (step as f32 * RESAMPLE_STEP_PIXELS) / distance;
                if interpolation_t >= 1.0 {
                    break;
                }
                session.points.push(lerp_point(previous, next, interpolation_t));
            }
        }
        session.points.push(next);
        Ok(())
    }

    /// Consume the session into one committed path covering the full stroke.
    /// A zero/one-point session degenerates to a minimal-length segment so a
    /// tap always leaves a mark.
    pub fn end(&mut self, session_id: StrokeSessionId) -> Result<DrawCommand, StrokeInputError> {
        let session = self
            .sessions
            .remove(&session_id)
            .ok_or(StrokeInputError::UnknownSession { session_id })?;
        let mut points = session.points;
        if points.len() == 1 {
            let dab = points[0];
            points.push(dab);
        }
        Ok(path_command(&session.layer_id, points, session.color, &session.tool))
    }

    /// Discard a session without emitting a command. Layer state is never
    /// touched by an in-progress session, so cancellation has no visible
    /// effect.
    pub fn cancel(&mut self, session_id: StrokeSessionId) -> Result<(), StrokeInputError> {
        self.sessions
            .remove(&session_id)
            .map(|_| ())
            .ok_or(StrokeInputError::UnknownSession { session_id })
    }

    /// Uncommitted segment added since the previous preview call, for callers
    /// that render in-progress strokes ahead of the commit. Returns `None`
    /// when nothing new accumulated.
    pub fn preview(
        &mut self,
        session_id: StrokeSessionId,
    ) -> Result<Option<DrawCommand>, StrokeInputError> {
        let session = self
            .sessions
            .get_mut(&session_id)
            .ok_or(StrokeInputError::UnknownSession { session_id })?;
        if session.preview_cursor >= session.points.len() {
            return Ok(None);
        }
        // Overlap one point backwards so consecutive previews connect.
        let start = session.preview_cursor.saturating_sub(1);
        let mut points: Vec<PathPoint> = session.points[start..].to_vec();
        session.preview_cursor = session.points.len();
        if points.len() == 1 {
            let dab = points[0];
            points.push(dab);
        }
        Ok(Some(path_command(
            &session.layer_id,
            points,
            session.color,
            &session.tool,
        )))
    }
}

fn resample_threshold(tool: &ToolParams) -> f32 {
    (tool.size * 0.5).max(RESAMPLE_STEP_PIXELS)
}

fn validate_point(point: RawInputPoint, tool: &ToolParams) -> Result<PathPoint, StrokeInputError> {
    if !point.x.is_finite() || !point.y.is_finite() {
        return Err(StrokeInputError::InvalidInput);
    }
    let pressure = match point.pressure {
        Some(pressure) => {
            if !pressure.is_finite() || !(0.0..=1.0).contains(&pressure) {
                return Err(StrokeInputError::InvalidInput);
            }
            if tool.pressure_sensitivity { pressure } else { 1.0 }
        }
        None => 1.0,
    };
    Ok(PathPoint::new(point.x, point.y, pressure))
}

fn lerp_point(from: PathPoint, to: PathPoint, interpolation_t: f32) -> PathPoint {
    PathPoint {
        x: from.x + (to.x - from.x) * interpolation_t,
        y: from.y + (to.y - from.y) * interpolation_t,
        pressure: from.pressure + (to.pressure - from.pressure) * interpolation_t,
    }
}

fn path_command(
    layer_id: &LayerId,
    points: Vec<PathPoint>,
    color: Color,
    tool: &ToolParams,
) -> DrawCommand {
    DrawCommand::DrawPath {
        layer_id: layer_id.clone(),
        points,
        color: color.with_alpha(color.a * tool.opacity),
        width: tool.size,
        shape: tool.shape,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn begin_session(tracker: &mut StrokeTracker, x: f32, y: f32) -> StrokeSessionId {
        tracker
            .begin(
                LayerId::new("layer-1"),
                RawInputPoint::new(x, y),
                ToolParams::default(),
                Color::BLACK,
            )
            .expect("begin stroke")
    }

    fn command_points(command: &DrawCommand) -> &[PathPoint] {
        match command {
            DrawCommand::DrawPath { points, .. } => points,
            other => panic!("expected DrawPath, got {}", other.kind_name()),
        }
    }

    #[test]
    fn begin_rejects_non_finite_coordinates_and_bad_pressure() {
        let mut tracker = StrokeTracker::new();
        let tool = ToolParams::default();
        let error = tracker
            .begin(
                LayerId::new("l"),
                RawInputPoint::new(f32::NAN, 0.0),
                tool,
                Color::BLACK,
            )
            .expect_err("nan coordinate must fail");
        assert_eq!(error, StrokeInputError::InvalidInput);

        let error = tracker
            .begin(
                LayerId::new("l"),
                RawInputPoint::with_pressure(0.0, 0.0, 1.5),
                tool,
                Color::BLACK,
            )
            .expect_err("out-of-range pressure must fail");
        assert_eq!(error, StrokeInputError::InvalidInput);
    }

    #[test]
    fn missing_pressure_defaults_to_full() {
        let mut tracker = StrokeTracker::new();
        let session_id = begin_session(&mut tracker, 1.0, 1.0);
        let command = tracker.end(session_id).expect("end stroke");
        assert!(command_points(&command).iter().all(|p| p.pressure == 1.0));
    }

    #[test]
    fn distant_points_are_interpolated_at_the_fixed_step() {
        let mut tracker = StrokeTracker::new();
        let session_id = begin_session(&mut tracker, 0.0, 0.0);
        tracker
            .add_point(session_id, RawInputPoint::new(10.0, 0.0))
            .expect("add point");
        let command = tracker.end(session_id).expect("end stroke");
        let points = command_points(&command);

        assert_eq!(points.first().map(|p| p.x), Some(0.0));
        assert_eq!(points.last().map(|p| p.x), Some(10.0));
        for pair in points.windows(2) {
            assert!(
                pair[0].distance_to(&pair[1]) <= RESAMPLE_STEP_PIXELS + f32::EPSILON,
                "gap of {} exceeds resample step",
                pair[0].distance_to(&pair[1])
            );
        }
    }

    #[test]
    fn interpolated_pressure_is_linear_along_the_segment() {
        let mut tracker = StrokeTracker::new();
        let session_id = tracker
            .begin(
                LayerId::new("l"),
                RawInputPoint::with_pressure(0.0, 0.0, 0.0),
                ToolParams::default(),
                Color::BLACK,
            )
            .expect("begin stroke");
        tracker
            .add_point(session_id, RawInputPoint::with_pressure(8.0, 0.0, 1.0))
            .expect("add point");
        let command = tracker.end(session_id).expect("end stroke");
        let points = command_points(&command);
        let midway = points
            .iter()
            .find(|p| (p.x - 4.0).abs() < 0.01)
            .expect("midway sample exists");
        assert!((midway.pressure - 0.5).abs() < 0.01);
    }

    #[test]
    fn single_point_session_degenerates_to_a_dab() {
        let mut tracker = StrokeTracker::new();
        let session_id = begin_session(&mut tracker, 4.0, 7.0);
        let command = tracker.end(session_id).expect("end stroke");
        let points = command_points(&command);
        assert_eq!(points.len(), 2);
        assert_eq!(points[0], points[1]);
    }

    #[test]
    fn cancel_discards_the_session() {
        let mut tracker = StrokeTracker::new();
        let session_id = begin_session(&mut tracker, 0.0, 0.0);
        tracker.cancel(session_id).expect("cancel stroke");
        let error = tracker.end(session_id).expect_err("ended twice");
        assert_eq!(error, StrokeInputError::UnknownSession { session_id });
        assert_eq!(tracker.active_session_count(), 0);
    }

    #[test]
    fn preview_emits_only_newly_accumulated_segments() {
        let mut tracker = StrokeTracker::new();
        let session_id = begin_session(&mut tracker, 0.0, 0.0);
        let first = tracker
            .preview(session_id)
            .expect("preview")
            .expect("first preview has the begin dab");
        assert_eq!(command_points(&first).len(), 2);

        assert!(tracker.preview(session_id).expect("preview").is_none());

        tracker
            .add_point(session_id, RawInputPoint::new(1.0, 0.0))
            .expect("add point");
        let second = tracker
            .preview(session_id)
            .expect("preview")
            .expect("new segment accumulated");
        let points = command_points(&second);
        assert_eq!(points.first().map(|p| p.x), Some(0.0));
        assert_eq!(points.last().map(|p| p.x), Some(1.0));
    }

    #[test]
    fn tool_opacity_folds_into_committed_color() {
        let mut tracker = StrokeTracker::new();
        let tool = ToolParams {
            opacity: 0.5,
            ..ToolParams::default()
        };
        let session_id = tracker
            .begin(
                LayerId::new("l"),
                RawInputPoint::new(0.0, 0.0),
                tool,
                Color::new(1.0, 0.0, 0.0, 1.0),
            )
            .expect("begin stroke");
        match tracker.end(session_id).expect("end stroke") {
            DrawCommand::DrawPath { color, .. } => assert_eq!(color.a, 0.5),
            other => panic!("expected DrawPath, got {}", other.kind_name()),
        }
    }
}
