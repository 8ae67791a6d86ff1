//! Interactive-side surface handle.
//!
//! One [`RendererHandle`] per drawing surface, constructed explicitly and
//! threaded to consumers; it owns the engine thread, the pending-request
//! table, and the shared frame region. The interactive side never performs
//! pixel work itself.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use backend::BackendKind;
use crossbeam_channel::{Sender, bounded};
use driver::{RawInputPoint, StrokeInputError, StrokeSessionId, StrokeTracker};
use protocol::{Color, DrawCommand, LayerId, Rect, ToolParams};

use crate::config::EngineConfig;
use crate::engine::EngineLoop;
use crate::region::SharedFrameRegion;
use crate::transport::{
    EngineError, EngineOutcome, EngineRequest, FrameDiff, LayerSummary, PendingResponse,
    PendingTable, RequestPayload,
};

/// Combined surface state served to the UI layer: the engine's layer list
/// merged with the interactive-side tool state.
#[derive(Debug, Clone, PartialEq)]
pub struct SurfaceState {
    pub layers: Vec<LayerSummary>,
    pub active_layer_id: Option<LayerId>,
    pub current_tool: ToolParams,
    pub current_color: Color,
    pub current_brush_size: f32,
}

pub struct RendererHandle {
    sender: Option<Sender<EngineRequest>>,
    pending: Arc<PendingTable>,
    region: Arc<SharedFrameRegion>,
    engine_thread: Option<std::thread::JoinHandle<()>>,
    next_request_id: AtomicU64,
    tracker: StrokeTracker,
    current_tool: ToolParams,
    current_color: Color,
    active_layer: Option<LayerId>,
    config: EngineConfig,
}

impl RendererHandle {
    pub fn new(config: EngineConfig) -> Self {
        let region = Arc::new(SharedFrameRegion::new(
            config.surface_width,
            config.surface_height,
        ));
        let pending = Arc::new(PendingTable::new());
        let (request_sender, request_receiver) = bounded(config.request_queue_capacity);

        let engine_loop = EngineLoop::new(region.clone(), config.clone());
        let engine_pending = pending.clone();
        let engine_thread = std::thread::Builder::new()
            .name("sumi-engine".to_string())
            .spawn(move || engine_loop.run(request_receiver, engine_pending))
            .expect("spawn engine thread");

        Self {
            sender: Some(request_sender),
            pending,
            region,
            engine_thread: Some(engine_thread),
            next_request_id: AtomicU64::new(1),
            tracker: StrokeTracker::new(),
            current_tool: ToolParams::default(),
            current_color: Color::BLACK,
            active_layer: None,
            config,
        }
    }

    /// Issue a request without waiting. The engine processes the queue in
    /// arrival order, so per-surface execution order equals submission
    /// order regardless of when completions are awaited.
    fn request(&self, payload: RequestPayload) -> Result<PendingResponse, EngineError> {
        let sender = self.sender.as_ref().ok_or(EngineError::TransportFailure)?;
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let (completion_sender, completion_receiver) = bounded(1);
        self.pending.register(request_id, completion_sender);
        let deadline = Instant::now() + self.config.request_timeout;
        if sender
            .send(EngineRequest {
                request_id,
                payload,
            })
            .is_err()
        {
            self.pending.remove(request_id);
            return Err(EngineError::TransportFailure);
        }
        Ok(PendingResponse::new(
            request_id,
            completion_receiver,
            deadline,
            self.pending.clone(),
        ))
    }

    /// Run backend selection on the engine thread. Must complete before any
    /// drawing request is accepted; requests queued behind it are processed
    /// afterwards in order.
    pub fn initialize(&self) -> Result<BackendKind, EngineError> {
        match self.request(RequestPayload::Initialize)?.wait()? {
            EngineOutcome::Initialized { backend_kind } => Ok(backend_kind),
            _ => Err(EngineError::TransportFailure),
        }
    }

    pub fn submit(&self, commands: Vec<DrawCommand>) -> Result<PendingResponse, EngineError> {
        self.request(RequestPayload::Submit(commands))
    }

    /// Convenience wrapper: submit and block on the committed diff.
    pub fn submit_and_wait(&self, commands: Vec<DrawCommand>) -> Result<FrameDiff, EngineError> {
        match self.submit(commands)?.wait()? {
            EngineOutcome::Committed(diff) => Ok(diff),
            _ => Err(EngineError::TransportFailure),
        }
    }

    pub fn resize(&self, width: u32, height: u32) -> Result<(), EngineError> {
        match self.request(RequestPayload::Resize { width, height })?.wait()? {
            EngineOutcome::Resized { .. } => Ok(()),
            _ => Err(EngineError::TransportFailure),
        }
    }

    pub fn get_state(&self) -> Result<SurfaceState, EngineError> {
        match self.request(RequestPayload::QueryState)?.wait()? {
            EngineOutcome::State(snapshot) => Ok(SurfaceState {
                layers: snapshot.layers,
                active_layer_id: self.active_layer.clone(),
                current_tool: self.current_tool,
                current_color: self.current_color,
                current_brush_size: self.current_tool.size,
            }),
            _ => Err(EngineError::TransportFailure),
        }
    }

    pub fn set_active_layer(&mut self, layer_id: Option<LayerId>) {
        self.active_layer = layer_id;
    }

    pub fn active_layer(&self) -> Option<&LayerId> {
        self.active_layer.as_ref()
    }

    pub fn set_current_tool(&mut self, tool: ToolParams) {
        self.current_tool = tool;
    }

    pub fn set_current_color(&mut self, color: Color) {
        self.current_color = color;
    }

    pub fn set_brush_size(&mut self, size: f32) {
        self.current_tool.size = size;
    }

    /// Begin a stroke session on the active layer with the current tool and
    /// color. Invalid samples are rejected before any state changes.
    pub fn begin_stroke(&mut self, point: RawInputPoint) -> Result<StrokeSessionId, EngineError> {
        let layer_id = self
            .active_layer
            .clone()
            .ok_or(EngineError::InvalidInput {
                reason: "no active layer for stroke input",
            })?;
        self.tracker
            .begin(layer_id, point, self.current_tool, self.current_color)
            .map_err(stroke_error)
    }

    pub fn add_stroke_point(
        &mut self,
        session_id: StrokeSessionId,
        point: RawInputPoint,
    ) -> Result<(), EngineError> {
        self.tracker.add_point(session_id, point).map_err(stroke_error)
    }

    /// Uncommitted segment accumulated since the last preview, for the UI's
    /// own in-progress rendering. Layer state is untouched until `end`.
    pub fn stroke_preview(
        &mut self,
        session_id: StrokeSessionId,
    ) -> Result<Option<DrawCommand>, EngineError> {
        self.tracker.preview(session_id).map_err(stroke_error)
    }

    /// Commit the stroke: exactly one draw command covering its full extent
    /// is submitted to the engine.
    pub fn end_stroke(
        &mut self,
        session_id: StrokeSessionId,
    ) -> Result<PendingResponse, EngineError> {
        let command = self.tracker.end(session_id).map_err(stroke_error)?;
        self.submit(vec![command])
    }

    /// Discard the session; no command is emitted and layer state is
    /// unchanged.
    pub fn cancel_stroke(&mut self, session_id: StrokeSessionId) -> Result<(), EngineError> {
        self.tracker.cancel(session_id).map_err(stroke_error)
    }

    /// Read pixels out of the shared frame region. Only call this for rects
    /// covered by a committed diff you have already received; the region is
    /// written solely by the engine thread before each response.
    pub fn read_frame_rect(&self, rect: Rect) -> Option<Vec<u8>> {
        self.region.copy_rect(rect)
    }

    pub fn frame_revision(&self) -> u64 {
        self.region.revision()
    }

    pub fn surface_size(&self) -> (u32, u32) {
        (self.region.width(), self.region.height())
    }

    /// Tear the surface down: terminate the engine thread, reject every
    /// still-pending completion, and refuse further requests.
    pub fn shutdown(&mut self) {
        let Some(sender) = self.sender.take() else {
            return;
        };
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let (completion_sender, completion_receiver) = bounded(1);
        self.pending.register(request_id, completion_sender);
        if sender
            .send(EngineRequest {
                request_id,
                payload: RequestPayload::Shutdown,
            })
            .is_ok()
        {
            let _ = completion_receiver.recv_timeout(self.config.request_timeout);
        } else {
            self.pending.remove(request_id);
        }
        drop(sender);
        if let Some(engine_thread) = self.engine_thread.take() {
            if engine_thread.join().is_err() {
                tracing::warn!("engine thread panicked during shutdown");
            }
        }
        self.pending.reject_all(EngineError::TransportFailure);
        tracing::info!("surface torn down");
    }
}

impl Drop for RendererHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn stroke_error(error: StrokeInputError) -> EngineError {
    match error {
        StrokeInputError::InvalidInput => EngineError::InvalidInput {
            reason: "non-finite coordinates or out-of-range pressure",
        },
        StrokeInputError::UnknownSession { .. } => EngineError::InvalidInput {
            reason: "unknown stroke session",
        },
    }
}
