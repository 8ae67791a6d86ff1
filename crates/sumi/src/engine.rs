//! Engine thread: ordered command execution and frame publication.
//!
//! One background thread per surface drains the bounded request queue in
//! arrival order, so execution order always equals submission order.
//! Initialization is itself a request and runs before anything queued behind
//! it; drawing requests reaching an uninitialized or failed surface are
//! rejected, never dropped.

use std::sync::Arc;

use backend::{RendererBackend, select_backend};
use crossbeam_channel::Receiver;
use protocol::DrawCommand;

use crate::config::EngineConfig;
use crate::region::SharedFrameRegion;
use crate::transport::{
    EngineError, EngineLayersSnapshot, EngineOutcome, EngineRequest, EngineResult, FrameDiff,
    LayerSummary, PendingTable, RequestPayload,
};

enum EngineState {
    Uninitialized,
    Ready(Box<dyn RendererBackend>),
    /// Terminal: every renderer candidate failed.
    Failed,
}

pub(crate) struct EngineLoop {
    state: EngineState,
    region: Arc<SharedFrameRegion>,
    config: EngineConfig,
}

impl EngineLoop {
    pub(crate) fn new(region: Arc<SharedFrameRegion>, config: EngineConfig) -> Self {
        Self {
            state: EngineState::Uninitialized,
            region,
            config,
        }
    }

    pub(crate) fn run(mut self, receiver: Receiver<EngineRequest>, pending: Arc<PendingTable>) {
        tracing::debug!("engine thread started");
        while let Ok(request) = receiver.recv() {
            let shutting_down = matches!(request.payload, RequestPayload::Shutdown);
            let result = self.handle(request.payload);
            pending.resolve(request.request_id, result);
            if shutting_down {
                break;
            }
        }
        // Anything still queued behind a shutdown (or a dropped handle) is
        // rejected explicitly rather than vanishing.
        while let Ok(request) = receiver.try_recv() {
            pending.resolve(request.request_id, Err(EngineError::TransportFailure));
        }
        if let EngineState::Ready(mut live_backend) = self.state {
            live_backend.dispose();
        }
        tracing::debug!("engine thread exiting");
    }

    fn handle(&mut self, payload: RequestPayload) -> EngineResult {
        match payload {
            RequestPayload::Initialize => self.handle_initialize(),
            RequestPayload::Submit(commands) => self.handle_submit(commands),
            RequestPayload::Resize { width, height } => self.handle_resize(width, height),
            RequestPayload::QueryState => self.handle_query_state(),
            RequestPayload::Shutdown => self.handle_shutdown(),
        }
    }

    fn handle_initialize(&mut self) -> EngineResult {
        match &self.state {
            EngineState::Ready(live_backend) => {
                // Idempotent: re-initialization reports the live backend.
                return Ok(EngineOutcome::Initialized {
                    backend_kind: live_backend.kind(),
                });
            }
            EngineState::Failed => return Err(EngineError::BackendUnavailable),
            EngineState::Uninitialized => {}
        }
        match select_backend(
            &self.config.backend_preference,
            self.config.surface_width,
            self.config.surface_height,
        ) {
            Ok(live_backend) => {
                let backend_kind = live_backend.kind();
                self.state = EngineState::Ready(live_backend);
                Ok(EngineOutcome::Initialized { backend_kind })
            }
            Err(select_error) => {
                tracing::warn!(
                    attempts = select_error.attempts.len(),
                    "surface entering renderer-unavailable state"
                );
                self.state = EngineState::Failed;
                Err(EngineError::BackendUnavailable)
            }
        }
    }

    fn handle_submit(&mut self, commands: Vec<DrawCommand>) -> EngineResult {
        let Self { state, region, .. } = self;
        let live_backend = require_backend(state)?;
        // A multi-command submit executes with batch semantics, so a failure
        // anywhere leaves no partial mutation and ships no diff.
        let command = if commands.len() == 1 {
            commands.into_iter().next().expect("length checked")
        } else {
            DrawCommand::Batch { commands }
        };
        live_backend.execute(&command)?;
        let diff = publish_frame(region, live_backend)?;
        Ok(EngineOutcome::Committed(diff))
    }

    fn handle_resize(&mut self, width: u32, height: u32) -> EngineResult {
        if width == 0 || height == 0 {
            return Err(EngineError::InvalidInput {
                reason: "surface dimensions must be positive",
            });
        }
        let Self {
            state,
            region,
            config,
        } = self;
        let live_backend = require_backend(state)?;
        live_backend
            .resize(width, height)
            .map_err(|error| EngineError::RenderFailure {
                message: format!("{error:?}"),
            })?;
        region.resize(width, height);
        config.surface_width = width;
        config.surface_height = height;
        // Repaint the fresh region before acknowledging.
        publish_frame(region, live_backend)?;
        Ok(EngineOutcome::Resized { width, height })
    }

    fn handle_query_state(&mut self) -> EngineResult {
        let snapshot = match &self.state {
            EngineState::Ready(live_backend) => {
                let executor = live_backend.executor();
                EngineLayersSnapshot {
                    layers: executor
                        .store()
                        .ordered_layers()
                        .iter()
                        .enumerate()
                        .map(|(index, layer)| LayerSummary {
                            id: layer.id().clone(),
                            name: layer.name.clone(),
                            index,
                            opacity: layer.opacity,
                            blend_mode: layer.blend_mode,
                            visible: layer.visible,
                            locked: layer.locked,
                        })
                        .collect(),
                    surface_width: executor.surface_width(),
                    surface_height: executor.surface_height(),
                }
            }
            _ => EngineLayersSnapshot {
                layers: Vec::new(),
                surface_width: self.config.surface_width,
                surface_height: self.config.surface_height,
            },
        };
        Ok(EngineOutcome::State(snapshot))
    }

    fn handle_shutdown(&mut self) -> EngineResult {
        if let EngineState::Ready(live_backend) = &mut self.state {
            live_backend.dispose();
        }
        self.state = EngineState::Failed;
        Ok(EngineOutcome::ShutDownAcknowledged)
    }
}

fn require_backend(
    state: &mut EngineState,
) -> Result<&mut Box<dyn RendererBackend>, EngineError> {
    match state {
        EngineState::Ready(live_backend) => Ok(live_backend),
        EngineState::Uninitialized => Err(EngineError::NotInitialized),
        EngineState::Failed => Err(EngineError::BackendUnavailable),
    }
}

/// Recomposite into the shared region and bump its revision. The write
/// completes before the response is sent, so a reader acting on the
/// returned diff can never observe a torn frame.
fn publish_frame(
    region: &SharedFrameRegion,
    live_backend: &mut Box<dyn RendererBackend>,
) -> Result<FrameDiff, EngineError> {
    let commit_result = region.write(|target| live_backend.commit_frame(target));
    let rects = commit_result.map_err(|error| EngineError::RenderFailure {
        message: format!("{error:?}"),
    })?;
    let frame_revision = if rects.is_empty() {
        region.revision()
    } else {
        region.publish()
    };
    Ok(FrameDiff {
        rects,
        frame_revision,
    })
}
