//! Request/response transport across the engine thread boundary.
//!
//! Each outbound request carries a caller-generated correlation id. The
//! issuer parks a completion sender in the pending table; the engine thread
//! resolves it by id when the work finishes. Ids no longer present (timed
//! out, torn down) are discarded quietly so a late or duplicate response can
//! never clobber another request's result.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use backend::{BackendKind, CommandError};
use compositor::MergedRects;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use protocol::{BlendMode, DrawCommand, LayerId};

pub type RequestId = u64;

#[derive(Debug)]
pub enum RequestPayload {
    Initialize,
    Submit(Vec<DrawCommand>),
    Resize { width: u32, height: u32 },
    QueryState,
    Shutdown,
}

#[derive(Debug)]
pub struct EngineRequest {
    pub request_id: RequestId,
    pub payload: RequestPayload,
}

/// Rects that changed in the shared frame region, plus the region revision
/// they belong to. The reader side uses this as its permission to read.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameDiff {
    pub rects: MergedRects,
    pub frame_revision: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LayerSummary {
    pub id: LayerId,
    pub name: String,
    pub index: usize,
    pub opacity: f32,
    pub blend_mode: BlendMode,
    pub visible: bool,
    pub locked: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineLayersSnapshot {
    pub layers: Vec<LayerSummary>,
    pub surface_width: u32,
    pub surface_height: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngineOutcome {
    Initialized { backend_kind: BackendKind },
    Committed(FrameDiff),
    Resized { width: u32, height: u32 },
    State(EngineLayersSnapshot),
    ShutDownAcknowledged,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngineError {
    InvalidInput { reason: &'static str },
    UnknownLayer { layer_id: LayerId },
    LayerLocked { layer_id: LayerId },
    /// Initialization has not run on this surface yet.
    NotInitialized,
    /// Every renderer candidate failed; the surface is terminal.
    BackendUnavailable,
    RequestTimeout,
    /// The engine thread is gone; the surface must be re-created.
    TransportFailure,
    RenderFailure { message: String },
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::InvalidInput { reason } => write!(formatter, "invalid input: {reason}"),
            EngineError::UnknownLayer { layer_id } => {
                write!(formatter, "unknown layer: {layer_id}")
            }
            EngineError::LayerLocked { layer_id } => write!(formatter, "layer locked: {layer_id}"),
            EngineError::NotInitialized => formatter.write_str("surface not initialized"),
            EngineError::BackendUnavailable => formatter.write_str("renderer unavailable"),
            EngineError::RequestTimeout => formatter.write_str("request timed out"),
            EngineError::TransportFailure => formatter.write_str("engine thread terminated"),
            EngineError::RenderFailure { message } => {
                write!(formatter, "render failure: {message}")
            }
        }
    }
}

impl From<CommandError> for EngineError {
    fn from(error: CommandError) -> Self {
        match error {
            CommandError::InvalidInput { reason } => EngineError::InvalidInput { reason },
            CommandError::UnknownLayer { layer_id } => EngineError::UnknownLayer { layer_id },
            CommandError::LayerLocked { layer_id } => EngineError::LayerLocked { layer_id },
        }
    }
}

pub type EngineResult = Result<EngineOutcome, EngineError>;

/// Issuer-side map from correlation id to parked completion.
#[derive(Default)]
pub struct PendingTable {
    entries: Mutex<HashMap<RequestId, Sender<EngineResult>>>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<RequestId, Sender<EngineResult>>> {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub fn register(&self, request_id: RequestId, completion: Sender<EngineResult>) {
        self.lock().insert(request_id, completion);
    }

    pub fn remove(&self, request_id: RequestId) {
        self.lock().remove(&request_id);
    }

    /// Resolve a pending completion. Stale ids resolve to `false` and the
    /// result is dropped, so late responses cannot affect anything.
    pub fn resolve(&self, request_id: RequestId, result: EngineResult) -> bool {
        let Some(completion) = self.lock().remove(&request_id) else {
            tracing::debug!(request_id, "discarding response for stale request id");
            return false;
        };
        // The receiver may have been dropped by a timed-out caller between
        // our lookup and this send; that is equivalent to a stale id.
        completion.send(result).is_ok()
    }

    /// Teardown path: reject everything still pending.
    pub fn reject_all(&self, error: EngineError) {
        let drained: Vec<(RequestId, Sender<EngineResult>)> = self.lock().drain().collect();
        for (request_id, completion) in drained {
            tracing::debug!(request_id, "rejecting pending request on teardown");
            let _ = completion.send(Err(error.clone()));
        }
    }

    pub fn pending_count(&self) -> usize {
        self.lock().len()
    }
}

/// Caller-side handle to one in-flight request. Independent requests may be
/// awaited in any order.
pub struct PendingResponse {
    request_id: RequestId,
    receiver: Receiver<EngineResult>,
    deadline: Instant,
    table: Arc<PendingTable>,
}

impl PendingResponse {
    pub(crate) fn new(
        request_id: RequestId,
        receiver: Receiver<EngineResult>,
        deadline: Instant,
        table: Arc<PendingTable>,
    ) -> Self {
        Self {
            request_id,
            receiver,
            deadline,
            table,
        }
    }

    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Non-blocking probe.
    pub fn poll(&self) -> Option<EngineResult> {
        match self.receiver.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(EngineError::TransportFailure)),
        }
    }

    /// Block until the correlated response arrives or the deadline passes.
    /// On expiry the table entry is removed first, so a response that lands
    /// afterwards is discarded as unmatched.
    pub fn wait(self) -> EngineResult {
        let remaining = self.deadline.saturating_duration_since(Instant::now());
        match self.receiver.recv_timeout(remaining) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                self.table.remove(self.request_id);
                // A response may have raced the removal; honor it if so.
                match self.receiver.try_recv() {
                    Ok(result) => result,
                    Err(_) => Err(EngineError::RequestTimeout),
                }
            }
            Err(RecvTimeoutError::Disconnected) => Err(EngineError::TransportFailure),
        }
    }
}
