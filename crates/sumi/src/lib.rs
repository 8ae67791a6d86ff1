//! Surface crate: the incremental layer-compositing and draw-command
//! execution engine behind one drawing surface.
//!
//! Architecture overview:
//! - `protocol`: the closed command vocabulary and shared primitives.
//! - `driver`: stroke session tracking and pointer resampling.
//! - `document`/`compositor`/`brush`: layer store, blend math, dirty
//!   tracking, rasterization.
//! - `backend`: interchangeable renderer implementations behind one
//!   capability trait, with ordered fallback selection.
//! - here: the transport protocol (correlation ids, timeouts, pending
//!   table), the shared frame region, the engine thread, and the
//!   [`RendererHandle`] consumers hold.
//!
//! Control flow: pointer input -> stroke tracker -> draw commands ->
//! request queue (crosses the thread boundary) -> executor applies to the
//! layer store -> compositor + dirty tracker produce a diff -> the diff
//! comes back over the response channel while the pixels land in the shared
//! frame region.

mod config;
mod engine;
mod handle;
mod region;
mod transport;

pub use backend::{BackendKind, BackendPreference};
pub use config::EngineConfig;
pub use driver::{RawInputPoint, StrokeSessionId};
pub use handle::{RendererHandle, SurfaceState};
pub use region::SharedFrameRegion;
pub use transport::{
    EngineError, EngineLayersSnapshot, EngineOutcome, FrameDiff, LayerSummary, PendingResponse,
    RequestId,
};

#[cfg(test)]
mod tests;
