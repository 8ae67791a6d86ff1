//! Renderer backends and ordered-fallback selection.
//!
//! Every backend satisfies one capability contract: execute commands,
//! recomposite into a caller-provided frame target, resize, dispose. The
//! selector tries candidates in preference order (accelerated first,
//! software raster last) and demotes transparently on initialization
//! failure; consumers are written against the trait and never observe which
//! implementation is live.

mod accelerated;
mod executor;
mod software;

pub use accelerated::{AcceleratedBackend, AcceleratedInitError};
pub use executor::{CommandError, CommandExecutor};
pub use software::SoftwareBackend;

use compositor::{CompositeError, MergedRects};
use protocol::DrawCommand;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Accelerated,
    Software,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Accelerated => formatter.write_str("accelerated"),
            BackendKind::Software => formatter.write_str("software"),
        }
    }
}

#[derive(Debug)]
pub enum RenderError {
    Composite(CompositeError),
    Gpu { message: String },
    Disposed,
}

impl From<CompositeError> for RenderError {
    fn from(error: CompositeError) -> Self {
        RenderError::Composite(error)
    }
}

/// The uniform capability surface of a live renderer.
pub trait RendererBackend: Send {
    fn kind(&self) -> BackendKind;

    fn executor(&self) -> &CommandExecutor;

    fn executor_mut(&mut self) -> &mut CommandExecutor;

    fn execute(&mut self, command: &DrawCommand) -> Result<(), CommandError> {
        self.executor_mut().execute(command)
    }

    /// Drain accumulated dirty regions, recomposite them, and write the
    /// result into `target` (an RGBA8 buffer sized to the surface). Returns
    /// the merged rects that changed; an empty result means `target` was not
    /// touched.
    fn commit_frame(&mut self, target: &mut [u8]) -> Result<MergedRects, RenderError>;

    fn resize(&mut self, width: u32, height: u32) -> Result<(), RenderError>;

    fn dispose(&mut self);
}

/// Candidate order for backend selection.
#[derive(Debug, Clone)]
pub struct BackendPreference {
    pub order: Vec<BackendKind>,
}

impl Default for BackendPreference {
    fn default() -> Self {
        Self {
            order: vec![BackendKind::Accelerated, BackendKind::Software],
        }
    }
}

impl BackendPreference {
    pub fn software_only() -> Self {
        Self {
            order: vec![BackendKind::Software],
        }
    }
}

/// Every candidate failed; the surface is unusable for drawing.
#[derive(Debug)]
pub struct BackendSelectError {
    pub attempts: Vec<(BackendKind, String)>,
}

/// Try candidates in order; each failure logs the demotion and falls through
/// to the next.
pub fn select_backend(
    preference: &BackendPreference,
    width: u32,
    height: u32,
) -> Result<Box<dyn RendererBackend>, BackendSelectError> {
    let mut attempts = Vec::new();
    for kind in &preference.order {
        match kind {
            BackendKind::Accelerated => match AcceleratedBackend::new(width, height) {
                Ok(backend) => {
                    tracing::info!(backend = %BackendKind::Accelerated, "renderer backend selected");
                    return Ok(Box::new(backend));
                }
                Err(error) => {
                    tracing::warn!(
                        backend = %BackendKind::Accelerated,
                        %error,
                        "backend initialization failed, falling back"
                    );
                    attempts.push((BackendKind::Accelerated, error.to_string()));
                }
            },
            BackendKind::Software => {
                tracing::info!(backend = %BackendKind::Software, "renderer backend selected");
                return Ok(Box::new(SoftwareBackend::new(width, height)));
            }
        }
    }
    tracing::warn!("no renderer backend available");
    Err(BackendSelectError { attempts })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn software_fallback_always_succeeds_when_listed() {
        let backend = select_backend(&BackendPreference::software_only(), 32, 32)
            .expect("software backend is infallible");
        assert_eq!(backend.kind(), BackendKind::Software);
    }

    #[test]
    fn empty_preference_yields_select_error() {
        let error = match select_backend(&BackendPreference { order: Vec::new() }, 32, 32) {
            Ok(_) => panic!("no candidates must not produce a backend"),
            Err(error) => error,
        };
        assert!(error.attempts.is_empty());
    }

    #[test]
    fn default_preference_ends_with_software() {
        let preference = BackendPreference::default();
        assert_eq!(preference.order.last(), Some(&BackendKind::Software));
    }
}
