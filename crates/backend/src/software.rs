//! Software raster backend.
//!
//! The fallback implementation: CPU compositing with bounded recomposition
//! over the merged dirty rects.

use compositor::{MergedRects, composite_bounded, composite_full};

use crate::{BackendKind, CommandExecutor, RenderError, RendererBackend};

pub struct SoftwareBackend {
    executor: CommandExecutor,
    disposed: bool,
}

impl SoftwareBackend {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            executor: CommandExecutor::new(width, height),
            disposed: false,
        }
    }
}

impl RendererBackend for SoftwareBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Software
    }

    fn executor(&self) -> &CommandExecutor {
        &self.executor
    }

    fn executor_mut(&mut self) -> &mut CommandExecutor {
        &mut self.executor
    }

    fn commit_frame(&mut self, target: &mut [u8]) -> Result<MergedRects, RenderError> {
        if self.disposed {
            return Err(RenderError::Disposed);
        }
        let full_surface = self.executor.dirty().is_full_surface_dirty();
        let shipped = self.executor.dirty_mut().take_merged();
        if shipped.is_empty() {
            return Ok(shipped);
        }

        let width = self.executor.surface_width();
        let height = self.executor.surface_height();
        let store = self.executor.store();
        let selection = self.executor.selection();
        if full_surface {
            composite_full(store, selection, width, height, target)?;
        } else {
            for rect in &shipped {
                composite_bounded(store, selection, width, height, *rect, target)?;
            }
        }
        Ok(shipped)
    }

    fn resize(&mut self, width: u32, height: u32) -> Result<(), RenderError> {
        if self.disposed {
            return Err(RenderError::Disposed);
        }
        self.executor.resize(width, height);
        Ok(())
    }

    fn dispose(&mut self) {
        self.disposed = true;
    }
}
