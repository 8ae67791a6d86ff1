//! Shared output frame region.
//!
//! One RGBA8 region sized to the surface, allocated at initialization and
//! owned by the surface for its whole lifetime. The engine thread is the
//! single writer; the interactive side must only read after receiving the
//! committed response that names the changed rects, which is what the
//! revision counter tracks. Updates cross the thread boundary as rect lists,
//! never as inline pixel payloads.

use std::sync::RwLock;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use protocol::Rect;

pub struct SharedFrameRegion {
    bytes: RwLock<Box<[u8]>>,
    width: AtomicU32,
    height: AtomicU32,
    revision: AtomicU64,
}

impl SharedFrameRegion {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            bytes: RwLock::new(vec![0u8; (width * height * 4) as usize].into_boxed_slice()),
            width: AtomicU32::new(width),
            height: AtomicU32::new(height),
            revision: AtomicU64::new(0),
        }
    }

    pub fn width(&self) -> u32 {
        self.width.load(Ordering::Acquire)
    }

    pub fn height(&self) -> u32 {
        self.height.load(Ordering::Acquire)
    }

    /// Monotonic counter bumped once per published frame; a `FrameDiff`
    /// carries the revision its rects belong to.
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::Acquire)
    }

    /// Engine-side write access. Single writer per surface.
    pub(crate) fn write<R>(&self, writer: impl FnOnce(&mut [u8]) -> R) -> R {
        let mut guard = self
            .bytes
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        writer(&mut guard)
    }

    /// Bump the revision after a completed write, before the committed
    /// response is sent.
    pub(crate) fn publish(&self) -> u64 {
        self.revision.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub(crate) fn resize(&self, width: u32, height: u32) {
        let mut guard = self
            .bytes
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *guard = vec![0u8; (width * height * 4) as usize].into_boxed_slice();
        self.width.store(width, Ordering::Release);
        self.height.store(height, Ordering::Release);
    }

    /// Reader-side access to the whole frame.
    pub fn read<R>(&self, reader: impl FnOnce(&[u8]) -> R) -> R {
        let guard = self
            .bytes
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        reader(&guard)
    }

    /// Copy one rect out of the frame, clipped to the surface. Callers must
    /// have observed the committed response covering the rect first.
    pub fn copy_rect(&self, rect: Rect) -> Option<Vec<u8>> {
        let width = self.width();
        let height = self.height();
        let clipped = rect.clip_to(width, height)?;
        Some(self.read(|bytes| {
            let mut out = Vec::with_capacity((clipped.width * clipped.height * 4) as usize);
            for row in clipped.y..clipped.bottom() {
                let offset = ((row * width + clipped.x) * 4) as usize;
                out.extend_from_slice(&bytes[offset..offset + (clipped.width * 4) as usize]);
            }
            out
        }))
    }
}
