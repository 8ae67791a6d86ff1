//! Surface configuration.

use std::time::Duration;

use backend::BackendPreference;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub surface_width: u32,
    pub surface_height: u32,
    /// Every request expires after this; the pending completion is rejected
    /// and a late response is discarded.
    pub request_timeout: Duration,
    /// Bounded request queue depth; issuers block (queue) once it fills.
    pub request_queue_capacity: usize,
    pub backend_preference: BackendPreference,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            surface_width: 800,
            surface_height: 600,
            request_timeout: Duration::from_secs(5),
            request_queue_capacity: 64,
            backend_preference: BackendPreference::default(),
        }
    }
}

impl EngineConfig {
    pub fn with_surface_size(width: u32, height: u32) -> Self {
        Self {
            surface_width: width,
            surface_height: height,
            ..Self::default()
        }
    }
}
