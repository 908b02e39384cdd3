//! Published dashboard view: the rendering layer's read side.
//!
//! `DashboardState` exposes only `snapshot()`. Writes go through a
//! `DashboardWriter`, which only the core actor of the current session
//! holds. Starting a new session retires the previous writer: its late
//! writes are ignored, so a stopped core can never clobber its successor.

use std::sync::{Arc, RwLock};

pub use evdash::DashboardView;

/// Shared interior state backing both `DashboardState` (read) and
/// `DashboardWriter` (write).
struct DashboardInner {
    /// Current session generation + latest published view. One lock, so a
    /// generation check and the write it guards are atomic.
    slot: RwLock<(u64, Option<DashboardView>)>,
}

/// Read-only dashboard state. Lives on `SystemState.dashboard`.
pub struct DashboardState {
    inner: Arc<DashboardInner>,
}

/// Write handle for one session's view.
pub struct DashboardWriter {
    inner: Arc<DashboardInner>,
    generation: u64,
}

impl DashboardState {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(DashboardInner {
                slot: RwLock::new((0, None)),
            }),
        }
    }

    /// Start a new session and hand out its writer. Any previously issued
    /// writer stops taking effect. The last published view stays readable
    /// until the new session publishes.
    pub fn begin_session(&self) -> DashboardWriter {
        let mut slot = self.inner.slot.write().unwrap_or_else(|e| e.into_inner());
        slot.0 += 1;
        DashboardWriter {
            inner: Arc::clone(&self.inner),
            generation: slot.0,
        }
    }

    /// Latest published view, if any session has published yet.
    pub fn snapshot(&self) -> Option<DashboardView> {
        self.inner
            .slot
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .1
            .clone()
    }
}

impl Default for DashboardState {
    fn default() -> Self {
        Self::new()
    }
}

impl DashboardWriter {
    /// Session generation this writer belongs to.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Replace the published view. Returns false (and writes nothing) when
    /// this writer's session has been superseded.
    pub fn publish(&self, view: DashboardView) -> bool {
        let mut slot = self.inner.slot.write().unwrap_or_else(|e| e.into_inner());
        if slot.0 != self.generation {
            return false;
        }
        slot.1 = Some(view);
        true
    }
}
