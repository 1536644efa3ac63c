//! The page rendering surface and its ownership token.
//!
//! A [`Surface`] is whatever the page is drawn on: a browser document, a
//! terminal, or the in-memory [`MemorySurface`] used by tests. Escalation
//! stages and the reminder prompt both draw full-screen overlays on it, so
//! every presentation first takes the [`SurfaceLock`]. The returned
//! [`SurfaceGuard`] releases ownership when dropped.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::RenderError;
use crate::escalation::StageKind;

/// Identifier of an original page node.
pub type NodeId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OverlayId(pub u64);

impl fmt::Display for OverlayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlayKind {
    Warning,
    Transition,
    Countdown,
    Block,
    Reminder,
}

/// What an overlay currently shows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "view", rename_all = "snake_case")]
pub enum OverlayView {
    Flash {
        visible: bool,
    },
    Countdown {
        message: String,
        seconds_left: u64,
    },
    Blocked {
        target: String,
        remaining: String,
    },
    Reminder {
        hostname: String,
        minutes_since_last: i64,
    },
}

/// The page a content script draws on.
///
/// Methods take `&self`; implementations use interior mutability because the
/// surface is shared by the coordinator, the reminder scheduler and the
/// driver.
pub trait Surface: Send + Sync {
    fn mount_overlay(&self, kind: OverlayKind) -> Result<OverlayId, RenderError>;
    fn render(&self, overlay: OverlayId, view: &OverlayView) -> Result<(), RenderError>;
    /// Removing an overlay that is not mounted is an error.
    fn remove_overlay(&self, overlay: OverlayId) -> Result<(), RenderError>;
    fn set_content_opacity(&self, opacity: f32) -> Result<(), RenderError>;
    /// Detach every original page node and return their ids.
    fn detach_page_content(&self) -> Result<Vec<NodeId>, RenderError>;
    fn request_reload(&self);
}

/// Who holds the surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "owner", content = "stage", rename_all = "snake_case")]
pub enum SurfaceOwner {
    Stage(StageKind),
    Reminder,
}

impl fmt::Display for SurfaceOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SurfaceOwner::Stage(stage) => write!(f, "{stage} stage"),
            SurfaceOwner::Reminder => write!(f, "reminder"),
        }
    }
}

/// Exclusive ownership token for the rendering surface.
///
/// Cloning shares the same token. Contention is never waited on: callers
/// that fail to acquire skip their presentation.
#[derive(Debug, Clone, Default)]
pub struct SurfaceLock {
    owner: Arc<Mutex<Option<SurfaceOwner>>>,
}

impl SurfaceLock {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self) -> MutexGuard<'_, Option<SurfaceOwner>> {
        self.owner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn try_acquire(&self, owner: SurfaceOwner) -> Option<SurfaceGuard> {
        let mut slot = self.slot();
        if slot.is_some() {
            return None;
        }
        *slot = Some(owner);
        Some(SurfaceGuard {
            owner,
            slot: Arc::clone(&self.owner),
        })
    }

    pub fn owner(&self) -> Option<SurfaceOwner> {
        *self.slot()
    }

    pub fn is_owned(&self) -> bool {
        self.owner().is_some()
    }
}

/// Releases the surface on drop.
#[derive(Debug)]
pub struct SurfaceGuard {
    owner: SurfaceOwner,
    slot: Arc<Mutex<Option<SurfaceOwner>>>,
}

impl Drop for SurfaceGuard {
    fn drop(&mut self) {
        let mut slot = self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if *slot == Some(self.owner) {
            *slot = None;
        }
    }
}

/// Everything a [`MemorySurface`] has been asked to do.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SurfaceSnapshot {
    pub mounted: Vec<(OverlayId, OverlayKind)>,
    pub removals: u32,
    pub flash_toggles: u32,
    pub content_opacity: f32,
    pub attached_nodes: usize,
    pub detached_nodes: usize,
    pub reloads: u32,
}

#[derive(Debug)]
struct MemoryState {
    next_overlay: u64,
    overlays: BTreeMap<OverlayId, (OverlayKind, Option<OverlayView>)>,
    removals: u32,
    flash_toggles: u32,
    content_opacity: f32,
    page_nodes: Vec<NodeId>,
    detached: Vec<NodeId>,
    reloads: u32,
}

/// In-memory surface that records every call.
#[derive(Debug)]
pub struct MemorySurface {
    state: Mutex<MemoryState>,
    fail_mounts: AtomicBool,
    fail_renders: AtomicBool,
}

impl MemorySurface {
    /// A page with `page_nodes` original top-level nodes.
    pub fn new(page_nodes: usize) -> Self {
        Self {
            state: Mutex::new(MemoryState {
                next_overlay: 1,
                overlays: BTreeMap::new(),
                removals: 0,
                flash_toggles: 0,
                content_opacity: 1.0,
                page_nodes: (1..=page_nodes as NodeId).collect(),
                detached: Vec::new(),
                reloads: 0,
            }),
            fail_mounts: AtomicBool::new(false),
            fail_renders: AtomicBool::new(false),
        }
    }

    /// Make every following `mount_overlay` fail.
    pub fn fail_mounts(&self, fail: bool) {
        self.fail_mounts.store(fail, Ordering::SeqCst);
    }

    /// Make every following `render` fail.
    pub fn fail_renders(&self, fail: bool) {
        self.fail_renders.store(fail, Ordering::SeqCst);
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn snapshot(&self) -> SurfaceSnapshot {
        let state = self.state();
        SurfaceSnapshot {
            mounted: state.overlays.iter().map(|(id, (kind, _))| (*id, *kind)).collect(),
            removals: state.removals,
            flash_toggles: state.flash_toggles,
            content_opacity: state.content_opacity,
            attached_nodes: state.page_nodes.len(),
            detached_nodes: state.detached.len(),
            reloads: state.reloads,
        }
    }

    /// Last view rendered into `overlay`.
    pub fn view(&self, overlay: OverlayId) -> Option<OverlayView> {
        self.state().overlays.get(&overlay).and_then(|(_, view)| view.clone())
    }

    /// Last view of the first mounted overlay of `kind`.
    pub fn view_of(&self, kind: OverlayKind) -> Option<OverlayView> {
        self.state()
            .overlays
            .values()
            .find(|(k, _)| *k == kind)
            .and_then(|(_, view)| view.clone())
    }
}

impl Surface for MemorySurface {
    fn mount_overlay(&self, kind: OverlayKind) -> Result<OverlayId, RenderError> {
        if self.fail_mounts.load(Ordering::SeqCst) {
            return Err(RenderError::Unavailable(format!("cannot mount {kind:?} overlay")));
        }
        let mut state = self.state();
        let id = OverlayId(state.next_overlay);
        state.next_overlay += 1;
        state.overlays.insert(id, (kind, None));
        Ok(id)
    }

    fn render(&self, overlay: OverlayId, view: &OverlayView) -> Result<(), RenderError> {
        if self.fail_renders.load(Ordering::SeqCst) {
            return Err(RenderError::Unavailable(format!("cannot render into {overlay}")));
        }
        let mut state = self.state();
        let (_, current) = state
            .overlays
            .get_mut(&overlay)
            .ok_or(RenderError::UnknownOverlay(overlay.0))?;
        let toggled = matches!(
            (&*current, view),
            (Some(OverlayView::Flash { visible: before }), OverlayView::Flash { visible: after })
                if before != after
        );
        *current = Some(view.clone());
        if toggled {
            state.flash_toggles += 1;
        }
        Ok(())
    }

    fn remove_overlay(&self, overlay: OverlayId) -> Result<(), RenderError> {
        let mut state = self.state();
        if state.overlays.remove(&overlay).is_none() {
            return Err(RenderError::UnknownOverlay(overlay.0));
        }
        state.removals += 1;
        Ok(())
    }

    fn set_content_opacity(&self, opacity: f32) -> Result<(), RenderError> {
        self.state().content_opacity = opacity.clamp(0.0, 1.0);
        Ok(())
    }

    fn detach_page_content(&self) -> Result<Vec<NodeId>, RenderError> {
        let mut state = self.state();
        let nodes = std::mem::take(&mut state.page_nodes);
        state.detached.extend(nodes.iter().copied());
        Ok(nodes)
    }

    fn request_reload(&self) {
        self.state().reloads += 1;
    }
}
