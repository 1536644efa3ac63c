//! Shared stage contract and lifecycle bookkeeping.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::error::{RenderError, StageError};
use crate::surface::{
    NodeId, OverlayId, OverlayKind, OverlayView, Surface, SurfaceGuard, SurfaceLock, SurfaceOwner,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Warning,
    FadeTransition,
    Countdown,
    Block,
}

impl StageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StageKind::Warning => "warning",
            StageKind::FadeTransition => "fade_transition",
            StageKind::Countdown => "countdown",
            StageKind::Block => "block",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Emitted once per stage instance when its completion condition is met.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageCompletion {
    pub stage: StageKind,
    pub hostname: String,
}

/// One phase of the escalation pipeline.
///
/// `start` after `start`, and any call after `cleanup` other than `cleanup`
/// itself, return a misuse error. `cleanup` never fails and may be called any
/// number of times.
#[async_trait]
pub trait Stage: Send {
    fn kind(&self) -> StageKind;

    async fn start(&mut self, now: DateTime<Utc>) -> Result<(), StageError>;

    /// Advance timers. Returns the completion at most once.
    async fn tick(&mut self, now: DateTime<Utc>) -> Result<Option<StageCompletion>, StageError>;

    fn cleanup(&mut self);

    fn is_active(&self) -> bool;

    fn next_deadline(&self) -> Option<DateTime<Utc>>;

    /// Hand the overlay to the next stage instead of removing it on cleanup.
    fn take_overlay(&mut self) -> Option<OverlayId> {
        None
    }

    /// Page nodes this stage detached from the document.
    fn take_detached(&mut self) -> Vec<NodeId> {
        Vec::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Lifecycle {
    Pending,
    Active,
    Completed,
    CleanedUp,
}

/// Bookkeeping every stage shares: surface ownership, the overlay handle and
/// the lifecycle checks behind the misuse errors.
pub(crate) struct StageCore {
    kind: StageKind,
    hostname: String,
    surface: Arc<dyn Surface>,
    lock: SurfaceLock,
    guard: Option<SurfaceGuard>,
    overlay: Option<OverlayId>,
    lifecycle: Lifecycle,
}

impl StageCore {
    pub(crate) fn new(
        kind: StageKind,
        hostname: impl Into<String>,
        surface: Arc<dyn Surface>,
        lock: SurfaceLock,
    ) -> Self {
        Self {
            kind,
            hostname: hostname.into(),
            surface,
            lock,
            guard: None,
            overlay: None,
            lifecycle: Lifecycle::Pending,
        }
    }

    pub(crate) fn hostname(&self) -> &str {
        &self.hostname
    }

    pub(crate) fn surface(&self) -> &dyn Surface {
        self.surface.as_ref()
    }

    pub(crate) fn is_active(&self) -> bool {
        self.lifecycle == Lifecycle::Active
    }

    /// Lifecycle checks plus surface acquisition for `start()`.
    pub(crate) fn begin(&mut self) -> Result<(), StageError> {
        match self.lifecycle {
            Lifecycle::Pending => {}
            Lifecycle::Active | Lifecycle::Completed => {
                return Err(StageError::AlreadyStarted { stage: self.kind })
            }
            Lifecycle::CleanedUp => return Err(StageError::CleanedUp { stage: self.kind }),
        }

        let owner = SurfaceOwner::Stage(self.kind);
        let guard = self.lock.try_acquire(owner).ok_or_else(|| StageError::SurfaceBusy {
            stage: self.kind,
            owner: self.lock.owner().unwrap_or(SurfaceOwner::Reminder),
        })?;
        self.guard = Some(guard);
        self.lifecycle = Lifecycle::Active;
        Ok(())
    }

    /// Lifecycle check for `tick()`. `Ok(false)` means there is nothing to do.
    pub(crate) fn check_tick(&self) -> Result<bool, StageError> {
        match self.lifecycle {
            Lifecycle::CleanedUp => Err(StageError::CleanedUp { stage: self.kind }),
            Lifecycle::Active => Ok(true),
            Lifecycle::Pending | Lifecycle::Completed => Ok(false),
        }
    }

    pub(crate) fn mount(&mut self, kind: OverlayKind) -> Result<OverlayId, RenderError> {
        let id = self.surface.mount_overlay(kind)?;
        self.overlay = Some(id);
        Ok(id)
    }

    /// Adopt an overlay mounted by a previous stage.
    pub(crate) fn adopt(&mut self, overlay: OverlayId) {
        self.overlay = Some(overlay);
    }

    pub(crate) fn render(&self, view: &OverlayView) -> Result<(), RenderError> {
        match self.overlay {
            Some(id) => self.surface.render(id, view),
            None => Err(RenderError::Unavailable(format!(
                "{} stage has no overlay",
                self.kind
            ))),
        }
    }

    pub(crate) fn take_overlay(&mut self) -> Option<OverlayId> {
        self.overlay.take()
    }

    /// Mark completion. Returns the completion exactly once.
    pub(crate) fn complete(&mut self) -> Option<StageCompletion> {
        if self.lifecycle != Lifecycle::Active {
            return None;
        }
        self.lifecycle = Lifecycle::Completed;
        tracing::info!("{} stage complete for {}", self.kind, self.hostname);
        Some(StageCompletion {
            stage: self.kind,
            hostname: self.hostname.clone(),
        })
    }

    /// Convert a render failure into a stage error after cleaning up.
    pub(crate) fn fail(&mut self, source: RenderError) -> StageError {
        tracing::error!(
            "{} stage render failed for {}: {}",
            self.kind,
            self.hostname,
            source
        );
        self.release();
        StageError::Render {
            stage: self.kind,
            source,
        }
    }

    /// Detach the overlay and release the surface. Idempotent.
    pub(crate) fn release(&mut self) {
        if let Some(id) = self.overlay.take() {
            if let Err(e) = self.surface.remove_overlay(id) {
                tracing::warn!("{} stage could not remove overlay {}: {}", self.kind, id, e);
            }
        }
        if self.guard.take().is_some() {
            tracing::debug!("{} stage released the surface", self.kind);
        }
        self.lifecycle = Lifecycle::CleanedUp;
    }
}
