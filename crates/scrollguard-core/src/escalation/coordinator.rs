//! Escalation coordinator: owns at most one stage and sequences them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use super::block::BlockStage;
use super::countdown::CountdownStage;
use super::fade::FadeTransitionStage;
use super::stage::{Stage, StageCompletion, StageKind};
use super::warning::WarningStage;
use crate::error::StageError;
use crate::events::{Event, IgnoreReason};
use crate::site::SiteType;
use crate::storage::{BlockScope, EscalationConfig, TimeManager};
use crate::surface::{NodeId, OverlayId, Surface, SurfaceLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationState {
    Idle,
    Warning,
    FadeTransition,
    Countdown,
    Blocked,
    Finished,
}

impl EscalationState {
    fn for_stage(kind: StageKind) -> Self {
        match kind {
            StageKind::Warning => EscalationState::Warning,
            StageKind::FadeTransition => EscalationState::FadeTransition,
            StageKind::Countdown => EscalationState::Countdown,
            StageKind::Block => EscalationState::Blocked,
        }
    }
}

/// One run of the pipeline on a page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationSession {
    pub id: Uuid,
    pub hostname: String,
    pub started_at: DateTime<Utc>,
    /// Page nodes detached by the stages of this session.
    pub detached: Vec<NodeId>,
}

pub struct EscalationCoordinator {
    hostname: String,
    site: SiteType,
    config: EscalationConfig,
    surface: Arc<dyn Surface>,
    lock: SurfaceLock,
    times: Arc<dyn TimeManager>,
    state: EscalationState,
    stage: Option<Box<dyn Stage>>,
    session: Option<EscalationSession>,
    blocked_scope: Option<BlockScope>,
    detection_enabled: bool,
    reload_requested: bool,
    events: Vec<Event>,
}

impl EscalationCoordinator {
    pub fn new(
        hostname: impl Into<String>,
        site: SiteType,
        config: EscalationConfig,
        surface: Arc<dyn Surface>,
        lock: SurfaceLock,
        times: Arc<dyn TimeManager>,
    ) -> Self {
        Self {
            hostname: hostname.into(),
            site,
            config,
            surface,
            lock,
            times,
            state: EscalationState::Idle,
            stage: None,
            session: None,
            blocked_scope: None,
            detection_enabled: true,
            reload_requested: false,
            events: Vec::new(),
        }
    }

    pub fn state(&self) -> EscalationState {
        self.state
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// True while a stage is running.
    pub fn is_active(&self) -> bool {
        self.stage.as_ref().is_some_and(|stage| stage.is_active())
    }

    pub fn active_stage(&self) -> Option<StageKind> {
        self.stage
            .as_ref()
            .filter(|stage| stage.is_active())
            .map(|stage| stage.kind())
    }

    pub fn session(&self) -> Option<&EscalationSession> {
        self.session.as_ref()
    }

    pub fn detection_enabled(&self) -> bool {
        self.detection_enabled
    }

    pub fn set_detection_enabled(&mut self, enabled: bool) {
        if self.detection_enabled != enabled {
            tracing::info!(
                "Doomscroll detection {} for {}",
                if enabled { "enabled" } else { "disabled" },
                self.hostname
            );
        }
        self.detection_enabled = enabled;
    }

    /// Whether a stage asked the host to reload the page.
    pub fn reload_requested(&self) -> bool {
        self.reload_requested
    }

    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.stage.as_ref().and_then(|stage| stage.next_deadline())
    }

    pub fn drain_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }

    fn ignore(&mut self, reason: IgnoreReason, now: DateTime<Utc>) -> bool {
        tracing::debug!("Doomscroll on {} ignored: {:?}", self.hostname, reason);
        self.events.push(Event::DoomscrollIgnored {
            hostname: self.hostname.clone(),
            reason,
            at: now,
        });
        false
    }

    /// Start the warning stage. Returns whether the escalation began.
    pub async fn on_doomscroll_detected(&mut self, now: DateTime<Utc>) -> Result<bool, StageError> {
        if !self.detection_enabled {
            return Ok(self.ignore(IgnoreReason::DetectionDisabled, now));
        }
        if self.state != EscalationState::Idle {
            return Ok(self.ignore(IgnoreReason::NotIdle, now));
        }
        if self.lock.is_owned() {
            return Ok(self.ignore(IgnoreReason::SurfaceBusy, now));
        }

        tracing::info!("Doomscroll detected on {}, escalating", self.hostname);
        self.open_session(now);
        let warning = WarningStage::new(
            self.hostname.clone(),
            &self.config,
            Arc::clone(&self.surface),
            self.lock.clone(),
        );
        match self.start_stage(Box::new(warning), now).await {
            Err(StageError::SurfaceBusy { .. }) => {
                self.session = None;
                Ok(self.ignore(IgnoreReason::SurfaceBusy, now))
            }
            other => other,
        }
    }

    /// Replace whatever is running with the block screen for `scope`.
    pub async fn show_block(
        &mut self,
        scope: BlockScope,
        now: DateTime<Utc>,
    ) -> Result<bool, StageError> {
        self.end_current(now);
        if self.session.is_none() {
            self.open_session(now);
        }
        let block = BlockStage::new(
            self.hostname.clone(),
            scope.clone(),
            &self.config,
            Arc::clone(&self.surface),
            self.lock.clone(),
            Arc::clone(&self.times),
        );
        self.blocked_scope = Some(scope);
        match self.start_stage(Box::new(block), now).await {
            Err(e) if !e.is_misuse() => {
                tracing::warn!("Block screen for {} not shown: {}", self.hostname, e);
                self.state = EscalationState::Finished;
                Ok(false)
            }
            other => other,
        }
    }

    /// Advance the active stage and act on its completion.
    pub async fn tick(&mut self, now: DateTime<Utc>) -> Result<(), StageError> {
        let outcome = match self.stage.as_mut() {
            Some(stage) => stage.tick(now).await,
            None => return Ok(()),
        };

        match outcome {
            Ok(Some(completion)) => self.on_stage_complete(completion, now).await,
            Ok(None) => Ok(()),
            Err(e) if e.is_misuse() => Err(e),
            Err(e) => {
                // The stage already cleaned itself up.
                tracing::error!("Escalation on {} stopped: {}", self.hostname, e);
                self.stage = None;
                self.state = EscalationState::Finished;
                Ok(())
            }
        }
    }

    async fn on_stage_complete(
        &mut self,
        completion: StageCompletion,
        now: DateTime<Utc>,
    ) -> Result<(), StageError> {
        match completion.stage {
            StageKind::Warning => {
                self.events.push(Event::DoomscrollAnimationComplete {
                    hostname: completion.hostname,
                    at: now,
                });
                let overlay = self.hand_over(now);
                let fade = FadeTransitionStage::new(
                    self.hostname.clone(),
                    &self.config,
                    Arc::clone(&self.surface),
                    self.lock.clone(),
                )
                .with_overlay(overlay);
                self.continue_with(Box::new(fade), now).await
            }
            StageKind::FadeTransition => {
                self.end_current(now);
                let countdown = CountdownStage::new(
                    self.hostname.clone(),
                    &self.config,
                    Arc::clone(&self.surface),
                    self.lock.clone(),
                );
                self.continue_with(Box::new(countdown), now).await
            }
            StageKind::Countdown => {
                self.events.push(Event::TransitionScreenComplete {
                    hostname: completion.hostname,
                    at: now,
                });
                self.end_current(now);
                self.state = EscalationState::Finished;

                let scope = self.site.block_scope(&self.hostname);
                match self.times.create_block(&scope, now).await {
                    Ok(()) => self.events.push(Event::BlockCreated { scope, at: now }),
                    Err(e) => tracing::warn!("Failed to create block for {}: {}", scope, e),
                }
                self.surface.request_reload();
                self.mark_reload(now);
                Ok(())
            }
            StageKind::Block => {
                if let Some(scope) = self.blocked_scope.take() {
                    self.events.push(Event::BlockCleared { scope, at: now });
                }
                self.end_current(now);
                self.state = EscalationState::Finished;
                // BlockStage already asked the surface to reload.
                self.mark_reload(now);
                Ok(())
            }
        }
    }

    /// Clean up the active stage, keeping its overlay and detached nodes for
    /// the next one.
    fn hand_over(&mut self, now: DateTime<Utc>) -> Option<OverlayId> {
        let (overlay, detached) = match self.stage.as_mut() {
            Some(stage) => (stage.take_overlay(), stage.take_detached()),
            None => (None, Vec::new()),
        };
        if let Some(session) = self.session.as_mut() {
            session.detached.extend(detached);
        }
        self.end_current(now);
        overlay
    }

    async fn continue_with(
        &mut self,
        stage: Box<dyn Stage>,
        now: DateTime<Utc>,
    ) -> Result<(), StageError> {
        match self.start_stage(stage, now).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_misuse() => Err(e),
            Err(e) => {
                tracing::error!("Escalation on {} stopped: {}", self.hostname, e);
                self.state = EscalationState::Finished;
                Ok(())
            }
        }
    }

    /// Clean up the current stage, then start `stage`.
    ///
    /// Render failures have already been cleaned up by the stage and end the
    /// escalation. Surface contention and misuse are returned to the caller.
    async fn start_stage(
        &mut self,
        mut stage: Box<dyn Stage>,
        now: DateTime<Utc>,
    ) -> Result<bool, StageError> {
        self.end_current(now);
        let kind = stage.kind();
        match stage.start(now).await {
            Ok(()) => {
                self.state = EscalationState::for_stage(kind);
                self.events.push(Event::StageStarted {
                    stage: kind,
                    hostname: self.hostname.clone(),
                    at: now,
                });
                self.stage = Some(stage);
                Ok(true)
            }
            Err(e @ StageError::Render { .. }) => {
                tracing::error!("Escalation on {} stopped: {}", self.hostname, e);
                self.state = EscalationState::Finished;
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    fn end_current(&mut self, now: DateTime<Utc>) {
        if let Some(mut stage) = self.stage.take() {
            stage.cleanup();
            tracing::debug!("{} stage cleaned up on {}", stage.kind(), self.hostname);
            self.events.push(Event::StageCleanedUp {
                stage: stage.kind(),
                hostname: self.hostname.clone(),
                at: now,
            });
        }
    }

    fn open_session(&mut self, now: DateTime<Utc>) {
        let session = EscalationSession {
            id: Uuid::new_v4(),
            hostname: self.hostname.clone(),
            started_at: now,
            detached: Vec::new(),
        };
        tracing::debug!("Escalation session {} opened on {}", session.id, self.hostname);
        self.session = Some(session);
    }

    fn mark_reload(&mut self, now: DateTime<Utc>) {
        self.reload_requested = true;
        self.events.push(Event::PageReloadRequested {
            hostname: self.hostname.clone(),
            at: now,
        });
    }

    /// Clean up the active stage on page teardown.
    pub fn abort(&mut self, now: DateTime<Utc>) {
        if self.stage.is_some() {
            tracing::info!("Escalation on {} aborted", self.hostname);
        }
        self.end_current(now);
        if self.state != EscalationState::Idle {
            self.state = EscalationState::Finished;
        }
        self.detection_enabled = false;
    }
}
