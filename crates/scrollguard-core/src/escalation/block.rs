//! Block screen: replaces the page until the stored block expires.
//!
//! Remaining time is never counted down locally. Every poll re-reads it from
//! the [`TimeManager`], so a block created or cleared in another tab shows up
//! on the next poll.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use super::stage::{Stage, StageCompletion, StageCore, StageKind};
use crate::error::{RenderError, StageError};
use crate::storage::{format_time, BlockScope, EscalationConfig, TimeManager};
use crate::surface::{NodeId, OverlayKind, OverlayView, Surface, SurfaceLock};
use crate::timer::Interval;

pub struct BlockStage {
    core: StageCore,
    scope: BlockScope,
    times: Arc<dyn TimeManager>,
    poll: Interval,
    detached: Vec<NodeId>,
    last_remaining: Option<i64>,
}

impl BlockStage {
    pub fn new(
        hostname: impl Into<String>,
        scope: BlockScope,
        config: &EscalationConfig,
        surface: Arc<dyn Surface>,
        lock: SurfaceLock,
        times: Arc<dyn TimeManager>,
    ) -> Self {
        Self {
            core: StageCore::new(StageKind::Block, hostname, surface, lock),
            scope,
            times,
            poll: Interval::new(config.update_interval()),
            detached: Vec::new(),
            last_remaining: None,
        }
    }

    pub fn scope(&self) -> &BlockScope {
        &self.scope
    }

    /// Remaining milliseconds read by the most recent successful poll.
    pub fn last_remaining(&self) -> Option<i64> {
        self.last_remaining
    }

    fn render_remaining(&self, remaining: &str) -> Result<(), RenderError> {
        self.core.render(&OverlayView::Blocked {
            target: self.scope.to_string(),
            remaining: remaining.to_string(),
        })
    }

    fn show(&mut self) -> Result<(), RenderError> {
        self.detached = self.core.surface().detach_page_content()?;
        self.core.mount(OverlayKind::Block)?;
        self.render_remaining("--:--")
    }

    async fn finish(&mut self) -> Option<StageCompletion> {
        self.poll.stop();
        if let Err(e) = self.times.remove_block(&self.scope).await {
            tracing::warn!("Failed to remove expired block for {}: {}", self.scope, e);
        }
        tracing::info!("Block expired for {}, reloading", self.scope);
        self.core.surface().request_reload();
        self.core.complete()
    }
}

#[async_trait]
impl Stage for BlockStage {
    fn kind(&self) -> StageKind {
        StageKind::Block
    }

    async fn start(&mut self, now: DateTime<Utc>) -> Result<(), StageError> {
        self.core.begin()?;
        if let Err(e) = self.show() {
            return Err(self.core.fail(e));
        }
        self.poll.start_immediately(now);
        tracing::info!("Block screen shown for {}", self.scope);
        Ok(())
    }

    async fn tick(&mut self, now: DateTime<Utc>) -> Result<Option<StageCompletion>, StageError> {
        if !self.core.check_tick()? || !self.poll.poll(now) {
            return Ok(None);
        }

        let remaining = match self.times.remaining(&self.scope, now).await {
            Ok(ms) => ms,
            Err(e) => {
                tracing::warn!("Block poll for {} failed, retrying next tick: {}", self.scope, e);
                return Ok(None);
            }
        };
        self.last_remaining = Some(remaining);

        if remaining <= 0 {
            return Ok(self.finish().await);
        }

        if let Err(e) = self.render_remaining(&format_time(remaining)) {
            self.poll.stop();
            return Err(self.core.fail(e));
        }
        Ok(None)
    }

    fn cleanup(&mut self) {
        self.poll.stop();
        self.core.release();
    }

    fn is_active(&self) -> bool {
        self.core.is_active()
    }

    fn next_deadline(&self) -> Option<DateTime<Utc>> {
        if self.core.is_active() {
            self.poll.next_deadline()
        } else {
            None
        }
    }

    fn take_detached(&mut self) -> Vec<NodeId> {
        std::mem::take(&mut self.detached)
    }
}
