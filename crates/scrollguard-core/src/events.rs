use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::escalation::StageKind;
use crate::reminder::{ReminderChoice, SkipReason};
use crate::storage::BlockScope;

/// Why a doomscroll detection did not start the escalation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IgnoreReason {
    /// An escalation is already running or has finished on this page.
    NotIdle,
    /// The reminder prompt holds the surface.
    SurfaceBusy,
    /// The user chose timer-only mode.
    DetectionDisabled,
}

/// Every state change on a page produces an Event.
/// The owner of the page controller drains them after each call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    StageStarted {
        stage: StageKind,
        hostname: String,
        at: DateTime<Utc>,
    },
    StageCleanedUp {
        stage: StageKind,
        hostname: String,
        at: DateTime<Utc>,
    },
    /// The warning flash finished and the page content is gone.
    DoomscrollAnimationComplete {
        hostname: String,
        at: DateTime<Utc>,
    },
    /// The final countdown reached zero.
    TransitionScreenComplete {
        hostname: String,
        at: DateTime<Utc>,
    },
    DoomscrollIgnored {
        hostname: String,
        reason: IgnoreReason,
        at: DateTime<Utc>,
    },
    BlockCreated {
        scope: BlockScope,
        at: DateTime<Utc>,
    },
    BlockCleared {
        scope: BlockScope,
        at: DateTime<Utc>,
    },
    PageReloadRequested {
        hostname: String,
        at: DateTime<Utc>,
    },
    ReminderShown {
        hostname: String,
        minutes_since_last: i64,
        at: DateTime<Utc>,
    },
    ReminderSkipped {
        reason: SkipReason,
        at: DateTime<Utc>,
    },
    ReminderChosen {
        choice: ReminderChoice,
        at: DateTime<Utc>,
    },
    /// Today's news reading time reached the configured allowance.
    NewsLimitReached {
        at: DateTime<Utc>,
    },
}
