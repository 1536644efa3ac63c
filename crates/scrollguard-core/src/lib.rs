//! # ScrollGuard Core Library
//!
//! This library provides the core logic for ScrollGuard, a doomscrolling
//! interrupter for social and news sites. Every operation is available
//! through a standalone CLI binary; a browser content script or any other
//! host is a thin layer that feeds page input and draws overlays on a
//! [`Surface`].
//!
//! ## Architecture
//!
//! - **Escalation**: Warning → FadeTransition → Countdown stages, then a
//!   stored block. Each stage is a wall-clock state machine that requires the
//!   caller to invoke `tick(now)` at its next deadline
//! - **Reminder**: periodic three-choice prompt while the page is visible
//! - **Storage**: block records and daily news usage behind the async
//!   [`TimeManager`] trait, SQLite key-value persistence and TOML configuration
//! - **Page**: per-page wiring plus a tokio driver
//!
//! ## Key Components
//!
//! - [`EscalationCoordinator`]: owns at most one stage at a time
//! - [`ReminderScheduler`]: periodic reminder with hidden-time catch-up
//! - [`PageController`]: everything one page load needs
//! - [`SurfaceLock`]: exclusive ownership of the rendering surface

pub mod error;
pub mod escalation;
pub mod events;
pub mod page;
pub mod reminder;
pub mod site;
pub mod storage;
pub mod surface;
pub mod timer;

pub use error::{ConfigError, CoreError, DatabaseError, ReminderError, RenderError, StageError};
pub use escalation::{
    EscalationCoordinator, EscalationSession, EscalationState, Stage, StageCompletion, StageKind,
};
pub use events::{Event, IgnoreReason};
pub use page::{run_page, NewsTimeTracker, PageController, PageExit, PageInput};
pub use reminder::{ReminderChoice, ReminderDirective, ReminderScheduler, SkipReason};
pub use site::{hostname_from_url, ListClassifier, SiteClassifier, SiteType};
pub use storage::{
    format_time, BlockRecord, BlockScope, Config, Database, KvStore, KvTimeManager, MemoryKv,
    NewsUsage, TimeManager,
};
pub use surface::{MemorySurface, OverlayId, OverlayKind, OverlayView, Surface, SurfaceLock};
pub use timer::{Interval, Timeout};
