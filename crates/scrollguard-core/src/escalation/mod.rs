//! Attention-intervention escalation pipeline.
//!
//! ```text
//! Idle -> Warning -> FadeTransition -> Countdown -> Finished
//!   \                                                  ^
//!    `-- show_block() --> Blocked ---------------------'
//! ```
//!
//! Each stage is a wall-clock state machine with its own overlay and timer
//! handles. The [`EscalationCoordinator`] owns at most one of them at a time
//! and decides what follows a completion.

mod block;
mod coordinator;
mod countdown;
mod fade;
mod stage;
mod warning;

pub use block::BlockStage;
pub use coordinator::{EscalationCoordinator, EscalationSession, EscalationState};
pub use countdown::CountdownStage;
pub use fade::FadeTransitionStage;
pub use stage::{Stage, StageCompletion, StageKind};
pub use warning::WarningStage;
