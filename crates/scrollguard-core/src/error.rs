//! Core error types for scrollguard-core.
//!
//! Three kinds of failure flow through the crate:
//! - persistence failures ([`DatabaseError`], JSON decoding) which callers
//!   log and treat as "no change" for the current tick,
//! - rendering failures ([`RenderError`]) which make the owning stage clean
//!   itself up,
//! - programmer misuse ([`StageError`], [`ReminderError`]) which is always
//!   returned to the caller and never swallowed.

use std::path::PathBuf;
use thiserror::Error;

use crate::escalation::StageKind;
use crate::surface::SurfaceOwner;

/// Core error type for scrollguard-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Escalation stage errors
    #[error("Stage error: {0}")]
    Stage(#[from] StageError),

    /// Reminder scheduler errors
    #[error("Reminder error: {0}")]
    Reminder(#[from] ReminderError),

    /// URL could not be turned into a hostname
    #[error("Invalid URL '{url}': {message}")]
    InvalidUrl { url: String, message: String },

    /// Serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CoreError {
    /// Misuse errors must reach the caller; everything else is recoverable
    /// at the component boundary.
    pub fn is_misuse(&self) -> bool {
        match self {
            CoreError::Stage(err) => err.is_misuse(),
            CoreError::Reminder(_) => true,
            _ => false,
        }
    }
}

/// Database-specific errors.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Failed to open database connection
    #[error("Failed to open database at {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// Query execution failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Database is locked
    #[error("Database is locked")]
    Locked,

    /// The connection mutex was poisoned by a panicking writer
    #[error("Database connection is unavailable")]
    Unavailable,
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Unknown configuration key
    #[error("Unknown configuration key: {0}")]
    UnknownKey(String),

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Data directory could not be resolved or created
    #[error("Data directory unavailable: {0}")]
    DataDir(String),
}

/// Rendering surface errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    /// Overlay handle does not refer to a mounted overlay
    #[error("overlay {0} is not mounted")]
    UnknownOverlay(u64),

    /// The surface could not create or attach the requested node
    #[error("surface unavailable: {0}")]
    Unavailable(String),
}

/// Escalation stage errors.
#[derive(Error, Debug)]
pub enum StageError {
    /// `start()` called on a stage that is already running or finished
    #[error("{stage} stage already started")]
    AlreadyStarted { stage: StageKind },

    /// Any call other than `cleanup()` after `cleanup()`
    #[error("{stage} stage used after cleanup")]
    CleanedUp { stage: StageKind },

    /// Another component currently owns the rendering surface
    #[error("{stage} stage cannot start: surface owned by {owner}")]
    SurfaceBusy {
        stage: StageKind,
        owner: SurfaceOwner,
    },

    /// Rendering failed; the stage has already cleaned itself up
    #[error("{stage} stage render failed: {source}")]
    Render {
        stage: StageKind,
        #[source]
        source: RenderError,
    },
}

impl StageError {
    pub fn is_misuse(&self) -> bool {
        matches!(
            self,
            StageError::AlreadyStarted { .. } | StageError::CleanedUp { .. }
        )
    }
}

/// Reminder scheduler misuse.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReminderError {
    #[error("reminder scheduler already initialized")]
    AlreadyInitialized,

    #[error("reminder scheduler is not initialized")]
    NotInitialized,

    #[error("reminder scheduler used after cleanup")]
    CleanedUp,

    #[error("no reminder prompt is open")]
    NoPromptOpen,
}

// Helper implementations for converting from other error types

impl From<rusqlite::Error> for DatabaseError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(err, _msg) => {
                if err.code == rusqlite::ErrorCode::DatabaseBusy
                    || err.code == rusqlite::ErrorCode::DatabaseLocked
                {
                    DatabaseError::Locked
                } else {
                    DatabaseError::QueryFailed(err.to_string())
                }
            }
            _ => DatabaseError::QueryFailed(err.to_string()),
        }
    }
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn misuse_classification() {
        let misuse: CoreError = StageError::AlreadyStarted {
            stage: StageKind::Warning,
        }
        .into();
        assert!(misuse.is_misuse());

        let render: CoreError = StageError::Render {
            stage: StageKind::Block,
            source: RenderError::Unavailable("detached document".into()),
        }
        .into();
        assert!(!render.is_misuse());

        let reminder: CoreError = ReminderError::NoPromptOpen.into();
        assert!(reminder.is_misuse());

        let db: CoreError = DatabaseError::Locked.into();
        assert!(!db.is_misuse());
    }

    #[test]
    fn stage_error_messages_name_the_stage() {
        let err = StageError::SurfaceBusy {
            stage: StageKind::Countdown,
            owner: SurfaceOwner::Reminder,
        };
        assert_eq!(
            err.to_string(),
            "countdown stage cannot start: surface owned by reminder"
        );
    }
}
