//! Error types for viewbridge-runtime
//!
//! Every fallible bridge operation returns [`BridgeResult`]. At the C boundary these
//! errors are logged and converted to default values, since foreign callers cannot
//! receive them.

use crate::handles::{Category, HandleId};
use thiserror::Error;

/// Errors that can occur while driving the engine through the bridge
#[derive(Error, Debug)]
pub enum BridgeError {
    /// An owner-thread-only operation was attempted from another thread
    #[error("operation must run on the owner thread")]
    WrongThread,

    /// A synchronous call did not complete in time
    #[error("call timed out after {0}ms")]
    Timeout(u64),

    /// The completing side was dropped without producing a result
    #[error("call was abandoned before completing")]
    Abandoned,

    /// The owner queue has been torn down
    #[error("owner queue is closed")]
    QueueClosed,

    /// A deferred completion token was already resolved
    #[error("request was already resolved")]
    AlreadyResolved,

    /// The browser that raised a request no longer exists
    #[error("owning browser has been destroyed")]
    Detached,

    /// The environment was torn down
    #[error("environment is no longer available")]
    EnvironmentGone,

    /// The browser was destroyed
    #[error("browser is no longer available")]
    BrowserGone,

    /// The entity is not in a state that allows the operation
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// The engine rejected or failed an operation
    #[error("engine error: {0}")]
    Engine(String),

    /// Handle does not exist (never exported, or already released)
    #[error("invalid handle {0}")]
    InvalidHandle(HandleId),

    /// Handle exists but belongs to another category
    #[error("handle {id} is a {actual:?}, expected {expected:?}")]
    WrongCategory {
        id: HandleId,
        expected: Category,
        actual: Category,
    },

    /// No operation with that index or name in the category table
    #[error("unknown operation {op} for {category:?}")]
    UnknownOp { category: Category, op: String },

    /// An argument could not be converted
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// JSON (de)serialization failed
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// Configuration could not be loaded
    #[error("configuration error: {0}")]
    Config(String),

    /// The owner thread could not be started
    #[error("failed to spawn owner thread: {0}")]
    Spawn(String),
}

impl BridgeError {
    /// Create an engine error
    pub fn engine(message: impl Into<String>) -> Self {
        Self::Engine(message.into())
    }

    /// Create an invalid-argument error
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Create an invalid-state error
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState(message.into())
    }

    /// Whether this error means the target entity is gone rather than misused
    pub fn is_gone(&self) -> bool {
        matches!(
            self,
            Self::Detached
                | Self::EnvironmentGone
                | Self::BrowserGone
                | Self::QueueClosed
                | Self::InvalidHandle(_)
        )
    }
}

/// Result type alias for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;
