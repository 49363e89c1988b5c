//! Session-level error taxonomy.
//!
//! Engine failures propagate verbatim to the caller of the operation that
//! triggered them and never corrupt timeline state. Persistence failures are
//! handled inside the persistence adapter (logged, never surfaced here).

use crate::engine::EngineError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SessionError>;

#[derive(Error, Debug)]
pub enum SessionError {
    /// The session has not finished initializing, or has been closed.
    #[error("session is not ready")]
    NotReady,

    /// Checkout was called with an empty snapshot id. Rejected before any
    /// timeline mutation is attempted.
    #[error("checkout requires a non-empty snapshot id")]
    InvalidCheckout,

    /// A failure surfaced verbatim from the tree engine.
    #[error(transparent)]
    Engine(#[from] EngineError),
}
