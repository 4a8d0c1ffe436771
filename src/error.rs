//! Error taxonomy for the rules engine and the engine session bridge.
//!
//! Rules errors are synchronous and local; session errors are delivered
//! through analysis handles and carry a diagnostic snapshot so the caller
//! can decide between retrying a request and restarting the session.

use thiserror::Error;

/// Errors produced by the rules engine (codec + legality). Always detected
/// locally, never forwarded to the external process.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RulesError {
    /// Position or move text that does not match the notation grammar.
    #[error("malformed notation: {0}")]
    MalformedNotation(String),

    /// Well-formed move text that is not legal in the given position.
    #[error("illegal move: {0}")]
    IllegalMove(String),
}

/// Errors produced by the engine session controller.
///
/// Startup and readiness failures are fatal to the session; a search
/// timeout fails only the request it was armed for.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// The process never acknowledged the handshake within the startup
    /// timeout. The session is unusable and must be respawned.
    #[error("engine startup failed\n{diagnostics}")]
    StartupFailed { diagnostics: String },

    /// The readiness probe went unanswered. Fails every waiter at the
    /// barrier and parks the session in `Failed`.
    #[error("engine readiness timeout\n{diagnostics}")]
    ReadinessTimeout { diagnostics: String },

    /// No result line arrived before the hard timeout. The request is dead
    /// but the session re-arms and stays usable.
    #[error("search timed out (request {request_id})\n{diagnostics}")]
    SearchTimeout { request_id: u64, diagnostics: String },

    /// The process answered with the no-move sentinel (or an unusable
    /// best-move token). A hard failure, never a quiet default.
    #[error("engine returned no usable move (request {request_id})\n{diagnostics}")]
    NoMoveReturned { request_id: u64, diagnostics: String },

    /// The process or its stdio channel could not be reached.
    #[error("engine process unavailable: {reason}\n{diagnostics}")]
    ProcessUnavailable { reason: String, diagnostics: String },

    /// The request was cancelled because a newer one arrived. Latest wins.
    #[error("request {request_id} superseded by a newer analysis request")]
    Superseded { request_id: u64 },

    /// Rejected before touching the process: the position text failed the
    /// codec grammar.
    #[error("invalid position: {0}")]
    InvalidPosition(#[from] RulesError),

    /// The session was shut down while the request was pending.
    #[error("engine session closed")]
    Closed,
}
