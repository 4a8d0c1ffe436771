//! Engine session bridge: one external UCI process per session, driven
//! through a handshake/readiness/search/cancel lifecycle.
//!
//! The rules engine and this module never share state; they exchange
//! position and move text only.

pub mod protocol;
pub mod session;

pub use protocol::{classify_line, EngineLine, InfoUpdate, Score, SearchLimit};
pub use session::{Analysis, AnalysisHandle, EngineConfig, EngineSession, SessionState};
