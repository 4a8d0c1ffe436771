pub mod board;
pub mod engine;
pub mod error;
pub mod utils;

pub use board::{Move, Position, START_FEN};
pub use engine::{Analysis, EngineConfig, EngineSession, Score, SearchLimit, SessionState};
pub use error::{EngineError, RulesError};

pub fn init() {
    utils::init_attack_tables();
}
