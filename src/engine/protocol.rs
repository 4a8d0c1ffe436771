//! UCI wire grammar, client side.
//!
//! The mirror image of an engine's command parser: format the commands a
//! frontend sends, classify the lines an engine emits. Classification is
//! by fixed line prefix; anything unrecognized is carried only in the
//! diagnostics ring, never acted upon.

use crate::board::parse_move_text;

/// Search budget for one analysis request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchLimit {
    /// Wall-clock budget in milliseconds.
    MoveTime(u64),
    /// Fixed depth; mainly for debugging, latency depends on the position.
    Depth(u8),
}

/// Engine evaluation of a position. Centipawns and mate distance are
/// mutually exclusive per progress line; the newest line of either kind
/// overwrites the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Score {
    Cp(i32),
    Mate(i32),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InfoUpdate {
    pub depth: Option<u32>,
    pub score: Option<Score>,
    pub pv: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineLine {
    /// `uciok` — handshake acknowledgment.
    HandshakeOk,
    /// `readyok` — readiness acknowledgment.
    ReadyOk,
    /// `info …` carrying score and/or principal variation.
    Info(InfoUpdate),
    /// `bestmove …`; `None` for the no-move sentinel (`0000`, `(none)`)
    /// or a token that fails the move-text grammar.
    BestMove(Option<String>),
    /// Anything else (`id …`, `option …`, chatter).
    Other,
}

pub const HANDSHAKE_CMD: &str = "uci";
pub const READY_PROBE_CMD: &str = "isready";
pub const STOP_CMD: &str = "stop";
pub const QUIT_CMD: &str = "quit";

pub fn setoption_cmd(name: &str, value: &str) -> String {
    format!("setoption name {} value {}", name, value)
}

pub fn position_cmd(fen: &str) -> String {
    format!("position fen {}", fen)
}

pub fn go_cmd(limit: SearchLimit) -> String {
    match limit {
        SearchLimit::MoveTime(ms) => format!("go movetime {}", ms),
        SearchLimit::Depth(d) => format!("go depth {}", d),
    }
}

/// Classify one output line by its fixed prefix.
pub fn classify_line(line: &str) -> EngineLine {
    let mut tokens = line.split_whitespace();
    match tokens.next() {
        Some("uciok") => EngineLine::HandshakeOk,
        Some("readyok") => EngineLine::ReadyOk,
        Some("bestmove") => match tokens.next() {
            Some("0000") | Some("(none)") | None => EngineLine::BestMove(None),
            Some(token) if parse_move_text(token).is_ok() => {
                EngineLine::BestMove(Some(token.to_string()))
            }
            // An unusable token is as bad as no move at all
            Some(_) => EngineLine::BestMove(None),
        },
        Some("info") => {
            let mut update = InfoUpdate::default();
            while let Some(token) = tokens.next() {
                match token {
                    "depth" => {
                        update.depth = tokens.next().and_then(|v| v.parse().ok());
                    }
                    "score" => match (tokens.next(), tokens.next()) {
                        (Some("cp"), Some(v)) => {
                            if let Ok(cp) = v.parse() {
                                update.score = Some(Score::Cp(cp));
                            }
                        }
                        (Some("mate"), Some(v)) => {
                            if let Ok(n) = v.parse() {
                                update.score = Some(Score::Mate(n));
                            }
                        }
                        _ => {}
                    },
                    "pv" => {
                        // The principal variation runs to the end of the line
                        update.pv = tokens.by_ref().map(str::to_string).collect();
                    }
                    _ => {}
                }
            }
            EngineLine::Info(update)
        }
        _ => EngineLine::Other,
    }
}
