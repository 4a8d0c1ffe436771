//! Scripted UCI engine for the session integration tests.
//!
//! Speaks just enough of the protocol to exercise the controller: the
//! handshake, the readiness probe, `position fen` + `go`, `stop` and
//! `quit`. Flags delay or suppress individual replies so tests can drive
//! the controller through its timeout and supersession paths. Best moves
//! come from this crate's own move generator, so they are always legal
//! for the submitted position.

use std::io::{self, BufRead, Write};
use std::thread;
use std::time::Duration;

use clap::Parser;
use scacchiera::board::{move_to_text, Position, START_FEN};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Delay before answering `uciok`
    #[arg(long, default_value_t = 0)]
    handshake_delay_ms: u64,

    /// Delay before answering each `readyok`
    #[arg(long, default_value_t = 0)]
    ready_delay_ms: u64,

    /// Thinking time simulated for each `go`
    #[arg(long, default_value_t = 10)]
    move_delay_ms: u64,

    /// Swallow the first `go` entirely (exercises the hard timeout)
    #[arg(long)]
    mute_first: bool,

    /// Always answer with the no-move sentinel
    #[arg(long)]
    null_move: bool,
}

fn main() -> io::Result<()> {
    scacchiera::init();
    let args = Args::parse();

    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut writer = stdout.lock();

    let mut fen = String::from(START_FEN);
    let mut muted_once = false;

    for line in stdin.lock().lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mut tokens = line.split_whitespace();
        match tokens.next() {
            Some("uci") => {
                thread::sleep(Duration::from_millis(args.handshake_delay_ms));
                writeln!(writer, "id name stub-engine")?;
                writeln!(writer, "id author scacchiera tests")?;
                writeln!(writer, "uciok")?;
                writer.flush()?;
            }
            Some("isready") => {
                thread::sleep(Duration::from_millis(args.ready_delay_ms));
                writeln!(writer, "readyok")?;
                writer.flush()?;
            }
            Some("position") => {
                if tokens.next() == Some("fen") {
                    fen = tokens.collect::<Vec<_>>().join(" ");
                } else {
                    fen = String::from(START_FEN);
                }
            }
            Some("go") => {
                if args.mute_first && !muted_once {
                    muted_once = true;
                    continue;
                }
                thread::sleep(Duration::from_millis(args.move_delay_ms));
                if args.null_move {
                    writeln!(writer, "bestmove 0000")?;
                    writer.flush()?;
                    continue;
                }
                match Position::from_fen(&fen) {
                    Ok(pos) => match pos.legal_moves().first() {
                        Some(&mv) => {
                            let text = move_to_text(mv);
                            writeln!(writer, "info depth 1 score cp 21 pv {}", text)?;
                            writeln!(writer, "bestmove {}", text)?;
                        }
                        None => writeln!(writer, "bestmove 0000")?,
                    },
                    Err(_) => writeln!(writer, "bestmove 0000")?,
                }
                writer.flush()?;
            }
            Some("stop") => {
                // Searches resolve synchronously here; nothing to interrupt
            }
            Some("quit") => break,
            _ => {}
        }
    }
    Ok(())
}
