//! One-shot engine analysis from the command line.
//!
//! Spawns the given UCI engine, waits for readiness, submits the position
//! and prints the evaluation. Useful for poking at a session without a
//! client attached.

use std::path::PathBuf;

use clap::Parser;
use scacchiera::board::START_FEN;
use scacchiera::engine::{EngineConfig, EngineSession, Score, SearchLimit};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a UCI engine binary
    #[arg(short, long)]
    engine: PathBuf,

    #[arg(short, long, default_value_t = String::from(START_FEN))]
    fen: String,

    /// Search budget in milliseconds
    #[arg(short, long, default_value_t = 1000)]
    movetime: u64,

    /// Fixed-depth search instead of a time budget
    #[arg(short, long)]
    depth: Option<u8>,
}

fn main() {
    env_logger::init();
    scacchiera::init();
    let args = Args::parse();

    let session = match EngineSession::spawn(EngineConfig::new(&args.engine)) {
        Ok(session) => session,
        Err(e) => {
            eprintln!("engine startup failed: {}", e);
            std::process::exit(1);
        }
    };
    if let Err(e) = session.wait_ready() {
        eprintln!("engine never became ready: {}", e);
        std::process::exit(1);
    }

    let limit = match args.depth {
        Some(d) => SearchLimit::Depth(d),
        None => SearchLimit::MoveTime(args.movetime),
    };
    match session.analyze(&args.fen, limit).wait() {
        Ok(analysis) => {
            println!("bestmove: {}", analysis.best_move);
            match analysis.score {
                Some(Score::Cp(cp)) => println!("score: {} cp", cp),
                Some(Score::Mate(n)) => println!("score: mate in {}", n),
                None => {}
            }
            if !analysis.pv.is_empty() {
                println!("pv: {}", analysis.pv.join(" "));
            }
            println!("took: {} ms", analysis.duration.as_millis());
            session.shutdown();
        }
        Err(e) => {
            eprintln!("analysis failed: {}", e);
            session.shutdown();
            std::process::exit(1);
        }
    }
}
