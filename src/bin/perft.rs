use clap::Parser;
use scacchiera::board::{perft, Position, START_FEN};
use shakmaty::fen::Fen;
use shakmaty::{CastlingMode, Chess, Position as _};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value_t = String::from(START_FEN))]
    fen: String,

    #[arg(short, long, default_value_t = 4)]
    depth: u32,
}

fn main() {
    scacchiera::init();
    let args = Args::parse();

    println!("Running perft on FEN: '{}' at depth {}", args.fen, args.depth);

    let ours = Position::from_fen(&args.fen).expect("valid FEN");
    let fen: Fen = args.fen.parse().expect("valid FEN");
    let reference: Chess = fen
        .into_position(CastlingMode::Standard)
        .expect("legal position");

    let mut mismatch = false;
    for depth in 1..=args.depth {
        let start = std::time::Instant::now();
        let nodes = perft(&ours, depth);
        let duration = start.elapsed();
        let expected = perft_shakmaty(&reference, depth);
        let verdict = if nodes == expected { "ok" } else { "MISMATCH" };
        mismatch |= nodes != expected;
        println!(
            "perft({}) = {} nodes, reference {} ({} ms) {}",
            depth,
            nodes,
            expected,
            duration.as_millis(),
            verdict
        );
    }
    if mismatch {
        std::process::exit(1);
    }
}

fn perft_shakmaty(pos: &Chess, depth: u32) -> u64 {
    if depth == 0 {
        return 1;
    }

    let mut nodes = 0;
    let moves = pos.legal_moves();
    for m in moves {
        let mut new_pos = pos.clone();
        new_pos.play_unchecked(&m);
        nodes += perft_shakmaty(&new_pos, depth - 1);
    }
    nodes
}
