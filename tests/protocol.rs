//! UCI line classification tests.

use scacchiera::engine::protocol::{
    classify_line, go_cmd, position_cmd, setoption_cmd, EngineLine, Score, SearchLimit,
};

#[test]
fn classifies_acknowledgments() {
    assert_eq!(classify_line("uciok"), EngineLine::HandshakeOk);
    assert_eq!(classify_line("readyok"), EngineLine::ReadyOk);
    assert_eq!(classify_line("id name Stockfish 16"), EngineLine::Other);
    assert_eq!(classify_line("option name Hash type spin"), EngineLine::Other);
    assert_eq!(classify_line(""), EngineLine::Other);
}

#[test]
fn classifies_bestmove_lines() {
    assert_eq!(
        classify_line("bestmove e2e4"),
        EngineLine::BestMove(Some("e2e4".to_string()))
    );
    assert_eq!(
        classify_line("bestmove e7e8q ponder a7a6"),
        EngineLine::BestMove(Some("e7e8q".to_string()))
    );
    // The no-move sentinel is never a valid answer
    assert_eq!(classify_line("bestmove 0000"), EngineLine::BestMove(None));
    assert_eq!(classify_line("bestmove (none)"), EngineLine::BestMove(None));
    assert_eq!(classify_line("bestmove"), EngineLine::BestMove(None));
    // A token outside the move grammar is as unusable as no move
    assert_eq!(classify_line("bestmove resign"), EngineLine::BestMove(None));
}

#[test]
fn parses_centipawn_info_lines() {
    let line = "info depth 12 seldepth 18 score cp 35 nodes 91203 nps 812000 pv e2e4 e7e5 g1f3";
    match classify_line(line) {
        EngineLine::Info(update) => {
            assert_eq!(update.depth, Some(12));
            assert_eq!(update.score, Some(Score::Cp(35)));
            assert_eq!(update.pv, vec!["e2e4", "e7e5", "g1f3"]);
        }
        other => panic!("expected Info, got {:?}", other),
    }
}

#[test]
fn parses_mate_info_lines() {
    match classify_line("info depth 20 score mate -3 pv h7h8") {
        EngineLine::Info(update) => {
            assert_eq!(update.score, Some(Score::Mate(-3)));
            assert_eq!(update.pv, vec!["h7h8"]);
        }
        other => panic!("expected Info, got {:?}", other),
    }
}

#[test]
fn score_bounds_do_not_confuse_the_parser() {
    match classify_line("info depth 8 score cp 17 lowerbound nodes 4000") {
        EngineLine::Info(update) => assert_eq!(update.score, Some(Score::Cp(17))),
        other => panic!("expected Info, got {:?}", other),
    }
}

#[test]
fn info_without_score_or_pv_is_empty_update() {
    match classify_line("info string NNUE evaluation using nn.nnue") {
        EngineLine::Info(update) => {
            assert_eq!(update.score, None);
            assert!(update.pv.is_empty());
        }
        other => panic!("expected Info, got {:?}", other),
    }
}

#[test]
fn formats_outgoing_commands() {
    assert_eq!(go_cmd(SearchLimit::MoveTime(750)), "go movetime 750");
    assert_eq!(go_cmd(SearchLimit::Depth(6)), "go depth 6");
    assert_eq!(
        position_cmd("8/8/8/8/8/8/8/K1k5 w - - 0 1"),
        "position fen 8/8/8/8/8/8/8/K1k5 w - - 0 1"
    );
    assert_eq!(
        setoption_cmd("Threads", "1"),
        "setoption name Threads value 1"
    );
}
