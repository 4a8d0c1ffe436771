//! Move generation and legality: the positions every client relies on.

use scacchiera::board::{
    move_to_text, text_to_square, Color, Position, START_FEN,
};
use scacchiera::error::RulesError;

#[test]
fn initial_position_has_twenty_moves() {
    scacchiera::init();
    let pos = Position::startpos();
    assert_eq!(pos.legal_moves().len(), 20);
}

#[test]
fn pawn_cannot_jump_three_ranks() {
    scacchiera::init();
    let pos = Position::startpos();
    assert!(!pos.is_legal_move("e2e5"));
    match pos.parse_move("e2e5") {
        Err(RulesError::IllegalMove(_)) => {}
        other => panic!("expected IllegalMove, got {:?}", other),
    }
}

#[test]
fn scoped_generation_matches_full_generation() {
    scacchiera::init();
    let pos = Position::startpos();
    let from = text_to_square("g1").unwrap();
    let mut scoped: Vec<String> = pos
        .legal_moves_from(from)
        .iter()
        .map(|&mv| move_to_text(mv))
        .collect();
    scoped.sort();
    assert_eq!(scoped, vec!["g1f3", "g1h3"]);

    // Squares without an active-color piece yield nothing
    assert!(pos.legal_moves_from(text_to_square("e7").unwrap()).is_empty());
    assert!(pos.legal_moves_from(text_to_square("e4").unwrap()).is_empty());
}

#[test]
fn check_must_be_resolved() {
    scacchiera::init();
    let pos = Position::from_fen("4k3/8/8/8/8/8/4r3/R3K3 w Q - 0 1").unwrap();
    assert!(pos.is_in_check(Color::White));
    assert!(!pos.is_in_check(Color::Black));
    // Shuffling the rook does not address the check
    assert!(!pos.is_legal_move("a1a2"));
    // Taking the checking rook does
    assert!(pos.is_legal_move("e1e2"));
}

#[test]
fn both_castling_moves_generated_and_applied() {
    scacchiera::init();
    let pos = Position::from_fen("r3k2r/8/8/8/8/8/8/R3K2R w KQkq - 0 1").unwrap();
    let from_king: Vec<String> = pos
        .legal_moves_from(text_to_square("e1").unwrap())
        .iter()
        .map(|&mv| move_to_text(mv))
        .collect();
    assert!(from_king.contains(&"e1g1".to_string()), "kingside missing: {:?}", from_king);
    assert!(from_king.contains(&"e1c1".to_string()), "queenside missing: {:?}", from_king);

    let after = pos.apply(pos.parse_move("e1g1").unwrap());
    assert_eq!(after.to_fen(), "r3k2r/8/8/8/8/8/8/R4RK1 b kq - 1 1");
}

#[test]
fn no_castling_through_check() {
    scacchiera::init();
    // Black rook on f2 covers f1: kingside transit square is attacked
    let pos = Position::from_fen("r3k2r/8/8/8/8/8/5r2/R3K2R w KQkq - 0 1").unwrap();
    assert!(!pos.is_legal_move("e1g1"));
    assert!(pos.is_legal_move("e1c1"));
}

#[test]
fn no_castling_out_of_check() {
    scacchiera::init();
    let pos = Position::from_fen("r3k2r/8/8/8/8/8/4r3/R3K2R w KQkq - 0 1").unwrap();
    assert!(pos.is_in_check(Color::White));
    assert!(!pos.is_legal_move("e1g1"));
    assert!(!pos.is_legal_move("e1c1"));
}

#[test]
fn no_castling_without_rook_on_home_square() {
    scacchiera::init();
    // Rights claim KQ but the kingside rook is gone
    let pos = Position::from_fen("4k3/8/8/8/8/8/8/R3K3 w KQ - 0 1").unwrap();
    assert!(!pos.is_legal_move("e1g1"));
    assert!(pos.is_legal_move("e1c1"));
}

#[test]
fn fools_mate_is_checkmate() {
    scacchiera::init();
    let pos =
        Position::from_fen("rnb1kbnr/pppp1ppp/8/4p3/6Pq/5P2/PPPPP2P/RNBQKBNR w KQkq - 1 3")
            .unwrap();
    assert!(pos.is_in_check(Color::White));
    assert!(pos.is_checkmate());
    assert!(!pos.is_stalemate());
    assert!(!pos.has_legal_moves());
}

#[test]
fn cornered_king_is_stalemated() {
    scacchiera::init();
    let pos = Position::from_fen("7k/5Q2/6K1/8/8/8/8/8 b - - 0 1").unwrap();
    assert!(!pos.is_in_check(Color::Black));
    assert!(pos.is_stalemate());
    assert!(!pos.is_checkmate());
}

#[test]
fn en_passant_only_against_stored_target() {
    scacchiera::init();
    let with_target = Position::from_fen("4k3/8/8/3pP3/8/8/8/4K3 w - d6 0 3").unwrap();
    assert!(with_target.is_legal_move("e5d6"));

    // Same board, target already cleared: the diagonal capture is gone
    let without_target = Position::from_fen("4k3/8/8/3pP3/8/8/8/4K3 w - - 0 3").unwrap();
    assert!(!without_target.is_legal_move("e5d6"));
}

#[test]
fn pinned_piece_cannot_expose_the_king() {
    scacchiera::init();
    // Knight on d2 is pinned against the king on d1 by the rook on d8
    let pos = Position::from_fen("3rk3/8/8/8/8/8/3N4/3K4 w - - 0 1").unwrap();
    assert!(pos.legal_moves_from(text_to_square("d2").unwrap()).is_empty());
}

#[test]
fn malformed_move_text_is_distinguished_from_illegal() {
    scacchiera::init();
    let pos = Position::startpos();
    for text in ["", "e2", "e2e", "i2i4", "e2e4x", "e7e8p", "e2e4qq"] {
        match pos.parse_move(text) {
            Err(RulesError::MalformedNotation(_)) => {}
            other => panic!("'{}' should be malformed, got {:?}", text, other),
        }
    }
}
