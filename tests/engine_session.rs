//! Session controller integration tests against the scripted stub engine.
//!
//! The stub binary is spawned exactly the way a real UCI engine would be;
//! its flags steer the controller through the supersession, timeout and
//! failure paths.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use scacchiera::board::{Position, START_FEN};
use scacchiera::engine::{EngineConfig, EngineSession, Score, SearchLimit, SessionState};
use scacchiera::error::EngineError;

fn stub_config(args: &[&str]) -> EngineConfig {
    let mut config = EngineConfig::new(env!("CARGO_BIN_EXE_stub-engine"));
    config.engine_args = args.iter().map(|s| s.to_string()).collect();
    config
}

#[test]
fn handshake_readiness_and_analysis() {
    let session = EngineSession::spawn(stub_config(&[])).expect("spawn");
    session.wait_ready().expect("readiness");
    assert_eq!(session.state(), SessionState::Ready);

    let analysis = session
        .analyze(START_FEN, SearchLimit::MoveTime(50))
        .wait()
        .expect("analysis resolves");
    assert!(
        Position::startpos().is_legal_move(&analysis.best_move),
        "stub returned a non-legal move: {}",
        analysis.best_move
    );
    assert_eq!(analysis.score, Some(Score::Cp(21)));
    assert_eq!(analysis.pv, vec![analysis.best_move.clone()]);
    assert_eq!(session.state(), SessionState::Ready);
    session.shutdown();
}

#[test]
fn depth_limited_analysis_resolves() {
    let session = EngineSession::spawn(stub_config(&[])).expect("spawn");
    session.wait_ready().expect("readiness");
    let analysis = session
        .analyze(START_FEN, SearchLimit::Depth(3))
        .wait()
        .expect("depth-limited analysis resolves");
    assert!(Position::startpos().is_legal_move(&analysis.best_move));
}

#[test]
fn malformed_position_never_reaches_the_process() {
    let session = EngineSession::spawn(stub_config(&[])).expect("spawn");
    session.wait_ready().expect("readiness");
    match session.analyze("this is not a position", SearchLimit::MoveTime(50)).wait() {
        Err(EngineError::InvalidPosition(_)) => {}
        other => panic!("expected InvalidPosition, got {:?}", other.map(|a| a.best_move)),
    }
    // The session never left Ready: nothing was written to the engine
    assert_eq!(session.state(), SessionState::Ready);
}

#[test]
fn readiness_barrier_releases_all_waiters_together() {
    let session = Arc::new(
        EngineSession::spawn(stub_config(&["--ready-delay-ms", "300"])).expect("spawn"),
    );
    let waiters: Vec<_> = (0..3)
        .map(|_| {
            let session = session.clone();
            thread::spawn(move || session.wait_ready())
        })
        .collect();
    for waiter in waiters {
        waiter.join().expect("waiter thread").expect("released ok");
    }
}

#[test]
fn newest_request_supersedes_the_in_flight_one() {
    let session =
        EngineSession::spawn(stub_config(&["--move-delay-ms", "400"])).expect("spawn");
    session.wait_ready().expect("readiness");

    let after_e4 = "rnbqkbnr/pppppppp/8/8/4P3/8/PPPPPPPP/RNBQKBNR b KQkq e3 0 1";
    let first = session.analyze(START_FEN, SearchLimit::MoveTime(300));
    let second = session.analyze(after_e4, SearchLimit::MoveTime(300));

    match first.wait() {
        Err(EngineError::Superseded { request_id }) => assert_eq!(request_id, 1),
        other => panic!("first request should be superseded, got {:?}", other.map(|a| a.best_move)),
    }

    let analysis = second.wait().expect("second request resolves");
    // The stale result of the first search was a white move from the start
    // position; it must never surface as the second request's answer.
    assert!(
        Position::from_fen(after_e4).unwrap().is_legal_move(&analysis.best_move),
        "late output leaked across requests: {}",
        analysis.best_move
    );
    assert_eq!(session.state(), SessionState::Ready);
}

#[test]
fn hard_timeout_fails_the_request_but_not_the_session() {
    let session = EngineSession::spawn(stub_config(&["--mute-first"])).expect("spawn");
    session.wait_ready().expect("readiness");

    let started = Instant::now();
    let result = session
        .analyze_with_deadline(
            START_FEN,
            SearchLimit::MoveTime(100),
            Some(Duration::from_millis(500)),
        )
        .wait();
    let elapsed = started.elapsed();

    match result {
        Err(EngineError::SearchTimeout { request_id, diagnostics }) => {
            assert_eq!(request_id, 1);
            assert!(
                diagnostics.contains("go movetime 100"),
                "snapshot missing the dispatched command:\n{}",
                diagnostics
            );
        }
        other => panic!("expected SearchTimeout, got {:?}", other.map(|a| a.best_move)),
    }
    assert!(
        elapsed < Duration::from_secs(3),
        "timeout fired too late: {:?}",
        elapsed
    );

    // The forced cancel re-armed the readiness gate; the session is usable
    let analysis = session
        .analyze(START_FEN, SearchLimit::MoveTime(50))
        .wait()
        .expect("session survives a request timeout");
    assert!(Position::startpos().is_legal_move(&analysis.best_move));
}

#[test]
fn no_move_sentinel_is_a_typed_error() {
    let session = EngineSession::spawn(stub_config(&["--null-move"])).expect("spawn");
    session.wait_ready().expect("readiness");
    match session.analyze(START_FEN, SearchLimit::MoveTime(50)).wait() {
        Err(EngineError::NoMoveReturned { diagnostics, .. }) => {
            assert!(diagnostics.contains("bestmove 0000"), "snapshot:\n{}", diagnostics);
        }
        other => panic!("expected NoMoveReturned, got {:?}", other.map(|a| a.best_move)),
    }
    // A no-move answer fails the request, not the session
    assert_eq!(session.state(), SessionState::Ready);
}

#[test]
fn readiness_timeout_is_fatal_to_the_session() {
    let mut config = stub_config(&["--ready-delay-ms", "5000"]);
    config.readiness_timeout = Duration::from_millis(200);
    let session = EngineSession::spawn(config).expect("handshake itself succeeds");

    match session.wait_ready() {
        Err(EngineError::ReadinessTimeout { diagnostics }) => {
            assert!(diagnostics.contains("isready"), "snapshot:\n{}", diagnostics);
        }
        other => panic!("expected ReadinessTimeout, got {:?}", other),
    }
    assert_eq!(session.state(), SessionState::Failed);

    // A failed session refuses further work
    match session.analyze(START_FEN, SearchLimit::MoveTime(50)).wait() {
        Err(EngineError::ProcessUnavailable { .. }) => {}
        other => panic!("expected ProcessUnavailable, got {:?}", other.map(|a| a.best_move)),
    }
}

#[test]
fn startup_timeout_produces_a_diagnostic_snapshot() {
    let mut config = stub_config(&["--handshake-delay-ms", "5000"]);
    config.startup_timeout = Duration::from_millis(200);
    match EngineSession::spawn(config) {
        Err(EngineError::StartupFailed { diagnostics }) => {
            assert!(diagnostics.contains("> uci"), "snapshot:\n{}", diagnostics);
        }
        Ok(_) => panic!("spawn should have timed out"),
        Err(other) => panic!("expected StartupFailed, got {:?}", other),
    }
}

#[test]
fn missing_binary_is_process_unavailable() {
    let config = EngineConfig::new("/nonexistent/engine-binary");
    match EngineSession::spawn(config) {
        Err(EngineError::ProcessUnavailable { .. }) => {}
        Ok(_) => panic!("spawn should fail for a missing binary"),
        Err(other) => panic!("expected ProcessUnavailable, got {:?}", other),
    }
}
