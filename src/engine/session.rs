//! Engine session controller.
//!
//! One `EngineSession` owns one external UCI process. Every state
//! transition happens on a single actor thread fed by one event queue
//! merging caller commands, reader-thread lines and timer deadlines, so
//! no two transitions can race. Search dispatch is latest-wins: a new
//! request supersedes the in-flight one, and output belonging to a dead
//! request id is ignored, never delivered to a newer caller.

use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, trace, warn};
use sha2::{Digest, Sha256};

use crate::board::Position;
use crate::engine::protocol::{
    self, classify_line, go_cmd, position_cmd, setoption_cmd, EngineLine, InfoUpdate, Score,
    SearchLimit,
};
use crate::error::EngineError;

const SENT_LOG_CAP: usize = 16;
const RECV_LOG_CAP: usize = 32;

/// Configuration for one engine session.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub engine_path: PathBuf,
    pub engine_args: Vec<String>,
    /// Deadline for the `uciok` handshake acknowledgment.
    pub startup_timeout: Duration,
    /// Deadline for each `readyok` after a readiness probe.
    pub readiness_timeout: Duration,
    /// Wall-clock baseline used when a depth-limited request needs a hard
    /// timeout.
    pub default_movetime: Duration,
    /// Grace added on top of the search budget for the hard timeout.
    pub hard_timeout_grace: Duration,
    pub hash_mb: u32,
    pub threads: u32,
}

impl EngineConfig {
    pub fn new(engine_path: impl Into<PathBuf>) -> Self {
        Self {
            engine_path: engine_path.into(),
            engine_args: Vec::new(),
            startup_timeout: Duration::from_secs(5),
            readiness_timeout: Duration::from_secs(5),
            default_movetime: Duration::from_millis(1000),
            hard_timeout_grace: Duration::from_secs(2),
            hash_mb: 16,
            threads: 1,
        }
    }
}

/// Protocol state of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    HandshakeSent,
    AwaitingReady,
    Ready,
    Searching,
    Failed,
    Closed,
}

/// A completed engine evaluation.
#[derive(Debug, Clone)]
pub struct Analysis {
    /// Best move in 4/5-char move text, validated against the move grammar.
    pub best_move: String,
    /// Last score reported; centipawns XOR mate distance.
    pub score: Option<Score>,
    /// Last principal variation reported, as move text.
    pub pv: Vec<String>,
    pub duration: Duration,
}

/// Pending result of one `analyze` call.
pub struct AnalysisHandle {
    rx: Receiver<Result<Analysis, EngineError>>,
}

impl AnalysisHandle {
    /// Block until the request resolves. Resolution is guaranteed: every
    /// request either completes, is superseded, or hits its hard timeout.
    pub fn wait(self) -> Result<Analysis, EngineError> {
        match self.rx.recv() {
            Ok(result) => result,
            Err(_) => Err(EngineError::Closed),
        }
    }
}

enum Event {
    Line(String),
    Eof,
    AwaitReady {
        reply: Sender<Result<(), EngineError>>,
    },
    Analyze {
        fen: String,
        limit: SearchLimit,
        hard_timeout: Option<Duration>,
        reply: Sender<Result<Analysis, EngineError>>,
    },
    QueryState {
        reply: Sender<SessionState>,
    },
    SearchDeadline {
        request_id: u64,
    },
    ReadinessDeadline {
        epoch: u64,
    },
    Shutdown {
        reply: Sender<()>,
    },
}

/// Handle to a running session. Cloneable callers are not needed: the
/// handle itself may be shared across threads (all methods take `&self`).
pub struct EngineSession {
    events: Sender<Event>,
    actor: Option<thread::JoinHandle<()>>,
}

impl EngineSession {
    /// Spawn the engine process and complete the startup handshake.
    ///
    /// Blocks until `uciok` arrives, then sends the fixed safety options
    /// (single search thread, bounded hash, pondering off) and the first
    /// readiness probe before handing control to the actor thread. Callers
    /// use [`wait_ready`](Self::wait_ready) to cross the readiness barrier.
    pub fn spawn(config: EngineConfig) -> Result<EngineSession, EngineError> {
        let mut child = Command::new(&config.engine_path)
            .args(&config.engine_args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| EngineError::ProcessUnavailable {
                reason: format!("failed to spawn {}: {}", config.engine_path.display(), e),
                diagnostics: String::new(),
            })?;
        let stdin = match child.stdin.take() {
            Some(stdin) => stdin,
            None => {
                let _ = child.kill();
                return Err(EngineError::ProcessUnavailable {
                    reason: "engine stdin not captured".to_string(),
                    diagnostics: String::new(),
                });
            }
        };
        let stdout = match child.stdout.take() {
            Some(stdout) => stdout,
            None => {
                let _ = child.kill();
                return Err(EngineError::ProcessUnavailable {
                    reason: "engine stdout not captured".to_string(),
                    diagnostics: String::new(),
                });
            }
        };

        let (events_tx, events_rx) = channel();

        let reader_tx = events_tx.clone();
        thread::spawn(move || {
            let reader = BufReader::new(stdout);
            for line in reader.lines() {
                match line {
                    Ok(line) => {
                        if reader_tx.send(Event::Line(line)).is_err() {
                            return;
                        }
                    }
                    Err(_) => break,
                }
            }
            let _ = reader_tx.send(Event::Eof);
        });

        let mut actor = Actor {
            config,
            child,
            stdin,
            events_tx: events_tx.clone(),
            state: SessionState::Uninitialized,
            sent_log: VecDeque::new(),
            recv_log: VecDeque::new(),
            ready_epoch: 0,
            ready_waiters: Vec::new(),
            next_request_id: 0,
            current: None,
            pending: None,
        };

        // Handshake runs on the calling thread; the actor loop only takes
        // over once the engine has acknowledged.
        if actor.send_line(protocol::HANDSHAKE_CMD).is_err() {
            return Err(actor.abort_startup());
        }
        actor.state = SessionState::HandshakeSent;
        let deadline = Instant::now() + actor.config.startup_timeout;
        loop {
            let now = Instant::now();
            if now >= deadline {
                return Err(actor.abort_startup());
            }
            match events_rx.recv_timeout(deadline - now) {
                Ok(Event::Line(line)) => {
                    trace!("<- {}", line);
                    actor.log_received(&line);
                    if classify_line(&line) == EngineLine::HandshakeOk {
                        break;
                    }
                }
                Ok(Event::Eof) => return Err(actor.abort_startup()),
                Ok(_) => {}
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                    return Err(actor.abort_startup());
                }
            }
        }
        debug!("engine handshake complete");

        let threads = actor.config.threads.to_string();
        let hash = actor.config.hash_mb.to_string();
        for cmd in [
            setoption_cmd("Threads", &threads),
            setoption_cmd("Hash", &hash),
            setoption_cmd("Ponder", "false"),
        ] {
            if actor.send_line(&cmd).is_err() {
                return Err(actor.abort_startup());
            }
        }
        if actor.probe_readiness().is_err() {
            return Err(actor.abort_startup());
        }

        let handle = thread::Builder::new()
            .name("engine-session".to_string())
            .spawn(move || actor.run(events_rx))
            .map_err(|e| EngineError::ProcessUnavailable {
                reason: format!("failed to start session thread: {}", e),
                diagnostics: String::new(),
            })?;

        Ok(EngineSession {
            events: events_tx,
            actor: Some(handle),
        })
    }

    /// Readiness barrier: blocks until the pending readiness probe is
    /// acknowledged. All concurrent waiters are released together; a
    /// readiness timeout fails them all and parks the session in `Failed`.
    pub fn wait_ready(&self) -> Result<(), EngineError> {
        let (tx, rx) = channel();
        if self.events.send(Event::AwaitReady { reply: tx }).is_err() {
            return Err(EngineError::Closed);
        }
        rx.recv().unwrap_or(Err(EngineError::Closed))
    }

    /// Request an evaluation of `fen`. Malformed position text is rejected
    /// here, before anything is written to the process. If a search is in
    /// flight it is superseded: newest request wins.
    pub fn analyze(&self, fen: &str, limit: SearchLimit) -> AnalysisHandle {
        self.analyze_with_deadline(fen, limit, None)
    }

    /// Like [`analyze`](Self::analyze) with an explicit hard timeout. The
    /// hard timeout must exceed the search budget; values that do not are
    /// stretched to budget plus the configured grace.
    pub fn analyze_with_deadline(
        &self,
        fen: &str,
        limit: SearchLimit,
        hard_timeout: Option<Duration>,
    ) -> AnalysisHandle {
        let (tx, rx) = channel();
        if let Err(e) = Position::from_fen(fen) {
            let _ = tx.send(Err(EngineError::InvalidPosition(e)));
            return AnalysisHandle { rx };
        }
        let event = Event::Analyze {
            fen: fen.to_string(),
            limit,
            hard_timeout,
            reply: tx,
        };
        if let Err(send_error) = self.events.send(event) {
            if let Event::Analyze { reply, .. } = send_error.0 {
                let _ = reply.send(Err(EngineError::Closed));
            }
        }
        AnalysisHandle { rx }
    }

    /// Current protocol state, for monitoring and tests.
    pub fn state(&self) -> SessionState {
        let (tx, rx) = channel();
        if self.events.send(Event::QueryState { reply: tx }).is_err() {
            return SessionState::Closed;
        }
        rx.recv().unwrap_or(SessionState::Closed)
    }

    /// Best-effort `quit`, then kill. Also runs on drop.
    pub fn shutdown(mut self) {
        self.shutdown_inner();
    }

    fn shutdown_inner(&mut self) {
        let (tx, rx) = channel();
        if self.events.send(Event::Shutdown { reply: tx }).is_ok() {
            let _ = rx.recv_timeout(Duration::from_secs(2));
        }
        if let Some(handle) = self.actor.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for EngineSession {
    fn drop(&mut self) {
        if self.actor.is_some() {
            self.shutdown_inner();
        }
    }
}

struct InFlight {
    id: u64,
    fingerprint: String,
    issued_at: Instant,
    score: Option<Score>,
    pv: Vec<String>,
    reply: Sender<Result<Analysis, EngineError>>,
}

struct QueuedRequest {
    id: u64,
    fen: String,
    limit: SearchLimit,
    hard_timeout: Option<Duration>,
    reply: Sender<Result<Analysis, EngineError>>,
}

struct Actor {
    config: EngineConfig,
    child: Child,
    stdin: ChildStdin,
    events_tx: Sender<Event>,
    state: SessionState,
    sent_log: VecDeque<String>,
    recv_log: VecDeque<String>,
    /// Bumped per readiness probe; stale readiness deadlines no-op.
    ready_epoch: u64,
    ready_waiters: Vec<Sender<Result<(), EngineError>>>,
    next_request_id: u64,
    /// At most one in-flight search.
    current: Option<InFlight>,
    /// One request parked behind a readiness probe (after a cancel).
    pending: Option<QueuedRequest>,
}

impl Actor {
    fn run(mut self, events: Receiver<Event>) {
        while let Ok(event) = events.recv() {
            if !self.handle_event(event) {
                return;
            }
        }
        // Every handle dropped without an explicit shutdown
        self.terminate();
    }

    fn handle_event(&mut self, event: Event) -> bool {
        match event {
            Event::Line(line) => self.on_line(&line),
            Event::Eof => self.fail_session("engine process closed its output"),
            Event::AwaitReady { reply } => self.on_await_ready(reply),
            Event::Analyze {
                fen,
                limit,
                hard_timeout,
                reply,
            } => self.on_analyze(fen, limit, hard_timeout, reply),
            Event::QueryState { reply } => {
                let _ = reply.send(self.state);
            }
            Event::SearchDeadline { request_id } => self.on_search_deadline(request_id),
            Event::ReadinessDeadline { epoch } => self.on_readiness_deadline(epoch),
            Event::Shutdown { reply } => {
                self.terminate();
                let _ = reply.send(());
                return false;
            }
        }
        true
    }

    // Line handling ----------------------------------------------------

    fn on_line(&mut self, line: &str) {
        trace!("<- {}", line);
        self.log_received(line);
        match classify_line(line) {
            EngineLine::ReadyOk => self.on_ready_ok(),
            EngineLine::Info(update) => self.on_info(update),
            EngineLine::BestMove(best) => self.on_best_move(best, line),
            EngineLine::HandshakeOk | EngineLine::Other => {}
        }
    }

    fn on_ready_ok(&mut self) {
        if self.state != SessionState::AwaitingReady {
            trace!("readyok outside a readiness probe ignored");
            return;
        }
        self.state = SessionState::Ready;
        debug!("engine ready, releasing {} waiter(s)", self.ready_waiters.len());
        for waiter in self.ready_waiters.drain(..) {
            let _ = waiter.send(Ok(()));
        }
        if let Some(q) = self.pending.take() {
            self.dispatch(q);
        }
    }

    fn on_info(&mut self, update: InfoUpdate) {
        if self.state != SessionState::Searching {
            return;
        }
        let Some(current) = self.current.as_mut() else {
            return;
        };
        // cp and mate are exclusive per line; the newest wins either way
        if let Some(score) = update.score {
            current.score = Some(score);
        }
        if !update.pv.is_empty() {
            current.pv = update.pv;
        }
    }

    fn on_best_move(&mut self, best: Option<String>, raw_line: &str) {
        if self.state != SessionState::Searching {
            // Result of a superseded or timed-out request
            trace!("stale bestmove ignored: {}", raw_line);
            return;
        }
        let Some(current) = self.current.take() else {
            return;
        };
        self.state = SessionState::Ready;
        match best {
            Some(text) => {
                debug!(
                    "request {} resolved: {} ({:?})",
                    current.id, text, current.score
                );
                let analysis = Analysis {
                    best_move: text,
                    score: current.score,
                    pv: current.pv,
                    duration: current.issued_at.elapsed(),
                };
                let _ = current.reply.send(Ok(analysis));
            }
            None => {
                warn!("request {} returned no usable move: {}", current.id, raw_line);
                let diagnostics = self.diagnostics(Some((current.id, &current.fingerprint)));
                let _ = current.reply.send(Err(EngineError::NoMoveReturned {
                    request_id: current.id,
                    diagnostics,
                }));
            }
        }
    }

    // Caller commands ---------------------------------------------------

    fn on_await_ready(&mut self, reply: Sender<Result<(), EngineError>>) {
        match self.state {
            SessionState::Ready | SessionState::Searching => {
                let _ = reply.send(Ok(()));
            }
            SessionState::AwaitingReady
            | SessionState::HandshakeSent
            | SessionState::Uninitialized => self.ready_waiters.push(reply),
            SessionState::Failed => {
                let _ = reply.send(Err(EngineError::ProcessUnavailable {
                    reason: "engine session is in a failed state".to_string(),
                    diagnostics: self.diagnostics(None),
                }));
            }
            SessionState::Closed => {
                let _ = reply.send(Err(EngineError::Closed));
            }
        }
    }

    fn on_analyze(
        &mut self,
        fen: String,
        limit: SearchLimit,
        hard_timeout: Option<Duration>,
        reply: Sender<Result<Analysis, EngineError>>,
    ) {
        self.next_request_id += 1;
        let q = QueuedRequest {
            id: self.next_request_id,
            fen,
            limit,
            hard_timeout,
            reply,
        };
        match self.state {
            SessionState::Ready => self.dispatch(q),
            SessionState::Searching => {
                self.supersede_current();
                if self.state == SessionState::AwaitingReady {
                    self.park(q);
                } else {
                    let _ = q.reply.send(Err(EngineError::ProcessUnavailable {
                        reason: "engine session failed while cancelling".to_string(),
                        diagnostics: self.diagnostics(None),
                    }));
                }
            }
            SessionState::AwaitingReady
            | SessionState::HandshakeSent
            | SessionState::Uninitialized => self.park(q),
            SessionState::Failed => {
                let _ = q.reply.send(Err(EngineError::ProcessUnavailable {
                    reason: "engine session is in a failed state".to_string(),
                    diagnostics: self.diagnostics(None),
                }));
            }
            SessionState::Closed => {
                let _ = q.reply.send(Err(EngineError::Closed));
            }
        }
    }

    // Transitions -------------------------------------------------------

    fn dispatch(&mut self, q: QueuedRequest) {
        let fingerprint = fen_fingerprint(&q.fen);
        if self.send_line(&position_cmd(&q.fen)).is_err()
            || self.send_line(&go_cmd(q.limit)).is_err()
        {
            let _ = q.reply.send(Err(EngineError::ProcessUnavailable {
                reason: "engine session failed while dispatching".to_string(),
                diagnostics: self.diagnostics(Some((q.id, &fingerprint))),
            }));
            return;
        }

        let budget = match q.limit {
            SearchLimit::MoveTime(ms) => Duration::from_millis(ms),
            SearchLimit::Depth(_) => self.config.default_movetime,
        };
        let mut hard = q
            .hard_timeout
            .unwrap_or(budget + self.config.hard_timeout_grace);
        if hard <= budget {
            warn!(
                "hard timeout {:?} does not exceed the {:?} budget, stretching",
                hard, budget
            );
            hard = budget + self.config.hard_timeout_grace;
        }
        let deadline_tx = self.events_tx.clone();
        let request_id = q.id;
        thread::spawn(move || {
            thread::sleep(hard);
            let _ = deadline_tx.send(Event::SearchDeadline { request_id });
        });

        debug!("request {} dispatched (fen#{}, {:?})", q.id, fingerprint, q.limit);
        self.current = Some(InFlight {
            id: q.id,
            fingerprint,
            issued_at: Instant::now(),
            score: None,
            pv: Vec::new(),
            reply: q.reply,
        });
        self.state = SessionState::Searching;
    }

    /// Latest-wins cancel: fail the in-flight request, stop the engine and
    /// gate the session behind a fresh readiness probe so the process is
    /// quiescent before it is reused.
    fn supersede_current(&mut self) {
        if let Some(current) = self.current.take() {
            debug!("request {} superseded", current.id);
            let _ = current.reply.send(Err(EngineError::Superseded {
                request_id: current.id,
            }));
        }
        if self.send_line(protocol::STOP_CMD).is_err() {
            return;
        }
        let _ = self.probe_readiness();
    }

    fn park(&mut self, q: QueuedRequest) {
        if let Some(old) = self.pending.take() {
            debug!("parked request {} superseded", old.id);
            let _ = old.reply.send(Err(EngineError::Superseded { request_id: old.id }));
        }
        self.pending = Some(q);
    }

    fn probe_readiness(&mut self) -> Result<(), ()> {
        self.send_line(protocol::READY_PROBE_CMD)?;
        self.state = SessionState::AwaitingReady;
        self.ready_epoch += 1;
        let epoch = self.ready_epoch;
        let timeout = self.config.readiness_timeout;
        let deadline_tx = self.events_tx.clone();
        thread::spawn(move || {
            thread::sleep(timeout);
            let _ = deadline_tx.send(Event::ReadinessDeadline { epoch });
        });
        Ok(())
    }

    fn on_search_deadline(&mut self, request_id: u64) {
        if self.state != SessionState::Searching {
            return;
        }
        let stale = self
            .current
            .as_ref()
            .map(|current| current.id != request_id)
            .unwrap_or(true);
        if stale {
            return;
        }
        let current = match self.current.take() {
            Some(current) => current,
            None => return,
        };
        warn!("request {} hit its hard timeout", request_id);
        let diagnostics = self.diagnostics(Some((current.id, &current.fingerprint)));
        let _ = current.reply.send(Err(EngineError::SearchTimeout {
            request_id,
            diagnostics,
        }));
        // Forced cancel, then the readiness gate re-arms the session
        if self.send_line(protocol::STOP_CMD).is_ok() {
            let _ = self.probe_readiness();
        }
    }

    fn on_readiness_deadline(&mut self, epoch: u64) {
        if self.state != SessionState::AwaitingReady || epoch != self.ready_epoch {
            return;
        }
        warn!("readiness probe timed out");
        let diagnostics = self.diagnostics(None);
        self.state = SessionState::Failed;
        for waiter in self.ready_waiters.drain(..) {
            let _ = waiter.send(Err(EngineError::ReadinessTimeout {
                diagnostics: diagnostics.clone(),
            }));
        }
        if let Some(q) = self.pending.take() {
            let _ = q.reply.send(Err(EngineError::ReadinessTimeout {
                diagnostics: diagnostics.clone(),
            }));
        }
    }

    /// Fatal: the process or its channel is gone. Fails everything pending.
    fn fail_session(&mut self, reason: &str) {
        if matches!(self.state, SessionState::Failed | SessionState::Closed) {
            return;
        }
        warn!("engine session failed: {}", reason);
        let diagnostics = match self.current.as_ref() {
            Some(current) => self.diagnostics(Some((current.id, &current.fingerprint))),
            None => self.diagnostics(None),
        };
        self.state = SessionState::Failed;
        let unavailable = |diag: String| EngineError::ProcessUnavailable {
            reason: reason.to_string(),
            diagnostics: diag,
        };
        if let Some(current) = self.current.take() {
            let _ = current.reply.send(Err(unavailable(diagnostics.clone())));
        }
        if let Some(q) = self.pending.take() {
            let _ = q.reply.send(Err(unavailable(diagnostics.clone())));
        }
        for waiter in self.ready_waiters.drain(..) {
            let _ = waiter.send(Err(unavailable(diagnostics.clone())));
        }
    }

    fn terminate(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        debug!("closing engine session");
        if let Some(current) = self.current.take() {
            let _ = current.reply.send(Err(EngineError::Closed));
        }
        if let Some(q) = self.pending.take() {
            let _ = q.reply.send(Err(EngineError::Closed));
        }
        for waiter in self.ready_waiters.drain(..) {
            let _ = waiter.send(Err(EngineError::Closed));
        }
        let _ = self.send_line(protocol::QUIT_CMD);
        let _ = self.child.kill();
        let _ = self.child.wait();
        self.state = SessionState::Closed;
    }

    /// Used only while the startup handshake still owns the event queue.
    fn abort_startup(&mut self) -> EngineError {
        let diagnostics = self.diagnostics(None);
        let _ = self.child.kill();
        let _ = self.child.wait();
        self.state = SessionState::Failed;
        EngineError::StartupFailed { diagnostics }
    }

    // Plumbing ----------------------------------------------------------

    fn send_line(&mut self, cmd: &str) -> Result<(), ()> {
        trace!("-> {}", cmd);
        if self.sent_log.len() == SENT_LOG_CAP {
            self.sent_log.pop_front();
        }
        self.sent_log.push_back(cmd.to_string());
        let outcome = writeln!(self.stdin, "{}", cmd).and_then(|_| self.stdin.flush());
        if let Err(e) = outcome {
            self.fail_session(&format!("write to engine failed: {}", e));
            return Err(());
        }
        Ok(())
    }

    fn log_received(&mut self, line: &str) {
        if self.recv_log.len() == RECV_LOG_CAP {
            self.recv_log.pop_front();
        }
        self.recv_log.push_back(line.to_string());
    }

    /// Failure snapshot: state, request fingerprint, then the sent and
    /// received rings, oldest first.
    fn diagnostics(&self, request: Option<(u64, &str)>) -> String {
        let mut out = String::new();
        out.push_str(&format!("session state: {:?}\n", self.state));
        if let Some((id, fingerprint)) = request {
            out.push_str(&format!("request: id={} fen#{}\n", id, fingerprint));
        }
        out.push_str(&format!("last {} command(s) sent:\n", self.sent_log.len()));
        for cmd in &self.sent_log {
            out.push_str(&format!("  > {}\n", cmd));
        }
        out.push_str(&format!("last {} line(s) received:\n", self.recv_log.len()));
        for line in &self.recv_log {
            out.push_str(&format!("  < {}\n", line));
        }
        out
    }
}

/// Compact position identity for logs: first 12 hex chars of SHA-256.
fn fen_fingerprint(fen: &str) -> String {
    let digest = Sha256::digest(fen.as_bytes());
    digest[..6].iter().map(|b| format!("{:02x}", b)).collect()
}
