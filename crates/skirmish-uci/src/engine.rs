//! Event-driven UCI engine loop.
//!
//! The main thread owns the board and dispatches searches to a worker
//! thread; a stdin reader thread feeds commands into the same channel so
//! `stop` is handled while a search runs. Log output goes through
//! `tracing` (stderr); only protocol lines touch stdout.

use std::io::{self, BufRead};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, mpsc};
use std::time::Duration;

use cozy_chess::Board;
use tracing::{debug, info, warn};

use skirmish_engine::{
    DEFAULT_HASH_MB, MAX_PLY, MasterWorker, PoolSpec, SearchGlobals, Sequential, SharedTt,
    Strategy, best_move_search, uci_score,
};

use crate::command::{Command, GoParams, parse_command};
use crate::error::UciError;
use crate::moves::{move_to_uci, pv_to_uci};
use crate::time::time_budget;

/// Internal engine state — idle or searching.
enum EngineState {
    Idle,
    Searching,
}

/// Events processed by the main engine loop.
enum EngineEvent {
    UciCommand(Result<Command, UciError>),
    SearchDone(SearchDone),
    InputClosed,
}

/// Payload returned by the search thread when it finishes.
struct SearchDone {
    best_move: Option<String>,
    strategy: Box<dyn Strategy + Send>,
}

/// The UCI engine: current position, search configuration, and the
/// strategy instance that owns the transposition table between searches.
pub struct UciEngine {
    board: Board,
    history: Vec<u64>,
    strategy: Option<Box<dyn Strategy + Send>>,
    state: EngineState,
    stop_flag: Arc<AtomicBool>,
    threads: usize,
    hash_mb: usize,
    cluster_workers: usize,
    pending_rebuild: bool,
}

impl UciEngine {
    /// Create an engine searching in-process. `cluster_workers > 0`
    /// switches the root search to the master/worker strategy with that
    /// many worker processes.
    pub fn new(cluster_workers: usize) -> Self {
        Self {
            board: Board::default(),
            history: Vec::new(),
            strategy: None,
            state: EngineState::Idle,
            stop_flag: Arc::new(AtomicBool::new(false)),
            threads: 1,
            hash_mb: DEFAULT_HASH_MB,
            cluster_workers,
            pending_rebuild: false,
        }
    }

    fn make_strategy(&self) -> Box<dyn Strategy + Send> {
        if self.cluster_workers > 0 {
            let spec = PoolSpec::Processes {
                count: self.cluster_workers,
                args: vec!["worker".to_string()],
            };
            Box::new(MasterWorker::new(spec, self.hash_mb))
        } else if self.threads > 1 {
            Box::new(SharedTt::new(self.hash_mb, self.threads))
        } else {
            Box::new(Sequential::new(self.hash_mb))
        }
    }

    /// Run the UCI event loop, reading from stdin until `quit` or input
    /// closes.
    pub fn run(mut self) -> Result<(), UciError> {
        let (tx, rx) = mpsc::channel::<EngineEvent>();

        // Stdin reader thread.
        let stdin_tx = tx.clone();
        std::thread::spawn(move || {
            let stdin = io::stdin();
            for line in stdin.lock().lines() {
                match line {
                    Ok(line) => {
                        let trimmed = line.trim().to_string();
                        if trimmed.is_empty() {
                            continue;
                        }
                        debug!(cmd = %trimmed, "received UCI command");
                        if stdin_tx
                            .send(EngineEvent::UciCommand(parse_command(&trimmed)))
                            .is_err()
                        {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
            let _ = stdin_tx.send(EngineEvent::InputClosed);
        });

        for event in &rx {
            match event {
                EngineEvent::UciCommand(Ok(cmd)) => match cmd {
                    Command::Uci => self.handle_uci(),
                    Command::IsReady => println!("readyok"),
                    Command::UciNewGame => self.handle_ucinewgame(),
                    Command::Position { board, history } => {
                        self.board = board;
                        self.history = history;
                    }
                    Command::Go(params) => self.handle_go(params, &tx),
                    Command::SetOption { name, value } => self.handle_setoption(&name, &value),
                    Command::Stop => self.handle_stop(),
                    Command::Quit => {
                        if !matches!(self.state, EngineState::Idle) {
                            self.handle_stop();
                            // Drain events until the search hands back.
                            for ev in &rx {
                                if let EngineEvent::SearchDone(done) = ev {
                                    self.finish_search(done);
                                    break;
                                }
                            }
                        }
                        break;
                    }
                    Command::Unknown(_) => {}
                },
                EngineEvent::UciCommand(Err(e)) => {
                    warn!(error = %e, "UCI parse error");
                }
                EngineEvent::SearchDone(done) => self.finish_search(done),
                EngineEvent::InputClosed => break,
            }
        }

        info!("skirmish shutting down");
        Ok(())
    }

    fn handle_uci(&self) {
        println!("id name skirmish");
        println!("id author Nicolas Lazaro");
        println!("option name Hash type spin default {DEFAULT_HASH_MB} min 1 max 4096");
        println!("option name Threads type spin default 1 min 1 max 512");
        println!("uciok");
    }

    fn handle_ucinewgame(&mut self) {
        self.board = Board::default();
        self.history.clear();
        // The table is cleared at the start of every search; dropping the
        // strategy here just releases cluster workers early.
        self.strategy = None;
    }

    fn handle_setoption(&mut self, name: &str, value: &str) {
        match name {
            "Threads" => match value.parse::<usize>() {
                Ok(n) if n > 0 => {
                    self.threads = n;
                    self.request_rebuild();
                }
                _ => warn!(value, "ignoring bad Threads value"),
            },
            "Hash" => match value.parse::<usize>() {
                Ok(mb) if mb > 0 => {
                    self.hash_mb = mb;
                    self.request_rebuild();
                }
                _ => warn!(value, "ignoring bad Hash value"),
            },
            _ => debug!(name, "ignoring unknown option"),
        }
    }

    fn request_rebuild(&mut self) {
        if matches!(self.state, EngineState::Idle) {
            self.strategy = None;
        } else {
            self.pending_rebuild = true;
        }
    }

    fn handle_go(&mut self, params: GoParams, tx: &mpsc::Sender<EngineEvent>) {
        if !matches!(self.state, EngineState::Idle) {
            warn!("go received while searching, ignoring");
            return;
        }

        // Fresh stop flag per go: a flag left set by the previous search
        // (or its timer) must not leak into this one.
        self.stop_flag = Arc::new(AtomicBool::new(false));
        let globals = Arc::new(SearchGlobals::with_stop_flag(Arc::clone(&self.stop_flag)));

        let max_depth = params.depth.unwrap_or(MAX_PLY as i32).clamp(1, MAX_PLY as i32);

        if let Some(budget) = time_budget(&params, self.board.side_to_move()) {
            arm_timer(Arc::clone(&self.stop_flag), budget);
        }

        let mut strategy = self.strategy.take().unwrap_or_else(|| self.make_strategy());
        let board = self.board.clone();
        let history = self.history.clone();
        let tx = tx.clone();

        std::thread::spawn(move || {
            let best = best_move_search(
                &board,
                &history,
                &globals,
                max_depth,
                strategy.as_mut(),
                |depth, score, nodes, pv| {
                    let time = globals.elapsed_ms().max(1);
                    let nps = nodes * 1000 / time;
                    println!(
                        "info depth {depth} score {} time {time} nodes {nodes} nps {nps} pv {}",
                        uci_score(score),
                        pv_to_uci(&board, pv),
                    );
                },
            );
            let best_move = best.map(|mv| move_to_uci(&board, mv));
            let _ = tx.send(EngineEvent::SearchDone(SearchDone { best_move, strategy }));
        });

        self.state = EngineState::Searching;
    }

    fn handle_stop(&mut self) {
        self.stop_flag.store(true, Ordering::Release);
    }

    fn finish_search(&mut self, done: SearchDone) {
        match done.best_move {
            Some(mv) => println!("bestmove {mv}"),
            None => println!("bestmove 0000"),
        }

        if self.pending_rebuild {
            self.pending_rebuild = false;
            self.strategy = None;
        } else {
            self.strategy = Some(done.strategy);
        }
        self.state = EngineState::Idle;
    }
}

/// Raise `stop` once `budget` elapses. The flag belongs to one `go`, so a
/// timer outliving its search only touches an already-retired flag.
fn arm_timer(stop: Arc<AtomicBool>, budget: Duration) {
    std::thread::spawn(move || {
        std::thread::sleep(budget);
        stop.store(true, Ordering::Release);
    });
}

impl Default for UciEngine {
    fn default() -> Self {
        Self::new(0)
    }
}
