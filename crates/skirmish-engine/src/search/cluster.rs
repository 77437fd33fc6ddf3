//! Root-splitting master/worker search over message-passing workers.
//!
//! The master orders the root moves, hands each idle worker one move at a
//! time as a FEN-plus-depth work item, and folds replies back in as they
//! arrive. Workers are separate processes joined by pipes in production;
//! the thread-backed constructor runs the same loops over in-process pipes
//! so the scheduling logic is exercisable from tests.

use std::collections::VecDeque;
use std::io::{self, BufReader, Read, Write};
use std::process::{Child, Command, Stdio};

use cozy_chess::{Board, Move};
use crossbeam_channel::{Receiver, unbounded};
use tracing::{debug, warn};

use crate::search::SearchResult;
use crate::search::encode::{decode_move, encode_move};
use crate::search::globals::SearchGlobals;
use crate::search::negamax::{INFINITE, MATE_SCORE, SearchContext, SearchOptions, search_node};
use crate::search::ordering::{collect_legal_moves, sort_moves};
use crate::search::shared::search_subtree_shared;
use crate::search::tt::{DEFAULT_HASH_MB, TranspositionTable};
use crate::search::wire::{Dispatch, Reply, read_dispatch, write_dispatch, write_reply};

/// Which searcher a worker runs below its dispatched move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerKind {
    /// Plain sequential negamax (the root-splitting variant).
    Sequential,
    /// Shared-TT multithreaded search (the hybrid variant).
    SharedTt { threads: usize },
}

/// Serve work items until the master sends a terminate frame.
///
/// One worker process/thread calls this with its end of the pipes. Every
/// work frame is answered with exactly one reply frame; idle frames are
/// skipped; an unreadable FEN gets an empty reply so the frame pairing
/// never desynchronizes.
pub fn worker_loop<R: Read, W: Write>(reader: R, mut writer: W, kind: WorkerKind) -> io::Result<()> {
    let mut reader = BufReader::new(reader);
    let tt = TranspositionTable::new(DEFAULT_HASH_MB);
    let globals = SearchGlobals::new();

    loop {
        match read_dispatch(&mut reader)? {
            Dispatch::Terminate => {
                debug!("worker received terminate");
                return Ok(());
            }
            Dispatch::Idle => continue,
            Dispatch::Work { fen, depth } => {
                let Ok(board) = Board::from_fen(&fen, false) else {
                    warn!(fen = %fen, "unparseable FEN in work item");
                    write_reply(
                        &mut writer,
                        &Reply {
                            score: 0,
                            nodes: 0,
                            pv: Vec::new(),
                        },
                    )?;
                    continue;
                };

                let before = globals.nodes();
                // The dispatched move already sits at ply 0 on the master's
                // side; this subtree starts one ply down with a full window.
                let result = match kind {
                    WorkerKind::Sequential => {
                        let mut ctx = SearchContext::new(&tt, &globals);
                        search_node(&mut ctx, &board, -INFINITE, INFINITE, depth - 1, 1)
                    }
                    WorkerKind::SharedTt { threads } => search_subtree_shared(
                        &tt,
                        &globals,
                        SearchOptions::default(),
                        &board,
                        &[],
                        -INFINITE,
                        INFINITE,
                        depth - 1,
                        1,
                        threads,
                    ),
                };

                write_reply(
                    &mut writer,
                    &Reply {
                        score: result.score,
                        nodes: globals.nodes() - before,
                        pv: result.pv.iter().map(|&m| encode_move(m)).collect(),
                    },
                )?;
            }
        }
    }
}

struct WorkerHandle {
    tx: Box<dyn Write + Send>,
    assigned: Option<Move>,
    alive: bool,
    child: Option<Child>,
}

/// A set of workers plus one channel carrying every worker's replies, so
/// the master can block on "a reply from any worker".
pub struct WorkerPool {
    workers: Vec<WorkerHandle>,
    replies: Receiver<(usize, io::Result<Reply>)>,
}

impl WorkerPool {
    /// Spawn `count` worker processes running the current executable with
    /// `args` (the binary's worker mode). Worker stderr is inherited so
    /// their log lines still reach the terminal.
    pub fn spawn_processes(count: usize, args: &[String]) -> io::Result<Self> {
        let exe = std::env::current_exe()?;
        let (tx, rx) = unbounded();
        let mut workers = Vec::with_capacity(count);

        for index in 0..count {
            let mut child = Command::new(&exe)
                .args(args)
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::inherit())
                .spawn()?;
            let stdin = child
                .stdin
                .take()
                .ok_or_else(|| io::Error::other("worker stdin not captured"))?;
            let stdout = child
                .stdout
                .take()
                .ok_or_else(|| io::Error::other("worker stdout not captured"))?;

            spawn_reader(index, stdout, tx.clone());
            workers.push(WorkerHandle {
                tx: Box::new(stdin),
                assigned: None,
                alive: true,
                child: Some(child),
            });
        }

        debug!(count, "worker processes spawned");
        Ok(Self {
            workers,
            replies: rx,
        })
    }

    /// Spawn `count` in-process workers joined by anonymous pipes. Same
    /// wire protocol, same scheduling, no child processes.
    pub fn spawn_threads(count: usize, kind: WorkerKind) -> io::Result<Self> {
        let (tx, rx) = unbounded();
        let mut workers = Vec::with_capacity(count);

        for index in 0..count {
            let (work_rx, work_tx) = io::pipe()?;
            let (reply_rx, reply_tx) = io::pipe()?;

            std::thread::spawn(move || {
                if let Err(e) = worker_loop(work_rx, reply_tx, kind) {
                    debug!(worker = index, error = %e, "worker loop ended");
                }
            });

            spawn_reader(index, reply_rx, tx.clone());
            workers.push(WorkerHandle {
                tx: Box::new(work_tx),
                assigned: None,
                alive: true,
                child: None,
            });
        }

        Ok(Self {
            workers,
            replies: rx,
        })
    }

    /// Number of workers still accepting work.
    pub fn live_workers(&self) -> usize {
        self.workers.iter().filter(|w| w.alive).count()
    }

    /// Send a terminate frame to every worker and reap child processes.
    pub fn shutdown(&mut self) {
        for worker in &mut self.workers {
            if worker.alive {
                let _ = write_dispatch(&mut worker.tx, &Dispatch::Terminate);
                worker.alive = false;
            }
            if let Some(mut child) = worker.child.take() {
                let _ = child.wait();
            }
        }
    }

    fn dispatch(&mut self, index: usize, board: &Board, mv: Move, depth: i32) -> bool {
        let mut child = board.clone();
        child.play_unchecked(mv);
        let fen = format!("{child}");

        let worker = &mut self.workers[index];
        worker.assigned = Some(mv);
        match write_dispatch(&mut worker.tx, &Dispatch::Work { fen, depth }) {
            Ok(()) => true,
            Err(e) => {
                warn!(worker = index, error = %e, "dispatch failed, dropping worker");
                worker.assigned = None;
                worker.alive = false;
                false
            }
        }
    }

    fn send_idle(&mut self, index: usize) {
        let worker = &mut self.workers[index];
        if worker.alive && write_dispatch(&mut worker.tx, &Dispatch::Idle).is_err() {
            worker.alive = false;
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn spawn_reader<R: Read + Send + 'static>(
    index: usize,
    reader: R,
    tx: crossbeam_channel::Sender<(usize, io::Result<Reply>)>,
) {
    std::thread::spawn(move || {
        let mut reader = BufReader::new(reader);
        loop {
            match crate::search::wire::read_reply(&mut reader) {
                Ok(reply) => {
                    if tx.send((index, Ok(reply))).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    // EOF after terminate is the normal way out; the master
                    // only sees this if it is still waiting on the worker.
                    let _ = tx.send((index, Err(e)));
                    break;
                }
            }
        }
    });
}

/// One root-splitting search round across the pool.
///
/// Worker scores come back from the child position's side to move, so the
/// master negates them; the dispatched root move is prepended to the
/// worker's PV. When the stop flag rises, in-flight items are still
/// collected but no new ones are issued.
///
/// Every root move is either searched or the call does not return: an item
/// whose worker dies goes back to the front of the queue for a surviving
/// worker, and losing the entire pool with moves outstanding panics rather
/// than passing off a partial result as the answer.
pub fn master_search(
    pool: &mut WorkerPool,
    board: &Board,
    depth: i32,
    globals: &SearchGlobals,
) -> SearchResult {
    let in_check = !board.checkers().is_empty();
    let mut moves = collect_legal_moves(board);
    if moves.is_empty() {
        return SearchResult {
            score: if in_check { -MATE_SCORE } else { 0 },
            pv: Vec::new(),
        };
    }
    sort_moves(board, &mut moves, None);

    // Invariant: every move is in exactly one of `queue`, in flight on a
    // worker, or counted in `completed`.
    let total = moves.len();
    let mut queue: VecDeque<Move> = moves.into_iter().collect();
    let mut completed = 0usize;
    let mut in_flight = 0usize;
    let mut best = SearchResult {
        score: -INFINITE,
        pv: Vec::new(),
    };

    // Prime every worker with an initial item.
    for index in 0..pool.workers.len() {
        if !pool.workers[index].alive {
            continue;
        }
        match queue.pop_front() {
            Some(mv) => {
                if pool.dispatch(index, board, mv, depth) {
                    in_flight += 1;
                } else {
                    queue.push_front(mv);
                }
            }
            None => pool.send_idle(index),
        }
    }

    while completed < total {
        if in_flight == 0 {
            if globals.stop() {
                // Stopped: no new items, return the completed portion.
                break;
            }
            if pool.live_workers() == 0 {
                panic!(
                    "worker pool lost with {} root moves unsearched",
                    queue.len()
                );
            }
            // Live but idle workers exist — hand the queue back out.
            for index in 0..pool.workers.len() {
                if !pool.workers[index].alive || pool.workers[index].assigned.is_some() {
                    continue;
                }
                let Some(mv) = queue.pop_front() else {
                    break;
                };
                if pool.dispatch(index, board, mv, depth) {
                    in_flight += 1;
                } else {
                    queue.push_front(mv);
                }
            }
            if in_flight == 0 {
                panic!(
                    "worker pool lost with {} root moves unsearched",
                    queue.len()
                );
            }
        }

        let Ok((index, reply)) = pool.replies.recv() else {
            panic!("reply channel closed with {in_flight} root moves in flight");
        };
        let Some(root_move) = pool.workers[index].assigned.take() else {
            // Late EOF notice from a worker with nothing assigned; not a
            // work item either way.
            if reply.is_err() {
                pool.workers[index].alive = false;
            }
            continue;
        };
        in_flight -= 1;

        match reply {
            Ok(reply) => {
                completed += 1;
                globals.add_nodes(reply.nodes);
                let score = -reply.score;
                if score > best.score {
                    let mut pv = vec![root_move];
                    pv.extend(reply.pv.iter().filter_map(|&v| decode_move(v)));
                    best = SearchResult { score, pv };
                }
            }
            Err(e) => {
                // The item is not lost: it goes back to the queue head for
                // a surviving worker.
                warn!(worker = index, error = %e, "worker failed mid-item, re-dispatching its move");
                pool.workers[index].alive = false;
                queue.push_front(root_move);
                if pool.live_workers() == 0 {
                    panic!(
                        "worker pool lost with {} root moves unsearched",
                        total - completed
                    );
                }
            }
        }

        if pool.workers[index].alive {
            let next = if globals.stop() { None } else { queue.pop_front() };
            match next {
                Some(mv) => {
                    if pool.dispatch(index, board, mv, depth) {
                        in_flight += 1;
                    } else {
                        queue.push_front(mv);
                    }
                }
                None => pool.send_idle(index),
            }
        }
    }

    best
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A pool containing one worker that accepts a single item and dies
    /// without replying, optionally preceded by a healthy worker.
    fn pool_with_failing_worker(include_healthy: bool) -> WorkerPool {
        let (tx, rx) = unbounded();
        let mut workers = Vec::new();

        if include_healthy {
            let (work_rx, work_tx) = io::pipe().expect("pipe");
            let (reply_rx, reply_tx) = io::pipe().expect("pipe");
            std::thread::spawn(move || {
                let _ = worker_loop(work_rx, reply_tx, WorkerKind::Sequential);
            });
            spawn_reader(workers.len(), reply_rx, tx.clone());
            workers.push(WorkerHandle {
                tx: Box::new(work_tx),
                assigned: None,
                alive: true,
                child: None,
            });
        }

        let (work_rx, work_tx) = io::pipe().expect("pipe");
        let (reply_rx, reply_tx) = io::pipe().expect("pipe");
        std::thread::spawn(move || {
            let mut reader = BufReader::new(work_rx);
            let _ = read_dispatch(&mut reader);
            drop(reply_tx);
        });
        spawn_reader(workers.len(), reply_rx, tx.clone());
        workers.push(WorkerHandle {
            tx: Box::new(work_tx),
            assigned: None,
            alive: true,
            child: None,
        });

        WorkerPool {
            workers,
            replies: rx,
        }
    }

    #[test]
    fn failed_worker_item_is_redispatched() {
        let board = Board::default();
        let globals = SearchGlobals::new();
        let mut pool = pool_with_failing_worker(true);
        let result = master_search(&mut pool, &board, 2, &globals);
        pool.shutdown();

        let tt = TranspositionTable::new(DEFAULT_HASH_MB);
        let seq_globals = SearchGlobals::new();
        let mut ctx = SearchContext::new(&tt, &seq_globals);
        let sequential = search_node(&mut ctx, &board, -INFINITE, INFINITE, 2, 0);

        assert_eq!(
            result.score, sequential.score,
            "the dead worker's move must be re-searched by the survivor"
        );
        assert!(!result.pv.is_empty());
    }

    #[test]
    #[should_panic(expected = "root moves unsearched")]
    fn losing_every_worker_is_fatal() {
        let board = Board::default();
        let globals = SearchGlobals::new();
        let mut pool = pool_with_failing_worker(false);
        master_search(&mut pool, &board, 2, &globals);
    }
}
