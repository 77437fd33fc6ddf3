//! Search: sequential core, parallel strategies, and the iterative-deepening
//! driver.

pub mod cluster;
pub mod encode;
pub mod globals;
pub mod negamax;
pub mod ordering;
pub mod shared;
pub mod stack;
pub mod tt;
pub mod wire;

use cozy_chess::{Board, Move};
use tracing::warn;

use crate::search::cluster::{WorkerKind, WorkerPool, master_search};
use crate::search::globals::SearchGlobals;
use crate::search::negamax::{
    INFINITE, MATE_SCORE, MAX_MATE_SCORE, SearchContext, SearchOptions, search_node,
};
use crate::search::shared::search_subtree_shared;
use crate::search::tt::TranspositionTable;

/// Result of searching one node or one root iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchResult {
    /// Score from the side to move's perspective.
    pub score: i32,
    /// Principal variation; empty when the node failed low/high, was cut
    /// off, or has no legal moves.
    pub pv: Vec<Move>,
}

impl SearchResult {
    /// The discarded-on-stop placeholder.
    pub fn sentinel() -> Self {
        Self {
            score: 0,
            pv: Vec::new(),
        }
    }
}

/// A score formatted for the UCI `info` line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UciScore {
    Centipawns(i32),
    /// Moves (not plies) to mate; negative when the engine is being mated.
    Mate(i32),
}

/// Map an internal score to its UCI form.
pub fn uci_score(score: i32) -> UciScore {
    if score <= -MAX_MATE_SCORE {
        UciScore::Mate((-score - MATE_SCORE) / 2)
    } else if score >= MAX_MATE_SCORE {
        UciScore::Mate((-score + MATE_SCORE + 1) / 2)
    } else {
        UciScore::Centipawns(score)
    }
}

impl std::fmt::Display for UciScore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UciScore::Centipawns(cp) => write!(f, "cp {cp}"),
            UciScore::Mate(moves) => write!(f, "mate {moves}"),
        }
    }
}

/// How a worker pool is brought up.
#[derive(Debug, Clone)]
pub enum PoolSpec {
    /// Child processes of the current executable, started with these args.
    Processes { count: usize, args: Vec<String> },
    /// In-process worker threads over anonymous pipes.
    Threads { count: usize, kind: WorkerKind },
}

impl PoolSpec {
    fn spawn(&self) -> std::io::Result<WorkerPool> {
        match self {
            PoolSpec::Processes { count, args } => WorkerPool::spawn_processes(*count, args),
            PoolSpec::Threads { count, kind } => WorkerPool::spawn_threads(*count, *kind),
        }
    }

    fn count(&self) -> usize {
        match self {
            PoolSpec::Processes { count, .. } | PoolSpec::Threads { count, .. } => *count,
        }
    }
}

/// A root-search strategy the iterative-deepening driver can run.
pub trait Strategy {
    /// Called once at the start of [`best_move_search`]; clears the
    /// transposition table and brings up any workers.
    fn begin_search(&mut self);

    /// Search the root position at `depth` with a full window.
    fn root_search(
        &mut self,
        board: &Board,
        history: &[u64],
        depth: i32,
        globals: &SearchGlobals,
    ) -> SearchResult;

    /// Called when iterative deepening finishes; terminates any workers.
    fn end_search(&mut self) {}
}

/// Single-threaded negamax.
pub struct Sequential {
    tt: TranspositionTable,
    options: SearchOptions,
}

impl Sequential {
    pub fn new(hash_mb: usize) -> Self {
        Self {
            tt: TranspositionTable::new(hash_mb),
            options: SearchOptions::default(),
        }
    }

    pub fn with_options(hash_mb: usize, options: SearchOptions) -> Self {
        Self {
            tt: TranspositionTable::new(hash_mb),
            options,
        }
    }
}

impl Strategy for Sequential {
    fn begin_search(&mut self) {
        self.tt.clear();
    }

    fn root_search(
        &mut self,
        board: &Board,
        history: &[u64],
        depth: i32,
        globals: &SearchGlobals,
    ) -> SearchResult {
        let mut ctx = SearchContext::with_history(&self.tt, globals, history);
        ctx.options = self.options;
        search_node(&mut ctx, board, -INFINITE, INFINITE, depth, 0)
    }
}

/// Multithreaded search over one shared transposition table.
pub struct SharedTt {
    tt: TranspositionTable,
    threads: usize,
    options: SearchOptions,
}

impl SharedTt {
    pub fn new(hash_mb: usize, threads: usize) -> Self {
        Self {
            tt: TranspositionTable::new(hash_mb),
            threads: threads.max(1),
            options: SearchOptions::default(),
        }
    }

    /// Thread count from `SKIRMISH_THREADS` or the hardware.
    pub fn from_env(hash_mb: usize) -> Self {
        Self::new(hash_mb, shared::thread_count_from_env())
    }
}

impl Strategy for SharedTt {
    fn begin_search(&mut self) {
        self.tt.clear();
    }

    fn root_search(
        &mut self,
        board: &Board,
        history: &[u64],
        depth: i32,
        globals: &SearchGlobals,
    ) -> SearchResult {
        search_subtree_shared(
            &self.tt,
            globals,
            self.options,
            board,
            history,
            -INFINITE,
            INFINITE,
            depth,
            0,
            self.threads,
        )
    }
}

/// Root-splitting master over sequential workers.
pub struct MasterWorker {
    spec: PoolSpec,
    pool: Option<WorkerPool>,
    fallback: Sequential,
}

impl MasterWorker {
    pub fn new(spec: PoolSpec, hash_mb: usize) -> Self {
        Self {
            spec,
            pool: None,
            fallback: Sequential::new(hash_mb),
        }
    }
}

impl Strategy for MasterWorker {
    fn begin_search(&mut self) {
        self.fallback.begin_search();
        ensure_pool(&self.spec, &mut self.pool);
    }

    fn root_search(
        &mut self,
        board: &Board,
        history: &[u64],
        depth: i32,
        globals: &SearchGlobals,
    ) -> SearchResult {
        match &mut self.pool {
            Some(pool) if pool.live_workers() > 0 => master_search(pool, board, depth, globals),
            _ => self.fallback.root_search(board, history, depth, globals),
        }
    }

    fn end_search(&mut self) {
        if let Some(mut pool) = self.pool.take() {
            pool.shutdown();
        }
    }
}

/// Master/worker skeleton with the shared-TT searcher inside each worker,
/// and as the local fallback when no workers come up.
pub struct Hybrid {
    spec: PoolSpec,
    pool: Option<WorkerPool>,
    fallback: SharedTt,
}

impl Hybrid {
    pub fn new(spec: PoolSpec, hash_mb: usize, threads: usize) -> Self {
        Self {
            spec,
            pool: None,
            fallback: SharedTt::new(hash_mb, threads),
        }
    }
}

impl Strategy for Hybrid {
    fn begin_search(&mut self) {
        self.fallback.begin_search();
        ensure_pool(&self.spec, &mut self.pool);
    }

    fn root_search(
        &mut self,
        board: &Board,
        history: &[u64],
        depth: i32,
        globals: &SearchGlobals,
    ) -> SearchResult {
        match &mut self.pool {
            Some(pool) if pool.live_workers() > 0 => master_search(pool, board, depth, globals),
            _ => self.fallback.root_search(board, history, depth, globals),
        }
    }

    fn end_search(&mut self) {
        if let Some(mut pool) = self.pool.take() {
            pool.shutdown();
        }
    }
}

fn ensure_pool(spec: &PoolSpec, pool: &mut Option<WorkerPool>) {
    if pool.is_none() && spec.count() > 0 {
        match spec.spawn() {
            Ok(p) => *pool = Some(p),
            Err(e) => {
                warn!(error = %e, "could not bring up worker pool, searching locally");
            }
        }
    }
}

/// Iterative-deepening driver.
///
/// Runs `strategy` from depth 1 to `max_depth`, keeping the best move of
/// the last completed iteration. A stop flag observed before an iteration
/// prevents it from starting; one observed during an iteration deeper than
/// 1 discards that iteration's result. After each completed iteration
/// `on_iter(depth, score, nodes, pv)` fires so the caller can emit its
/// `info` line. Returns `None` when no iteration completed (stopped before
/// depth 1, or no legal moves).
pub fn best_move_search<F>(
    board: &Board,
    history: &[u64],
    globals: &SearchGlobals,
    max_depth: i32,
    strategy: &mut dyn Strategy,
    mut on_iter: F,
) -> Option<Move>
where
    F: FnMut(i32, i32, u64, &[Move]),
{
    globals.reset(board.side_to_move(), max_depth);
    strategy.begin_search();

    let mut best_move = None;

    for depth in 1..=max_depth {
        if globals.stop() {
            break;
        }

        let result = strategy.root_search(board, history, depth, globals);

        // Depth 1 is kept even when the flag rose mid-iteration; without it
        // there would be no move at all.
        if depth > 1 && globals.stop() {
            break;
        }

        if result.pv.is_empty() {
            // Mate or stalemate at the root: nothing deeper to learn.
            break;
        }
        best_move = Some(result.pv[0]);

        on_iter(depth, result.score, globals.nodes(), &result.pv);
    }

    strategy.end_search();
    best_move
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uci_score_centipawns_passthrough() {
        assert_eq!(uci_score(42), UciScore::Centipawns(42));
        assert_eq!(uci_score(-900), UciScore::Centipawns(-900));
        assert_eq!(uci_score(42).to_string(), "cp 42");
    }

    #[test]
    fn uci_score_mate_in_one() {
        // Mate delivered at ply 1.
        let score = MATE_SCORE - 1;
        assert_eq!(uci_score(score), UciScore::Mate(1));
        assert_eq!(uci_score(score).to_string(), "mate 1");
    }

    #[test]
    fn uci_score_mate_in_three() {
        // Mate delivered at ply 5 = mate in 3 moves.
        assert_eq!(uci_score(MATE_SCORE - 5), UciScore::Mate(3));
    }

    #[test]
    fn uci_score_mated_in_one() {
        // Mated at ply 2: opponent mates on their next move.
        assert_eq!(uci_score(-(MATE_SCORE - 2)), UciScore::Mate(-1));
    }

    #[test]
    fn driver_reports_each_depth() {
        let board = Board::default();
        let globals = SearchGlobals::new();
        let mut strategy = Sequential::new(16);
        let mut depths = Vec::new();

        let best = best_move_search(&board, &[], &globals, 3, &mut strategy, |d, _, _, pv| {
            depths.push(d);
            assert!(!pv.is_empty());
        });

        assert_eq!(depths, vec![1, 2, 3]);
        assert!(best.is_some());
    }

    #[test]
    fn preset_stop_returns_no_move() {
        let board = Board::default();
        let globals = SearchGlobals::new();
        globals.request_stop();
        let mut strategy = Sequential::new(1);

        let best = best_move_search(&board, &[], &globals, 10, &mut strategy, |_, _, _, _| {});
        assert_eq!(best, None, "no iteration completed, so no best move");
    }

    #[test]
    fn stalemate_root_returns_no_move() {
        let board: Board = "7k/5Q2/6K1/8/8/8/8/8 b - - 0 1".parse().unwrap();
        let globals = SearchGlobals::new();
        let mut strategy = Sequential::new(1);

        let mut iterations = 0;
        let best = best_move_search(&board, &[], &globals, 5, &mut strategy, |_, _, _, _| {
            iterations += 1;
        });
        assert_eq!(best, None);
        assert_eq!(iterations, 0, "empty PV must not be reported");
    }

    #[test]
    fn opening_move_is_sensible() {
        let board = Board::default();
        let globals = SearchGlobals::new();
        let mut strategy = Sequential::new(16);

        let mut last_score = 0;
        let best = best_move_search(&board, &[], &globals, 4, &mut strategy, |_, s, _, _| {
            last_score = s;
        })
        .expect("startpos has moves")
        .to_string();

        assert!(
            ["e2e4", "d2d4", "g1f3", "b1c3"].contains(&best.as_str()),
            "unexpected opening move {best}"
        );
        assert!(
            last_score.abs() <= 100,
            "startpos should be near balanced, got {last_score}"
        );
    }

    #[test]
    fn repeated_runs_are_stable() {
        // Same position, cleared TT each run: identical move and score.
        let board: Board = "8/2p5/3p4/KP5r/1R3p1k/8/4P1P1/8 w - - 0 1".parse().unwrap();

        let mut run = || {
            let globals = SearchGlobals::new();
            let mut strategy = Sequential::new(16);
            let mut score = 0;
            let mv = best_move_search(&board, &[], &globals, 6, &mut strategy, |_, s, _, _| {
                score = s;
            });
            (mv, score)
        };

        assert_eq!(run(), run());
    }

    #[test]
    fn stop_mid_search_keeps_previous_best() {
        let board = Board::default();
        let globals = SearchGlobals::new();
        let mut strategy = Sequential::new(16);

        let stop_flag = std::sync::Arc::clone(globals.stop_flag());
        let best = best_move_search(&board, &[], &globals, 64, &mut strategy, |d, _, _, _| {
            if d == 3 {
                stop_flag.store(true, std::sync::atomic::Ordering::Release);
            }
        });

        assert!(best.is_some(), "depth 3 completed before the stop");
    }
}
