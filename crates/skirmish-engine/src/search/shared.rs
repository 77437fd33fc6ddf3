//! Shared-transposition-table parallel search.
//!
//! At a splittable node the sorted move list becomes a shared work queue:
//! scoped threads pull moves, search each on a private clone of the
//! position, and merge scores under one mutex. The transposition table and
//! node counter are shared; duplicated work between threads is absorbed by
//! the table rather than prevented. A thread observing `alpha >= beta`
//! raises the cutoff flag and the others abandon their remaining moves at
//! the next pull.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use cozy_chess::{Board, Move};

use crate::eval::evaluate;
use crate::search::SearchResult;
use crate::search::globals::SearchGlobals;
use crate::search::negamax::{
    INFINITE, MATE_SCORE, SearchContext, SearchOptions, search_node,
};
use crate::search::ordering::{collect_legal_moves, sort_moves};
use crate::search::stack::{KeyHistory, MAX_PLY};
use crate::search::tt::{Bound, TranspositionTable};

/// Minimum remaining depth before spawning threads is worth it.
const MIN_SPLIT_DEPTH: i32 = 3;

/// Minimum move-list size worth dividing.
const MIN_SPLIT_MOVES: usize = 4;

/// Best-so-far state merged under one lock so score, alpha, move, and PV
/// always change together.
struct SharedBest {
    best_score: i32,
    alpha: i32,
    best_move: Option<Move>,
    pv: Vec<Move>,
}

/// Thread count for the shared-TT searcher.
///
/// `SKIRMISH_THREADS` overrides; otherwise every available hardware thread.
pub fn thread_count_from_env() -> usize {
    threads_from_env().unwrap_or_else(|| {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    })
}

/// Thread count for a hybrid worker process: half the hardware threads, so
/// co-resident workers do not oversubscribe the machine.
pub fn hybrid_thread_count() -> usize {
    threads_from_env().unwrap_or_else(|| {
        std::thread::available_parallelism()
            .map(|n| (n.get() / 2).max(1))
            .unwrap_or(1)
    })
}

fn threads_from_env() -> Option<usize> {
    std::env::var("SKIRMISH_THREADS")
        .ok()
        .and_then(|v| v.parse().ok())
        .filter(|&n| n > 0)
}

/// Search a subtree with the move loop parallelized at this node.
///
/// Children always run the sequential [`search_node`]; only the entry node
/// splits, which keeps thread-spawn overhead at one scope per subtree. The
/// caller passes `ply == 0` at the root, or `ply == 1` inside a cluster
/// worker. Falls back to the sequential searcher when the depth, thread
/// count, or move-list size does not justify splitting.
#[allow(clippy::too_many_arguments)]
pub fn search_subtree_shared(
    tt: &TranspositionTable,
    globals: &SearchGlobals,
    options: SearchOptions,
    board: &Board,
    history: &[u64],
    mut alpha: i32,
    mut beta: i32,
    depth: i32,
    ply: usize,
    threads: usize,
) -> SearchResult {
    if depth < MIN_SPLIT_DEPTH || threads <= 1 {
        let mut ctx = SearchContext::with_history(tt, globals, history);
        ctx.options = options;
        return search_node(&mut ctx, board, alpha, beta, depth, ply);
    }

    if ply > 0 {
        if globals.stop() {
            return SearchResult::sentinel();
        }
        let keys = KeyHistory::from_keys(history);
        if board.halfmove_clock() >= 100
            || keys.is_repeat(board.hash(), board.halfmove_clock())
        {
            return SearchResult {
                score: 0,
                pv: Vec::new(),
            };
        }
        if ply >= MAX_PLY {
            return SearchResult {
                score: evaluate(board),
                pv: Vec::new(),
            };
        }
        alpha = alpha.max(-MATE_SCORE + ply as i32);
        beta = beta.min(MATE_SCORE - ply as i32);
        if alpha >= beta {
            return SearchResult {
                score: alpha,
                pv: Vec::new(),
            };
        }
    }

    let pv_node = alpha != beta - 1;
    let hash = board.hash();

    let mut tt_move = None;
    if let Some(hit) = tt.probe(hash, ply) {
        tt_move = hit.best_move;
        if !pv_node
            && hit.depth >= depth
            && match hit.bound {
                Bound::Exact => true,
                Bound::Lower => hit.score >= beta,
                Bound::Upper => hit.score <= alpha,
            }
        {
            return SearchResult {
                score: hit.score,
                pv: Vec::new(),
            };
        }
    }

    globals.increment_nodes();

    let in_check = !board.checkers().is_empty();
    let mut moves = collect_legal_moves(board);
    if moves.is_empty() {
        return SearchResult {
            score: if in_check {
                -MATE_SCORE + ply as i32
            } else {
                0
            },
            pv: Vec::new(),
        };
    }

    sort_moves(board, &mut moves, tt_move);

    let original_alpha = alpha;

    let (best_score, best_move, pv) = if moves.len() >= MIN_SPLIT_MOVES {
        split_moves(
            tt, globals, options, board, history, &moves, alpha, beta, pv_node, depth, ply,
            threads,
        )
    } else {
        let mut ctx = SearchContext::with_history(tt, globals, history);
        ctx.options = options;
        sequential_moves(&mut ctx, board, &moves, alpha, beta, pv_node, depth, ply)
    };

    let bound = if best_score >= beta {
        Bound::Lower
    } else if best_score <= original_alpha {
        Bound::Upper
    } else {
        Bound::Exact
    };
    tt.store(hash, depth, best_score, best_move, bound, ply);

    SearchResult {
        score: best_score,
        pv,
    }
}

/// Sequential move loop for nodes too small to split.
#[allow(clippy::too_many_arguments)]
fn sequential_moves(
    ctx: &mut SearchContext,
    board: &Board,
    moves: &[Move],
    mut alpha: i32,
    beta: i32,
    pv_node: bool,
    depth: i32,
    ply: usize,
) -> (i32, Option<Move>, Vec<Move>) {
    let hash = board.hash();
    let mut best_score = -INFINITE;
    let mut best_move = None;
    let mut pv = Vec::new();

    for (move_num, &mv) in moves.iter().enumerate() {
        let mut child = board.clone();
        child.play_unchecked(mv);

        ctx.keys.push(hash);
        let mut result = if move_num == 0 {
            search_node(ctx, &child, -beta, -alpha, depth - 1, ply + 1)
        } else {
            search_node(ctx, &child, -alpha - 1, -alpha, depth - 1, ply + 1)
        };
        let mut score = -result.score;
        if move_num > 0 && score > alpha {
            result = search_node(ctx, &child, -beta, -alpha, depth - 1, ply + 1);
            score = -result.score;
        }
        ctx.keys.pop();

        if ply > 0 && ctx.globals.stop() {
            return (0, None, Vec::new());
        }

        if score > best_score {
            best_score = score;
            best_move = Some(mv);
            if best_score > alpha {
                alpha = best_score;
                if pv_node {
                    pv.clear();
                    pv.push(mv);
                    pv.append(&mut result.pv);
                }
                if alpha >= beta {
                    break;
                }
            }
        }
    }

    (best_score, best_move, pv)
}

/// Parallel move loop: a dynamic work index over the sorted list.
#[allow(clippy::too_many_arguments)]
fn split_moves(
    tt: &TranspositionTable,
    globals: &SearchGlobals,
    options: SearchOptions,
    board: &Board,
    history: &[u64],
    moves: &[Move],
    alpha: i32,
    beta: i32,
    pv_node: bool,
    depth: i32,
    ply: usize,
    threads: usize,
) -> (i32, Option<Move>, Vec<Move>) {
    let hash = board.hash();
    let shared = Mutex::new(SharedBest {
        best_score: -INFINITE,
        alpha,
        best_move: None,
        pv: Vec::new(),
    });
    let cutoff = AtomicBool::new(false);
    let next = AtomicUsize::new(0);

    std::thread::scope(|scope| {
        for _ in 0..threads.min(moves.len()) {
            scope.spawn(|| {
                let mut ctx = SearchContext::with_history(tt, globals, history);
                ctx.options = options;

                loop {
                    if cutoff.load(Ordering::Acquire) || globals.stop() {
                        break;
                    }
                    let index = next.fetch_add(1, Ordering::Relaxed);
                    if index >= moves.len() {
                        break;
                    }
                    let mv = moves[index];

                    // Snapshot the tightest alpha other threads produced.
                    let local_alpha = shared
                        .lock()
                        .expect("shared search state poisoned")
                        .alpha;
                    if local_alpha >= beta {
                        break;
                    }

                    let mut child = board.clone();
                    child.play_unchecked(mv);

                    ctx.keys.push(hash);
                    let (score, child_pv) = if index == 0 {
                        let r = search_node(&mut ctx, &child, -beta, -local_alpha, depth - 1, ply + 1);
                        (-r.score, r.pv)
                    } else {
                        let r = search_node(
                            &mut ctx,
                            &child,
                            -local_alpha - 1,
                            -local_alpha,
                            depth - 1,
                            ply + 1,
                        );
                        let scout = -r.score;
                        if scout > local_alpha && !globals.stop() {
                            // Re-search on a fresh clone of the child; the
                            // scout's position state is never reused.
                            let mut retry = board.clone();
                            retry.play_unchecked(mv);
                            let r = search_node(
                                &mut ctx,
                                &retry,
                                -beta,
                                -local_alpha,
                                depth - 1,
                                ply + 1,
                            );
                            (-r.score, r.pv)
                        } else {
                            (scout, r.pv)
                        }
                    };
                    ctx.keys.pop();

                    if globals.stop() {
                        break;
                    }

                    let mut best = shared.lock().expect("shared search state poisoned");
                    if score > best.best_score {
                        best.best_score = score;
                        best.best_move = Some(mv);
                        if best.best_score > best.alpha {
                            best.alpha = best.best_score;
                            if pv_node {
                                best.pv.clear();
                                best.pv.push(mv);
                                best.pv.extend(child_pv);
                            }
                            if best.alpha >= beta {
                                cutoff.store(true, Ordering::Release);
                            }
                        }
                    }
                }
            });
        }
    });

    let best = shared
        .into_inner()
        .expect("shared search state poisoned");
    (best.best_score, best.best_move, best.pv)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::tt::DEFAULT_HASH_MB;

    fn shared_search(board: &Board, depth: i32, threads: usize) -> SearchResult {
        let tt = TranspositionTable::new(DEFAULT_HASH_MB);
        let globals = SearchGlobals::new();
        search_subtree_shared(
            &tt,
            &globals,
            SearchOptions::default(),
            board,
            &[],
            -INFINITE,
            INFINITE,
            depth,
            0,
            threads,
        )
    }

    #[test]
    fn small_depth_falls_back_to_sequential() {
        let board = Board::default();
        let result = shared_search(&board, 2, 4);
        assert!(!result.pv.is_empty());
    }

    #[test]
    fn parallel_root_returns_legal_pv() {
        let board = Board::default();
        let result = shared_search(&board, 4, 4);
        let first = result.pv.first().expect("root search should build a PV");
        assert!(collect_legal_moves(&board).contains(first));
    }

    #[test]
    fn parallel_score_matches_sequential() {
        let board: Board = "r1bqkbnr/pppp1ppp/2n5/1B2p3/4P3/5N2/PPPP1PPP/RNBQK2R b KQkq - 3 3"
            .parse()
            .unwrap();

        let sequential = {
            let tt = TranspositionTable::new(DEFAULT_HASH_MB);
            let globals = SearchGlobals::new();
            let mut ctx = SearchContext::new(&tt, &globals);
            search_node(&mut ctx, &board, -INFINITE, INFINITE, 4, 0)
        };
        let parallel = shared_search(&board, 4, 4);

        assert_eq!(
            parallel.score, sequential.score,
            "shared-TT search must agree with the sequential score"
        );
    }

    #[test]
    fn stalemate_node_scores_zero() {
        let board: Board = "7k/5Q2/6K1/8/8/8/8/8 b - - 0 1".parse().unwrap();
        let result = shared_search(&board, 5, 4);
        assert_eq!(result.score, 0);
        assert!(result.pv.is_empty());
    }

    #[test]
    fn preset_stop_aborts_split() {
        let board = Board::default();
        let tt = TranspositionTable::new(1);
        let globals = SearchGlobals::new();
        globals.request_stop();
        let result = search_subtree_shared(
            &tt,
            &globals,
            SearchOptions::default(),
            &board,
            &[],
            -INFINITE,
            INFINITE,
            32,
            0,
            4,
        );
        // Threads bail before searching; the partial result is discarded by
        // the driver, it just has to come back promptly and well-formed.
        assert!(result.score.abs() <= INFINITE);
    }
}
