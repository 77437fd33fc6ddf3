//! Sequential negamax alpha-beta search with quiescence extension.

use cozy_chess::Board;

use crate::eval::evaluate;
use crate::search::SearchResult;
use crate::search::globals::SearchGlobals;
use crate::search::ordering::{
    collect_legal_moves, collect_noisy_moves, is_capture, sort_moves,
};
use crate::search::stack::{KeyHistory, MAX_PLY, SearchStack};
use crate::search::tt::{Bound, TranspositionTable};

/// Score representing an unreachable upper/lower bound.
pub const INFINITE: i32 = 30_000;

/// Base score for checkmate; a mate found at ply `p` scores `MATE_SCORE - p`.
pub const MATE_SCORE: i32 = 29_000;

/// Scores at or beyond this magnitude indicate a forced mate.
pub const MAX_MATE_SCORE: i32 = 28_000;

/// Optional pruning extensions.
///
/// Both default off: they change which lines are searched, so the
/// equivalence properties the test suite leans on only hold without them.
#[derive(Debug, Clone, Copy, Default)]
pub struct SearchOptions {
    /// Null-move pruning (reduction 3) at non-PV nodes out of check.
    pub null_move: bool,
    /// Late move reductions for quiet late moves at depth > 2.
    pub late_move_reductions: bool,
}

/// Everything a single search thread carries besides the position itself.
///
/// The transposition table and globals are shared; the stack and key
/// history are private to the thread.
pub struct SearchContext<'a> {
    pub tt: &'a TranspositionTable,
    pub globals: &'a SearchGlobals,
    pub stack: SearchStack,
    pub keys: KeyHistory,
    pub options: SearchOptions,
}

impl<'a> SearchContext<'a> {
    pub fn new(tt: &'a TranspositionTable, globals: &'a SearchGlobals) -> Self {
        Self::with_history(tt, globals, &[])
    }

    /// Build a context seeded with the game-prefix hashes for repetition
    /// detection.
    pub fn with_history(
        tt: &'a TranspositionTable,
        globals: &'a SearchGlobals,
        history: &[u64],
    ) -> Self {
        Self {
            tt,
            globals,
            stack: SearchStack::new(),
            keys: KeyHistory::from_keys(history),
            options: SearchOptions::default(),
        }
    }
}

/// Full-width negamax search of `board` at `depth` remaining plies.
///
/// `ply` is the distance from the search root; the root itself searches
/// with `ply == 0` and is exempt from the draw/stop early-outs so it always
/// produces a move. Returns a sentinel `{0, empty}` once the stop flag is
/// observed; callers discard such results.
pub fn search_node(
    ctx: &mut SearchContext,
    board: &Board,
    mut alpha: i32,
    mut beta: i32,
    depth: i32,
    ply: usize,
) -> SearchResult {
    if depth <= 0 {
        return SearchResult {
            score: qsearch_node(ctx, board, alpha, beta, ply),
            pv: Vec::new(),
        };
    }

    if ply > 0 {
        if ctx.globals.stop() {
            return SearchResult::sentinel();
        }

        if board.halfmove_clock() >= 100
            || ctx.keys.is_repeat(board.hash(), board.halfmove_clock())
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

        // Mate-distance pruning: no mate from here can beat one already
        // found closer to the root.
        let frame_ply = ctx.stack.frame(ply).ply;
        alpha = alpha.max(-MATE_SCORE + frame_ply);
        beta = beta.min(MATE_SCORE - frame_ply);
        if alpha >= beta {
            return SearchResult {
                score: alpha,
                pv: Vec::new(),
            };
        }
    }

    // In bounds here: the ply ceiling returned above for every deep node.
    let frame_ply = ctx.stack.frame(ply).ply;

    let pv_node = alpha != beta - 1;
    let hash = board.hash();

    let mut tt_move = None;
    if let Some(hit) = ctx.tt.probe(hash, ply) {
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

    ctx.globals.increment_nodes();

    let in_check = !board.checkers().is_empty();
    let mut moves = collect_legal_moves(board);
    if moves.is_empty() {
        return SearchResult {
            score: if in_check { -MATE_SCORE + frame_ply } else { 0 },
            pv: Vec::new(),
        };
    }

    if ctx.options.null_move
        && !pv_node
        && !in_check
        && depth >= 3
        && frame_ply > 0
        && evaluate(board) >= beta
        && let Some(null_board) = board.null_move()
    {
        let reduction = 3;
        let null_score = -search_node(
            ctx,
            &null_board,
            -beta,
            -beta + 1,
            depth - reduction - 1,
            ply + 1,
        )
        .score;
        if null_score >= beta {
            return SearchResult {
                score: beta,
                pv: Vec::new(),
            };
        }
    }

    sort_moves(board, &mut moves, tt_move);

    let original_alpha = alpha;
    let mut best_score = -INFINITE;
    let mut best_move = None;
    let mut pv = Vec::new();

    for (move_num, &mv) in moves.iter().enumerate() {
        let capture = is_capture(board, mv);
        let mut child = board.clone();
        child.play_unchecked(mv);

        let mut new_depth = depth - 1;
        if ctx.options.late_move_reductions
            && move_num >= 3
            && depth > 2
            && child.checkers().is_empty()
            && !capture
            && mv.promotion.is_none()
        {
            new_depth = (depth - 2).max(1);
        }

        ctx.keys.push(hash);
        let mut result = if move_num == 0 {
            search_node(ctx, &child, -beta, -alpha, new_depth, ply + 1)
        } else {
            search_node(ctx, &child, -alpha - 1, -alpha, new_depth, ply + 1)
        };
        let mut score = -result.score;

        if move_num > 0 && score > alpha {
            if new_depth < depth - 1 {
                // Reduced scout beat alpha; redo the scout at full depth.
                result = search_node(ctx, &child, -alpha - 1, -alpha, depth - 1, ply + 1);
                score = -result.score;
            }
            if score > alpha {
                result = search_node(ctx, &child, -beta, -alpha, depth - 1, ply + 1);
                score = -result.score;
            }
        }
        ctx.keys.pop();

        if frame_ply > 0 && ctx.globals.stop() {
            return SearchResult::sentinel();
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

    let bound = if best_score >= beta {
        Bound::Lower
    } else if best_score <= original_alpha {
        Bound::Upper
    } else {
        Bound::Exact
    };
    ctx.tt.store(hash, depth, best_score, best_move, bound, ply);

    SearchResult {
        score: best_score,
        pv,
    }
}

/// Quiescence search: captures, promotions, and check evasions only.
///
/// Fail-hard on the stand-pat beta cutoff; returns `alpha` otherwise.
pub fn qsearch_node(
    ctx: &mut SearchContext,
    board: &Board,
    mut alpha: i32,
    beta: i32,
    ply: usize,
) -> i32 {
    if ctx.globals.stop() {
        return 0;
    }

    ctx.globals.increment_nodes();

    if ply >= MAX_PLY {
        return evaluate(board);
    }

    let frame_ply = ctx.stack.frame(ply).ply;

    let eval = evaluate(board);
    if eval > alpha {
        alpha = eval;
    }
    if eval >= beta {
        return beta;
    }

    let mut moves = if board.checkers().is_empty() {
        collect_noisy_moves(board)
    } else {
        // In check every legal move is an evasion; an empty list is mate.
        let evasions = collect_legal_moves(board);
        if evasions.is_empty() {
            return -MATE_SCORE + frame_ply;
        }
        evasions
    };

    sort_moves(board, &mut moves, None);

    let mut best_score = -INFINITE;
    for &mv in &moves {
        let mut child = board.clone();
        child.play_unchecked(mv);

        let score = -qsearch_node(ctx, &child, -beta, -alpha, ply + 1);

        if ctx.globals.stop() {
            return 0;
        }

        if score > best_score {
            best_score = score;
            if best_score > alpha {
                alpha = best_score;
                if alpha >= beta {
                    break;
                }
            }
        }
    }

    alpha
}
