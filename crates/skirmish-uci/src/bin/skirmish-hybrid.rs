//! Hybrid cluster benchmark: root splitting across worker processes, with
//! the shared-TT multithreaded searcher inside every process.

use std::io;
use std::time::Instant;

use anyhow::{Result, anyhow};
use clap::Parser;
use cozy_chess::Board;
use tracing::debug;

use skirmish_engine::{
    DEFAULT_HASH_MB, Hybrid, PoolSpec, SearchGlobals, WorkerKind, best_move_search,
    hybrid_thread_count, uci_score, worker_loop,
};
use skirmish_uci::moves::{move_to_uci, pv_to_uci};

const TEST_POSITIONS: [&str; 4] = [
    // Starting position.
    "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1",
    // Complex middlegame.
    "r3k2r/Pppp1ppp/1b3nbN/nP6/BBP1P3/q4N2/Pp1P2PP/R2Q1RK1 w kq - 0 1",
    // Rook endgame.
    "8/2p5/3p4/KP5r/1R3p1k/8/4P1P1/8 w - - 0 1",
    // After 1.e4 Nf6.
    "rnbqkb1r/pppppppp/5n2/8/4P3/8/PPPP1PPP/RNBQKBNR w KQkq - 1 2",
];

#[derive(Parser)]
#[command(name = "skirmish-hybrid", about = "Hybrid cluster search benchmark")]
struct Args {
    /// Built-in test position index (0-3).
    #[arg(default_value_t = 0)]
    position: usize,

    /// Search depth.
    #[arg(default_value_t = 6)]
    depth: i32,

    /// Worker process count.
    #[arg(long, default_value_t = 2)]
    workers: usize,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt().with_writer(io::stderr).init();

    // Worker mode is dispatched before flag parsing: masters re-invoke
    // this binary as `skirmish-hybrid worker`.
    if std::env::args().nth(1).as_deref() == Some("worker") {
        let threads = hybrid_thread_count();
        debug!(threads, "hybrid worker starting");
        worker_loop(
            io::stdin().lock(),
            io::stdout().lock(),
            WorkerKind::SharedTt { threads },
        )?;
        return Ok(());
    }

    let args = Args::parse();
    let threads = hybrid_thread_count();

    let index = args.position.min(TEST_POSITIONS.len() - 1);
    let fen = TEST_POSITIONS[index];
    let board =
        Board::from_fen(fen, false).map_err(|e| anyhow!("test position {index}: {e:?}"))?;

    println!("Hybrid cluster chess search");
    println!("Worker processes: {}", args.workers);
    println!("Threads per process: {threads}");
    println!("Position {index}: {fen}");
    println!("----------------------------------------");

    let spec = PoolSpec::Processes {
        count: args.workers,
        args: vec!["worker".to_string()],
    };
    let mut strategy = Hybrid::new(spec, DEFAULT_HASH_MB, threads);
    let globals = SearchGlobals::new();

    let start = Instant::now();
    let best = best_move_search(
        &board,
        &[],
        &globals,
        args.depth.max(1),
        &mut strategy,
        |depth, score, nodes, pv| {
            println!(
                "info depth {depth} score {} nodes {nodes} pv {}",
                uci_score(score),
                pv_to_uci(&board, pv),
            );
        },
    );
    let elapsed = start.elapsed();

    println!("----------------------------------------");
    match best {
        Some(mv) => println!("Best move: {}", move_to_uci(&board, mv)),
        None => println!("No best move found"),
    }
    println!("Total search time: {} ms", elapsed.as_millis());
    println!("Total nodes searched: {}", globals.nodes());
    if !elapsed.is_zero() {
        let nps = globals.nodes() as u128 * 1000 / elapsed.as_millis().max(1);
        println!("Nodes per second: {nps}");
    }

    Ok(())
}
