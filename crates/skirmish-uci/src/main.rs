use std::io;

use anyhow::Result;
use tracing::info;

use skirmish_engine::{WorkerKind, worker_loop};
use skirmish_uci::UciEngine;

fn main() -> Result<()> {
    // Protocol output owns stdout; logs go to stderr.
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();

    // Worker mode: this process was spawned by a master and speaks the
    // wire protocol on stdin/stdout instead of UCI.
    if args.first().map(String::as_str) == Some("worker") {
        worker_loop(io::stdin().lock(), io::stdout().lock(), WorkerKind::Sequential)?;
        return Ok(());
    }

    let cluster_workers = parse_cluster_flag(&args);
    info!(cluster_workers, "skirmish starting");

    UciEngine::new(cluster_workers).run()?;
    Ok(())
}

/// `--cluster N` selects the root-splitting master/worker search with N
/// worker processes.
fn parse_cluster_flag(args: &[String]) -> usize {
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg == "--cluster"
            && let Some(n) = iter.next().and_then(|v| v.parse().ok())
        {
            return n;
        }
    }
    0
}
