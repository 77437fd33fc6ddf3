//! Per-search session state shared across every search frame and thread.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use cozy_chess::Color;

/// Process-wide search session state.
///
/// One `SearchGlobals` lives for the duration of a `go` command. The stop
/// flag and node counter are shared by every search thread and, through the
/// master's aggregation, by worker processes. The stop flag is owned by the
/// caller: [`reset`](Self::reset) deliberately does not clear it, so a flag
/// raised before the search begins is honored (the UCI layer installs a
/// fresh flag per `go`).
pub struct SearchGlobals {
    stopped: Arc<AtomicBool>,
    nodes: AtomicU64,
    start: Mutex<Instant>,
    side_to_move: Mutex<Color>,
    depth_limit: AtomicI32,
}

impl SearchGlobals {
    /// Create session state with its own private stop flag.
    pub fn new() -> Self {
        Self::with_stop_flag(Arc::new(AtomicBool::new(false)))
    }

    /// Create session state sharing an externally owned stop flag.
    pub fn with_stop_flag(stopped: Arc<AtomicBool>) -> Self {
        Self {
            stopped,
            nodes: AtomicU64::new(0),
            start: Mutex::new(Instant::now()),
            side_to_move: Mutex::new(Color::White),
            depth_limit: AtomicI32::new(0),
        }
    }

    /// Begin a new search: zero the node counter, stamp the start time,
    /// record the side to move and the depth budget.
    ///
    /// The stop flag is left untouched — see the type-level docs.
    pub fn reset(&self, side_to_move: Color, depth_limit: i32) {
        self.nodes.store(0, Ordering::Relaxed);
        *self.start.lock().expect("start mutex poisoned") = Instant::now();
        *self.side_to_move.lock().expect("side mutex poisoned") = side_to_move;
        self.depth_limit.store(depth_limit, Ordering::Relaxed);
    }

    /// Whether the search has been asked to stop.
    pub fn stop(&self) -> bool {
        self.stopped.load(Ordering::Relaxed)
    }

    /// Ask the search to stop. Sticky for the rest of the session.
    pub fn request_stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    /// Reference to the shared stop flag.
    pub fn stop_flag(&self) -> &Arc<AtomicBool> {
        &self.stopped
    }

    /// Count one visited node.
    pub fn increment_nodes(&self) {
        self.nodes.fetch_add(1, Ordering::Relaxed);
    }

    /// Fold a worker's node delta into the session total in one update.
    pub fn add_nodes(&self, delta: u64) {
        self.nodes.fetch_add(delta, Ordering::Relaxed);
    }

    /// Total nodes visited so far.
    pub fn nodes(&self) -> u64 {
        self.nodes.load(Ordering::Relaxed)
    }

    /// Milliseconds since [`reset`](Self::reset).
    pub fn elapsed_ms(&self) -> u64 {
        self.start
            .lock()
            .expect("start mutex poisoned")
            .elapsed()
            .as_millis() as u64
    }

    /// Side to move at the root of the current search.
    pub fn side_to_move(&self) -> Color {
        *self.side_to_move.lock().expect("side mutex poisoned")
    }

    /// Depth budget recorded at [`reset`](Self::reset).
    pub fn depth_limit(&self) -> i32 {
        self.depth_limit.load(Ordering::Relaxed)
    }
}

impl Default for SearchGlobals {
    fn default() -> Self {
        Self::new()
    }
}
