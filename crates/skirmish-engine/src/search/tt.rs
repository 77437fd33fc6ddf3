//! Lock-free transposition table with depth-preferring replacement.
//!
//! Each slot is two atomic words: `key ^ data` and `data`. Readers verify
//! `key ^ data == hash` before trusting anything, so a torn read — one word
//! from an old write, one from a new — fails the check and reads as a miss.
//! Correctness never depends on two threads seeing a coherent slot.

use std::sync::atomic::{AtomicU64, Ordering};

use cozy_chess::Move;

use crate::search::encode::{decode_move, encode_move};
use crate::search::negamax::MAX_MATE_SCORE;

/// Default table size in megabytes.
pub const DEFAULT_HASH_MB: usize = 16;

/// Bound type stored in a TT entry. 0 is reserved for empty slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Bound {
    /// The stored score is exact (searched with an open window).
    Exact = 1,
    /// A beta cutoff occurred; the true score is >= the stored one.
    Lower = 2,
    /// No move raised alpha; the true score is <= the stored one.
    Upper = 3,
}

/// Decoded result of a successful probe.
///
/// The score has already been adjusted from table-relative back to
/// root-relative for the probing ply.
#[derive(Debug, Clone, Copy)]
pub struct TtHit {
    pub best_move: Option<Move>,
    pub depth: i32,
    pub score: i32,
    pub bound: Bound,
}

/// Convert a search score to table-storable form.
///
/// Mate scores are path-dependent: `MATE_SCORE - ply` changes with the
/// search path. They are stored as distance-from-this-node so the entry
/// stays valid when the position is reached along a different path.
pub fn score_to_tt(score: i32, ply: usize) -> i32 {
    if score >= MAX_MATE_SCORE {
        score + ply as i32
    } else if score <= -MAX_MATE_SCORE {
        score - ply as i32
    } else {
        score
    }
}

/// Reverse the adjustment applied by [`score_to_tt`].
pub fn score_from_tt(score: i32, ply: usize) -> i32 {
    if score >= MAX_MATE_SCORE {
        score - ply as i32
    } else if score <= -MAX_MATE_SCORE {
        score + ply as i32
    } else {
        score
    }
}

/// One slot: `key` holds `hash ^ data`, `data` the packed payload.
///
/// Payload layout: move16 | depth(8) << 16 | bound(2) << 24 | score(32) << 32.
struct TtSlot {
    key: AtomicU64,
    data: AtomicU64,
}

fn pack(best_move: Option<Move>, depth: i32, bound: Bound, score: i32) -> u64 {
    let mv = best_move.map_or(0, encode_move) as u64;
    let depth = (depth.clamp(0, u8::MAX as i32) as u64) << 16;
    let bound = (bound as u64) << 24;
    let score = ((score as u32) as u64) << 32;
    mv | depth | bound | score
}

/// Fixed-size direct-mapped transposition table.
///
/// Shared by reference across search threads; all access is through `&self`.
pub struct TranspositionTable {
    slots: Box<[TtSlot]>,
    mask: u64,
}

impl TranspositionTable {
    /// Create a table of the given size in megabytes, rounded down to a
    /// power of two entries.
    pub fn new(mb: usize) -> Self {
        let budget = (mb.max(1) * 1024 * 1024) / std::mem::size_of::<TtSlot>();
        let mut len = 1usize;
        while len * 2 <= budget {
            len *= 2;
        }

        let slots = (0..len)
            .map(|_| TtSlot {
                key: AtomicU64::new(0),
                data: AtomicU64::new(0),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            slots,
            mask: (len - 1) as u64,
        }
    }

    /// Number of slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Zero every slot.
    pub fn clear(&self) {
        for slot in &self.slots {
            slot.key.store(0, Ordering::Relaxed);
            slot.data.store(0, Ordering::Relaxed);
        }
    }

    /// Probe the slot for `hash`.
    ///
    /// Returns data only when the stored key verifies against the queried
    /// hash. Depth and bound gating is the caller's business: even a
    /// too-shallow entry still supplies a best move for ordering.
    pub fn probe(&self, hash: u64, ply: usize) -> Option<TtHit> {
        let slot = &self.slots[(hash & self.mask) as usize];
        let data = slot.data.load(Ordering::Relaxed);
        let key = slot.key.load(Ordering::Relaxed);

        if data == 0 || key ^ data != hash {
            return None;
        }

        let bound = match (data >> 24) & 0x3 {
            1 => Bound::Exact,
            2 => Bound::Lower,
            3 => Bound::Upper,
            _ => return None,
        };

        Some(TtHit {
            best_move: decode_move((data & 0xFFFF) as u16),
            depth: ((data >> 16) & 0xFF) as i32,
            score: score_from_tt((data >> 32) as u32 as i32, ply),
            bound,
        })
    }

    /// Store an entry for `hash`.
    ///
    /// Replacement is depth-preferring: overwrite when the slot holds a
    /// different position, or when the stored depth does not exceed the
    /// incoming one (ties go to the newer entry).
    pub fn store(
        &self,
        hash: u64,
        depth: i32,
        score: i32,
        best_move: Option<Move>,
        bound: Bound,
        ply: usize,
    ) {
        let slot = &self.slots[(hash & self.mask) as usize];
        let old_data = slot.data.load(Ordering::Relaxed);
        let old_key = slot.key.load(Ordering::Relaxed);

        if old_data != 0 && old_key ^ old_data == hash {
            let old_depth = ((old_data >> 16) & 0xFF) as i32;
            if old_depth > depth {
                return;
            }
        }

        let data = pack(best_move, depth, bound, score_to_tt(score, ply));
        slot.key.store(hash ^ data, Ordering::Relaxed);
        slot.data.store(data, Ordering::Relaxed);
    }
}

impl std::fmt::Debug for TranspositionTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TranspositionTable")
            .field("slots", &self.slots.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::negamax::MATE_SCORE;

    fn mv(text: &str) -> Move {
        text.parse().unwrap()
    }

    #[test]
    fn store_and_probe_roundtrip() {
        let tt = TranspositionTable::new(1);
        let hash: u64 = 0xDEAD_BEEF_1234_5678;

        tt.store(hash, 5, 100, Some(mv("e2e4")), Bound::Exact, 0);

        let hit = tt.probe(hash, 0).expect("should find stored entry");
        assert_eq!(hit.best_move, Some(mv("e2e4")));
        assert_eq!(hit.depth, 5);
        assert_eq!(hit.bound, Bound::Exact);
        assert_eq!(hit.score, 100);
    }

    #[test]
    fn probe_miss_returns_none() {
        let tt = TranspositionTable::new(1);
        assert!(tt.probe(0x1234_5678_9ABC_DEF0, 0).is_none());
    }

    #[test]
    fn colliding_hash_fails_key_check() {
        let tt = TranspositionTable::new(1);
        let hash: u64 = 0xAAAA_0000_0000_0001;
        tt.store(hash, 4, 50, Some(mv("d2d4")), Bound::Exact, 0);

        // Same slot index (identical low bits), different upper bits.
        let other = hash ^ 0x5555_0000_0000_0000;
        assert_eq!(other & tt.mask, hash & tt.mask);
        assert!(tt.probe(other, 0).is_none());
    }

    #[test]
    fn mate_score_adjustment_roundtrip() {
        // Mate found 3 plies below a node at ply 5.
        let score = MATE_SCORE - 8;
        let stored = score_to_tt(score, 5);
        assert_eq!(score_from_tt(stored, 5), score);

        let mated = -(MATE_SCORE - 8);
        let stored = score_to_tt(mated, 5);
        assert_eq!(score_from_tt(stored, 5), mated);
    }

    #[test]
    fn normal_score_not_adjusted() {
        assert_eq!(score_to_tt(150, 10), 150);
        assert_eq!(score_from_tt(-37, 10), -37);
    }

    #[test]
    fn deeper_entry_survives_shallow_store() {
        let tt = TranspositionTable::new(1);
        let hash: u64 = 0x1111_2222_3333_4444;

        tt.store(hash, 5, 100, Some(mv("e2e4")), Bound::Lower, 0);
        tt.store(hash, 3, 200, Some(mv("d2d4")), Bound::Lower, 0);

        let hit = tt.probe(hash, 0).unwrap();
        assert_eq!(hit.best_move, Some(mv("e2e4")), "shallower store must lose");
        assert_eq!(hit.score, 100);
    }

    #[test]
    fn equal_depth_prefers_newer_entry() {
        let tt = TranspositionTable::new(1);
        let hash: u64 = 0x9999_8888_7777_6666;

        tt.store(hash, 4, 100, Some(mv("e2e4")), Bound::Exact, 0);
        tt.store(hash, 4, 250, Some(mv("g1f3")), Bound::Exact, 0);

        let hit = tt.probe(hash, 0).unwrap();
        assert_eq!(hit.best_move, Some(mv("g1f3")));
        assert_eq!(hit.score, 250);
    }

    #[test]
    fn different_position_always_replaces() {
        let tt = TranspositionTable::new(1);
        let a: u64 = 0xAAAA_0000_0000_0002;
        let b = a ^ 0x0123_0000_0000_0000; // same slot, different key

        tt.store(a, 10, 100, Some(mv("e2e4")), Bound::Exact, 0);
        tt.store(b, 1, -40, Some(mv("d2d4")), Bound::Upper, 0);

        assert!(tt.probe(a, 0).is_none(), "old position must be evicted");
        let hit = tt.probe(b, 0).unwrap();
        assert_eq!(hit.score, -40);
    }

    #[test]
    fn clear_removes_all_entries() {
        let tt = TranspositionTable::new(1);
        let hash: u64 = 0xAAAA_BBBB_CCCC_DDDD;
        tt.store(hash, 5, 100, Some(mv("e2e4")), Bound::Exact, 0);
        assert!(tt.probe(hash, 0).is_some());

        tt.clear();
        assert!(tt.probe(hash, 0).is_none());
    }

    #[test]
    fn torn_slot_reads_as_miss() {
        let tt = TranspositionTable::new(1);
        let hash: u64 = 0xFEED_FACE_0123_4567;
        tt.store(hash, 6, 77, Some(mv("e2e4")), Bound::Exact, 0);

        // Simulate a torn write: data word updated, key word stale.
        let idx = (hash & tt.mask) as usize;
        let data = tt.slots[idx].data.load(Ordering::Relaxed);
        tt.slots[idx].data.store(data ^ 0xFF00, Ordering::Relaxed);

        assert!(tt.probe(hash, 0).is_none(), "torn entry must fail key check");
    }

    #[test]
    fn sizes_round_down_to_power_of_two() {
        let tt = TranspositionTable::new(3);
        assert!(tt.len().is_power_of_two());
        assert!(tt.len() * std::mem::size_of::<TtSlot>() <= 3 * 1024 * 1024);
    }
}
