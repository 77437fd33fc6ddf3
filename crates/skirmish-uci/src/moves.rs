//! UCI move text conversion.
//!
//! The board library encodes castling as king-takes-own-rook (e1h1 for
//! white short castling). UCI speaks king-two-squares (e1g1), so both
//! directions of the conversion need the board the move is played from.

use cozy_chess::{Board, File, Move, Piece, Square};

use skirmish_engine::collect_legal_moves;

/// Render a move as UCI text from the position it is played in.
pub fn move_to_uci(board: &Board, mv: Move) -> String {
    let mut to = mv.to;
    if board.piece_on(mv.from) == Some(Piece::King)
        && board.color_on(mv.to) == Some(board.side_to_move())
    {
        // Castling: the engine move targets the rook square.
        let file = if mv.to.file() > mv.from.file() {
            File::G
        } else {
            File::C
        };
        to = Square::new(file, mv.from.rank());
    }

    let mut text = format!("{}{}", mv.from, to);
    if let Some(piece) = mv.promotion {
        text.push(match piece {
            Piece::Knight => 'n',
            Piece::Bishop => 'b',
            Piece::Rook => 'r',
            _ => 'q',
        });
    }
    text
}

/// Parse UCI move text into the legal move it denotes, if any.
pub fn move_from_uci(board: &Board, text: &str) -> Option<Move> {
    let parsed: Move = text.parse().ok()?;
    let legal = collect_legal_moves(board);

    if legal.contains(&parsed) {
        return Some(parsed);
    }

    // e1g1/e1c1 castling text maps onto the king-takes-rook encoding.
    if board.piece_on(parsed.from) == Some(Piece::King) && parsed.promotion.is_none() {
        let rook_file = match parsed.to.file() {
            File::G => File::H,
            File::C => File::A,
            _ => return None,
        };
        let castle = Move {
            from: parsed.from,
            to: Square::new(rook_file, parsed.from.rank()),
            promotion: None,
        };
        if legal.contains(&castle) {
            return Some(castle);
        }
    }

    None
}

/// Render a PV as space-separated UCI text, walking the line so castling
/// converts correctly at every step. Stops at the first move that does not
/// apply (a truncated line from a parallel race is printable up to there).
pub fn pv_to_uci(board: &Board, pv: &[Move]) -> String {
    let mut cursor = board.clone();
    let mut parts = Vec::with_capacity(pv.len());

    for &mv in pv {
        let text = move_to_uci(&cursor, mv);
        if cursor.try_play(mv).is_err() {
            break;
        }
        parts.push(text);
    }

    parts.join(" ")
}
