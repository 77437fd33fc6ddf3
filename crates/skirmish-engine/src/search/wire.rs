//! Length-prefixed frames for the master/worker channel.
//!
//! Dispatch (master -> worker, tag 0 in the original formulation):
//! `i32 fen_len` — `-1` terminate, `0` idle, otherwise the FEN byte count —
//! then the FEN bytes and an `i32 depth`.
//!
//! Reply (worker -> master, tag 1):
//! `i32 score`, `u64 nodes_delta`, `i32 pv_len`, then `pv_len` packed
//! 16-bit moves.
//!
//! All integers are little-endian. Each pipe pair delivers frames FIFO and
//! carries no unsolicited messages, so a blocking read always sees the
//! next frame boundary.

use std::io::{self, Read, Write};

/// `fen_len` sentinel: shut the worker down.
pub const TERMINATE: i32 = -1;

/// `fen_len` sentinel: no work this round, wait for the next frame.
pub const IDLE: i32 = 0;

/// A master-to-worker frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    Terminate,
    Idle,
    Work { fen: String, depth: i32 },
}

/// A worker-to-master frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Score from the worker's side-to-move perspective.
    pub score: i32,
    /// Nodes the worker spent on this item.
    pub nodes: u64,
    /// Principal variation below the dispatched position, packed.
    pub pv: Vec<u16>,
}

fn read_i32<R: Read>(reader: &mut R) -> io::Result<i32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(i32::from_le_bytes(buf))
}

fn read_u64<R: Read>(reader: &mut R) -> io::Result<u64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

fn read_u16<R: Read>(reader: &mut R) -> io::Result<u16> {
    let mut buf = [0u8; 2];
    reader.read_exact(&mut buf)?;
    Ok(u16::from_le_bytes(buf))
}

/// Write one dispatch frame and flush it.
pub fn write_dispatch<W: Write>(writer: &mut W, dispatch: &Dispatch) -> io::Result<()> {
    match dispatch {
        Dispatch::Terminate => writer.write_all(&TERMINATE.to_le_bytes())?,
        Dispatch::Idle => writer.write_all(&IDLE.to_le_bytes())?,
        Dispatch::Work { fen, depth } => {
            writer.write_all(&(fen.len() as i32).to_le_bytes())?;
            writer.write_all(fen.as_bytes())?;
            writer.write_all(&depth.to_le_bytes())?;
        }
    }
    writer.flush()
}

/// Block until one dispatch frame arrives.
pub fn read_dispatch<R: Read>(reader: &mut R) -> io::Result<Dispatch> {
    let fen_len = read_i32(reader)?;
    if fen_len == TERMINATE {
        return Ok(Dispatch::Terminate);
    }
    if fen_len == IDLE {
        return Ok(Dispatch::Idle);
    }
    if fen_len < 0 || fen_len > 256 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("implausible FEN length {fen_len}"),
        ));
    }

    let mut fen_bytes = vec![0u8; fen_len as usize];
    reader.read_exact(&mut fen_bytes)?;
    let fen = String::from_utf8(fen_bytes)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let depth = read_i32(reader)?;

    Ok(Dispatch::Work { fen, depth })
}

/// Write one reply frame and flush it.
pub fn write_reply<W: Write>(writer: &mut W, reply: &Reply) -> io::Result<()> {
    writer.write_all(&reply.score.to_le_bytes())?;
    writer.write_all(&reply.nodes.to_le_bytes())?;
    writer.write_all(&(reply.pv.len() as i32).to_le_bytes())?;
    for &mv in &reply.pv {
        writer.write_all(&mv.to_le_bytes())?;
    }
    writer.flush()
}

/// Block until one reply frame arrives.
pub fn read_reply<R: Read>(reader: &mut R) -> io::Result<Reply> {
    let score = read_i32(reader)?;
    let nodes = read_u64(reader)?;
    let pv_len = read_i32(reader)?;
    if !(0..=crate::search::stack::MAX_PLY as i32).contains(&pv_len) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("implausible PV length {pv_len}"),
        ));
    }

    let mut pv = Vec::with_capacity(pv_len as usize);
    for _ in 0..pv_len {
        pv.push(read_u16(reader)?);
    }

    Ok(Reply { score, nodes, pv })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn roundtrip_dispatch(d: Dispatch) -> Dispatch {
        let mut buf = Vec::new();
        write_dispatch(&mut buf, &d).unwrap();
        read_dispatch(&mut Cursor::new(buf)).unwrap()
    }

    #[test]
    fn work_frame_roundtrip() {
        let d = Dispatch::Work {
            fen: "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1".into(),
            depth: 6,
        };
        assert_eq!(roundtrip_dispatch(d.clone()), d);
    }

    #[test]
    fn control_frames_roundtrip() {
        assert_eq!(roundtrip_dispatch(Dispatch::Terminate), Dispatch::Terminate);
        assert_eq!(roundtrip_dispatch(Dispatch::Idle), Dispatch::Idle);
    }

    #[test]
    fn reply_roundtrip() {
        let r = Reply {
            score: -137,
            nodes: 8_912_345,
            pv: vec![0x0123, 0x4567, 0x1FFF],
        };
        let mut buf = Vec::new();
        write_reply(&mut buf, &r).unwrap();
        assert_eq!(read_reply(&mut Cursor::new(buf)).unwrap(), r);
    }

    #[test]
    fn empty_pv_reply_roundtrip() {
        let r = Reply {
            score: 0,
            nodes: 0,
            pv: Vec::new(),
        };
        let mut buf = Vec::new();
        write_reply(&mut buf, &r).unwrap();
        assert_eq!(read_reply(&mut Cursor::new(buf)).unwrap(), r);
    }

    #[test]
    fn garbage_length_is_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&i32::MAX.to_le_bytes());
        assert!(read_dispatch(&mut Cursor::new(buf)).is_err());
    }

    #[test]
    fn truncated_frame_is_an_error() {
        let d = Dispatch::Work {
            fen: "8/8/8/8/8/8/8/8 w - - 0 1".into(),
            depth: 4,
        };
        let mut buf = Vec::new();
        write_dispatch(&mut buf, &d).unwrap();
        buf.truncate(buf.len() - 2);
        assert!(read_dispatch(&mut Cursor::new(buf)).is_err());
    }
}
