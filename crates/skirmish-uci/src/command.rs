//! UCI command parsing.

use std::time::Duration;

use cozy_chess::Board;

use crate::error::UciError;
use crate::moves::move_from_uci;

/// Parameters for the `go` command.
///
/// All fields are optional; a bare `go` searches to the ply ceiling until
/// stopped.
#[derive(Debug, Clone, Default)]
pub struct GoParams {
    /// White's remaining time.
    pub wtime: Option<Duration>,
    /// Black's remaining time.
    pub btime: Option<Duration>,
    /// White's increment per move.
    pub winc: Option<Duration>,
    /// Black's increment per move.
    pub binc: Option<Duration>,
    /// Moves until the next time control.
    pub movestogo: Option<u32>,
    /// Search to this depth only.
    pub depth: Option<i32>,
    /// Search for exactly this duration.
    pub movetime: Option<Duration>,
    /// Search until `stop` (no time limit).
    pub infinite: bool,
}

/// A parsed UCI command.
#[derive(Debug)]
pub enum Command {
    /// `uci` — identify the engine.
    Uci,
    /// `isready` — synchronization ping.
    IsReady,
    /// `ucinewgame` — reset engine state.
    UciNewGame,
    /// `position` — board plus the hashes of every position before it
    /// (the repetition history the search needs).
    Position { board: Board, history: Vec<u64> },
    /// `go` — start searching.
    Go(GoParams),
    /// `setoption name <name> value <value>`.
    SetOption { name: String, value: String },
    /// `stop` — halt the current search.
    Stop,
    /// `quit` — exit the engine.
    Quit,
    /// Unrecognized command (silently ignored per UCI custom).
    Unknown(String),
}

/// Parse a single line of UCI input into a [`Command`].
pub fn parse_command(line: &str) -> Result<Command, UciError> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.is_empty() {
        return Ok(Command::Unknown(String::new()));
    }

    match tokens[0] {
        "uci" => Ok(Command::Uci),
        "isready" => Ok(Command::IsReady),
        "ucinewgame" => Ok(Command::UciNewGame),
        "stop" => Ok(Command::Stop),
        "quit" => Ok(Command::Quit),
        "position" => parse_position(&tokens[1..]),
        "go" => parse_go(&tokens[1..]),
        "setoption" => parse_setoption(&tokens[1..]),
        _ => Ok(Command::Unknown(tokens[0].to_string())),
    }
}

/// Parse the `position` command arguments.
///
/// Supports:
/// - `position startpos [moves e2e4 d7d5 ...]`
/// - `position fen <fen-string> [moves e2e4 d7d5 ...]`
fn parse_position(tokens: &[&str]) -> Result<Command, UciError> {
    if tokens.is_empty() {
        return Err(UciError::MalformedPosition);
    }

    let (mut board, rest) = if tokens[0] == "startpos" {
        (Board::default(), &tokens[1..])
    } else if tokens[0] == "fen" {
        // FEN is 6 space-separated fields.
        if tokens.len() < 7 {
            return Err(UciError::InvalidFen {
                fen: tokens[1..].join(" "),
            });
        }
        let fen = tokens[1..7].join(" ");
        let board = Board::from_fen(&fen, false).map_err(|_| UciError::InvalidFen {
            fen: fen.clone(),
        })?;
        (board, &tokens[7..])
    } else {
        return Err(UciError::MalformedPosition);
    };

    // Apply moves if present, recording each predecessor's hash so the
    // search can recognize repetitions of earlier game positions.
    let mut history = Vec::new();
    if !rest.is_empty() && rest[0] == "moves" {
        for uci_str in &rest[1..] {
            let mv = move_from_uci(&board, uci_str).ok_or_else(|| UciError::InvalidMove {
                uci_move: uci_str.to_string(),
            })?;
            history.push(board.hash());
            board.play(mv);
        }
    }

    Ok(Command::Position { board, history })
}

fn parse_go(tokens: &[&str]) -> Result<Command, UciError> {
    let mut params = GoParams::default();
    let mut iter = tokens.iter();

    while let Some(&token) = iter.next() {
        match token {
            "infinite" => params.infinite = true,
            "wtime" => params.wtime = Some(parse_millis(token, iter.next())?),
            "btime" => params.btime = Some(parse_millis(token, iter.next())?),
            "winc" => params.winc = Some(parse_millis(token, iter.next())?),
            "binc" => params.binc = Some(parse_millis(token, iter.next())?),
            "movetime" => params.movetime = Some(parse_millis(token, iter.next())?),
            "movestogo" => params.movestogo = Some(parse_number(token, iter.next())?),
            "depth" => params.depth = Some(parse_number(token, iter.next())?),
            // Unknown go modifiers (ponder, mate, nodes, ...) are skipped.
            _ => {}
        }
    }

    Ok(Command::Go(params))
}

fn parse_setoption(tokens: &[&str]) -> Result<Command, UciError> {
    // setoption name <tokens...> value <tokens...>
    enum Bucket {
        None,
        Name,
        Value,
    }

    let mut name: Vec<&str> = Vec::new();
    let mut value: Vec<&str> = Vec::new();
    let mut bucket = Bucket::None;

    for &token in tokens {
        match token {
            "name" => bucket = Bucket::Name,
            "value" => bucket = Bucket::Value,
            other => match bucket {
                Bucket::Name => name.push(other),
                Bucket::Value => value.push(other),
                Bucket::None => {}
            },
        }
    }

    Ok(Command::SetOption {
        name: name.join(" "),
        value: value.join(" "),
    })
}

fn parse_millis(param: &str, value: Option<&&str>) -> Result<Duration, UciError> {
    Ok(Duration::from_millis(parse_number(param, value)?))
}

fn parse_number<T: std::str::FromStr>(param: &str, value: Option<&&str>) -> Result<T, UciError> {
    let value = value.ok_or_else(|| UciError::InvalidValue {
        param: param.to_string(),
        value: String::new(),
    })?;
    value.parse().map_err(|_| UciError::InvalidValue {
        param: param.to_string(),
        value: value.to_string(),
    })
}
