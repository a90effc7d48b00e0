//! Board Engine
//!
//! Pure tic-tac-toe rules: initial state, legal moves, move application,
//! win/draw detection and turn alternation. No I/O, no concurrency.
//!
//! Cells are indexed row-major:
//!
//! ```text
//!  0 | 1 | 2
//! ---|---|---
//!  3 | 4 | 5
//! ---|---|---
//!  6 | 7 | 8
//! ```

use std::fmt;
use serde::{Serialize, Deserialize};

/// Side length of the board.
pub const BOARD_SIZE: usize = 3;

/// Number of cells on the board.
pub const CELL_COUNT: usize = BOARD_SIZE * BOARD_SIZE;

/// Wire value of an empty cell.
pub const EMPTY: u8 = 0;

// =============================================================================
// ROLE
// =============================================================================

/// One of the two fixed roles in a match.
///
/// Role A moves first. On the wire A is `1` and B is `2`, matching the
/// board cell encoding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Role {
    /// First mover, rendered as `X`.
    A,
    /// Second mover, rendered as `O`.
    B,
}

impl Role {
    /// The other role.
    #[inline]
    pub const fn next(self) -> Self {
        match self {
            Role::A => Role::B,
            Role::B => Role::A,
        }
    }

    /// Wire value (1 or 2).
    #[inline]
    pub const fn to_wire(self) -> u8 {
        match self {
            Role::A => 1,
            Role::B => 2,
        }
    }

    /// Symbol used when rendering the board.
    pub const fn symbol(self) -> char {
        match self {
            Role::A => 'X',
            Role::B => 'O',
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::A => write!(f, "A"),
            Role::B => write!(f, "B"),
        }
    }
}

impl From<Role> for u8 {
    fn from(role: Role) -> u8 {
        role.to_wire()
    }
}

impl TryFrom<u8> for Role {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Role::A),
            2 => Ok(Role::B),
            other => Err(format!("invalid role value {other}, expected 1 or 2")),
        }
    }
}

// =============================================================================
// ERRORS
// =============================================================================

/// Board rule violations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum BoardError {
    /// Cell is out of range or already occupied.
    #[error("Illegal move at cell {cell}")]
    IllegalMove {
        /// Requested cell index.
        cell: usize,
    },
}

// =============================================================================
// BOARD
// =============================================================================

/// An N×N grid of cells, each empty or owned by a role.
///
/// Boards are values: [`Board::apply`] returns a new board and leaves the
/// receiver untouched, so callers can keep the previous position around.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct Board {
    cells: [Option<Role>; CELL_COUNT],
}

impl Board {
    /// Board with every cell empty.
    pub const fn initial() -> Self {
        Self { cells: [None; CELL_COUNT] }
    }

    /// Owner of a cell, `None` if empty or out of range.
    #[inline]
    pub fn get(&self, cell: usize) -> Option<Role> {
        self.cells.get(cell).copied().flatten()
    }

    /// Whether `cell` is on the board and empty.
    #[inline]
    pub fn is_open(&self, cell: usize) -> bool {
        cell < CELL_COUNT && self.cells[cell].is_none()
    }

    /// Indices of every empty cell, ascending.
    pub fn legal_moves(&self) -> Vec<usize> {
        (0..CELL_COUNT).filter(|&cell| self.cells[cell].is_none()).collect()
    }

    /// Place `role` at `cell`, returning the resulting board.
    pub fn apply(&self, cell: usize, role: Role) -> Result<Board, BoardError> {
        if !self.is_open(cell) {
            return Err(BoardError::IllegalMove { cell });
        }
        let mut next = *self;
        next.cells[cell] = Some(role);
        Ok(next)
    }

    /// Whether `role` holds a complete row, column or diagonal.
    pub fn has_won(&self, role: Role) -> bool {
        let owns = |row: usize, col: usize| self.cells[to_index(row, col)] == Some(role);

        let any_row = (0..BOARD_SIZE).any(|row| (0..BOARD_SIZE).all(|col| owns(row, col)));
        let any_col = (0..BOARD_SIZE).any(|col| (0..BOARD_SIZE).all(|row| owns(row, col)));
        let diagonal = (0..BOARD_SIZE).all(|i| owns(i, i));
        let anti_diagonal = (0..BOARD_SIZE).all(|i| owns(i, BOARD_SIZE - 1 - i));

        any_row || any_col || diagonal || anti_diagonal
    }

    /// Whether no cell is empty.
    ///
    /// Check [`Board::has_won`] first: a full board with a line is a win.
    pub fn is_draw(&self) -> bool {
        self.cells.iter().all(Option::is_some)
    }

    /// Number of occupied cells.
    pub fn occupied(&self) -> usize {
        self.cells.iter().filter(|c| c.is_some()).count()
    }

    /// Row-major wire encoding (0 empty, 1 for A, 2 for B).
    pub fn to_wire(&self) -> [u8; CELL_COUNT] {
        let mut out = [EMPTY; CELL_COUNT];
        for (slot, cell) in out.iter_mut().zip(self.cells.iter()) {
            *slot = cell.map_or(EMPTY, Role::to_wire);
        }
        out
    }
}

impl fmt::Display for Board {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for row in 0..BOARD_SIZE {
            if row > 0 {
                writeln!(f, "---|---|---")?;
            }
            let symbols: Vec<String> = (0..BOARD_SIZE)
                .map(|col| {
                    let symbol = self.cells[to_index(row, col)].map_or(' ', Role::symbol);
                    format!(" {symbol} ")
                })
                .collect();
            writeln!(f, "{}", symbols.join("|"))?;
        }
        Ok(())
    }
}

/// Cell index to `(row, col)`.
#[inline]
pub const fn to_coords(cell: usize) -> (usize, usize) {
    (cell / BOARD_SIZE, cell % BOARD_SIZE)
}

/// `(row, col)` to cell index.
#[inline]
pub const fn to_index(row: usize, col: usize) -> usize {
    row * BOARD_SIZE + col
}
