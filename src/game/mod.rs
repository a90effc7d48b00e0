//! Game Logic Module
//!
//! Pure tic-tac-toe rules. No I/O, no async, no shared state.
//!
//! ## Module Structure
//!
//! - `board`: Board representation, move application, win/draw detection

pub mod board;

// Re-export key types
pub use board::{Board, BoardError, Role, BOARD_SIZE, CELL_COUNT};
