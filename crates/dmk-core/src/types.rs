use std::fmt;

use serde::{Deserialize, Serialize};

/// A location in script text. `line` and `column` are 1-based, `index` is the char offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Position {
    pub line: usize,
    pub column: usize,
    pub index: usize,
}

impl Position {
    pub fn new(line: usize, column: usize, index: usize) -> Self {
        Self {
            line,
            column,
            index,
        }
    }

    pub fn start() -> Self {
        Self::new(1, 1, 0)
    }

    /// Advances over one char of source text.
    pub fn step(self, c: char) -> Self {
        if c == '\n' {
            Self::new(self.line + 1, 1, self.index + 1)
        } else {
            Self::new(self.line, self.column + 1, self.index + 1)
        }
    }
}

impl Default for Position {
    fn default() -> Self {
        Self::start()
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}, column {}", self.line, self.column)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PositionRange {
    pub start: Position,
    pub end: Position,
}

impl PositionRange {
    pub fn new(start: Position, end: Position) -> Self {
        Self { start, end }
    }

    pub fn at(position: Position) -> Self {
        Self::new(position, position)
    }

    pub fn synthetic() -> Self {
        Self::at(Position::start())
    }

    /// Smallest range covering both.
    pub fn merge(&self, other: &PositionRange) -> PositionRange {
        PositionRange::new(
            self.start.min(other.start),
            self.end.max(other.end),
        )
    }
}

impl fmt::Display for PositionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start.line == self.end.line {
            write!(
                f,
                "line {}, columns {}-{}",
                self.start.line, self.start.column, self.end.column
            )
        } else {
            write!(f, "{} to {}", self.start, self.end)
        }
    }
}
