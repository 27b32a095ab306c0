// This file is part of forp, a preprocessor for Fortran-style sources.
// Copyright (C) 2024 The forp Authors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Source descriptions attached to tokens, tree nodes and diagnostics
//!
//! Every piece of the preprocessor pipeline is line-addressed: a directive
//! occupies whole lines or sits inside a single line, and the diagnostics of
//! downstream compilers are line-oriented as well. A [`Location`] therefore
//! pairs an input name with a half-open range of zero-based line numbers.

use std::fmt::Display;
use std::ops::Range;
use std::rc::Rc;

/// Name used for in-memory input that did not come from a file
pub const STRING_INPUT: &str = "<string>";

/// Region of an input the pipeline is talking about
///
/// The `file` field is a filesystem path or the [`STRING_INPUT`] sentinel.
/// The `lines` field is a half-open range of zero-based line numbers; it is
/// never empty. The name is shared via `Rc` because every token and node of a
/// parsed input points at the same input name.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Location {
    /// Name of the originating input
    pub file: Rc<str>,
    /// Half-open range of zero-based line numbers
    pub lines: Range<usize>,
}

impl Location {
    /// Creates a location spanning the given line range.
    #[must_use]
    pub fn new(file: Rc<str>, lines: Range<usize>) -> Self {
        debug_assert!(lines.start < lines.end, "location span must be non-empty");
        Location { file, lines }
    }

    /// Creates a location covering the single given line.
    #[must_use]
    pub fn line(file: Rc<str>, line: usize) -> Self {
        Location {
            file,
            lines: line..line + 1,
        }
    }

    /// Returns a location covering this one and `other`.
    ///
    /// Both locations must refer to the same input.
    #[must_use]
    pub fn through(&self, other: &Location) -> Location {
        debug_assert_eq!(self.file, other.file);
        Location {
            file: Rc::clone(&self.file),
            lines: self.lines.start..other.lines.end.max(self.lines.end),
        }
    }
}

/// Shows the location as `file:line` or `file:first-last` with one-based lines.
impl Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.lines.end - self.lines.start <= 1 {
            write!(f, "{}:{}", self.file, self.lines.start + 1)
        } else {
            write!(f, "{}:{}-{}", self.file, self.lines.start + 1, self.lines.end)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_line_display() {
        let location = Location::line(Rc::from("foo.fpp"), 0);
        assert_eq!(location.to_string(), "foo.fpp:1");
    }

    #[test]
    fn multi_line_display() {
        let location = Location::new(Rc::from(STRING_INPUT), 2..5);
        assert_eq!(location.to_string(), "<string>:3-5");
    }

    #[test]
    fn through_extends_the_span() {
        let file: Rc<str> = Rc::from("x");
        let a = Location::new(Rc::clone(&file), 1..2);
        let b = Location::new(Rc::clone(&file), 4..6);
        assert_eq!(a.through(&b).lines, 1..6);
    }
}
