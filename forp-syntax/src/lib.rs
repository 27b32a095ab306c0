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

//! Syntax layer of the forp preprocessor
//!
//! This crate turns raw input text into a directive tree in two pure steps:
//! the [lexer] carves the character stream into a flat sequence of directive
//! and text [tokens](lexer::Token), and the [parser] groups the tokens into a
//! nested [tree](syntax::Node), enforcing block pairing, line/inline form
//! consistency and named-closer matching. Evaluating the tree against an
//! environment is the business of the `forp` crate; the expression strings
//! embedded in the tree stay uninterpreted here.

pub mod lexer;
pub mod parser;
pub mod source;
pub mod syntax;

pub use lexer::{LexError, Token, lex};
pub use parser::{BuildError, build};
pub use source::{Location, STRING_INPUT};

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    #[test]
    fn lex_and_build_compose() {
        let tokens = lex("#:if x\n${x}$\n#:endif\n", &Rc::from(STRING_INPUT)).unwrap();
        let nodes = build(tokens).unwrap();
        assert_eq!(nodes.len(), 1);
    }
}
