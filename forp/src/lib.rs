// This file is part of forp, a preprocessor for Fortran-style sources.
// Copyright (C) 2025 The forp Authors
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

//! forp preprocesses source code, primarily line-oriented Fortran, with an
//! embedded expression language inside directive markers.
//!
//! Input flows through a fixed pipeline: the lexer and tree builder of
//! [`forp_syntax`] carve the text into a directive tree, the renderer walks
//! the tree evaluating conditions, loops, macro definitions and calls,
//! includes and expression substitutions against the scoped environments of
//! [`forp_expr`], and the [folder](fold::Folder) re-wraps overlong output
//! lines. Optional [line-number markers](linenum) keep downstream compiler
//! diagnostics pointing at the original files.
//!
//! ```
//! use forp::{Options, Preprocessor};
//!
//! let options = Options {
//!     defines: vec!["WITH_MPI=1".to_string()],
//!     ..Options::default()
//! };
//! let mut pp = Preprocessor::new(options).unwrap();
//! let output = pp
//!     .process_text("#:if WITH_MPI == 1\nuse mpi\n#:endif\n")
//!     .unwrap();
//! assert_eq!(output, "use mpi\n");
//! ```

pub mod config;
pub mod driver;
pub mod error;
pub mod fold;
pub mod linenum;
mod render;

pub use config::{Encoding, FoldingMode, LineMarkerFormat, LineNumberingMode, Options};
pub use driver::{ERROR_EXIT_CODE, Preprocessor, STREAM, USER_ERROR_EXIT_CODE, exit_code};
pub use error::{Error, ErrorKind};
