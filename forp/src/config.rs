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

//! Configuration of a preprocessing run

use crate::error::{Error, ErrorKind};
use std::path::PathBuf;

/// When to emit line-number markers
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum LineNumberingMode {
    /// Markers whenever source and output lines are out of sync
    #[default]
    Full,
    /// Markers omitted for folded continuation lines
    NoContLines,
}

/// Wire format of line-number markers
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum LineMarkerFormat {
    /// `# <line> "<file>"`, as emitted by GNU cpp
    #[default]
    Cpp,
    /// `# <line> "<file>" <flag>` with flags for entering and leaving files
    Gfortran5,
    /// `#line <line> "<file>"`
    Std,
}

/// Strategy for folding overlong lines
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum FoldingMode {
    /// Break at blanks where possible, never inside strings or comments
    #[default]
    Smart,
    /// Mechanical break with indentation-aware continuation lines
    Simple,
    /// Mechanical break with fixed continuation indentation
    Brute,
}

/// Character encoding of file input and output
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Encoding {
    #[default]
    Utf8,
    Latin1,
    Ascii,
}

/// Settings of a preprocessing run
///
/// The field set mirrors the driver-level options of the original tool; all
/// fields have usable defaults, so a plain `Options::default()` gives an
/// unnumbered, smart-folded run with no search paths.
#[derive(Clone, Debug)]
pub struct Options {
    /// Initial bindings as `NAME` or `NAME=EXPR`, evaluated left to right
    pub defines: Vec<String>,
    /// Include search directories, in order
    pub includes: Vec<PathBuf>,
    /// Preprocessor library files preloaded into the global environment
    pub modules: Vec<String>,
    /// Directories searched for modules before the include path
    pub module_dirs: Vec<PathBuf>,
    /// Emit line-number markers
    pub line_numbering: bool,
    pub line_numbering_mode: LineNumberingMode,
    pub line_marker_format: LineMarkerFormat,
    /// Maximum output line length before folding
    pub line_length: usize,
    pub folding_mode: FoldingMode,
    /// Disable folding entirely
    pub no_folding: bool,
    /// Extra indentation of folded continuation lines
    pub indentation: usize,
    /// Fold for fixed-form sources; ignores the free-form folding settings
    pub fixed_format: bool,
    /// Encoding used when reading and writing files
    pub encoding: Encoding,
    /// Create missing parent directories of the output file
    pub create_parent_folder: bool,
    /// Root directory the `_FILE_` and `_THIS_FILE_` variables are relative to
    pub file_var_root: Option<PathBuf>,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            defines: Vec::new(),
            includes: Vec::new(),
            modules: Vec::new(),
            module_dirs: Vec::new(),
            line_numbering: false,
            line_numbering_mode: LineNumberingMode::default(),
            line_marker_format: LineMarkerFormat::default(),
            line_length: 132,
            folding_mode: FoldingMode::default(),
            no_folding: false,
            indentation: 4,
            fixed_format: false,
            encoding: Encoding::default(),
            create_parent_folder: false,
            file_var_root: None,
        }
    }
}

impl Options {
    /// Checks the option combination for consistency.
    ///
    /// A continuation line consists of the indentation, an `&`, at least one
    /// payload character and the trailing `&`, so the line length must leave
    /// room for that.
    pub(crate) fn validate(&self) -> Result<(), Error> {
        if !self.no_folding && !self.fixed_format && self.line_length < self.indentation + 3 {
            return Err(Error::new(
                ErrorKind::Config,
                format!(
                    "line length {} is too short for folding with indentation {}",
                    self.line_length, self.indentation
                ),
                None,
            ));
        }
        Ok(())
    }
}
