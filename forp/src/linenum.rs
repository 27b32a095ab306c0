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

//! Line-number marker formats
//!
//! A marker tells downstream tools which file and line the following output
//! line comes from. Lines are zero-based internally and one-based on the
//! wire.

use crate::config::LineMarkerFormat;
use std::fmt::Write as _;

/// Reason a marker switches files
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MarkerFlag {
    /// Processing enters a new file.
    NewFile,
    /// Processing returns to a file after an include.
    Return,
}

impl MarkerFlag {
    fn digit(self) -> u8 {
        match self {
            MarkerFlag::NewFile => 1,
            MarkerFlag::Return => 2,
        }
    }
}

/// Renders one marker line, newline included.
///
/// Only the `gfortran5` format carries the flag digit.
#[must_use]
pub fn format_marker(
    format: LineMarkerFormat,
    line: usize,
    file: &str,
    flag: Option<MarkerFlag>,
) -> String {
    let mut out = String::new();
    match format {
        LineMarkerFormat::Cpp => {
            let _ = write!(out, "# {} \"{}\"", line + 1, file);
        }
        LineMarkerFormat::Gfortran5 => {
            let _ = write!(out, "# {} \"{}\"", line + 1, file);
            if let Some(flag) = flag {
                let _ = write!(out, " {}", flag.digit());
            }
        }
        LineMarkerFormat::Std => {
            let _ = write!(out, "#line {} \"{}\"", line + 1, file);
        }
    }
    out.push('\n');
    out
}

/// Recognizes a marker line previously produced by [`format_marker`].
///
/// Returns the zero-based line number and the file name. The line must be
/// passed without its trailing newline.
#[must_use]
pub fn parse_marker(format: LineMarkerFormat, line: &str) -> Option<(usize, &str)> {
    let rest = match format {
        LineMarkerFormat::Std => line.strip_prefix("#line ")?,
        LineMarkerFormat::Cpp | LineMarkerFormat::Gfortran5 => line.strip_prefix("# ")?,
    };
    let digits_end = rest.find(|c: char| !c.is_ascii_digit())?;
    let number: usize = rest[..digits_end].parse().ok()?;
    let rest = rest[digits_end..].strip_prefix(" \"")?;
    let quote = rest.rfind('"')?;
    Some((number.checked_sub(1)?, &rest[..quote]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpp_format() {
        assert_eq!(
            format_marker(LineMarkerFormat::Cpp, 0, "<string>", Some(MarkerFlag::NewFile)),
            "# 1 \"<string>\"\n"
        );
        assert_eq!(
            format_marker(LineMarkerFormat::Cpp, 11, "a.F90", None),
            "# 12 \"a.F90\"\n"
        );
    }

    #[test]
    fn gfortran5_format_carries_flags() {
        assert_eq!(
            format_marker(
                LineMarkerFormat::Gfortran5,
                0,
                "<string>",
                Some(MarkerFlag::NewFile)
            ),
            "# 1 \"<string>\" 1\n"
        );
        assert_eq!(
            format_marker(LineMarkerFormat::Gfortran5, 4, "x.inc", Some(MarkerFlag::Return)),
            "# 5 \"x.inc\" 2\n"
        );
        assert_eq!(
            format_marker(LineMarkerFormat::Gfortran5, 4, "x.inc", None),
            "# 5 \"x.inc\"\n"
        );
    }

    #[test]
    fn std_format() {
        assert_eq!(
            format_marker(LineMarkerFormat::Std, 0, "<string>", None),
            "#line 1 \"<string>\"\n"
        );
    }

    #[test]
    fn parse_round_trip() {
        for format in [
            LineMarkerFormat::Cpp,
            LineMarkerFormat::Gfortran5,
            LineMarkerFormat::Std,
        ] {
            let marker = format_marker(format, 6, "dir/x.inc", None);
            let stripped = marker.strip_suffix('\n').unwrap();
            assert_eq!(parse_marker(format, stripped), Some((6, "dir/x.inc")));
        }
    }

    #[test]
    fn ordinary_lines_are_not_markers() {
        assert_eq!(parse_marker(LineMarkerFormat::Cpp, "#: if"), None);
        assert_eq!(parse_marker(LineMarkerFormat::Cpp, "  # 1 \"x\""), None);
        assert_eq!(parse_marker(LineMarkerFormat::Cpp, "# one \"x\""), None);
    }
}
