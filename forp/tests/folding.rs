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

//! Folding of rendered output through the whole pipeline

use forp::{ErrorKind, FoldingMode, Options, Preprocessor};

fn folding(length: usize, indentation: usize, mode: FoldingMode) -> Options {
    Options {
        line_length: length,
        indentation,
        folding_mode: mode,
        ..Options::default()
    }
}

fn process_with(options: Options, input: &str) -> String {
    Preprocessor::new(options)
        .unwrap()
        .process_text(input)
        .unwrap()
}

#[test]
fn only_overlong_lines_are_folded() {
    let out = process_with(
        folding(10, 2, FoldingMode::Simple),
        "Short\nThis line ${1 + 1}$ is folded\n",
    );
    assert_eq!(out, "Short\nThis line&\n  & 2 is &\n  &folded\n");
}

#[test]
fn no_folding_disables_everything() {
    let options = Options {
        no_folding: true,
        ..folding(15, 4, FoldingMode::Smart)
    };
    assert_eq!(
        process_with(options, "  ${3}$456 89 123456 8"),
        "  3456 89 123456 8"
    );
}

#[test]
fn brute_folding() {
    assert_eq!(
        process_with(folding(15, 4, FoldingMode::Brute), "  ${3}$456 89 123456 8"),
        "  3456 89 1234&\n    &56 8"
    );
}

#[test]
fn simple_folding() {
    assert_eq!(
        process_with(folding(15, 4, FoldingMode::Simple), "  ${3}$456 89 123456 8"),
        "  3456 89 1234&\n      &56 8"
    );
}

#[test]
fn smart_folding() {
    assert_eq!(
        process_with(folding(15, 4, FoldingMode::Smart), "  ${3}$456 89 123456 8"),
        "  3456 89&\n      & 123456&\n      & 8"
    );
}

#[test]
fn comment_lines_from_macros_are_not_folded() {
    assert_eq!(
        process_with(
            folding(10, 2, FoldingMode::Simple),
            "#:def macro()\n ! Should be not folded\nShould be folded\n#:enddef\n$:macro()\n"
        ),
        " ! Should be not folded\nShould be&\n  & folded\n"
    );
}

#[test]
fn fixed_format_folding() {
    let options = Options {
        fixed_format: true,
        ..Options::default()
    };
    assert_eq!(
        process_with(
            options,
            "      print *, ${'aa'}$, bb, cc, dd, ee, ff, gg, hh, ii, jj, kk, ll, \
             mm, nn, oo, pp, qq, rr, ss, tt\n"
        ),
        "      print *, aa, bb, cc, dd, ee, ff, gg, hh, ii, jj, kk, ll, mm, nn, \
         o\n     &o, pp, qq, rr, ss, tt\n"
    );
}

#[test]
fn too_short_line_length_is_a_config_error() {
    let e = Preprocessor::new(folding(4, 4, FoldingMode::Smart)).unwrap_err();
    assert_eq!(e.kind(), ErrorKind::Config);
    assert!(e.location().is_none());
}

#[test]
fn folded_output_lines_stay_within_the_budget() {
    let input = "${'word '}$word word word word word word word word word word\n";
    for mode in [FoldingMode::Smart, FoldingMode::Simple, FoldingMode::Brute] {
        let out = process_with(folding(20, 4, mode), input);
        for line in out.lines() {
            assert!(line.chars().count() <= 20, "{mode:?}: {line:?}");
        }
        let unfolded: String = out
            .replace("&\n    &", "")
            .replace("&\n        &", "");
        assert!(unfolded.contains("word word"), "{mode:?}: {out:?}");
    }
}
