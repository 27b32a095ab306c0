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

//! Include resolution, markers across files, and cycle detection

use forp::{ErrorKind, Options, Preprocessor};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

/// An include tree mirroring a typical project layout:
///
/// ```text
/// include/first.inc                (INCL1 on line 1, INCL5 on line 5)
/// include/subfolder/nested.inc     includes first.inc via the search path
/// include/subfolder/local.inc      includes sibling.inc next to itself
/// include/subfolder/sibling.inc
/// ```
fn fixture() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    let include = dir.path().join("include");
    fs::create_dir_all(include.join("subfolder")).unwrap();
    fs::write(
        include.join("first.inc"),
        "INCL1\n#:def incmacro(c)\nINCMACRO(${c}$)\n#:enddef\nINCL5\n",
    )
    .unwrap();
    fs::write(
        include.join("subfolder/nested.inc"),
        "#:include 'first.inc'\n",
    )
    .unwrap();
    fs::write(
        include.join("subfolder/local.inc"),
        "#:include \"sibling.inc\"\n",
    )
    .unwrap();
    fs::write(include.join("subfolder/sibling.inc"), "SIBLING\n").unwrap();
    dir
}

fn options_with_incdir(dir: &TempDir) -> Options {
    Options {
        includes: vec![dir.path().join("include")],
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
fn include_by_explicit_path() {
    let dir = fixture();
    let path = dir.path().join("include/first.inc");
    let input = format!("#:include \"{}\"\n", path.display());
    assert_eq!(
        process_with(Options::default(), &input),
        "INCL1\nINCL5\n"
    );
}

#[test]
fn include_via_search_path() {
    let dir = fixture();
    assert_eq!(
        process_with(options_with_incdir(&dir), "#:include \"first.inc\"\n"),
        "INCL1\nINCL5\n"
    );
}

#[test]
fn nested_include_resolves_through_the_search_path() {
    let dir = fixture();
    assert_eq!(
        process_with(
            options_with_incdir(&dir),
            "#:include \"subfolder/nested.inc\"\n"
        ),
        "INCL1\nINCL5\n"
    );
}

#[test]
fn nested_include_prefers_the_including_file_directory() {
    let dir = fixture();
    assert_eq!(
        process_with(
            options_with_incdir(&dir),
            "#:include \"subfolder/local.inc\"\n"
        ),
        "SIBLING\n"
    );
}

#[test]
fn included_macros_are_usable_afterwards() {
    let dir = fixture();
    assert_eq!(
        process_with(
            options_with_incdir(&dir),
            "#:include \"first.inc\"\n$: incmacro(1)\n"
        ),
        "INCL1\nINCL5\nINCMACRO(1)\n"
    );
}

#[test]
fn include_markers_flag_entering_and_returning() {
    let dir = fixture();
    let options = Options {
        line_numbering: true,
        ..options_with_incdir(&dir)
    };
    let inc = dir.path().join("include/first.inc");
    let inc = inc.display();
    let expected = format!(
        "# 1 \"<string>\"\n\
         # 1 \"{inc}\"\n\
         INCL1\n\
         # 5 \"{inc}\"\n\
         INCL5\n\
         # 2 \"<string>\"\n\
         INCMACRO(1)\n"
    );
    assert_eq!(
        process_with(options, "#:include \"first.inc\"\n$: incmacro(1)\n"),
        expected
    );
}

#[test]
fn nested_include_markers() {
    let dir = fixture();
    let options = Options {
        line_numbering: true,
        ..options_with_incdir(&dir)
    };
    let outer = dir.path().join("include/subfolder/nested.inc");
    let inner = dir.path().join("include/first.inc");
    let (outer, inner) = (outer.display(), inner.display());
    let expected = format!(
        "# 1 \"<string>\"\n\
         # 1 \"{outer}\"\n\
         # 1 \"{inner}\"\n\
         INCL1\n\
         # 5 \"{inner}\"\n\
         INCL5\n\
         # 2 \"{outer}\"\n\
         # 2 \"<string>\"\n"
    );
    assert_eq!(
        process_with(options, "#:include \"subfolder/nested.inc\"\n"),
        expected
    );
}

#[test]
fn muted_include_produces_no_output_but_defines() {
    let dir = fixture();
    assert_eq!(
        process_with(
            options_with_incdir(&dir),
            "START\n#:mute\n#:include 'first.inc'\n#:endmute\nDONE\n$: incmacro(2)\n"
        ),
        "START\nDONE\nINCMACRO(2)\n"
    );
}

#[test]
fn muted_include_suppresses_markers() {
    let dir = fixture();
    let options = Options {
        line_numbering: true,
        ..options_with_incdir(&dir)
    };
    assert_eq!(
        process_with(
            options,
            "START\n#:mute\n#:include 'first.inc'\n#:endmute\nDONE\n"
        ),
        "# 1 \"<string>\"\nSTART\n# 5 \"<string>\"\nDONE\n"
    );
}

#[test]
fn missing_include_is_an_error() {
    let e = Preprocessor::new(Options::default())
        .unwrap()
        .process_text("#:include \"no_such_file_anywhere.inc\"\n")
        .unwrap_err();
    assert_eq!(e.kind(), ErrorKind::Render);
    assert_eq!(e.location().unwrap().lines, 0..1);
}

#[test]
fn include_cycles_are_detected() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("a.inc"), "#:include \"b.inc\"\n").unwrap();
    fs::write(dir.path().join("b.inc"), "#:include \"a.inc\"\n").unwrap();
    let options = Options {
        includes: vec![dir.path().to_path_buf()],
        ..Options::default()
    };
    let e = Preprocessor::new(options)
        .unwrap()
        .process_text("#:include \"a.inc\"\n")
        .unwrap_err();
    assert_eq!(e.kind(), ErrorKind::Render);
    assert!(e.message().contains("circular"));
}

#[test]
fn self_include_is_a_cycle() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("a.inc"), "#:include \"a.inc\"\n").unwrap();
    let options = Options {
        includes: vec![dir.path().to_path_buf()],
        ..Options::default()
    };
    let e = Preprocessor::new(options)
        .unwrap()
        .process_text("#:include \"a.inc\"\n")
        .unwrap_err();
    assert!(e.message().contains("circular"));
}

#[test]
fn diamond_includes_are_not_cycles() {
    // The same file twice in sequence is fine; only the active stack counts.
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("leaf.inc"), "LEAF\n").unwrap();
    fs::write(
        dir.path().join("mid.inc"),
        "#:include \"leaf.inc\"\n",
    )
    .unwrap();
    let options = Options {
        includes: vec![dir.path().to_path_buf()],
        ..Options::default()
    };
    assert_eq!(
        process_with(options, "#:include \"mid.inc\"\n#:include \"leaf.inc\"\n"),
        "LEAF\nLEAF\n"
    );
}

#[test]
fn errors_in_included_macros_chain_to_the_call_site() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("failing.inc"),
        "#:def failingmacro()\n$: 1/0\n#:enddef\n",
    )
    .unwrap();
    let options = Options {
        includes: vec![dir.path().to_path_buf()],
        ..Options::default()
    };
    let e = Preprocessor::new(options)
        .unwrap()
        .process_text("#:include \"failing.inc\"\n$:failingmacro()\n")
        .unwrap_err();
    // Outer frame at the call site in the main input...
    assert_eq!(e.location().unwrap().file.as_ref(), "<string>");
    assert_eq!(e.location().unwrap().lines, 1..2);
    // ...inner frame inside the included file.
    let inner = e.cause().unwrap();
    assert!(Path::new(inner.location().unwrap().file.as_ref()).ends_with("failing.inc"));
    assert_eq!(inner.location().unwrap().lines, 1..2);
}

#[test]
fn file_variable_inside_includes() {
    let dir = fixture();
    fs::write(
        dir.path().join("include/whoami.inc"),
        "${_FILE_}$\n",
    )
    .unwrap();
    let options = options_with_incdir(&dir);
    let expected = format!("{}\n", dir.path().join("include/whoami.inc").display());
    assert_eq!(
        process_with(options, "#:include \"whoami.inc\"\n"),
        expected
    );
}

#[test]
fn file_var_root_relativizes_file_variables() {
    let dir = fixture();
    fs::write(dir.path().join("include/whoami.inc"), "${_FILE_}$\n").unwrap();
    let options = Options {
        file_var_root: Some(dir.path().to_path_buf()),
        ..options_with_incdir(&dir)
    };
    assert_eq!(
        process_with(options, "#:include \"whoami.inc\"\n"),
        "include/whoami.inc\n"
    );
}
