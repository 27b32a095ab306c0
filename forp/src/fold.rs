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

//! Re-wrapping of overlong output lines
//!
//! Free-form folding appends `&` to the broken piece and starts the
//! continuation with an indent and another `&`. Fixed-form folding breaks at
//! column 72 and marks the continuation with an `&` in column six. Comment
//! lines and line-number markers are never folded.
//!
//! When line numbering is on, the folder keeps the markers truthful: in full
//! numbering mode the governing marker is re-issued before every
//! continuation piece; in `nocontlines` mode the continuations stay bare and
//! a re-sync marker for the following line is emitted after the folded
//! group.

use crate::config::{FoldingMode, LineNumberingMode, Options};
use crate::linenum::{format_marker, parse_marker};

/// Column budget of fixed-form sources
const FIXED_LINE_LENGTH: usize = 72;
/// Continuation prefix of fixed-form sources: blanks up to column six
const FIXED_PREFIX: &str = "     &";

/// Line folder configured from the run's options
pub struct Folder<'a> {
    options: &'a Options,
}

impl<'a> Folder<'a> {
    #[must_use]
    pub fn new(options: &'a Options) -> Self {
        Folder { options }
    }

    /// Folds every overlong line of the rendered text.
    #[must_use]
    pub fn fold(&self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        // Marker governing the current line, and how many text lines have
        // been emitted since it.
        let mut marker: Option<(usize, String)> = None;
        let mut lines_since = 0usize;

        for line in text.split_inclusive('\n') {
            let (content, newline) = match line.strip_suffix('\n') {
                Some(content) => (content, true),
                None => (line, false),
            };
            if self.options.line_numbering {
                if let Some((number, file)) = parse_marker(self.options.line_marker_format, content)
                {
                    marker = Some((number, file.to_string()));
                    lines_since = 0;
                    out.push_str(line);
                    continue;
                }
            }
            let pieces = self.fold_line(content);
            match &pieces[..] {
                [] | [_] => out.push_str(line),
                pieces => {
                    let current = marker
                        .as_ref()
                        .map(|(number, file)| (number + lines_since, file.clone()));
                    for (i, piece) in pieces.iter().enumerate() {
                        if i > 0 {
                            out.push('\n');
                            if let Some((number, file)) = &current {
                                if self.options.line_numbering_mode == LineNumberingMode::Full {
                                    out.push_str(&format_marker(
                                        self.options.line_marker_format,
                                        *number,
                                        file,
                                        None,
                                    ));
                                }
                            }
                        }
                        out.push_str(piece);
                    }
                    if newline {
                        out.push('\n');
                    }
                    // Folding multiplied one source line into several output
                    // lines; re-sync so the following lines stay attributed
                    // correctly.
                    if let Some((number, file)) = &current {
                        match self.options.line_numbering_mode {
                            LineNumberingMode::Full => {
                                marker = Some((*number, file.clone()));
                                lines_since = 0;
                            }
                            LineNumberingMode::NoContLines => {
                                out.push_str(&format_marker(
                                    self.options.line_marker_format,
                                    number + 1,
                                    file,
                                    None,
                                ));
                                marker = Some((number + 1, file.clone()));
                                lines_since = 0;
                                continue;
                            }
                        }
                    }
                }
            }
            if newline {
                lines_since += 1;
            }
        }
        out
    }

    /// Splits one line into folded pieces; a single piece means no folding.
    fn fold_line(&self, content: &str) -> Vec<String> {
        if self.options.fixed_format {
            return fold_fixed(content);
        }
        let budget = self.options.line_length;
        let chars: Vec<char> = content.chars().collect();
        if chars.len() <= budget || is_comment_line(content) {
            return vec![content.to_string()];
        }
        match self.options.folding_mode {
            FoldingMode::Brute => {
                let prefix: String = " ".repeat(self.options.indentation) + "&";
                fold_mechanical(&chars, budget, &prefix)
            }
            FoldingMode::Simple => {
                let prefix = continuation_prefix(&chars, budget, self.options.indentation);
                fold_mechanical(&chars, budget, &prefix)
            }
            FoldingMode::Smart => {
                let prefix = continuation_prefix(&chars, budget, self.options.indentation);
                fold_smart(&chars, budget, &prefix)
            }
        }
    }
}

/// A line whose first non-blank character opens a Fortran comment
fn is_comment_line(content: &str) -> bool {
    content.trim_start().starts_with('!')
}

/// Indentation-aware continuation prefix of the `simple` and `smart` modes
///
/// Falls back to the plain indentation when the line's own indent would not
/// leave room for any payload.
fn continuation_prefix(chars: &[char], budget: usize, indentation: usize) -> String {
    let own_indent = chars.iter().take_while(|c| **c == ' ' || **c == '\t').count();
    let prefix: String = chars[..own_indent]
        .iter()
        .chain(std::iter::repeat_n(&' ', indentation))
        .collect::<String>()
        + "&";
    if prefix.len() + 2 <= budget {
        prefix
    } else {
        " ".repeat(indentation) + "&"
    }
}

/// Breaks mechanically at the last column that still fits.
fn fold_mechanical(chars: &[char], budget: usize, prefix: &str) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut start = 0;
    loop {
        let head = if pieces.is_empty() { 0 } else { prefix.chars().count() };
        let remaining = chars.len() - start;
        if head + remaining <= budget {
            let mut piece = if pieces.is_empty() { String::new() } else { prefix.to_string() };
            piece.extend(&chars[start..]);
            pieces.push(piece);
            return pieces;
        }
        let payload = budget - head - 1;
        let mut piece = if pieces.is_empty() { String::new() } else { prefix.to_string() };
        piece.extend(&chars[start..start + payload]);
        piece.push('&');
        pieces.push(piece);
        start += payload;
    }
}

/// Breaks at blank boundaries, avoiding quoted strings and trailing
/// comments; falls back to a mechanical break when no boundary fits.
fn fold_smart(chars: &[char], budget: usize, prefix: &str) -> Vec<String> {
    let breaks = break_positions(chars);
    let mut pieces = Vec::new();
    let mut start = 0;
    loop {
        let head = if pieces.is_empty() { 0 } else { prefix.chars().count() };
        let remaining = chars.len() - start;
        if head + remaining <= budget {
            let mut piece = if pieces.is_empty() { String::new() } else { prefix.to_string() };
            piece.extend(&chars[start..]);
            pieces.push(piece);
            return pieces;
        }
        let payload = budget - head - 1;
        let limit = start + payload;
        let chosen = breaks
            .iter()
            .copied()
            .filter(|&b| b > start && b <= limit)
            .next_back()
            .unwrap_or(limit);
        let mut piece = if pieces.is_empty() { String::new() } else { prefix.to_string() };
        piece.extend(&chars[start..chosen]);
        piece.push('&');
        pieces.push(piece);
        start = chosen;
    }
}

/// Indices where a smart fold may break: blanks outside quotes and comments,
/// past the leading indentation.
fn break_positions(chars: &[char]) -> Vec<usize> {
    let indent = chars.iter().take_while(|c| **c == ' ' || **c == '\t').count();
    let mut positions = Vec::new();
    let mut quote: Option<char> = None;
    for (i, &c) in chars.iter().enumerate() {
        match quote {
            Some(q) => {
                if c == q {
                    quote = None;
                }
            }
            None => match c {
                '\'' | '"' => quote = Some(c),
                '!' => break,
                ' ' if i >= indent => positions.push(i),
                _ => {}
            },
        }
    }
    positions
}

/// Folds for fixed-form sources: break at column 72, continuation marker in
/// column six, no trailing `&`.
fn fold_fixed(content: &str) -> Vec<String> {
    let chars: Vec<char> = content.chars().collect();
    if chars.len() <= FIXED_LINE_LENGTH || is_fixed_comment(&chars) {
        return vec![content.to_string()];
    }
    let mut pieces = vec![chars[..FIXED_LINE_LENGTH].iter().collect::<String>()];
    let payload = FIXED_LINE_LENGTH - FIXED_PREFIX.len();
    let mut start = FIXED_LINE_LENGTH;
    while start < chars.len() {
        let end = (start + payload).min(chars.len());
        let mut piece = FIXED_PREFIX.to_string();
        piece.extend(&chars[start..end]);
        pieces.push(piece);
        start = end;
    }
    pieces
}

/// Comment in fixed-form source: `c`, `C`, `*` in column one, or a bang line
fn is_fixed_comment(chars: &[char]) -> bool {
    match chars.first() {
        Some('c' | 'C' | '*' | '!') => true,
        _ => chars.iter().find(|c| **c != ' ' && **c != '\t') == Some(&'!'),
    }
}
