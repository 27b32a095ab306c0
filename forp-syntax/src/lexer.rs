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

//! Carving a raw character stream into directive and text tokens
//!
//! The lexer recognizes the directive sigils at line granularity:
//!
//! * `#:keyword tail`: a line directive, consuming the whole line
//! * `#{keyword tail}#`: an inline directive
//! * `${expr}$`: an expression substitution
//! * `$:expr`: a line eval, consuming the whole line
//! * `@:name(args)` and `@{name(args)}@`: direct macro calls
//! * `#!...`: a comment, consuming the whole line when nothing but blanks
//!   precede it
//!
//! A backslash run between the two sigil characters suppresses recognition
//! and loses exactly one backslash on output. An `&` as the last non-blank
//! character of a directive line joins the following line into the directive
//! body before any further parsing; plain text keeps `&` verbatim.

use crate::source::Location;
use std::ops::Range;
use std::rc::Rc;
use thiserror::Error;

/// Atomic element of the carved input
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Token {
    /// Plain output text, escapes already resolved
    Text { text: String, location: Location },
    /// Directive occupying whole lines, e.g. `#:if cond`
    LineDir {
        keyword: String,
        tail: String,
        location: Location,
    },
    /// Directive embedded in a line, e.g. `#{endif}#`
    InlineDir {
        keyword: String,
        tail: String,
        location: Location,
    },
    /// Inline expression substitution `${expr}$`
    ExprSub { expr: String, location: Location },
    /// Whole-line expression output `$:expr`
    LineEval { expr: String, location: Location },
    /// Shorthand macro invocation `@:name(args)` or `@{name(args)}@`
    DirectCall {
        name: String,
        args: String,
        inline: bool,
        location: Location,
    },
    /// Comment `#!...`
    Comment { location: Location },
}

impl Token {
    /// Returns the source region the token was carved from.
    #[must_use]
    pub fn location(&self) -> &Location {
        match self {
            Token::Text { location, .. }
            | Token::LineDir { location, .. }
            | Token::InlineDir { location, .. }
            | Token::ExprSub { location, .. }
            | Token::LineEval { location, .. }
            | Token::DirectCall { location, .. }
            | Token::Comment { location } => location,
        }
    }
}

/// Errors detected while carving the input
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum LexError {
    /// An inline directive lacks its closing sigil on the same line.
    #[error("unclosed inline directive")]
    UnclosedInlineDirective { location: Location },

    /// A directive sigil is not followed by any content.
    #[error("directive is missing its content")]
    MissingDirectiveContent { location: Location },

    /// A directive keyword is not separated from its tail by blanks.
    #[error("directive keyword must be followed by a blank or the end of the directive")]
    MissingKeywordSeparator { location: Location },

    /// A direct call does not have the form `name(arguments)`.
    #[error("malformed direct call")]
    MalformedDirectCall { location: Location },

    /// A quoted string in a direct call argument list is not closed.
    #[error("unclosed quote in direct call arguments")]
    UnclosedQuote { location: Location },

    /// Brackets in a direct call argument list do not pair up.
    #[error("unbalanced brackets in direct call arguments")]
    UnbalancedBrackets { location: Location },
}

impl LexError {
    /// Returns the source region the error points at.
    #[must_use]
    pub fn location(&self) -> &Location {
        match self {
            LexError::UnclosedInlineDirective { location }
            | LexError::MissingDirectiveContent { location }
            | LexError::MissingKeywordSeparator { location }
            | LexError::MalformedDirectCall { location }
            | LexError::UnclosedQuote { location }
            | LexError::UnbalancedBrackets { location } => location,
        }
    }
}

fn is_blank(c: char) -> bool {
    c == ' ' || c == '\t'
}

fn is_name_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Splits a leading identifier off a string.
fn split_name(s: &str) -> Option<(&str, &str)> {
    let mut chars = s.char_indices();
    match chars.next() {
        Some((_, c)) if is_name_start(c) => {}
        _ => return None,
    }
    let end = chars
        .find(|&(_, c)| !is_name_char(c))
        .map_or(s.len(), |(i, _)| i);
    Some((&s[..end], &s[end..]))
}

/// Removes one backslash from every escaped sigil sequence.
///
/// Escapable sequences are a sigil start character (`#`, `$`, `@`, `}`)
/// followed by one or more backslashes and a character that would complete a
/// sigil pair. Everything else is copied through untouched.
pub(crate) fn unescape_text(text: &str) -> String {
    fn completes(first: u8, second: u8) -> bool {
        match first {
            b'#' => matches!(second, b':' | b'{' | b'!'),
            b'$' => matches!(second, b'{' | b':'),
            b'@' => matches!(second, b':' | b'{'),
            b'}' => matches!(second, b'#' | b'$' | b'@'),
            _ => false,
        }
    }

    let bytes = text.as_bytes();
    let mut out = String::with_capacity(text.len());
    let mut copied = 0;
    let mut i = 0;
    while i < bytes.len() {
        if matches!(bytes[i], b'#' | b'$' | b'@' | b'}') {
            let mut j = i + 1;
            while j < bytes.len() && bytes[j] == b'\\' {
                j += 1;
            }
            if j > i + 1 && j < bytes.len() && completes(bytes[i], bytes[j]) {
                // Copy up to and including the first sigil character, then
                // all but one of the backslashes.
                out.push_str(&text[copied..=i]);
                out.push_str(&text[i + 2..j]);
                copied = j;
                i = j;
                continue;
            }
        }
        i += 1;
    }
    out.push_str(&text[copied..]);
    out
}

/// Carves `text` into a token stream.
///
/// `file` names the input in every emitted [`Location`].
pub fn lex(text: &str, file: &Rc<str>) -> Result<Vec<Token>, LexError> {
    Lexer::new(text, file).run()
}

struct Lexer<'a> {
    lines: Vec<&'a str>,
    file: Rc<str>,
    tokens: Vec<Token>,
    text_buf: String,
    text_span: Option<Range<usize>>,
}

impl<'a> Lexer<'a> {
    fn new(text: &'a str, file: &Rc<str>) -> Self {
        Lexer {
            lines: text.split_inclusive('\n').collect(),
            file: Rc::clone(file),
            tokens: Vec::new(),
            text_buf: String::new(),
            text_span: None,
        }
    }

    fn location(&self, lines: Range<usize>) -> Location {
        Location::new(Rc::clone(&self.file), lines)
    }

    fn push_text(&mut self, text: &str, line: usize) {
        if text.is_empty() {
            return;
        }
        self.text_buf.push_str(text);
        match &mut self.text_span {
            Some(span) => span.end = line + 1,
            None => self.text_span = Some(line..line + 1),
        }
    }

    fn flush_text(&mut self) {
        if let Some(span) = self.text_span.take() {
            let text = unescape_text(&std::mem::take(&mut self.text_buf));
            let location = self.location(span);
            self.tokens.push(Token::Text { text, location });
        }
    }

    fn run(mut self) -> Result<Vec<Token>, LexError> {
        let mut i = 0;
        while i < self.lines.len() {
            i = self.line(i)?;
        }
        self.flush_text();
        Ok(self.tokens)
    }

    /// Processes the line at index `i` and returns the index to continue at.
    fn line(&mut self, i: usize) -> Result<usize, LexError> {
        let line = self.lines[i];
        let stripped = line.strip_suffix('\n').unwrap_or(line);
        let trimmed = stripped.trim_start_matches(is_blank);

        if trimmed.starts_with("#:") {
            self.flush_text();
            let (content, last) = self.splice(&trimmed[2..], i);
            let location = self.location(i..last + 1);
            let (keyword, tail) = self.keyword_and_tail(&content, &location)?;
            self.tokens.push(Token::LineDir {
                keyword,
                tail,
                location,
            });
            return Ok(last + 1);
        }
        if trimmed.starts_with("#!") {
            self.flush_text();
            let location = self.location(i..i + 1);
            self.tokens.push(Token::Comment { location });
            return Ok(i + 1);
        }
        if trimmed.starts_with("$:") {
            self.flush_text();
            let (content, last) = self.splice(&trimmed[2..], i);
            let location = self.location(i..last + 1);
            self.tokens.push(Token::LineEval {
                expr: content.trim_matches(is_blank).to_string(),
                location,
            });
            return Ok(last + 1);
        }
        if trimmed.starts_with("@:") {
            self.flush_text();
            let (content, last) = self.splice(&trimmed[2..], i);
            let location = self.location(i..last + 1);
            let (name, args) = parse_direct_call(&content, &location, true)?;
            self.tokens.push(Token::DirectCall {
                name,
                args,
                inline: false,
                location,
            });
            return Ok(last + 1);
        }

        // A lone inline directive owns its line, blanks and newline included.
        if let Some(content) = lone_inline_directive(stripped) {
            self.flush_text();
            let location = self.location(i..i + 1);
            let (keyword, tail) = self.keyword_and_tail(content, &location)?;
            self.tokens.push(Token::InlineDir {
                keyword,
                tail,
                location,
            });
            return Ok(i + 1);
        }

        self.scan_inline(line, i)?;
        Ok(i + 1)
    }

    /// Joins `&` continuation lines onto a directive body.
    ///
    /// Returns the joined content and the index of the last line consumed.
    /// The continuation `&` and anything after it is dropped; on the next
    /// line a leading `&` (after blanks) resumes the body right behind it,
    /// while a line without one is appended verbatim.
    fn splice(&self, content: &str, start: usize) -> (String, usize) {
        let mut joined = content.to_string();
        let mut last = start;
        loop {
            let trimmed = joined.trim_end_matches(is_blank);
            if !trimmed.ends_with('&') || last + 1 >= self.lines.len() {
                return (joined, last);
            }
            let keep = trimmed.len() - 1;
            joined.truncate(keep);
            last += 1;
            let next = self.lines[last];
            let next = next.strip_suffix('\n').unwrap_or(next);
            let resumed = next.trim_start_matches(is_blank);
            match resumed.strip_prefix('&') {
                Some(rest) => joined.push_str(rest),
                None => joined.push_str(next),
            }
        }
    }

    fn keyword_and_tail(
        &self,
        content: &str,
        location: &Location,
    ) -> Result<(String, String), LexError> {
        let content = content.trim_matches(is_blank);
        let Some((keyword, rest)) = split_name(content) else {
            return Err(LexError::MissingDirectiveContent {
                location: location.clone(),
            });
        };
        if !rest.is_empty() && !rest.starts_with(is_blank) {
            return Err(LexError::MissingKeywordSeparator {
                location: location.clone(),
            });
        }
        Ok((keyword.to_string(), rest.trim_matches(is_blank).to_string()))
    }

    /// Scans one line for inline sigils, buffering everything else as text.
    fn scan_inline(&mut self, line: &str, lineno: usize) -> Result<(), LexError> {
        let mut rest = line;
        loop {
            let Some(pos) = find_inline_sigil(rest) else {
                self.push_text(rest, lineno);
                return Ok(());
            };
            self.push_text(&rest[..pos], lineno);
            let at = &rest[pos..];
            if at.starts_with("#!") {
                // A comment in running text ends at the end of the line but
                // leaves the newline in place.
                self.flush_text();
                let location = self.location(lineno..lineno + 1);
                self.tokens.push(Token::Comment { location });
                if at.ends_with('\n') {
                    self.push_text("\n", lineno);
                }
                return Ok(());
            }
            if at.starts_with("${") {
                match at.find("}$") {
                    Some(end) => {
                        self.flush_text();
                        let location = self.location(lineno..lineno + 1);
                        self.tokens.push(Token::ExprSub {
                            expr: at[2..end].to_string(),
                            location,
                        });
                        rest = &at[end + 2..];
                        continue;
                    }
                    None => {
                        // An unterminated substitution is plain text.
                        self.push_text("${", lineno);
                        rest = &at[2..];
                        continue;
                    }
                }
            }
            let (closer, inline_call) = if at.starts_with("#{") {
                ("}#", false)
            } else {
                ("}@", true)
            };
            let location = self.location(lineno..lineno + 1);
            let Some(end) = at.find(closer) else {
                return Err(LexError::UnclosedInlineDirective { location });
            };
            let content = &at[2..end];
            self.flush_text();
            if inline_call {
                let (name, args) = parse_direct_call(content, &location, true)?;
                self.tokens.push(Token::DirectCall {
                    name,
                    args,
                    inline: true,
                    location,
                });
            } else {
                let (keyword, tail) = self.keyword_and_tail(content, &location)?;
                self.tokens.push(Token::InlineDir {
                    keyword,
                    tail,
                    location,
                });
            }
            rest = &at[end + 2..];
        }
    }
}

/// Finds the next unescaped inline sigil (`#{`, `${`, `@{` or `#!`).
fn find_inline_sigil(s: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    (0..bytes.len().saturating_sub(1)).find(|&i| {
        matches!(
            (bytes[i], bytes[i + 1]),
            (b'#', b'{') | (b'$', b'{') | (b'@', b'{') | (b'#', b'!')
        )
    })
}

/// Matches a line holding nothing but a single `#{...}#` directive.
fn lone_inline_directive(stripped: &str) -> Option<&str> {
    let trimmed = stripped.trim_matches(is_blank);
    let content = trimmed.strip_prefix("#{")?.strip_suffix("}#")?;
    if content.contains("}#") {
        None
    } else {
        Some(content)
    }
}

/// Parses `name(arguments)` of a direct call.
///
/// The argument list is returned raw; splitting it into individual arguments
/// happens in the tree builder. Quotes and brackets are scanned here only to
/// locate the closing parenthesis.
fn parse_direct_call(
    content: &str,
    location: &Location,
    whole: bool,
) -> Result<(String, String), LexError> {
    let content = content.trim_matches(is_blank);
    let Some((name, rest)) = split_name(content) else {
        return Err(LexError::MalformedDirectCall {
            location: location.clone(),
        });
    };
    let rest = rest.trim_start_matches(is_blank);
    let Some(inner) = rest.strip_prefix('(') else {
        return Err(LexError::MalformedDirectCall {
            location: location.clone(),
        });
    };
    let end = matching_paren(inner, location)?;
    let after = inner[end + 1..].trim_matches(is_blank);
    if whole && !after.is_empty() {
        return Err(LexError::MalformedDirectCall {
            location: location.clone(),
        });
    }
    Ok((name.to_string(), inner[..end].to_string()))
}

/// Returns the index of the `)` closing an already-opened parenthesis.
fn matching_paren(s: &str, location: &Location) -> Result<usize, LexError> {
    let mut stack = vec![')'];
    let mut chars = s.char_indices();
    while let Some((i, c)) = chars.next() {
        match c {
            '\'' | '"' => loop {
                match chars.next() {
                    Some((_, q)) if q == c => break,
                    Some(_) => {}
                    None => {
                        return Err(LexError::UnclosedQuote {
                            location: location.clone(),
                        });
                    }
                }
            },
            '(' => stack.push(')'),
            '[' => stack.push(']'),
            '{' => stack.push('}'),
            ')' | ']' | '}' => {
                if stack.pop() != Some(c) {
                    return Err(LexError::UnbalancedBrackets {
                        location: location.clone(),
                    });
                }
                if stack.is_empty() {
                    return Ok(i);
                }
            }
            _ => {}
        }
    }
    Err(LexError::UnbalancedBrackets {
        location: location.clone(),
    })
}
