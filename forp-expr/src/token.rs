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

//! Tokenization of expression strings

use std::fmt::Display;
use std::ops::Range;
use thiserror::Error;

/// Word with a fixed meaning in the expression language
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Keyword {
    And,
    Or,
    Not,
    In,
    Lambda,
    True,
    False,
    None,
}

/// Operator or punctuation
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Operator {
    /// `+`
    Plus,
    /// `-`
    Minus,
    /// `*`
    Asterisk,
    /// `/`
    Slash,
    /// `%`
    Percent,
    /// `(`
    OpenParen,
    /// `)`
    CloseParen,
    /// `[`
    OpenBracket,
    /// `]`
    CloseBracket,
    /// `{`
    OpenBrace,
    /// `}`
    CloseBrace,
    /// `,`
    Comma,
    /// `:`
    Colon,
    /// `.`
    Dot,
    /// `=`
    Equal,
    /// `==`
    EqualEqual,
    /// `!=`
    BangEqual,
    /// `<`
    Less,
    /// `<=`
    LessEqual,
    /// `>`
    Greater,
    /// `>=`
    GreaterEqual,
}

/// Value of a [`Token`]
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TokenValue {
    Int(i64),
    Str(String),
    Ident(String),
    Keyword(Keyword),
    Operator(Operator),
    /// Imaginary token value for the end of input
    EndOfInput,
}

/// Atomic lexical element of an expression
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Token {
    /// Token value
    pub value: TokenValue,
    /// Range of the substring where the token occurs in the parsed expression
    pub location: Range<usize>,
}

/// Cause of a tokenization error
#[derive(Clone, Debug, Eq, Error, Hash, PartialEq)]
pub enum TokenError {
    /// A numeric constant contains an invalid character or leading zero.
    #[error("invalid numeric constant")]
    InvalidNumericConstant,

    /// A character is not a whitespace, operator, number, string or name.
    #[error("invalid character")]
    InvalidCharacter,

    /// A string literal is missing its closing quote.
    #[error("unterminated string literal")]
    UnterminatedString,
}

/// Description of an error that occurred during tokenization
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Error {
    /// Cause of the error
    pub cause: TokenError,
    /// Range of the substring in the expression string where the error occurred
    pub location: Range<usize>,
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.cause.fmt(f)
    }
}

/// List of all the operators.
///
/// If a prefix of a valid operator is another operator, the prefix must
/// appear after the longer one so that the first match wins.
const OPERATORS: &[(&str, Operator)] = &[
    ("==", Operator::EqualEqual),
    ("=", Operator::Equal),
    ("!=", Operator::BangEqual),
    ("<=", Operator::LessEqual),
    ("<", Operator::Less),
    (">=", Operator::GreaterEqual),
    (">", Operator::Greater),
    ("+", Operator::Plus),
    ("-", Operator::Minus),
    ("*", Operator::Asterisk),
    ("/", Operator::Slash),
    ("%", Operator::Percent),
    ("(", Operator::OpenParen),
    (")", Operator::CloseParen),
    ("[", Operator::OpenBracket),
    ("]", Operator::CloseBracket),
    ("{", Operator::OpenBrace),
    ("}", Operator::CloseBrace),
    (",", Operator::Comma),
    (":", Operator::Colon),
    (".", Operator::Dot),
];

const KEYWORDS: &[(&str, Keyword)] = &[
    ("and", Keyword::And),
    ("or", Keyword::Or),
    ("not", Keyword::Not),
    ("in", Keyword::In),
    ("lambda", Keyword::Lambda),
    ("True", Keyword::True),
    ("False", Keyword::False),
    ("None", Keyword::None),
];

/// Iterator extracting tokens from a string
///
/// `Tokens` never runs out: once the input is exhausted it keeps returning a
/// token with [`TokenValue::EndOfInput`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Tokens<'a> {
    source: &'a str,
    index: usize,
}

impl<'a> Tokens<'a> {
    /// Creates a tokenizer.
    #[must_use]
    pub fn new(source: &'a str) -> Self {
        Tokens { source, index: 0 }
    }

    /// Consumes and returns the next token.
    pub fn next_token(&mut self) -> Result<Token, Error> {
        let source = self.source[self.index..].trim_start();
        let start = self.source.len() - source.len();
        let Some(first) = source.chars().next() else {
            return Ok(Token {
                value: TokenValue::EndOfInput,
                location: start..start,
            });
        };

        if first == '\'' || first == '"' {
            return self.string(source, start, first);
        }

        if let Some((lexeme, operator)) = OPERATORS
            .iter()
            .copied()
            .find(|&(lexeme, _)| source.starts_with(lexeme))
        {
            let end = start + lexeme.len();
            self.index = end;
            return Ok(Token {
                value: TokenValue::Operator(operator),
                location: start..end,
            });
        }

        // The token must be a number or a name.
        let remainder = source.trim_start_matches(|c: char| c.is_alphanumeric() || c == '_');
        let token_len = source.len() - remainder.len();
        if token_len == 0 {
            return Err(Error {
                cause: TokenError::InvalidCharacter,
                location: start..start + first.len_utf8(),
            });
        }
        let end = start + token_len;
        let location = start..end;
        let word = &source[..token_len];

        let value = if first.is_ascii_digit() {
            TokenValue::Int(parse_number(word).ok_or(Error {
                cause: TokenError::InvalidNumericConstant,
                location: location.clone(),
            })?)
        } else if let Some(&(_, keyword)) = KEYWORDS.iter().find(|&&(w, _)| w == word) {
            TokenValue::Keyword(keyword)
        } else {
            TokenValue::Ident(word.to_string())
        };

        self.index = end;
        Ok(Token { value, location })
    }

    /// Scans a string literal resolving backslash escapes.
    fn string(&mut self, source: &str, start: usize, quote: char) -> Result<Token, Error> {
        let mut value = String::new();
        let mut chars = source.char_indices().skip(1);
        while let Some((i, c)) = chars.next() {
            if c == quote {
                let end = start + i + c.len_utf8();
                self.index = end;
                return Ok(Token {
                    value: TokenValue::Str(value),
                    location: start..end,
                });
            }
            if c == '\\' {
                match chars.next() {
                    Some((_, 'n')) => value.push('\n'),
                    Some((_, 't')) => value.push('\t'),
                    Some((_, 'r')) => value.push('\r'),
                    Some((_, '\\')) => value.push('\\'),
                    Some((_, '\'')) => value.push('\''),
                    Some((_, '"')) => value.push('"'),
                    Some((_, '0')) => value.push('\0'),
                    // An unknown escape keeps the backslash, like the
                    // original host language did.
                    Some((_, other)) => {
                        value.push('\\');
                        value.push(other);
                    }
                    None => break,
                }
            } else {
                value.push(c);
            }
        }
        Err(Error {
            cause: TokenError::UnterminatedString,
            location: start..self.source.len(),
        })
    }
}

/// Parses decimal, hexadecimal (`0x`), octal (`0o`) and binary (`0b`)
/// constants. A decimal constant with a leading zero is rejected.
fn parse_number(word: &str) -> Option<i64> {
    if let Some(hex) = word.strip_prefix("0x").or_else(|| word.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16).ok()
    } else if let Some(oct) = word.strip_prefix("0o").or_else(|| word.strip_prefix("0O")) {
        i64::from_str_radix(oct, 8).ok()
    } else if let Some(bin) = word.strip_prefix("0b").or_else(|| word.strip_prefix("0B")) {
        i64::from_str_radix(bin, 2).ok()
    } else if word.len() > 1 && word.starts_with('0') {
        None
    } else {
        word.parse().ok()
    }
}

/// Peekable iterator extracting tokens from a string
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PeekableTokens<'a> {
    inner: Tokens<'a>,
    cached_next: Option<Result<Token, Error>>,
}

impl<'a> PeekableTokens<'a> {
    /// Creates a tokenizer.
    #[must_use]
    pub fn new(inner: Tokens<'a>) -> Self {
        PeekableTokens {
            inner,
            cached_next: None,
        }
    }

    /// Consumes and returns the next token.
    pub fn next(&mut self) -> Result<Token, Error> {
        self.cached_next
            .take()
            .unwrap_or_else(|| self.inner.next_token())
    }

    /// Returns the next token without consuming it.
    pub fn peek(&mut self) -> &Result<Token, Error> {
        self.cached_next
            .get_or_insert_with(|| self.inner.next_token())
    }
}

impl<'a> From<&'a str> for PeekableTokens<'a> {
    fn from(source: &'a str) -> Self {
        PeekableTokens::new(Tokens::new(source))
    }
}
