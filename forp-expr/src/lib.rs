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

//! The expression language embedded in forp directives
//!
//! A small, Python-flavoured expression language: integers, strings, tuples,
//! lists, dicts and booleans, arithmetic and comparisons, indexing, a few
//! string methods, lambdas, and calls into builtin functions or preprocessor
//! macros. Evaluation runs against a chain of scoped
//! [environments](env::Env); macro invocations reach back into the renderer
//! through the [`Expander`](eval::Expander) hook, which keeps this crate
//! independent of the rendering machinery.
//!
//! The error type is generic over the expander's error, so a render failure
//! inside a macro travels through an expression evaluation without being
//! flattened to text.

pub mod ast;
pub mod builtins;
pub mod env;
pub mod eval;
pub mod token;
pub mod value;

use ast::{ParseError, ParseErrorCause, SyntaxError};
use std::fmt::Display;
use std::ops::Range;
use token::TokenError;

pub use env::{Env, EnvError, PREDEFINED, ScopeKind, is_reserved};
pub use eval::{Expander, NoMacroSupport, NoMacros, bind_arguments, call_value, eval, eval_expr};
pub use value::{Builtin, Lambda, MacroValue, Value};

/// Cause of an expression evaluation error
///
/// `E` is the error type of the [`Expander`] in use.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ErrorCause<E> {
    /// Error in tokenization
    Token(TokenError),
    /// Error in expression grammar
    Syntax(SyntaxError),
    /// An identifier has no binding.
    Undefined(String),
    /// Error manipulating the environment
    Env(EnvError),
    /// Operand or argument of the wrong type
    Type(String),
    /// Result out of bounds
    Overflow,
    /// Division or remainder by zero
    DivisionByZero,
    /// Sequence index out of range
    IndexOutOfRange(i64),
    /// Dict key not present
    KeyNotFound(String),
    /// The called value is not callable.
    NotCallable(&'static str),
    /// Wrong number of arguments
    Arity(String),
    /// Bad keyword argument
    Keyword(String),
    /// Unknown attribute or method
    Attribute(String),
    /// Tuple unpacking with mismatched lengths
    Unpack { expected: usize, found: usize },
    /// Error raised by the macro expander
    Expand(E),
}

impl<E: Display> Display for ErrorCause<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use ErrorCause::*;
        match self {
            Token(e) => e.fmt(f),
            Syntax(e) => e.fmt(f),
            Undefined(name) => write!(f, "name '{name}' is not defined"),
            Env(e) => e.fmt(f),
            Type(message) => message.fmt(f),
            Overflow => "overflow".fmt(f),
            DivisionByZero => "division by zero".fmt(f),
            IndexOutOfRange(index) => write!(f, "index {index} out of range"),
            KeyNotFound(key) => write!(f, "key {key} not found"),
            NotCallable(type_name) => write!(f, "value of type {type_name} is not callable"),
            Arity(message) | Keyword(message) => message.fmt(f),
            Attribute(name) => write!(f, "unknown attribute '{name}'"),
            Unpack { expected, found } => {
                write!(f, "cannot unpack {found} values into {expected} names")
            }
            Expand(e) => e.fmt(f),
        }
    }
}

/// Description of an error that occurred during evaluation
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Error<E> {
    /// Cause of the error
    pub cause: ErrorCause<E>,
    /// Range of the substring in the evaluated expression string where the
    /// error occurred
    pub location: Range<usize>,
}

impl<E: Display> Display for Error<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.cause.fmt(f)
    }
}

impl<E: std::fmt::Debug + Display> std::error::Error for Error<E> {}

impl<E> From<ParseError> for Error<E> {
    fn from(e: ParseError) -> Self {
        let cause = match e.cause {
            ParseErrorCause::Token(cause) => ErrorCause::Token(cause),
            ParseErrorCause::Syntax(cause) => ErrorCause::Syntax(cause),
        };
        Error {
            cause,
            location: e.location,
        }
    }
}
