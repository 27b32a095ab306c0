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

//! The diagnostic type surfaced by the preprocessor
//!
//! Every layer shares one shape: a kind tag, a message, an optional source
//! location, and an optional cause. When an error arises inside a macro body
//! or an included file, the renderer wraps it with the invocation site and
//! rethrows, so the surfaced diagnostic is a chain of origin frames with the
//! outermost site first.

use forp_syntax::lexer::LexError;
use forp_syntax::parser::BuildError;
use forp_syntax::source::Location;
use std::fmt::{self, Display};

/// Layer an error originated in
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    /// Carving the input into tokens failed.
    Lexer,
    /// Grouping the tokens into a tree failed.
    Builder,
    /// Executing the tree failed.
    Render,
    /// Evaluating an embedded expression failed.
    Eval,
    /// The input requested a stop, or an assertion did not hold.
    UserStop,
    /// The configuration is invalid.
    Config,
}

/// Preprocessing failure with an optional cause chain
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    message: String,
    location: Option<Location>,
    cause: Option<Box<Error>>,
}

impl Error {
    /// Creates an error without a cause.
    #[must_use]
    pub fn new<S: Into<String>>(kind: ErrorKind, message: S, location: Option<Location>) -> Self {
        Error {
            kind,
            message: message.into(),
            location,
            cause: None,
        }
    }

    /// Creates an error wrapping a nested one.
    #[must_use]
    pub fn with_cause<S: Into<String>>(
        kind: ErrorKind,
        message: S,
        location: Option<Location>,
        cause: Error,
    ) -> Self {
        Error {
            kind,
            message: message.into(),
            location,
            cause: Some(Box::new(cause)),
        }
    }

    /// Layer the error originated in.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Message of the outermost frame.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Location of the outermost frame.
    #[must_use]
    pub fn location(&self) -> Option<&Location> {
        self.location.as_ref()
    }

    /// Nested error this one wraps, if any.
    #[must_use]
    pub fn cause(&self) -> Option<&Error> {
        self.cause.as_deref()
    }

    /// Whether the error is a user-requested stop or failed assertion.
    ///
    /// The innermost frame decides: a stop raised inside a macro stays a
    /// stop even after the renderer attached call-site frames.
    #[must_use]
    pub fn is_user_stop(&self) -> bool {
        let mut error = self;
        while let Some(cause) = error.cause() {
            error = cause;
        }
        error.kind == ErrorKind::UserStop
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            Some(location) => write!(f, "{location}: {}", self.message)?,
            None => self.message.fmt(f)?,
        }
        let mut cause = self.cause.as_deref();
        while let Some(error) = cause {
            match &error.location {
                Some(location) => write!(f, "\n  caused by: {location}: {}", error.message)?,
                None => write!(f, "\n  caused by: {}", error.message)?,
            }
            cause = error.cause.as_deref();
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause.as_ref().map(|e| e as _)
    }
}

impl From<LexError> for Error {
    fn from(e: LexError) -> Self {
        let location = e.location().clone();
        Error::new(ErrorKind::Lexer, e.to_string(), Some(location))
    }
}

impl From<BuildError> for Error {
    fn from(e: BuildError) -> Self {
        let location = e.location().clone();
        Error::new(ErrorKind::Builder, e.to_string(), Some(location))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    #[test]
    fn display_shows_the_cause_chain() {
        let inner = Error::new(
            ErrorKind::Eval,
            "name 'x' is not defined",
            Some(Location::line(Rc::from("m.inc"), 2)),
        );
        let outer = Error::with_cause(
            ErrorKind::Render,
            "error rendering macro 'm'",
            Some(Location::line(Rc::from("<string>"), 0)),
            inner,
        );
        assert_eq!(
            outer.to_string(),
            "<string>:1: error rendering macro 'm'\n  caused by: m.inc:3: name 'x' is not defined"
        );
    }

    #[test]
    fn user_stop_is_detected_through_wrapping() {
        let stop = Error::new(ErrorKind::UserStop, "stop", None);
        let wrapped = Error::with_cause(ErrorKind::Render, "in macro", None, stop);
        assert!(wrapped.is_user_stop());
        assert!(!Error::new(ErrorKind::Render, "x", None).is_user_stop());
    }
}
