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

//! Runtime values of the expression language
//!
//! Callables are a tagged variant of the same value type: builtin functions,
//! lambdas closing over their defining environment, and preprocessor macros
//! whose body is a directive tree fragment. The invocation path dispatches on
//! the tag; macros are expanded by the renderer through the
//! [`Expander`](crate::eval::Expander) hook.

use crate::ast::Expr;
use crate::env::Env;
use forp_syntax::source::Location;
use forp_syntax::syntax::{Node, ParamSpec};
use itertools::Itertools;
use std::cmp::Ordering;
use std::fmt::{self, Display};
use std::rc::Rc;

/// Builtin function identity
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Builtin {
    Defined,
    Getvar,
    Setvar,
    Delvar,
    Globalvar,
    Str,
    Repr,
    Int,
    Bool,
    Len,
    Range,
    Sum,
    Min,
    Max,
    Abs,
}

impl Builtin {
    /// Name the function is bound under.
    #[must_use]
    pub fn name(self) -> &'static str {
        use Builtin::*;
        match self {
            Defined => "defined",
            Getvar => "getvar",
            Setvar => "setvar",
            Delvar => "delvar",
            Globalvar => "globalvar",
            Str => "str",
            Repr => "repr",
            Int => "int",
            Bool => "bool",
            Len => "len",
            Range => "range",
            Sum => "sum",
            Min => "min",
            Max => "max",
            Abs => "abs",
        }
    }

    /// All builtin functions, for populating the root scope.
    #[must_use]
    pub fn all() -> &'static [Builtin] {
        use Builtin::*;
        &[
            Defined, Getvar, Setvar, Delvar, Globalvar, Str, Repr, Int, Bool, Len, Range, Sum,
            Min, Max, Abs,
        ]
    }
}

/// Anonymous function closing over its defining environment
#[derive(Debug)]
pub struct Lambda {
    pub params: Rc<ParamSpec<Rc<Expr>>>,
    pub body: Rc<Expr>,
    pub env: Env,
}

/// User-defined macro: a directive tree fragment with a closure environment
///
/// The environment is captured by reference, not snapshot: bindings made in
/// the defining scope after the definition are visible to the body.
#[derive(Debug)]
pub struct MacroValue {
    pub name: String,
    pub params: ParamSpec<String>,
    pub body: Rc<Vec<Node>>,
    pub env: Env,
    pub location: Location,
}

/// Value the expression evaluator computes with
#[derive(Clone, Debug)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Str(Rc<str>),
    Tuple(Rc<Vec<Value>>),
    List(Rc<Vec<Value>>),
    /// Insertion-ordered key/value pairs
    Dict(Rc<Vec<(Value, Value)>>),
    Func(Rc<Lambda>),
    Builtin(Builtin),
    Macro(Rc<MacroValue>),
}

impl Value {
    /// Creates a string value.
    #[must_use]
    pub fn string<S: AsRef<str>>(s: S) -> Self {
        Value::Str(Rc::from(s.as_ref()))
    }

    /// Integer content, with bools counting as 0 and 1.
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    /// Whether the value counts as true in conditions.
    #[must_use]
    pub fn truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Str(s) => !s.is_empty(),
            Value::Tuple(items) | Value::List(items) => !items.is_empty(),
            Value::Dict(pairs) => !pairs.is_empty(),
            Value::Func(_) | Value::Builtin(_) | Value::Macro(_) => true,
        }
    }

    /// Short name of the value's type, for error messages.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "none",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Str(_) => "str",
            Value::Tuple(_) => "tuple",
            Value::List(_) => "list",
            Value::Dict(_) => "dict",
            Value::Func(_) => "lambda",
            Value::Builtin(_) => "builtin",
            Value::Macro(_) => "macro",
        }
    }

    /// Quoting representation, used for elements inside containers.
    #[must_use]
    pub fn repr(&self) -> String {
        match self {
            Value::Str(s) => {
                let mut out = String::with_capacity(s.len() + 2);
                out.push('\'');
                for c in s.chars() {
                    match c {
                        '\\' => out.push_str("\\\\"),
                        '\'' => out.push_str("\\'"),
                        '\n' => out.push_str("\\n"),
                        '\t' => out.push_str("\\t"),
                        '\r' => out.push_str("\\r"),
                        _ => out.push(c),
                    }
                }
                out.push('\'');
                out
            }
            _ => self.to_string(),
        }
    }

    /// Elements of a sequence value, if it is one.
    #[must_use]
    pub fn sequence(&self) -> Option<&[Value]> {
        match self {
            Value::Tuple(items) | Value::List(items) => Some(items),
            _ => None,
        }
    }
}

/// Plain textual form: strings unquoted, containers in quoting form.
impl Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => "None".fmt(f),
            Value::Bool(true) => "True".fmt(f),
            Value::Bool(false) => "False".fmt(f),
            Value::Int(i) => i.fmt(f),
            Value::Str(s) => s.fmt(f),
            Value::Tuple(items) => {
                if items.len() == 1 {
                    write!(f, "({},)", items[0].repr())
                } else {
                    write!(f, "({})", items.iter().map(Value::repr).format(", "))
                }
            }
            Value::List(items) => {
                write!(f, "[{}]", items.iter().map(Value::repr).format(", "))
            }
            Value::Dict(pairs) => {
                write!(
                    f,
                    "{{{}}}",
                    pairs
                        .iter()
                        .map(|(k, v)| format!("{}: {}", k.repr(), v.repr()))
                        .format(", ")
                )
            }
            Value::Func(_) => "<lambda>".fmt(f),
            Value::Builtin(b) => write!(f, "<builtin {}>", b.name()),
            Value::Macro(m) => write!(f, "<macro {}>", m.name),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            // Bools compare equal to their numeric value.
            (Value::Bool(a), Value::Int(b)) | (Value::Int(b), Value::Bool(a)) => {
                i64::from(*a) == *b
            }
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Tuple(a), Value::Tuple(b)) | (Value::List(a), Value::List(b)) => a == b,
            (Value::Dict(a), Value::Dict(b)) => a == b,
            (Value::Func(a), Value::Func(b)) => Rc::ptr_eq(a, b),
            (Value::Builtin(a), Value::Builtin(b)) => a == b,
            (Value::Macro(a), Value::Macro(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// Orders two values if they are of comparable types.
///
/// Integers (and bools), strings, and same-kind sequences compare; anything
/// else does not.
#[must_use]
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    fn as_int(v: &Value) -> Option<i64> {
        match v {
            Value::Int(i) => Some(*i),
            Value::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    if let (Some(a), Some(b)) = (as_int(a), as_int(b)) {
        return Some(a.cmp(&b));
    }
    match (a, b) {
        (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
        (Value::Tuple(a), Value::Tuple(b)) | (Value::List(a), Value::List(b)) => {
            for (x, y) in a.iter().zip(b.iter()) {
                match compare_values(x, y)? {
                    Ordering::Equal => {}
                    other => return Some(other),
                }
            }
            Some(a.len().cmp(&b.len()))
        }
        _ => None,
    }
}
