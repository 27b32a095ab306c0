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

//! Expression evaluation

use crate::ast::{self, BinaryOp, BoolOp, CompareOp, Expr, ExprKind, Literal, UnaryOp};
use crate::builtins;
use crate::env::{Env, ScopeKind};
use crate::value::{Lambda, MacroValue, Value, compare_values};
use crate::{Error, ErrorCause};
use forp_syntax::syntax::ParamSpec;
use std::cmp::Ordering;
use std::ops::Range;
use std::rc::Rc;
use thiserror::Error as ThisError;

/// Hook through which the evaluator invokes preprocessor macros
///
/// A macro body is a directive tree fragment; rendering it is the renderer's
/// business. The renderer implements this trait and receives the argument
/// values; the expansion result is the macro's return value as a string.
pub trait Expander {
    type Error;

    fn expand(
        &mut self,
        mac: &Rc<MacroValue>,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Result<String, Self::Error>;
}

/// Expander for contexts where no macros can exist
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct NoMacros;

/// Error returned by [`NoMacros`]
#[derive(Clone, Copy, Debug, Eq, PartialEq, ThisError)]
#[error("macro invocation is not supported in this context")]
pub struct NoMacroSupport;

impl Expander for NoMacros {
    type Error = NoMacroSupport;

    fn expand(
        &mut self,
        _mac: &Rc<MacroValue>,
        _args: Vec<Value>,
        _kwargs: Vec<(String, Value)>,
    ) -> Result<String, NoMacroSupport> {
        Err(NoMacroSupport)
    }
}

/// Evaluates an expression string against an environment.
pub fn eval<X: Expander>(
    source: &str,
    env: &Env,
    expander: &mut X,
) -> Result<Value, Error<X::Error>> {
    let expr = ast::parse(source)?;
    eval_expr(&expr, env, expander)
}

/// Evaluates a parsed expression against an environment.
pub fn eval_expr<X: Expander>(
    expr: &Expr,
    env: &Env,
    x: &mut X,
) -> Result<Value, Error<X::Error>> {
    let location = expr.location.clone();
    match &expr.kind {
        ExprKind::Literal(literal) => Ok(match literal {
            Literal::None => Value::None,
            Literal::Bool(b) => Value::Bool(*b),
            Literal::Int(i) => Value::Int(*i),
            Literal::Str(s) => Value::string(s),
        }),
        ExprKind::Ident(name) => env.lookup(name).ok_or(Error {
            cause: ErrorCause::Undefined(name.clone()),
            location,
        }),
        ExprKind::Tuple(items) => {
            let values = items
                .iter()
                .map(|item| eval_expr(item, env, x))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Value::Tuple(Rc::new(values)))
        }
        ExprKind::List(items) => {
            let values = items
                .iter()
                .map(|item| eval_expr(item, env, x))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Value::List(Rc::new(values)))
        }
        ExprKind::Dict(pairs) => {
            let mut values = Vec::with_capacity(pairs.len());
            for (key, value) in pairs {
                let key = eval_expr(key, env, x)?;
                let value = eval_expr(value, env, x)?;
                values.push((key, value));
            }
            Ok(Value::Dict(Rc::new(values)))
        }
        ExprKind::Unary(op, operand) => {
            let value = eval_expr(operand, env, x)?;
            apply_unary(*op, value, location)
        }
        ExprKind::Binary(op, lhs, rhs) => {
            let lhs = eval_expr(lhs, env, x)?;
            let rhs = eval_expr(rhs, env, x)?;
            apply_binary(*op, lhs, rhs, location)
        }
        ExprKind::Compare(op, lhs, rhs) => {
            let lhs = eval_expr(lhs, env, x)?;
            let rhs = eval_expr(rhs, env, x)?;
            apply_compare(*op, lhs, rhs, location)
        }
        ExprKind::Bool(op, lhs, rhs) => {
            let lhs = eval_expr(lhs, env, x)?;
            let short_circuit = match op {
                BoolOp::And => !lhs.truthy(),
                BoolOp::Or => lhs.truthy(),
            };
            if short_circuit {
                Ok(lhs)
            } else {
                eval_expr(rhs, env, x)
            }
        }
        ExprKind::Not(operand) => {
            let value = eval_expr(operand, env, x)?;
            Ok(Value::Bool(!value.truthy()))
        }
        ExprKind::Call {
            callee,
            args,
            kwargs,
        } => {
            let arg_values = args
                .iter()
                .map(|arg| eval_expr(arg, env, x))
                .collect::<Result<Vec<_>, _>>()?;
            let mut kwarg_values = Vec::with_capacity(kwargs.len());
            for (name, value) in kwargs {
                kwarg_values.push((name.clone(), eval_expr(value, env, x)?));
            }
            if let ExprKind::Attr { base, name } = &callee.kind {
                if !kwarg_values.is_empty() {
                    return Err(Error {
                        cause: ErrorCause::Type(
                            "method calls take no keyword arguments".to_string(),
                        ),
                        location,
                    });
                }
                let base = eval_expr(base, env, x)?;
                return string_method(&base, name, arg_values, location);
            }
            let callee = eval_expr(callee, env, x)?;
            call_value(&callee, arg_values, kwarg_values, env, x, location)
        }
        ExprKind::Index { base, index } => {
            let base = eval_expr(base, env, x)?;
            let index = eval_expr(index, env, x)?;
            index_value(&base, &index, location)
        }
        ExprKind::Attr { name, .. } => Err(Error {
            cause: ErrorCause::Attribute(name.clone()),
            location,
        }),
        ExprKind::Lambda { params, body } => Ok(Value::Func(Rc::new(Lambda {
            params: Rc::clone(params),
            body: Rc::clone(body),
            env: env.clone(),
        }))),
    }
}

/// Invokes a callable value with already-evaluated arguments.
pub fn call_value<X: Expander>(
    callee: &Value,
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
    env: &Env,
    x: &mut X,
    location: Range<usize>,
) -> Result<Value, Error<X::Error>> {
    match callee {
        Value::Builtin(builtin) => builtins::call(*builtin, args, kwargs, env, location),
        Value::Func(lambda) => {
            let bound = bind_arguments(&lambda.params, args, kwargs)
                .map_err(|e| e.into_error(location.clone()))?;
            let scope = lambda.env.push(ScopeKind::Macro);
            for (name, value) in bound.bound {
                define_param(&scope, &name, value, &location)?;
            }
            for (name, default) in bound.defaults {
                let value = eval_expr(default, &lambda.env, x)?;
                define_param(&scope, name, value, &location)?;
            }
            eval_expr(&lambda.body, &scope, x)
        }
        Value::Macro(mac) => {
            let text = x.expand(mac, args, kwargs).map_err(|e| Error {
                cause: ErrorCause::Expand(e),
                location,
            })?;
            Ok(Value::string(text))
        }
        other => Err(Error {
            cause: ErrorCause::NotCallable(other.type_name()),
            location,
        }),
    }
}

fn define_param<E>(
    scope: &Env,
    name: &str,
    value: Value,
    location: &Range<usize>,
) -> Result<(), Error<E>> {
    scope.define(name, value).map_err(|e| Error {
        cause: ErrorCause::Env(e),
        location: location.clone(),
    })
}

/// Arguments matched to a parameter list
///
/// `bound` holds the parameters given by the caller (plus the variadic
/// collectors); `defaults` lists the defaulted parameters the caller must
/// still evaluate in the callable's defining environment.
pub struct BoundArgs<'p, D> {
    pub bound: Vec<(String, Value)>,
    pub defaults: Vec<(&'p str, &'p D)>,
}

/// Failure to match arguments against a parameter list
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum BindError {
    TooManyPositional { expected: usize, found: usize },
    Missing(String),
    UnknownKeyword(String),
    DuplicateKeyword(String),
}

impl BindError {
    /// Converts into an evaluation error at the call site.
    #[must_use]
    pub fn into_error<E>(self, location: Range<usize>) -> Error<E> {
        let cause = match self {
            BindError::TooManyPositional { expected, found } => ErrorCause::Arity(format!(
                "too many positional arguments: expected {expected}, got {found}"
            )),
            BindError::Missing(name) => {
                ErrorCause::Arity(format!("missing argument '{name}'"))
            }
            BindError::UnknownKeyword(name) => {
                ErrorCause::Keyword(format!("unknown keyword argument '{name}'"))
            }
            BindError::DuplicateKeyword(name) => {
                ErrorCause::Keyword(format!("duplicate argument '{name}'"))
            }
        };
        Error { cause, location }
    }
}

/// Matches positional and keyword arguments against a parameter list.
///
/// Positional arguments fill the declared parameters in order, excess goes
/// to the `*args` collector. Keyword arguments fill by name, unknown ones go
/// to the `**kwargs` collector. Parameters that remain unfilled either come
/// back in [`BoundArgs::defaults`] or, for required ones, fail.
pub fn bind_arguments<'p, D>(
    params: &'p ParamSpec<D>,
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
) -> Result<BoundArgs<'p, D>, BindError> {
    let positional: Vec<&str> = params
        .required
        .iter()
        .map(String::as_str)
        .chain(params.optional.iter().map(|(n, _)| n.as_str()))
        .collect();

    let mut bound: Vec<(String, Value)> = Vec::new();
    let mut extra_positional = Vec::new();
    for (i, value) in args.into_iter().enumerate() {
        match positional.get(i) {
            Some(name) => bound.push(((*name).to_string(), value)),
            None => extra_positional.push(value),
        }
    }
    if !extra_positional.is_empty() && params.var_positional.is_none() {
        return Err(BindError::TooManyPositional {
            expected: positional.len(),
            found: positional.len() + extra_positional.len(),
        });
    }

    let mut extra_keyword: Vec<(Value, Value)> = Vec::new();
    for (name, value) in kwargs {
        if bound.iter().any(|(bound_name, _)| *bound_name == name)
            || extra_keyword
                .iter()
                .any(|(key, _)| *key == Value::string(&name))
        {
            return Err(BindError::DuplicateKeyword(name));
        }
        if positional.contains(&name.as_str()) {
            bound.push((name, value));
        } else if params.var_keyword.is_some() {
            extra_keyword.push((Value::string(&name), value));
        } else {
            return Err(BindError::UnknownKeyword(name));
        }
    }

    for required in &params.required {
        if !bound.iter().any(|(name, _)| name == required) {
            return Err(BindError::Missing(required.clone()));
        }
    }

    let defaults = params
        .optional
        .iter()
        .filter(|(name, _)| !bound.iter().any(|(bound_name, _)| bound_name == name))
        .map(|(name, default)| (name.as_str(), default))
        .collect();

    if let Some(name) = &params.var_positional {
        bound.push((name.clone(), Value::List(Rc::new(extra_positional))));
    }
    if let Some(name) = &params.var_keyword {
        bound.push((name.clone(), Value::Dict(Rc::new(extra_keyword))));
    }

    Ok(BoundArgs { bound, defaults })
}

fn type_error<E>(message: String, location: Range<usize>) -> Error<E> {
    Error {
        cause: ErrorCause::Type(message),
        location,
    }
}

fn apply_unary<E>(op: UnaryOp, value: Value, location: Range<usize>) -> Result<Value, Error<E>> {
    let Some(operand) = value.as_int() else {
        return Err(type_error(
            format!("unary operand must be an integer, not {}", value.type_name()),
            location,
        ));
    };
    match op {
        UnaryOp::Plus => Ok(Value::Int(operand)),
        UnaryOp::Minus => operand
            .checked_neg()
            .map(Value::Int)
            .ok_or(Error {
                cause: ErrorCause::Overflow,
                location,
            }),
    }
}

fn apply_binary<E>(
    op: BinaryOp,
    lhs: Value,
    rhs: Value,
    location: Range<usize>,
) -> Result<Value, Error<E>> {
    use BinaryOp::*;

    if let (Some(a), Some(b)) = (lhs.as_int(), rhs.as_int()) {
        let result = match op {
            Add => a.checked_add(b),
            Sub => a.checked_sub(b),
            Mul => a.checked_mul(b),
            Div => {
                if b == 0 {
                    return Err(Error {
                        cause: ErrorCause::DivisionByZero,
                        location,
                    });
                }
                // Floor division, like the host language of the original.
                a.checked_div(b).map(|q| {
                    if a % b != 0 && (a < 0) != (b < 0) {
                        q - 1
                    } else {
                        q
                    }
                })
            }
            Mod => {
                if b == 0 {
                    return Err(Error {
                        cause: ErrorCause::DivisionByZero,
                        location,
                    });
                }
                a.checked_rem(b).map(|r| {
                    if r != 0 && (r < 0) != (b < 0) {
                        r + b
                    } else {
                        r
                    }
                })
            }
        };
        return result.map(Value::Int).ok_or(Error {
            cause: ErrorCause::Overflow,
            location,
        });
    }

    match (op, &lhs, &rhs) {
        (Add, Value::Str(a), Value::Str(b)) => {
            let mut s = a.to_string();
            s.push_str(b);
            Ok(Value::string(s))
        }
        (Add, Value::List(a), Value::List(b)) => {
            let mut items = a.as_ref().clone();
            items.extend(b.iter().cloned());
            Ok(Value::List(Rc::new(items)))
        }
        (Add, Value::Tuple(a), Value::Tuple(b)) => {
            let mut items = a.as_ref().clone();
            items.extend(b.iter().cloned());
            Ok(Value::Tuple(Rc::new(items)))
        }
        (Mul, Value::Str(s), n) | (Mul, n, Value::Str(s)) if n.as_int().is_some() => {
            let n = n.as_int().unwrap().max(0) as usize;
            Ok(Value::string(s.repeat(n)))
        }
        (Mul, Value::List(items), n) | (Mul, n, Value::List(items)) if n.as_int().is_some() => {
            let n = n.as_int().unwrap().max(0) as usize;
            let mut result = Vec::with_capacity(items.len() * n);
            for _ in 0..n {
                result.extend(items.iter().cloned());
            }
            Ok(Value::List(Rc::new(result)))
        }
        _ => Err(type_error(
            format!(
                "unsupported operand types: {} and {}",
                lhs.type_name(),
                rhs.type_name()
            ),
            location,
        )),
    }
}

fn apply_compare<E>(
    op: CompareOp,
    lhs: Value,
    rhs: Value,
    location: Range<usize>,
) -> Result<Value, Error<E>> {
    use CompareOp::*;
    match op {
        Eq => Ok(Value::Bool(lhs == rhs)),
        Ne => Ok(Value::Bool(lhs != rhs)),
        Lt | Le | Gt | Ge => {
            let Some(ordering) = compare_values(&lhs, &rhs) else {
                return Err(type_error(
                    format!(
                        "cannot order values of types {} and {}",
                        lhs.type_name(),
                        rhs.type_name()
                    ),
                    location,
                ));
            };
            let result = match op {
                Lt => ordering == Ordering::Less,
                Le => ordering != Ordering::Greater,
                Gt => ordering == Ordering::Greater,
                Ge => ordering != Ordering::Less,
                _ => unreachable!(),
            };
            Ok(Value::Bool(result))
        }
        In | NotIn => {
            let contained = match &rhs {
                Value::Str(haystack) => match &lhs {
                    Value::Str(needle) => haystack.contains(needle.as_ref()),
                    _ => {
                        return Err(type_error(
                            format!("cannot search for {} in a string", lhs.type_name()),
                            location,
                        ));
                    }
                },
                Value::Tuple(items) | Value::List(items) => items.contains(&lhs),
                Value::Dict(pairs) => pairs.iter().any(|(key, _)| *key == lhs),
                _ => {
                    return Err(type_error(
                        format!("value of type {} is not a container", rhs.type_name()),
                        location,
                    ));
                }
            };
            Ok(Value::Bool(contained ^ (op == NotIn)))
        }
    }
}

fn index_value<E>(base: &Value, index: &Value, location: Range<usize>) -> Result<Value, Error<E>> {
    match base {
        Value::Str(s) => {
            let i = require_int(index, &location)?;
            let chars: Vec<char> = s.chars().collect();
            let position = resolve_index(i, chars.len()).ok_or(Error {
                cause: ErrorCause::IndexOutOfRange(i),
                location,
            })?;
            Ok(Value::string(chars[position].to_string()))
        }
        Value::Tuple(items) | Value::List(items) => {
            let i = require_int(index, &location)?;
            let position = resolve_index(i, items.len()).ok_or(Error {
                cause: ErrorCause::IndexOutOfRange(i),
                location,
            })?;
            Ok(items[position].clone())
        }
        Value::Dict(pairs) => pairs
            .iter()
            .find(|(key, _)| key == index)
            .map(|(_, value)| value.clone())
            .ok_or(Error {
                cause: ErrorCause::KeyNotFound(index.repr()),
                location,
            }),
        _ => Err(type_error(
            format!("value of type {} is not indexable", base.type_name()),
            location,
        )),
    }
}

fn require_int<E>(value: &Value, location: &Range<usize>) -> Result<i64, Error<E>> {
    value.as_int().ok_or_else(|| {
        type_error(
            format!("index must be an integer, not {}", value.type_name()),
            location.clone(),
        )
    })
}

/// Maps a possibly negative index into `0..len`.
fn resolve_index(index: i64, len: usize) -> Option<usize> {
    let len = i64::try_from(len).ok()?;
    let resolved = if index < 0 { index + len } else { index };
    if (0..len).contains(&resolved) {
        usize::try_from(resolved).ok()
    } else {
        None
    }
}

/// Dispatches `base.name(args)` for the supported string methods.
fn string_method<E>(
    base: &Value,
    name: &str,
    args: Vec<Value>,
    location: Range<usize>,
) -> Result<Value, Error<E>> {
    let Value::Str(s) = base else {
        return Err(Error {
            cause: ErrorCause::Attribute(name.to_string()),
            location,
        });
    };
    let arity = |expected: usize| -> Result<(), Error<E>> {
        if args.len() == expected {
            Ok(())
        } else {
            Err(Error {
                cause: ErrorCause::Arity(format!(
                    "method '{name}' takes {expected} arguments, got {}",
                    args.len()
                )),
                location: location.clone(),
            })
        }
    };
    let str_arg = |value: &Value| -> Result<Rc<str>, Error<E>> {
        match value {
            Value::Str(s) => Ok(Rc::clone(s)),
            other => Err(type_error(
                format!("method '{name}' expects a string, got {}", other.type_name()),
                location.clone(),
            )),
        }
    };

    match name {
        "lower" => {
            arity(0)?;
            Ok(Value::string(s.to_lowercase()))
        }
        "upper" => {
            arity(0)?;
            Ok(Value::string(s.to_uppercase()))
        }
        "strip" => {
            arity(0)?;
            Ok(Value::string(s.trim()))
        }
        "lstrip" => {
            arity(0)?;
            Ok(Value::string(s.trim_start()))
        }
        "rstrip" => {
            arity(0)?;
            Ok(Value::string(s.trim_end()))
        }
        "split" => {
            let parts: Vec<Value> = match args.len() {
                0 => s.split_whitespace().map(Value::string).collect(),
                1 => {
                    let sep = str_arg(&args[0])?;
                    s.split(sep.as_ref()).map(Value::string).collect()
                }
                found => {
                    return Err(Error {
                        cause: ErrorCause::Arity(format!(
                            "method 'split' takes at most 1 argument, got {found}"
                        )),
                        location,
                    });
                }
            };
            Ok(Value::List(Rc::new(parts)))
        }
        "join" => {
            arity(1)?;
            let Some(items) = args[0].sequence() else {
                return Err(type_error(
                    format!("'join' expects a sequence, got {}", args[0].type_name()),
                    location,
                ));
            };
            let mut pieces = Vec::with_capacity(items.len());
            for item in items {
                pieces.push(str_arg(item)?);
            }
            Ok(Value::string(pieces.join(s)))
        }
        "replace" => {
            arity(2)?;
            let from = str_arg(&args[0])?;
            let to = str_arg(&args[1])?;
            Ok(Value::string(s.replace(from.as_ref(), to.as_ref())))
        }
        "startswith" => {
            arity(1)?;
            let prefix = str_arg(&args[0])?;
            Ok(Value::Bool(s.starts_with(prefix.as_ref())))
        }
        "endswith" => {
            arity(1)?;
            let suffix = str_arg(&args[0])?;
            Ok(Value::Bool(s.ends_with(suffix.as_ref())))
        }
        "find" => {
            arity(1)?;
            let needle = str_arg(&args[0])?;
            match s.find(needle.as_ref()) {
                Some(byte_index) => {
                    let char_index = s[..byte_index].chars().count();
                    Ok(Value::Int(char_index as i64))
                }
                None => Ok(Value::Int(-1)),
            }
        }
        _ => Err(Error {
            cause: ErrorCause::Attribute(name.to_string()),
            location,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::Env;

    fn eval_str(source: &str) -> Result<Value, Error<NoMacroSupport>> {
        eval(source, &Env::new(), &mut NoMacros)
    }

    fn value(source: &str) -> Value {
        eval_str(source).unwrap()
    }

    #[test]
    fn arithmetic() {
        assert_eq!(value("1 + 2 * 3"), Value::Int(7));
        assert_eq!(value("(1 + 2) * 3"), Value::Int(9));
        assert_eq!(value("7 / 2"), Value::Int(3));
        assert_eq!(value("-7 / 2"), Value::Int(-4));
        assert_eq!(value("-7 % 2"), Value::Int(1));
        assert_eq!(value("7 % -2"), Value::Int(-1));
        assert_eq!(value("- - 3"), Value::Int(3));
    }

    #[test]
    fn division_by_zero() {
        assert_eq!(
            eval_str("1 / 0").unwrap_err().cause,
            ErrorCause::DivisionByZero
        );
        assert_eq!(
            eval_str("1 % 0").unwrap_err().cause,
            ErrorCause::DivisionByZero
        );
    }

    #[test]
    fn overflow() {
        assert_eq!(
            eval_str("9223372036854775807 + 1").unwrap_err().cause,
            ErrorCause::Overflow
        );
    }

    #[test]
    fn string_operations() {
        assert_eq!(value("'a' + 'b'"), Value::string("ab"));
        assert_eq!(value("'ab' * 3"), Value::string("ababab"));
        assert_eq!(value("'a' in 'abc'"), Value::Bool(true));
        assert_eq!(value("'x' not in 'abc'"), Value::Bool(true));
    }

    #[test]
    fn comparisons() {
        assert_eq!(value("1 < 2"), Value::Bool(true));
        assert_eq!(value("2 == 2"), Value::Bool(true));
        assert_eq!(value("'a' < 'b'"), Value::Bool(true));
        assert_eq!(value("2 == 'a'"), Value::Bool(false));
        assert_eq!(value("1 == True"), Value::Bool(true));
        assert!(matches!(
            eval_str("1 < 'a'").unwrap_err().cause,
            ErrorCause::Type(_)
        ));
    }

    #[test]
    fn boolean_operators_return_operands() {
        assert_eq!(value("0 or 5"), Value::Int(5));
        assert_eq!(value("2 and 3"), Value::Int(3));
        assert_eq!(value("0 and x"), Value::Int(0));
        assert_eq!(value("not 0"), Value::Bool(true));
    }

    #[test]
    fn indexing() {
        assert_eq!(value("(1, 2, 3)[0]"), Value::Int(1));
        assert_eq!(value("[1, 2, 3][-1]"), Value::Int(3));
        assert_eq!(value("'abc'[1]"), Value::string("b"));
        assert_eq!(value("{'a': 1}['a']"), Value::Int(1));
        assert!(matches!(
            eval_str("[1][5]").unwrap_err().cause,
            ErrorCause::IndexOutOfRange(5)
        ));
        assert!(matches!(
            eval_str("{'a': 1}['b']").unwrap_err().cause,
            ErrorCause::KeyNotFound(_)
        ));
    }

    #[test]
    fn undefined_name_reports_its_range() {
        let e = eval_str("1 + nope").unwrap_err();
        assert_eq!(e.cause, ErrorCause::Undefined("nope".to_string()));
        assert_eq!(e.location, 4..8);
    }

    #[test]
    fn variables_resolve_through_the_environment() {
        let env = Env::new();
        env.assign("x", Value::Int(42)).unwrap();
        assert_eq!(
            eval("x + 1", &env, &mut NoMacros).unwrap(),
            Value::Int(43)
        );
    }

    #[test]
    fn lambdas_close_over_their_environment() {
        let env = Env::new();
        env.assign("n", Value::Int(10)).unwrap();
        env.assign(
            "add",
            eval("lambda x: x + n", &env, &mut NoMacros).unwrap(),
        )
        .unwrap();
        assert_eq!(
            eval("add(5)", &env, &mut NoMacros).unwrap(),
            Value::Int(15)
        );
    }

    #[test]
    fn lambda_defaults_and_variadics() {
        let env = Env::new();
        env.assign(
            "f",
            eval("lambda a, b=2, *rest: (a, b, rest)", &env, &mut NoMacros).unwrap(),
        )
        .unwrap();
        assert_eq!(
            eval("f(1)", &env, &mut NoMacros).unwrap().to_string(),
            "(1, 2, [])"
        );
        assert_eq!(
            eval("f(1, 5, 7, 9)", &env, &mut NoMacros).unwrap().to_string(),
            "(1, 5, [7, 9])"
        );
    }

    #[test]
    fn keyword_arguments_bind_by_name() {
        let env = Env::new();
        env.assign(
            "f",
            eval("lambda a, b: (a, b)", &env, &mut NoMacros).unwrap(),
        )
        .unwrap();
        assert_eq!(
            eval("f(b=2, a=1)", &env, &mut NoMacros).unwrap().to_string(),
            "(1, 2)"
        );
    }

    #[test]
    fn arity_errors() {
        let env = Env::new();
        env.assign("f", eval("lambda a: a", &env, &mut NoMacros).unwrap())
            .unwrap();
        assert!(matches!(
            eval("f()", &env, &mut NoMacros).unwrap_err().cause,
            ErrorCause::Arity(_)
        ));
        assert!(matches!(
            eval("f(1, 2)", &env, &mut NoMacros).unwrap_err().cause,
            ErrorCause::Arity(_)
        ));
        assert!(matches!(
            eval("f(1, z=2)", &env, &mut NoMacros).unwrap_err().cause,
            ErrorCause::Keyword(_)
        ));
        assert!(matches!(
            eval("f(1, a=2)", &env, &mut NoMacros).unwrap_err().cause,
            ErrorCause::Keyword(_)
        ));
    }

    #[test]
    fn string_methods() {
        assert_eq!(value("'AbC'.lower()"), Value::string("abc"));
        assert_eq!(value("'a b'.upper()"), Value::string("A B"));
        assert_eq!(value("'  x '.strip()"), Value::string("x"));
        assert_eq!(value("'a,b'.split(',')").to_string(), "['a', 'b']");
        assert_eq!(value("', '.join(['a', 'b'])"), Value::string("a, b"));
        assert_eq!(value("'abc'.replace('b', 'x')"), Value::string("axc"));
        assert_eq!(value("'abc'.startswith('ab')"), Value::Bool(true));
        assert_eq!(value("'abc'.find('c')"), Value::Int(2));
        assert_eq!(value("'abc'.find('z')"), Value::Int(-1));
    }

    #[test]
    fn unknown_method_is_an_attribute_error() {
        assert!(matches!(
            eval_str("'a'.frobnicate()").unwrap_err().cause,
            ErrorCause::Attribute(_)
        ));
    }

    #[test]
    fn calling_a_non_callable_fails() {
        assert!(matches!(
            eval_str("1(2)").unwrap_err().cause,
            ErrorCause::NotCallable("int")
        ));
    }
}
