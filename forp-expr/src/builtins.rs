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

//! Builtin functions of the expression language
//!
//! The environment functions (`defined`, `getvar`, `setvar`, `delvar`,
//! `globalvar`) read and mutate the scope chain of the calling context;
//! their names are reserved. The rest is a small conversion and sequence
//! library; those names can be shadowed like any other binding.

use crate::env::Env;
use crate::value::{Builtin, Value, compare_values};
use crate::{Error, ErrorCause};
use forp_syntax::parser::is_name;
use std::cmp::Ordering;
use std::ops::Range;
use std::rc::Rc;

/// Invokes a builtin function.
pub(crate) fn call<E>(
    builtin: Builtin,
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
    env: &Env,
    location: Range<usize>,
) -> Result<Value, Error<E>> {
    let ctx = Context {
        builtin,
        location: location.clone(),
    };
    if let Some((name, _)) = kwargs.first() {
        return Err(Error {
            cause: ErrorCause::Keyword(format!(
                "{}() takes no keyword arguments, got '{name}'",
                builtin.name()
            )),
            location,
        });
    }
    match builtin {
        Builtin::Defined => {
            let [name] = ctx.exactly(args)?;
            let name = ctx.string(&name)?;
            Ok(Value::Bool(env.is_defined(&name)))
        }
        Builtin::Getvar => {
            let (name, default) = match args.len() {
                1 => {
                    let [name] = ctx.exactly(args)?;
                    (name, None)
                }
                _ => {
                    let [name, default] = ctx.exactly(args)?;
                    (name, Some(default))
                }
            };
            let name = ctx.string(&name)?;
            match env.lookup(&name) {
                Some(value) => Ok(value),
                None => default.ok_or(Error {
                    cause: ErrorCause::Undefined(name),
                    location,
                }),
            }
        }
        Builtin::Setvar => {
            if args.is_empty() || args.len() % 2 != 0 {
                return Err(ctx.arity_error("expects name and value pairs", args.len()));
            }
            let mut iter = args.into_iter();
            while let (Some(names), Some(value)) = (iter.next(), iter.next()) {
                let names = ctx.name_list(&names)?;
                ctx.unpack_assign(env, &names, value)?;
            }
            Ok(Value::None)
        }
        Builtin::Delvar => {
            if args.is_empty() {
                return Err(ctx.arity_error("expects at least 1 argument", 0));
            }
            for arg in &args {
                for name in ctx.name_list(arg)? {
                    env.delete(&name).map_err(|e| ctx.env_error(e))?;
                }
            }
            Ok(Value::None)
        }
        Builtin::Globalvar => {
            if args.is_empty() {
                return Err(ctx.arity_error("expects at least 1 argument", 0));
            }
            for arg in &args {
                for name in ctx.name_list(arg)? {
                    env.declare_global(&name).map_err(|e| ctx.env_error(e))?;
                }
            }
            Ok(Value::None)
        }
        Builtin::Str => {
            let [value] = ctx.exactly(args)?;
            Ok(Value::string(value.to_string()))
        }
        Builtin::Repr => {
            let [value] = ctx.exactly(args)?;
            Ok(Value::string(value.repr()))
        }
        Builtin::Int => {
            let [value] = ctx.exactly(args)?;
            match &value {
                Value::Int(_) | Value::Bool(_) => Ok(Value::Int(value.as_int().unwrap())),
                Value::Str(s) => s.trim().parse().map(Value::Int).map_err(|_| {
                    ctx.type_error(format!("cannot convert {} to an integer", value.repr()))
                }),
                other => Err(ctx.type_error(format!(
                    "cannot convert {} to an integer",
                    other.type_name()
                ))),
            }
        }
        Builtin::Bool => {
            let [value] = ctx.exactly(args)?;
            Ok(Value::Bool(value.truthy()))
        }
        Builtin::Len => {
            let [value] = ctx.exactly(args)?;
            let len = match &value {
                Value::Str(s) => s.chars().count(),
                Value::Tuple(items) | Value::List(items) => items.len(),
                Value::Dict(pairs) => pairs.len(),
                other => {
                    return Err(
                        ctx.type_error(format!("value of type {} has no length", other.type_name()))
                    );
                }
            };
            Ok(Value::Int(len as i64))
        }
        Builtin::Range => {
            let (start, stop, step) = match args.len() {
                1 => {
                    let [stop] = ctx.exactly(args)?;
                    (0, ctx.int(&stop)?, 1)
                }
                2 => {
                    let [start, stop] = ctx.exactly(args)?;
                    (ctx.int(&start)?, ctx.int(&stop)?, 1)
                }
                _ => {
                    let [start, stop, step] = ctx.exactly(args)?;
                    (ctx.int(&start)?, ctx.int(&stop)?, ctx.int(&step)?)
                }
            };
            if step == 0 {
                return Err(ctx.type_error("range() step must not be zero".to_string()));
            }
            let mut items = Vec::new();
            let mut current = start;
            while (step > 0 && current < stop) || (step < 0 && current > stop) {
                items.push(Value::Int(current));
                current += step;
            }
            Ok(Value::List(Rc::new(items)))
        }
        Builtin::Sum => {
            let [value] = ctx.exactly(args)?;
            let Some(items) = value.sequence() else {
                return Err(ctx.type_error(format!(
                    "sum() expects a sequence, got {}",
                    value.type_name()
                )));
            };
            let mut total: i64 = 0;
            for item in items {
                let term = ctx.int(item)?;
                total = total.checked_add(term).ok_or(Error {
                    cause: ErrorCause::Overflow,
                    location: ctx.location.clone(),
                })?;
            }
            Ok(Value::Int(total))
        }
        Builtin::Min | Builtin::Max => {
            let items: Vec<Value> = if args.len() == 1 {
                match args[0].sequence() {
                    Some(items) => items.to_vec(),
                    None => args,
                }
            } else {
                args
            };
            if items.is_empty() {
                return Err(ctx.type_error(format!("{}() of an empty sequence", builtin.name())));
            }
            let mut best = items[0].clone();
            for item in &items[1..] {
                let Some(ordering) = compare_values(item, &best) else {
                    return Err(ctx.type_error(format!(
                        "cannot order values of types {} and {}",
                        item.type_name(),
                        best.type_name()
                    )));
                };
                let better = match builtin {
                    Builtin::Min => ordering == Ordering::Less,
                    _ => ordering == Ordering::Greater,
                };
                if better {
                    best = item.clone();
                }
            }
            Ok(best)
        }
        Builtin::Abs => {
            let [value] = ctx.exactly(args)?;
            let i = ctx.int(&value)?;
            i.checked_abs().map(Value::Int).ok_or(Error {
                cause: ErrorCause::Overflow,
                location,
            })
        }
    }
}

struct Context {
    builtin: Builtin,
    location: Range<usize>,
}

impl Context {
    fn arity_error<E>(&self, detail: &str, found: usize) -> Error<E> {
        Error {
            cause: ErrorCause::Arity(format!(
                "{}() {detail}, got {found}",
                self.builtin.name()
            )),
            location: self.location.clone(),
        }
    }

    fn type_error<E>(&self, message: String) -> Error<E> {
        Error {
            cause: ErrorCause::Type(message),
            location: self.location.clone(),
        }
    }

    fn env_error<E>(&self, e: crate::env::EnvError) -> Error<E> {
        Error {
            cause: ErrorCause::Env(e),
            location: self.location.clone(),
        }
    }

    fn exactly<const N: usize, E>(&self, args: Vec<Value>) -> Result<[Value; N], Error<E>> {
        let found = args.len();
        args.try_into()
            .map_err(|_| self.arity_error(&format!("takes {N} arguments"), found))
    }

    fn string<E>(&self, value: &Value) -> Result<String, Error<E>> {
        match value {
            Value::Str(s) => Ok(s.to_string()),
            other => Err(self.type_error(format!(
                "{}() expects a string, got {}",
                self.builtin.name(),
                other.type_name()
            ))),
        }
    }

    fn int<E>(&self, value: &Value) -> Result<i64, Error<E>> {
        value.as_int().ok_or_else(|| {
            self.type_error(format!(
                "{}() expects an integer, got {}",
                self.builtin.name(),
                value.type_name()
            ))
        })
    }

    /// Parses a variable name string into a list of names.
    ///
    /// Accepts `x`, `x, y` and `(x, y)`, like the `set` directive's target.
    fn name_list<E>(&self, value: &Value) -> Result<Vec<String>, Error<E>> {
        let text = self.string(value)?;
        let trimmed = text.trim();
        let inner = match trimmed.strip_prefix('(') {
            Some(rest) => match rest.strip_suffix(')') {
                Some(inner) => inner,
                None => return Err(self.bad_names(&text)),
            },
            None => trimmed,
        };
        let names: Vec<String> = inner.split(',').map(|n| n.trim().to_string()).collect();
        if names.iter().all(|n| is_name(n)) {
            Ok(names)
        } else {
            Err(self.bad_names(&text))
        }
    }

    fn bad_names<E>(&self, text: &str) -> Error<E> {
        self.type_error(format!("invalid variable name '{text}'"))
    }

    /// Assigns a value to one name, or unpacks it over several.
    fn unpack_assign<E>(&self, env: &Env, names: &[String], value: Value) -> Result<(), Error<E>> {
        if names.len() == 1 {
            return env.assign(&names[0], value).map_err(|e| self.env_error(e));
        }
        let Some(items) = value.sequence() else {
            return Err(self.type_error(format!(
                "cannot unpack value of type {}",
                value.type_name()
            )));
        };
        if items.len() != names.len() {
            return Err(Error {
                cause: ErrorCause::Unpack {
                    expected: names.len(),
                    found: items.len(),
                },
                location: self.location.clone(),
            });
        }
        for (name, item) in names.iter().zip(items.iter().cloned()) {
            env.assign(name, item).map_err(|e| self.env_error(e))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::{NoMacros, eval};

    fn eval_in(env: &Env, source: &str) -> Value {
        eval(source, env, &mut NoMacros).unwrap()
    }

    #[test]
    fn defined_and_getvar() {
        let env = Env::new();
        assert_eq!(eval_in(&env, "defined('X')"), Value::Bool(false));
        env.assign("X", Value::Int(1)).unwrap();
        assert_eq!(eval_in(&env, "defined('X')"), Value::Bool(true));
        assert_eq!(eval_in(&env, "getvar('X')"), Value::Int(1));
        assert_eq!(eval_in(&env, "getvar('Y', 7)"), Value::Int(7));
        assert!(matches!(
            eval("getvar('Y')", &env, &mut NoMacros).unwrap_err().cause,
            ErrorCause::Undefined(_)
        ));
    }

    #[test]
    fn setvar_binds_variables() {
        let env = Env::new();
        assert_eq!(eval_in(&env, "setvar('x', 2)"), Value::None);
        assert_eq!(env.lookup("x"), Some(Value::Int(2)));
        eval_in(&env, "setvar('a, b', (1, 2))");
        assert_eq!(env.lookup("a"), Some(Value::Int(1)));
        assert_eq!(env.lookup("b"), Some(Value::Int(2)));
        eval_in(&env, "setvar('(c, d)', (3, 4))");
        assert_eq!(env.lookup("c"), Some(Value::Int(3)));
        eval_in(&env, "setvar('e', 5, 'f', 6)");
        assert_eq!(env.lookup("f"), Some(Value::Int(6)));
    }

    #[test]
    fn setvar_with_odd_arguments_is_an_error() {
        let env = Env::new();
        assert!(matches!(
            eval("setvar('i', 1, 'j')", &env, &mut NoMacros)
                .unwrap_err()
                .cause,
            ErrorCause::Arity(_)
        ));
    }

    #[test]
    fn setvar_unpack_mismatch_is_an_error() {
        let env = Env::new();
        assert!(matches!(
            eval("setvar('a, b', (1, 2, 3))", &env, &mut NoMacros)
                .unwrap_err()
                .cause,
            ErrorCause::Unpack {
                expected: 2,
                found: 3
            }
        ));
    }

    #[test]
    fn delvar_removes_bindings() {
        let env = Env::new();
        env.assign("X", Value::Int(1)).unwrap();
        env.assign("Y", Value::Int(2)).unwrap();
        eval_in(&env, "delvar('X, Y')");
        assert_eq!(env.lookup("X"), None);
        assert_eq!(env.lookup("Y"), None);
        assert!(matches!(
            eval("delvar('X')", &env, &mut NoMacros).unwrap_err().cause,
            ErrorCause::Env(_)
        ));
    }

    #[test]
    fn globalvar_declares_globals() {
        let env = Env::new();
        let mac = env.push(crate::env::ScopeKind::Macro);
        eval_in(&mac, "globalvar('A')");
        eval_in(&mac, "setvar('A', 2)");
        assert_eq!(env.lookup("A"), Some(Value::Int(2)));
    }

    #[test]
    fn conversions() {
        let env = Env::new();
        assert_eq!(eval_in(&env, "str(12)"), Value::string("12"));
        assert_eq!(eval_in(&env, "repr('a')"), Value::string("'a'"));
        assert_eq!(eval_in(&env, "int('42')"), Value::Int(42));
        assert_eq!(eval_in(&env, "int(True)"), Value::Int(1));
        assert_eq!(eval_in(&env, "bool([])"), Value::Bool(false));
        assert!(matches!(
            eval("int('x')", &env, &mut NoMacros).unwrap_err().cause,
            ErrorCause::Type(_)
        ));
    }

    #[test]
    fn sequence_functions() {
        let env = Env::new();
        assert_eq!(eval_in(&env, "len('abc')"), Value::Int(3));
        assert_eq!(eval_in(&env, "len((1, 2))"), Value::Int(2));
        assert_eq!(eval_in(&env, "range(3)").to_string(), "[0, 1, 2]");
        assert_eq!(eval_in(&env, "range(1, 4)").to_string(), "[1, 2, 3]");
        assert_eq!(eval_in(&env, "range(4, 0, -2)").to_string(), "[4, 2]");
        assert_eq!(eval_in(&env, "sum([1, 2, 3])"), Value::Int(6));
        assert_eq!(eval_in(&env, "min(3, 1, 2)"), Value::Int(1));
        assert_eq!(eval_in(&env, "max([3, 1, 2])"), Value::Int(3));
        assert_eq!(eval_in(&env, "abs(-5)"), Value::Int(5));
    }
}
