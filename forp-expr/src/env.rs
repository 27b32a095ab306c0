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

//! Scoped environments
//!
//! Scopes form a parent-linked chain shared via `Rc`: the read-only builtin
//! scope at the root, the per-file global scope below it, one macro-local
//! scope per macro or lambda invocation, and block-local scopes for loop
//! iterations and call bodies. Macro closures hold an [`Env`] pointing into
//! the middle of the chain, which keeps their defining scopes alive after
//! the defining frame is gone. The chain is a tree rooted at the global
//! scope, so no reference cycles can form.
//!
//! Name lookup walks the whole chain. Assignment searches for an existing
//! binding from the inside out but never crosses a macro-local scope (or the
//! global scope outside of any macro): a loop body updates enclosing
//! bindings, a macro body cannot touch its caller's or the file's bindings
//! unless the name was declared global.

use crate::value::{Builtin, Value};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::rc::Rc;
use thiserror::Error;

/// Role of a scope in the chain
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ScopeKind {
    /// Read-only root holding builtins and predefined variables
    Builtins,
    /// Per-file scope that `global` declarations write into
    Global,
    /// Per-invocation scope of a macro or lambda
    Macro,
    /// Per-iteration or per-call-body scope
    Block,
}

struct Scope {
    kind: ScopeKind,
    parent: Option<Rc<Scope>>,
    vars: RefCell<HashMap<String, Value>>,
    globals: RefCell<HashSet<String>>,
}

/// Handle to the innermost scope of a chain
#[derive(Clone)]
pub struct Env {
    scope: Rc<Scope>,
}

/// Names bound dynamically by the renderer and protected from user rebinding
pub const PREDEFINED: &[&str] = &[
    "_LINE_",
    "_FILE_",
    "_THIS_LINE_",
    "_THIS_FILE_",
    "_DATE_",
    "_TIME_",
    "_SYSTEM_",
    "_MACHINE_",
];

/// Builtin function names that user code may not rebind
const RESERVED_FUNCTIONS: &[&str] = &["defined", "getvar", "setvar", "delvar", "globalvar"];

/// Whether user code is forbidden to bind or delete `name`.
#[must_use]
pub fn is_reserved(name: &str) -> bool {
    name.starts_with("__") || PREDEFINED.contains(&name) || RESERVED_FUNCTIONS.contains(&name)
}

/// Errors from environment manipulation
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum EnvError {
    /// The name may not be bound, rebound or deleted by user code.
    #[error("name '{0}' is reserved")]
    Reserved(String),

    /// The name has no binding to read or delete.
    #[error("name '{0}' is not defined")]
    Undefined(String),

    /// `global` was declared for a name already bound in the current scope.
    #[error("name '{0}' is already defined in the current scope")]
    AlreadyLocal(String),
}

impl Env {
    /// Creates a fresh chain of a builtin scope and a global scope.
    ///
    /// The builtin functions are bound in the root scope; the predefined
    /// variables start out as none and are filled in by the renderer.
    #[must_use]
    pub fn new() -> Env {
        let builtins = Rc::new(Scope {
            kind: ScopeKind::Builtins,
            parent: None,
            vars: RefCell::new(
                Builtin::all()
                    .iter()
                    .map(|&b| (b.name().to_string(), Value::Builtin(b)))
                    .collect(),
            ),
            globals: RefCell::new(HashSet::new()),
        });
        let global = Rc::new(Scope {
            kind: ScopeKind::Global,
            parent: Some(builtins),
            vars: RefCell::new(HashMap::new()),
            globals: RefCell::new(HashSet::new()),
        });
        Env { scope: global }
    }

    /// Opens a child scope of the given kind.
    #[must_use]
    pub fn push(&self, kind: ScopeKind) -> Env {
        debug_assert!(matches!(kind, ScopeKind::Macro | ScopeKind::Block));
        Env {
            scope: Rc::new(Scope {
                kind,
                parent: Some(Rc::clone(&self.scope)),
                vars: RefCell::new(HashMap::new()),
                globals: RefCell::new(HashSet::new()),
            }),
        }
    }

    /// Kind of the innermost scope.
    #[must_use]
    pub fn kind(&self) -> ScopeKind {
        self.scope.kind
    }

    /// Looks a name up through the whole chain.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<Value> {
        let mut scope = Some(&self.scope);
        while let Some(s) = scope {
            if let Some(value) = s.vars.borrow().get(name) {
                return Some(value.clone());
            }
            scope = s.parent.as_ref();
        }
        None
    }

    /// Whether a name is bound anywhere in the chain.
    #[must_use]
    pub fn is_defined(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }

    /// Assigns under the scoping rules.
    ///
    /// Writes into the nearest scope of the assignment region that already
    /// binds the name, into the global scope if the name was declared global
    /// in the current scope, and into the current scope otherwise.
    pub fn assign(&self, name: &str, value: Value) -> Result<(), EnvError> {
        if is_reserved(name) {
            return Err(EnvError::Reserved(name.to_string()));
        }
        if self.scope.globals.borrow().contains(name) {
            self.global_scope()
                .vars
                .borrow_mut()
                .insert(name.to_string(), value);
            return Ok(());
        }
        let mut scope = &self.scope;
        loop {
            if scope.vars.borrow().contains_key(name) {
                scope.vars.borrow_mut().insert(name.to_string(), value);
                return Ok(());
            }
            match scope.kind {
                ScopeKind::Block => scope = scope.parent.as_ref().unwrap(),
                _ => break,
            }
        }
        self.scope
            .vars
            .borrow_mut()
            .insert(name.to_string(), value);
        Ok(())
    }

    /// Binds a name directly in the current scope.
    pub fn define(&self, name: &str, value: Value) -> Result<(), EnvError> {
        if is_reserved(name) {
            return Err(EnvError::Reserved(name.to_string()));
        }
        self.scope
            .vars
            .borrow_mut()
            .insert(name.to_string(), value);
        Ok(())
    }

    /// Marks a name as global in the current scope.
    pub fn declare_global(&self, name: &str) -> Result<(), EnvError> {
        if is_reserved(name) {
            return Err(EnvError::Reserved(name.to_string()));
        }
        if self.scope.kind != ScopeKind::Global && self.scope.vars.borrow().contains_key(name) {
            return Err(EnvError::AlreadyLocal(name.to_string()));
        }
        self.scope.globals.borrow_mut().insert(name.to_string());
        Ok(())
    }

    /// Removes the nearest binding within the assignment region.
    pub fn delete(&self, name: &str) -> Result<(), EnvError> {
        if is_reserved(name) {
            return Err(EnvError::Reserved(name.to_string()));
        }
        let mut scope = &self.scope;
        loop {
            if scope.vars.borrow_mut().remove(name).is_some() {
                return Ok(());
            }
            match scope.kind {
                ScopeKind::Block => scope = scope.parent.as_ref().unwrap(),
                _ => return Err(EnvError::Undefined(name.to_string())),
            }
        }
    }

    /// Returns a handle on the global scope of this chain.
    #[must_use]
    pub fn global(&self) -> Env {
        Env {
            scope: Rc::clone(self.global_scope_rc()),
        }
    }

    fn global_scope(&self) -> &Scope {
        self.global_scope_rc()
    }

    fn global_scope_rc(&self) -> &Rc<Scope> {
        let mut scope = &self.scope;
        while scope.kind != ScopeKind::Global {
            scope = scope.parent.as_ref().expect("chain must contain a global scope");
        }
        scope
    }

    /// Overwrites a predefined variable in the builtin scope.
    ///
    /// This bypasses the reservation check; it is how the renderer maintains
    /// `_LINE_`, `_FILE_` and friends.
    pub fn set_predefined(&self, name: &str, value: Value) {
        let mut scope = &self.scope;
        while scope.kind != ScopeKind::Builtins {
            scope = scope.parent.as_ref().expect("chain must be rooted in builtins");
        }
        scope.vars.borrow_mut().insert(name.to_string(), value);
    }
}

impl Default for Env {
    fn default() -> Self {
        Env::new()
    }
}

/// Shallow representation; scopes can reach themselves through closures.
impl fmt::Debug for Env {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<String> = self.scope.vars.borrow().keys().cloned().collect();
        names.sort();
        f.debug_struct("Env")
            .field("kind", &self.scope.kind)
            .field("names", &names)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_walks_the_chain() {
        let global = Env::new();
        global.assign("x", Value::Int(1)).unwrap();
        let inner = global.push(ScopeKind::Macro).push(ScopeKind::Block);
        assert_eq!(inner.lookup("x"), Some(Value::Int(1)));
        assert_eq!(inner.lookup("defined"), Some(Value::Builtin(Builtin::Defined)));
        assert_eq!(inner.lookup("y"), None);
    }

    #[test]
    fn block_assignment_updates_enclosing_binding() {
        let global = Env::new();
        global.assign("x", Value::Int(1)).unwrap();
        let block = global.push(ScopeKind::Block);
        block.assign("x", Value::Int(2)).unwrap();
        assert_eq!(global.lookup("x"), Some(Value::Int(2)));
    }

    #[test]
    fn block_assignment_of_new_name_stays_local() {
        let global = Env::new();
        let block = global.push(ScopeKind::Block);
        block.assign("x", Value::Int(2)).unwrap();
        assert_eq!(global.lookup("x"), None);
        assert_eq!(block.lookup("x"), Some(Value::Int(2)));
    }

    #[test]
    fn macro_scope_shields_the_global_binding() {
        let global = Env::new();
        global.assign("x", Value::Int(1)).unwrap();
        let mac = global.push(ScopeKind::Macro);
        mac.assign("x", Value::Int(2)).unwrap();
        assert_eq!(global.lookup("x"), Some(Value::Int(1)));
        assert_eq!(mac.lookup("x"), Some(Value::Int(2)));
    }

    #[test]
    fn block_inside_macro_updates_the_macro_local() {
        let global = Env::new();
        let mac = global.push(ScopeKind::Macro);
        mac.assign("x", Value::Int(1)).unwrap();
        let block = mac.push(ScopeKind::Block);
        block.assign("x", Value::Int(2)).unwrap();
        assert_eq!(mac.lookup("x"), Some(Value::Int(2)));
        assert_eq!(global.lookup("x"), None);
    }

    #[test]
    fn global_declaration_routes_assignments() {
        let global = Env::new();
        let mac = global.push(ScopeKind::Macro);
        mac.declare_global("x").unwrap();
        mac.assign("x", Value::Int(5)).unwrap();
        assert_eq!(global.lookup("x"), Some(Value::Int(5)));
    }

    #[test]
    fn global_declaration_after_local_binding_is_an_error() {
        let global = Env::new();
        let mac = global.push(ScopeKind::Macro);
        mac.assign("x", Value::Int(1)).unwrap();
        assert_eq!(
            mac.declare_global("x"),
            Err(EnvError::AlreadyLocal("x".to_string()))
        );
    }

    #[test]
    fn global_declaration_at_global_scope_is_allowed() {
        let global = Env::new();
        global.assign("x", Value::Int(1)).unwrap();
        assert_eq!(global.declare_global("x"), Ok(()));
    }

    #[test]
    fn reserved_names_cannot_be_bound() {
        let env = Env::new();
        assert_matches::assert_matches!(
            env.assign("__x", Value::Int(1)),
            Err(EnvError::Reserved(_))
        );
        assert_matches::assert_matches!(
            env.assign("_LINE_", Value::Int(1)),
            Err(EnvError::Reserved(_))
        );
        assert_matches::assert_matches!(
            env.define("defined", Value::Int(1)),
            Err(EnvError::Reserved(_))
        );
        assert_matches::assert_matches!(env.delete("getvar"), Err(EnvError::Reserved(_)));
    }

    #[test]
    fn delete_removes_the_nearest_binding() {
        let global = Env::new();
        global.assign("x", Value::Int(1)).unwrap();
        let block = global.push(ScopeKind::Block);
        block.define("x", Value::Int(2)).unwrap();
        block.delete("x").unwrap();
        assert_eq!(block.lookup("x"), Some(Value::Int(1)));
        block.delete("x").unwrap();
        assert_eq!(block.lookup("x"), None);
        assert_eq!(
            block.delete("x"),
            Err(EnvError::Undefined("x".to_string()))
        );
    }

    #[test]
    fn delete_does_not_cross_a_macro_boundary() {
        let global = Env::new();
        global.assign("x", Value::Int(1)).unwrap();
        let mac = global.push(ScopeKind::Macro);
        assert_eq!(mac.delete("x"), Err(EnvError::Undefined("x".to_string())));
    }

    #[test]
    fn predefined_variables_are_visible_everywhere() {
        let env = Env::new();
        env.set_predefined("_LINE_", Value::Int(12));
        let inner = env.push(ScopeKind::Macro);
        assert_eq!(inner.lookup("_LINE_"), Some(Value::Int(12)));
    }
}
