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

//! Syntax tree the tree builder produces and the renderer walks
//!
//! Expressions stay unparsed `String`s in the tree: their grammar belongs to
//! the embedded expression language, which evaluates them against the
//! environment active at render time.

use crate::source::Location;

/// Assignment or loop target: a single name or a tuple of names
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Target {
    Name(String),
    /// Unpacking target, `a, b` or `(a, b)`
    Tuple(Vec<String>),
}

impl Target {
    /// Returns the names bound by this target.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        match self {
            Target::Name(name) => std::slice::from_ref(name).iter(),
            Target::Tuple(names) => names.iter(),
        }
        .map(String::as_str)
    }
}

/// Signature of a macro or lambda
///
/// `D` is the representation of default values: unparsed expression text for
/// macro definitions, parsed expressions for lambdas.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ParamSpec<D> {
    /// Parameters that must be supplied by the caller, in order
    pub required: Vec<String>,
    /// Parameters with default values, in order
    pub optional: Vec<(String, D)>,
    /// Name capturing excess positional arguments (`*args`)
    pub var_positional: Option<String>,
    /// Name capturing excess keyword arguments (`**kwargs`)
    pub var_keyword: Option<String>,
}

impl<D> ParamSpec<D> {
    /// A signature taking no arguments at all.
    #[must_use]
    pub fn empty() -> Self {
        ParamSpec {
            required: Vec::new(),
            optional: Vec::new(),
            var_positional: None,
            var_keyword: None,
        }
    }

    /// Iterates over all declared parameter names.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.required
            .iter()
            .map(String::as_str)
            .chain(self.optional.iter().map(|(n, _)| n.as_str()))
            .chain(self.var_positional.as_deref())
            .chain(self.var_keyword.as_deref())
    }
}

/// One branch of an [`IfNode`]: condition (absent for `else`) and body
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Branch {
    pub condition: Option<String>,
    pub location: Location,
    pub body: Vec<Node>,
}

/// Conditional construct
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct IfNode {
    pub branches: Vec<Branch>,
    pub inline: bool,
    pub location: Location,
}

/// Loop construct
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ForNode {
    pub target: Target,
    pub iterable: String,
    pub body: Vec<Node>,
    pub inline: bool,
    pub location: Location,
}

/// Macro definition
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DefNode {
    pub name: String,
    pub params: ParamSpec<String>,
    pub body: Vec<Node>,
    pub location: Location,
}

/// Body of one argument slot of a [`CallNode`]
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SlotBody {
    /// Rendered to text and passed as a string argument
    Nodes(Vec<Node>),
    /// Evaluated as an expression and passed as a value
    Expr(String),
}

/// One argument slot of a [`CallNode`], optionally labelled with a keyword
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ArgSlot {
    pub name: Option<String>,
    pub body: SlotBody,
    pub location: Location,
}

/// Macro or helper invocation: `call`/`block` constructs and direct calls
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CallNode {
    /// Expression resolving to the callable
    pub callee: String,
    /// Leading identifier of the callee, matched against named closers
    pub name: String,
    pub slots: Vec<ArgSlot>,
    pub inline: bool,
    pub location: Location,
}

/// Variable binding, `set target [= expr]`
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SetNode {
    pub target: Target,
    /// Absent right-hand side binds the target to none.
    pub rhs: Option<String>,
    pub location: Location,
}

/// Name list payload of `del` and `global`
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NamesNode {
    pub names: Vec<String>,
    pub location: Location,
}

/// File inclusion
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct IncludeNode {
    pub path: String,
    pub location: Location,
}

/// Region whose rendered output is discarded
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MuteNode {
    pub body: Vec<Node>,
    pub location: Location,
}

/// Expression output, `${expr}$` or `$:expr`
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EvalNode {
    pub expr: String,
    pub inline: bool,
    pub location: Location,
}

/// `stop expr` and `assert expr`
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StopNode {
    pub expr: String,
    /// An assert only stops when its expression is falsy.
    pub assert: bool,
    pub location: Location,
}

/// Node of the directive tree
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Node {
    Text(String, Location),
    If(IfNode),
    For(ForNode),
    Def(DefNode),
    Call(CallNode),
    Set(SetNode),
    Del(NamesNode),
    Global(NamesNode),
    Include(IncludeNode),
    Mute(MuteNode),
    Eval(EvalNode),
    Stop(StopNode),
    Comment(Location),
}

impl Node {
    /// Returns the source region the node covers.
    #[must_use]
    pub fn location(&self) -> &Location {
        match self {
            Node::Text(_, location) | Node::Comment(location) => location,
            Node::If(n) => &n.location,
            Node::For(n) => &n.location,
            Node::Def(n) => &n.location,
            Node::Call(n) => &n.location,
            Node::Set(n) => &n.location,
            Node::Del(n) | Node::Global(n) => &n.location,
            Node::Include(n) => &n.location,
            Node::Mute(n) => &n.location,
            Node::Eval(n) => &n.location,
            Node::Stop(n) => &n.location,
        }
    }
}
