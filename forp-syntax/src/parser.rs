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

//! Assembling the token stream into a directive tree
//!
//! The builder runs a shift/reduce pass over the tokens with a stack of open
//! block contexts. Openers push a context, continuations (`elif`, `else`,
//! `nextarg`, `contains`) splice a new branch or argument slot into the
//! innermost context, closers pop it. A line-form opener can only be
//! continued and closed in line form, an inline opener only inline, and a
//! named closer must repeat the opener's name.

use crate::lexer::{Token, unescape_text};
use crate::source::Location;
use crate::syntax::{
    ArgSlot, Branch, CallNode, DefNode, EvalNode, ForNode, IfNode, IncludeNode, MuteNode,
    NamesNode, Node, ParamSpec, SetNode, SlotBody, StopNode, Target,
};
use thiserror::Error;

/// Errors detected while grouping tokens into a tree
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum BuildError {
    /// A directive keyword is not known.
    #[error("unknown directive '{keyword}'")]
    UnknownDirective { keyword: String, location: Location },

    /// A directive only available in line form was used inline.
    #[error("directive '{keyword}' is not allowed in inline form")]
    InlineFormNotAllowed { keyword: String, location: Location },

    /// An `elif`, `else`, `nextarg` or `contains` has no matching opener.
    #[error("'{keyword}' without a matching opening directive")]
    LooseContinuation { keyword: String, location: Location },

    /// A closer has no matching opener.
    #[error("'{keyword}' without a matching opening directive")]
    LooseCloser { keyword: String, location: Location },

    /// A continuation or closer does not belong to the innermost open block.
    #[error("'{keyword}' does not match the block opened at {opening_location}")]
    MismatchedDirective {
        keyword: String,
        location: Location,
        opening_location: Location,
    },

    /// A line-form block was continued or closed inline, or vice versa.
    #[error("'{keyword}' must use the same form as the block opened at {opening_location}")]
    FormMismatch {
        keyword: String,
        location: Location,
        opening_location: Location,
    },

    /// A named closer does not repeat the opener's name.
    #[error("closing name '{found}' does not match '{expected}'")]
    NameMismatch {
        expected: String,
        found: String,
        location: Location,
    },

    /// A block is still open at the end of input.
    #[error("block opened here is never closed")]
    UnclosedBlock { location: Location },

    /// An `elif` or `else` follows an `else` branch.
    #[error("branch after 'else'")]
    BranchAfterElse { location: Location },

    /// A conditional directive has no condition.
    #[error("missing condition")]
    EmptyCondition { location: Location },

    /// A directive that takes no tail was given one.
    #[error("directive '{keyword}' takes no content")]
    TrailingContent { keyword: String, location: Location },

    /// A `for` directive is missing the `in` keyword.
    #[error("missing 'in' in for directive")]
    MissingIn { location: Location },

    /// A loop or assignment target is not a name or tuple of names.
    #[error("invalid target")]
    InvalidTarget { location: Location },

    /// A `set` directive has an `=` but nothing behind it.
    #[error("missing right-hand side in set directive")]
    EmptySetRhs { location: Location },

    /// A macro signature is malformed.
    #[error("invalid macro signature")]
    InvalidSignature { location: Location },

    /// A parameter name occurs twice in a signature.
    #[error("duplicate parameter '{name}'")]
    DuplicateParameter { name: String, location: Location },

    /// Parameters are not ordered required, defaulted, `*args`, `**kwargs`.
    #[error("parameter after variadic or defaulted parameter")]
    ParameterOrder { location: Location },

    /// A `del` or `global` directive has no valid name list.
    #[error("expected a comma-separated list of names")]
    InvalidNameList { location: Location },

    /// An `include` path is not a quoted string.
    #[error("include path must be a quoted string")]
    InvalidIncludePath { location: Location },

    /// A `call`/`block` header is malformed.
    #[error("invalid call header")]
    InvalidCallHeader { location: Location },

    /// An inline directive appears inside a direct call argument.
    #[error("inline directives are not allowed in direct call arguments")]
    InlineDirectiveInArgument { location: Location },

    /// A `stop`, `assert` or eval directive has no expression.
    #[error("missing expression")]
    EmptyExpression { location: Location },
}

impl BuildError {
    /// Returns the source region the error points at.
    #[must_use]
    pub fn location(&self) -> &Location {
        use BuildError::*;
        match self {
            UnknownDirective { location, .. }
            | InlineFormNotAllowed { location, .. }
            | LooseContinuation { location, .. }
            | LooseCloser { location, .. }
            | MismatchedDirective { location, .. }
            | FormMismatch { location, .. }
            | NameMismatch { location, .. }
            | UnclosedBlock { location }
            | BranchAfterElse { location }
            | EmptyCondition { location }
            | TrailingContent { location, .. }
            | MissingIn { location }
            | InvalidTarget { location }
            | EmptySetRhs { location }
            | InvalidSignature { location }
            | DuplicateParameter { location, .. }
            | ParameterOrder { location }
            | InvalidNameList { location }
            | InvalidIncludePath { location }
            | InvalidCallHeader { location }
            | InlineDirectiveInArgument { location }
            | EmptyExpression { location } => location,
        }
    }
}

/// Builds the directive tree from a token stream.
pub fn build(tokens: Vec<Token>) -> Result<Vec<Node>, BuildError> {
    let mut builder = Builder {
        stack: Vec::new(),
        root: Vec::new(),
    };
    for token in tokens {
        builder.token(token)?;
    }
    if let Some(context) = builder.stack.last() {
        return Err(BuildError::UnclosedBlock {
            location: context.opener().clone(),
        });
    }
    Ok(builder.root)
}

/// Which keyword family a `call` construct was opened with
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum CallFlavor {
    /// `call` / `nextarg` / `endcall`
    Call,
    /// `block` / `contains` / `endblock`
    Block,
}

impl CallFlavor {
    fn separator(self) -> &'static str {
        match self {
            CallFlavor::Call => "nextarg",
            CallFlavor::Block => "contains",
        }
    }

    fn closer(self) -> &'static str {
        match self {
            CallFlavor::Call => "endcall",
            CallFlavor::Block => "endblock",
        }
    }
}

enum Open {
    If {
        done: Vec<Branch>,
        condition: Option<String>,
        branch_location: Location,
        location: Location,
    },
    For {
        target: Target,
        iterable: String,
        location: Location,
    },
    Def {
        name: String,
        params: ParamSpec<String>,
        location: Location,
    },
    Call {
        callee: String,
        name: String,
        flavor: CallFlavor,
        slots: Vec<ArgSlot>,
        slot_name: Option<String>,
        slot_location: Location,
        after_separator: bool,
        location: Location,
    },
    Mute {
        location: Location,
    },
}

struct Context {
    open: Open,
    inline: bool,
    body: Vec<Node>,
}

impl Context {
    fn opener(&self) -> &Location {
        match &self.open {
            Open::If { location, .. }
            | Open::For { location, .. }
            | Open::Def { location, .. }
            | Open::Call { location, .. }
            | Open::Mute { location } => location,
        }
    }
}

struct Builder {
    stack: Vec<Context>,
    root: Vec<Node>,
}

impl Builder {
    fn push_node(&mut self, node: Node) {
        match self.stack.last_mut() {
            Some(context) => context.body.push(node),
            None => self.root.push(node),
        }
    }

    fn token(&mut self, token: Token) -> Result<(), BuildError> {
        match token {
            Token::Text { text, location } => {
                self.push_node(Node::Text(text, location));
                Ok(())
            }
            Token::Comment { location } => {
                self.push_node(Node::Comment(location));
                Ok(())
            }
            Token::ExprSub { expr, location } => {
                self.push_node(Node::Eval(EvalNode {
                    expr,
                    inline: true,
                    location,
                }));
                Ok(())
            }
            Token::LineEval { expr, location } => {
                if expr.is_empty() {
                    return Err(BuildError::EmptyExpression { location });
                }
                self.push_node(Node::Eval(EvalNode {
                    expr,
                    inline: false,
                    location,
                }));
                Ok(())
            }
            Token::DirectCall {
                name,
                args,
                inline,
                location,
            } => {
                let slots = direct_call_slots(&args, &location)?;
                self.push_node(Node::Call(CallNode {
                    callee: name.clone(),
                    name,
                    slots,
                    inline,
                    location,
                }));
                Ok(())
            }
            Token::LineDir {
                keyword,
                tail,
                location,
            } => self.directive(keyword, tail, false, location),
            Token::InlineDir {
                keyword,
                tail,
                location,
            } => self.directive(keyword, tail, true, location),
        }
    }

    fn directive(
        &mut self,
        keyword: String,
        tail: String,
        inline: bool,
        location: Location,
    ) -> Result<(), BuildError> {
        match keyword.as_str() {
            "if" => {
                if tail.is_empty() {
                    return Err(BuildError::EmptyCondition { location });
                }
                self.stack.push(Context {
                    open: Open::If {
                        done: Vec::new(),
                        condition: Some(tail),
                        branch_location: location.clone(),
                        location,
                    },
                    inline,
                    body: Vec::new(),
                });
                Ok(())
            }
            "elif" => {
                if tail.is_empty() {
                    return Err(BuildError::EmptyCondition { location });
                }
                self.continue_if(&keyword, Some(tail), inline, location)
            }
            "else" => {
                if !tail.is_empty() {
                    return Err(BuildError::TrailingContent { keyword, location });
                }
                self.continue_if(&keyword, None, inline, location)
            }
            "endif" => self.close_if(keyword, tail, inline, location),
            "for" => {
                let (target, iterable) = parse_for_tail(&tail, &location)?;
                self.stack.push(Context {
                    open: Open::For {
                        target,
                        iterable,
                        location,
                    },
                    inline,
                    body: Vec::new(),
                });
                Ok(())
            }
            "endfor" => self.close_for(keyword, tail, inline, location),
            "def" => {
                if inline {
                    return Err(BuildError::InlineFormNotAllowed { keyword, location });
                }
                let (name, params) = parse_signature(&tail, &location)?;
                self.stack.push(Context {
                    open: Open::Def {
                        name,
                        params,
                        location,
                    },
                    inline,
                    body: Vec::new(),
                });
                Ok(())
            }
            "enddef" => self.close_def(keyword, tail, inline, location),
            "call" | "block" => {
                let flavor = if keyword == "call" {
                    CallFlavor::Call
                } else {
                    CallFlavor::Block
                };
                let (callee, slots) = parse_call_header(&tail, &location)?;
                self.stack.push(Context {
                    open: Open::Call {
                        name: callee.clone(),
                        callee,
                        flavor,
                        slots,
                        slot_name: None,
                        slot_location: location.clone(),
                        after_separator: false,
                        location,
                    },
                    inline,
                    body: Vec::new(),
                });
                Ok(())
            }
            "nextarg" | "contains" => self.continue_call(keyword, tail, inline, location),
            "endcall" | "endblock" => self.close_call(keyword, tail, inline, location),
            "set" => {
                let (target, rhs) = parse_set_tail(&tail, &location)?;
                self.push_node(Node::Set(SetNode {
                    target,
                    rhs,
                    location,
                }));
                Ok(())
            }
            "del" => {
                let names = parse_names(&tail, &location)?;
                self.push_node(Node::Del(NamesNode { names, location }));
                Ok(())
            }
            "global" => {
                let names = parse_names(&tail, &location)?;
                self.push_node(Node::Global(NamesNode { names, location }));
                Ok(())
            }
            "include" => {
                if inline {
                    return Err(BuildError::InlineFormNotAllowed { keyword, location });
                }
                let path = parse_include_path(&tail, &location)?;
                self.push_node(Node::Include(IncludeNode { path, location }));
                Ok(())
            }
            "mute" => {
                if inline {
                    return Err(BuildError::InlineFormNotAllowed { keyword, location });
                }
                if !tail.is_empty() {
                    return Err(BuildError::TrailingContent { keyword, location });
                }
                self.stack.push(Context {
                    open: Open::Mute { location },
                    inline,
                    body: Vec::new(),
                });
                Ok(())
            }
            "endmute" => self.close_mute(keyword, tail, inline, location),
            "stop" | "assert" => {
                if inline {
                    return Err(BuildError::InlineFormNotAllowed { keyword, location });
                }
                if tail.is_empty() {
                    return Err(BuildError::EmptyExpression { location });
                }
                self.push_node(Node::Stop(StopNode {
                    expr: tail,
                    assert: keyword == "assert",
                    location,
                }));
                Ok(())
            }
            _ => Err(BuildError::UnknownDirective { keyword, location }),
        }
    }

    /// Checks that a continuation or closer uses the opener's form.
    fn check_form(
        context: &Context,
        keyword: &str,
        inline: bool,
        location: &Location,
    ) -> Result<(), BuildError> {
        if context.inline != inline {
            return Err(BuildError::FormMismatch {
                keyword: keyword.to_string(),
                location: location.clone(),
                opening_location: context.opener().clone(),
            });
        }
        Ok(())
    }

    fn continue_if(
        &mut self,
        keyword: &str,
        condition: Option<String>,
        inline: bool,
        location: Location,
    ) -> Result<(), BuildError> {
        let Some(context) = self.stack.last_mut() else {
            return Err(BuildError::LooseContinuation {
                keyword: keyword.to_string(),
                location,
            });
        };
        Self::check_form(context, keyword, inline, &location)?;
        let Open::If {
            done,
            condition: current,
            branch_location,
            ..
        } = &mut context.open
        else {
            return Err(BuildError::MismatchedDirective {
                keyword: keyword.to_string(),
                location,
                opening_location: context.opener().clone(),
            });
        };
        if current.is_none() {
            return Err(BuildError::BranchAfterElse { location });
        }
        done.push(Branch {
            condition: current.take(),
            location: std::mem::replace(branch_location, location),
            body: std::mem::take(&mut context.body),
        });
        // An `else` branch leaves the new condition empty.
        *current = condition;
        Ok(())
    }

    fn close_if(
        &mut self,
        keyword: String,
        tail: String,
        inline: bool,
        location: Location,
    ) -> Result<(), BuildError> {
        if !tail.is_empty() {
            return Err(BuildError::TrailingContent { keyword, location });
        }
        let context = self.pop_matching(&keyword, inline, &location, |open| {
            matches!(open, Open::If { .. })
        })?;
        let Open::If {
            mut done,
            condition,
            branch_location,
            location: opener,
        } = context.open
        else {
            unreachable!()
        };
        done.push(Branch {
            condition,
            location: branch_location,
            body: context.body,
        });
        self.push_node(Node::If(IfNode {
            branches: done,
            inline,
            location: opener.through(&location),
        }));
        Ok(())
    }

    fn close_for(
        &mut self,
        keyword: String,
        tail: String,
        inline: bool,
        location: Location,
    ) -> Result<(), BuildError> {
        if !tail.is_empty() {
            return Err(BuildError::TrailingContent { keyword, location });
        }
        let context = self.pop_matching(&keyword, inline, &location, |open| {
            matches!(open, Open::For { .. })
        })?;
        let Open::For {
            target,
            iterable,
            location: opener,
        } = context.open
        else {
            unreachable!()
        };
        self.push_node(Node::For(ForNode {
            target,
            iterable,
            body: context.body,
            inline,
            location: opener.through(&location),
        }));
        Ok(())
    }

    fn close_def(
        &mut self,
        keyword: String,
        tail: String,
        inline: bool,
        location: Location,
    ) -> Result<(), BuildError> {
        let context = self.pop_matching(&keyword, inline, &location, |open| {
            matches!(open, Open::Def { .. })
        })?;
        let Open::Def {
            name,
            params,
            location: opener,
        } = context.open
        else {
            unreachable!()
        };
        if !tail.is_empty() && tail != name {
            return Err(BuildError::NameMismatch {
                expected: name,
                found: tail,
                location,
            });
        }
        self.push_node(Node::Def(DefNode {
            name,
            params,
            body: context.body,
            location: opener.through(&location),
        }));
        Ok(())
    }

    fn continue_call(
        &mut self,
        keyword: String,
        tail: String,
        inline: bool,
        location: Location,
    ) -> Result<(), BuildError> {
        let Some(context) = self.stack.last_mut() else {
            return Err(BuildError::LooseContinuation { keyword, location });
        };
        Self::check_form(context, &keyword, inline, &location)?;
        let opener = context.opener().clone();
        let Open::Call {
            flavor,
            slots,
            slot_name,
            slot_location,
            after_separator,
            ..
        } = &mut context.open
        else {
            return Err(BuildError::MismatchedDirective {
                keyword,
                location,
                opening_location: opener,
            });
        };
        if keyword != flavor.separator() {
            return Err(BuildError::MismatchedDirective {
                keyword,
                location,
                opening_location: opener,
            });
        }
        let name = if tail.is_empty() {
            None
        } else if is_name(&tail) {
            Some(tail)
        } else {
            return Err(BuildError::InvalidNameList { location });
        };
        let body = std::mem::take(&mut context.body);
        // The slot before the first separator is dropped when empty, so a
        // construct can start with `nextarg` without passing an empty string.
        if *after_separator || slot_name.is_some() || !body.is_empty() {
            slots.push(ArgSlot {
                name: slot_name.take(),
                body: SlotBody::Nodes(body),
                location: slot_location.clone(),
            });
        }
        *slot_name = name;
        *slot_location = location;
        *after_separator = true;
        Ok(())
    }

    fn close_call(
        &mut self,
        keyword: String,
        tail: String,
        inline: bool,
        location: Location,
    ) -> Result<(), BuildError> {
        let context = self.pop_matching(&keyword, inline, &location, |open| {
            matches!(open, Open::Call { flavor, .. } if keyword == flavor.closer())
        })?;
        let Open::Call {
            callee,
            name,
            mut slots,
            slot_name,
            slot_location,
            after_separator,
            location: opener,
            ..
        } = context.open
        else {
            unreachable!()
        };
        if !tail.is_empty() && tail != name {
            return Err(BuildError::NameMismatch {
                expected: name,
                found: tail,
                location,
            });
        }
        let body = context.body;
        if after_separator || slot_name.is_some() || !body.is_empty() {
            slots.push(ArgSlot {
                name: slot_name,
                body: SlotBody::Nodes(body),
                location: slot_location,
            });
        }
        self.push_node(Node::Call(CallNode {
            callee,
            name,
            slots,
            inline,
            location: opener.through(&location),
        }));
        Ok(())
    }

    fn close_mute(
        &mut self,
        keyword: String,
        tail: String,
        inline: bool,
        location: Location,
    ) -> Result<(), BuildError> {
        if inline {
            return Err(BuildError::InlineFormNotAllowed { keyword, location });
        }
        if !tail.is_empty() {
            return Err(BuildError::TrailingContent { keyword, location });
        }
        let context = self.pop_matching(&keyword, inline, &location, |open| {
            matches!(open, Open::Mute { .. })
        })?;
        let Open::Mute { location: opener } = context.open else {
            unreachable!()
        };
        self.push_node(Node::Mute(MuteNode {
            body: context.body,
            location: opener.through(&location),
        }));
        Ok(())
    }

    /// Pops the innermost context if `matches` accepts it.
    fn pop_matching(
        &mut self,
        keyword: &str,
        inline: bool,
        location: &Location,
        matches: impl Fn(&Open) -> bool,
    ) -> Result<Context, BuildError> {
        let Some(context) = self.stack.last() else {
            return Err(BuildError::LooseCloser {
                keyword: keyword.to_string(),
                location: location.clone(),
            });
        };
        Self::check_form(context, keyword, inline, location)?;
        if !matches(&context.open) {
            return Err(BuildError::MismatchedDirective {
                keyword: keyword.to_string(),
                location: location.clone(),
                opening_location: context.opener().clone(),
            });
        }
        Ok(self.stack.pop().unwrap())
    }
}

/// Returns whether `s` is a valid identifier.
#[must_use]
pub fn is_name(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Splits `s` at top-level commas, honoring quotes and bracket nesting.
fn split_commas(s: &str) -> Option<Vec<&str>> {
    let mut pieces = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    let mut chars = s.char_indices();
    while let Some((i, c)) = chars.next() {
        match c {
            '\'' | '"' => loop {
                match chars.next() {
                    Some((_, q)) if q == c => break,
                    Some(_) => {}
                    None => return None,
                }
            },
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth = depth.checked_sub(1)?,
            ',' if depth == 0 => {
                pieces.push(&s[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return None;
    }
    pieces.push(&s[start..]);
    Some(pieces)
}

/// Finds the first top-level `=` that is an assignment, not a comparison.
fn find_assignment(s: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    let mut depth = 0usize;
    let mut quote = None;
    for (i, &b) in bytes.iter().enumerate() {
        match quote {
            Some(q) => {
                if b == q {
                    quote = None;
                }
                continue;
            }
            None => {}
        }
        match b {
            b'\'' | b'"' => quote = Some(b),
            b'(' | b'[' | b'{' => depth += 1,
            b')' | b']' | b'}' => depth = depth.saturating_sub(1),
            b'=' if depth == 0 => {
                let prev = i.checked_sub(1).map(|j| bytes[j]);
                let next = bytes.get(i + 1);
                if next == Some(&b'=') || matches!(prev, Some(b'<' | b'>' | b'!' | b'=')) {
                    continue;
                }
                return Some(i);
            }
            _ => {}
        }
    }
    None
}

/// Finds the first top-level occurrence of the word `in`.
fn find_in_keyword(s: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    let mut depth = 0usize;
    let mut quote = None;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if let Some(q) = quote {
            if b == q {
                quote = None;
            }
            i += 1;
            continue;
        }
        match b {
            b'\'' | b'"' => quote = Some(b),
            b'(' | b'[' | b'{' => depth += 1,
            b')' | b']' | b'}' => depth = depth.saturating_sub(1),
            b'i' if depth == 0 && bytes.get(i + 1) == Some(&b'n') => {
                let before_ok = i == 0 || !is_word_byte(bytes[i - 1]);
                let after_ok = bytes.get(i + 2).is_none_or(|&b| !is_word_byte(b));
                if before_ok && after_ok {
                    return Some(i);
                }
            }
            _ => {}
        }
        i += 1;
    }
    None
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

fn parse_target(s: &str, location: &Location) -> Result<Target, BuildError> {
    let s = s.trim();
    let invalid = || BuildError::InvalidTarget {
        location: location.clone(),
    };
    let (inner, parenthesized) = match s.strip_prefix('(') {
        Some(rest) => (rest.strip_suffix(')').ok_or_else(invalid)?, true),
        None => {
            if s.ends_with(')') {
                return Err(invalid());
            }
            (s, false)
        }
    };
    let names: Vec<String> = inner
        .split(',')
        .map(str::trim)
        .map(|piece| {
            if is_name(piece) {
                Ok(piece.to_string())
            } else {
                Err(invalid())
            }
        })
        .collect::<Result<_, _>>()?;
    if !parenthesized && names.len() == 1 {
        Ok(Target::Name(names.into_iter().next().unwrap()))
    } else {
        Ok(Target::Tuple(names))
    }
}

fn parse_for_tail(tail: &str, location: &Location) -> Result<(Target, String), BuildError> {
    let Some(pos) = find_in_keyword(tail) else {
        return Err(BuildError::MissingIn {
            location: location.clone(),
        });
    };
    let target = parse_target(&tail[..pos], location)?;
    let iterable = tail[pos + 2..].trim();
    if iterable.is_empty() {
        return Err(BuildError::EmptyExpression {
            location: location.clone(),
        });
    }
    Ok((target, iterable.to_string()))
}

fn parse_set_tail(tail: &str, location: &Location) -> Result<(Target, Option<String>), BuildError> {
    match find_assignment(tail) {
        Some(pos) => {
            let target = parse_target(&tail[..pos], location)?;
            let rhs = tail[pos + 1..].trim();
            if rhs.is_empty() {
                return Err(BuildError::EmptySetRhs {
                    location: location.clone(),
                });
            }
            Ok((target, Some(rhs.to_string())))
        }
        None => Ok((parse_target(tail, location)?, None)),
    }
}

fn parse_names(tail: &str, location: &Location) -> Result<Vec<String>, BuildError> {
    let invalid = || BuildError::InvalidNameList {
        location: location.clone(),
    };
    if tail.trim().is_empty() {
        return Err(invalid());
    }
    tail.split(',')
        .map(str::trim)
        .map(|piece| {
            if is_name(piece) {
                Ok(piece.to_string())
            } else {
                Err(invalid())
            }
        })
        .collect()
}

fn parse_include_path(tail: &str, location: &Location) -> Result<String, BuildError> {
    let invalid = || BuildError::InvalidIncludePath {
        location: location.clone(),
    };
    let mut chars = tail.chars();
    let quote = chars.next().ok_or_else(invalid)?;
    if quote != '"' && quote != '\'' {
        return Err(invalid());
    }
    let rest = chars.as_str();
    let path = rest.strip_suffix(quote).ok_or_else(invalid)?;
    if path.is_empty() || path.contains(quote) {
        return Err(invalid());
    }
    Ok(path.to_string())
}

fn parse_signature(
    tail: &str,
    location: &Location,
) -> Result<(String, ParamSpec<String>), BuildError> {
    let invalid = || BuildError::InvalidSignature {
        location: location.clone(),
    };
    let name_end = tail.find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'));
    let (name, rest) = match name_end {
        Some(end) => tail.split_at(end),
        None => (tail, ""),
    };
    if !is_name(name) {
        return Err(invalid());
    }
    let rest = rest.trim_start();
    let inner = rest
        .strip_prefix('(')
        .and_then(|r| r.strip_suffix(')'))
        .ok_or_else(invalid)?;
    let pieces = split_commas(inner).ok_or_else(invalid)?;

    let mut params = ParamSpec::empty();
    let mut seen = Vec::new();
    for piece in pieces {
        let piece = piece.trim();
        if piece.is_empty() {
            if inner.trim().is_empty() {
                break;
            }
            return Err(invalid());
        }
        let order_error = || BuildError::ParameterOrder {
            location: location.clone(),
        };
        let mut check_name = |name: &str| -> Result<String, BuildError> {
            if !is_name(name) {
                return Err(invalid());
            }
            if seen.contains(&name.to_string()) {
                return Err(BuildError::DuplicateParameter {
                    name: name.to_string(),
                    location: location.clone(),
                });
            }
            seen.push(name.to_string());
            Ok(name.to_string())
        };
        if let Some(name) = piece.strip_prefix("**") {
            if params.var_keyword.is_some() {
                return Err(order_error());
            }
            params.var_keyword = Some(check_name(name.trim())?);
        } else if let Some(name) = piece.strip_prefix('*') {
            if params.var_positional.is_some() || params.var_keyword.is_some() {
                return Err(order_error());
            }
            params.var_positional = Some(check_name(name.trim())?);
        } else if let Some(pos) = find_assignment(piece) {
            if params.var_positional.is_some() || params.var_keyword.is_some() {
                return Err(order_error());
            }
            let default = piece[pos + 1..].trim();
            if default.is_empty() {
                return Err(invalid());
            }
            let name = check_name(piece[..pos].trim())?;
            params.optional.push((name, default.to_string()));
        } else {
            if !params.optional.is_empty()
                || params.var_positional.is_some()
                || params.var_keyword.is_some()
            {
                return Err(order_error());
            }
            params.required.push(check_name(piece)?);
        }
    }
    Ok((name.to_string(), params))
}

/// Parses the tail of a `call`/`block` directive into callee and header slots.
fn parse_call_header(
    tail: &str,
    location: &Location,
) -> Result<(String, Vec<ArgSlot>), BuildError> {
    let invalid = || BuildError::InvalidCallHeader {
        location: location.clone(),
    };
    let tail = tail.trim();
    if tail.is_empty() {
        return Err(invalid());
    }
    let Some(paren) = tail.find('(') else {
        return Ok((tail.to_string(), Vec::new()));
    };
    let callee = tail[..paren].trim();
    if callee.is_empty() {
        return Err(invalid());
    }
    let inner = tail[paren + 1..].strip_suffix(')').ok_or_else(invalid)?;
    let pieces = split_commas(inner).ok_or_else(invalid)?;
    let mut slots = Vec::new();
    for piece in pieces {
        let piece = piece.trim();
        if piece.is_empty() {
            if inner.trim().is_empty() {
                break;
            }
            return Err(invalid());
        }
        let (name, expr) = split_keyword_argument(piece);
        if expr.is_empty() {
            return Err(invalid());
        }
        slots.push(ArgSlot {
            name,
            body: SlotBody::Expr(expr.to_string()),
            location: location.clone(),
        });
    }
    Ok((callee.to_string(), slots))
}

/// Splits a `name=value` argument; `==` comparisons stay positional.
fn split_keyword_argument(piece: &str) -> (Option<String>, &str) {
    if let Some((name, rest)) = piece.split_once('=') {
        let name = name.trim();
        if is_name(name) && !rest.starts_with('=') {
            return (Some(name.to_string()), rest.trim_start());
        }
    }
    (None, piece)
}

/// Splits the raw argument text of a direct call into argument slots.
///
/// Arguments are separated at top-level commas; an outermost `{...}` wrapper
/// protects an argument and is stripped, and expression substitutions inside
/// the text become sub-nodes rendered at call time.
fn direct_call_slots(args: &str, location: &Location) -> Result<Vec<ArgSlot>, BuildError> {
    if args.contains("#{") {
        return Err(BuildError::InlineDirectiveInArgument {
            location: location.clone(),
        });
    }
    if args.trim().is_empty() {
        return Ok(Vec::new());
    }
    // The lexer has already checked bracket balance.
    let pieces = split_commas(args).ok_or_else(|| BuildError::InlineDirectiveInArgument {
        location: location.clone(),
    })?;
    let mut slots = Vec::new();
    for piece in pieces {
        let piece = piece.trim();
        let (name, value) = split_keyword_argument(piece);
        let value = match value.strip_prefix('{').and_then(|v| v.strip_suffix('}')) {
            Some(stripped) => stripped,
            None => value,
        };
        slots.push(ArgSlot {
            name,
            body: SlotBody::Nodes(fragment_nodes(value, location)),
            location: location.clone(),
        });
    }
    Ok(slots)
}

/// Carves a direct call argument into text and substitution nodes.
fn fragment_nodes(text: &str, location: &Location) -> Vec<Node> {
    let mut nodes = Vec::new();
    let mut rest = text;
    loop {
        match rest.find("${") {
            Some(start) => match rest[start..].find("}$") {
                Some(end) => {
                    if start > 0 {
                        nodes.push(Node::Text(
                            unescape_text(&rest[..start]),
                            location.clone(),
                        ));
                    }
                    nodes.push(Node::Eval(EvalNode {
                        expr: rest[start + 2..start + end].to_string(),
                        inline: true,
                        location: location.clone(),
                    }));
                    rest = &rest[start + end + 2..];
                }
                None => break,
            },
            None => break,
        }
    }
    if !rest.is_empty() {
        nodes.push(Node::Text(unescape_text(rest), location.clone()));
    }
    nodes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::lex;
    use assert_matches::assert_matches;
    use std::rc::Rc;

    fn parse(text: &str) -> Result<Vec<Node>, BuildError> {
        build(lex(text, &Rc::from("<string>")).unwrap())
    }

    #[test]
    fn if_elif_else_assembles_three_branches() {
        let nodes = parse("#:if a\nA\n#:elif b\nB\n#:else\nC\n#:endif\n").unwrap();
        assert_matches!(&nodes[..], [Node::If(node)] => {
            assert_eq!(node.branches.len(), 3);
            assert_eq!(node.branches[0].condition.as_deref(), Some("a"));
            assert_eq!(node.branches[1].condition.as_deref(), Some("b"));
            assert_eq!(node.branches[2].condition, None);
            assert_eq!(node.location.lines, 0..7);
            assert!(!node.inline);
        });
    }

    #[test]
    fn line_if_closed_inline_is_an_error() {
        let e = parse("#:if a\nx\n#{endif}#\n").unwrap_err();
        assert_matches!(e, BuildError::FormMismatch { keyword, location, opening_location } => {
            assert_eq!(keyword, "endif");
            assert_eq!(location.lines, 2..3);
            assert_eq!(opening_location.lines, 0..1);
        });
    }

    #[test]
    fn inline_if_closed_line_is_an_error() {
        let e = parse("#{if a}#x\n#:endif\n").unwrap_err();
        assert_matches!(e, BuildError::FormMismatch { location, .. } => {
            assert_eq!(location.lines, 1..2);
        });
    }

    #[test]
    fn loose_continuations_and_closers_are_errors() {
        assert_matches!(parse("#:else\n"), Err(BuildError::LooseContinuation { .. }));
        assert_matches!(parse("#:elif x\n"), Err(BuildError::LooseContinuation { .. }));
        assert_matches!(parse("#:endif\n"), Err(BuildError::LooseCloser { .. }));
        assert_matches!(parse("#:endfor\n"), Err(BuildError::LooseCloser { .. }));
        assert_matches!(parse("#:enddef\n"), Err(BuildError::LooseCloser { .. }));
        assert_matches!(parse("#:endmute\n"), Err(BuildError::LooseCloser { .. }));
    }

    #[test]
    fn mismatched_closer_reports_the_opener() {
        let e = parse("#:if a\n#:for i in x\n#:endif\n").unwrap_err();
        assert_matches!(e, BuildError::MismatchedDirective { keyword, opening_location, .. } => {
            assert_eq!(keyword, "endif");
            assert_eq!(opening_location.lines, 1..2);
        });
    }

    #[test]
    fn unclosed_block_reports_the_opener() {
        let e = parse("#:if a\nx\n").unwrap_err();
        assert_matches!(e, BuildError::UnclosedBlock { location } => {
            assert_eq!(location.lines, 0..1);
        });
    }

    #[test]
    fn else_with_content_is_an_error() {
        let e = parse("#:if a\n#:else True\n#:endif\n").unwrap_err();
        assert_matches!(e, BuildError::TrailingContent { keyword, location } => {
            assert_eq!(keyword, "else");
            assert_eq!(location.lines, 1..2);
        });
    }

    #[test]
    fn endif_with_content_is_an_error() {
        let e = parse("#:if a\n#:endif INV\n").unwrap_err();
        assert_matches!(e, BuildError::TrailingContent { .. });
    }

    #[test]
    fn branch_after_else_is_an_error() {
        let e = parse("#:if a\n#:else\n#:elif b\n#:endif\n").unwrap_err();
        assert_matches!(e, BuildError::BranchAfterElse { location } => {
            assert_eq!(location.lines, 2..3);
        });
    }

    #[test]
    fn for_parses_target_and_iterable() {
        let nodes = parse("#:for i, j in pairs\n#:endfor\n").unwrap();
        assert_matches!(&nodes[..], [Node::For(node)] => {
            assert_eq!(node.target, Target::Tuple(vec!["i".to_string(), "j".to_string()]));
            assert_eq!(node.iterable, "pairs");
        });
    }

    #[test]
    fn for_without_in_is_an_error() {
        let e = parse("#:for i = 1, 2\n#:endfor\n").unwrap_err();
        assert_matches!(e, BuildError::MissingIn { location } => {
            assert_eq!(location.lines, 0..1);
        });
    }

    #[test]
    fn def_signature_with_defaults_and_variadics() {
        let nodes = parse("#:def m(a, b=2, *rest, **kw)\n#:enddef\n").unwrap();
        assert_matches!(&nodes[..], [Node::Def(node)] => {
            assert_eq!(node.name, "m");
            assert_eq!(node.params.required, ["a"]);
            assert_eq!(node.params.optional, [("b".to_string(), "2".to_string())]);
            assert_eq!(node.params.var_positional.as_deref(), Some("rest"));
            assert_eq!(node.params.var_keyword.as_deref(), Some("kw"));
        });
    }

    #[test]
    fn def_signature_errors() {
        assert_matches!(
            parse("#:def alma[x]\n#:enddef\n"),
            Err(BuildError::InvalidSignature { .. })
        );
        assert_matches!(
            parse("#:def alma(x))\n#:enddef\n"),
            Err(BuildError::InvalidSignature { .. })
        );
        assert_matches!(
            parse("#:def alma((x, y))\n#:enddef\n"),
            Err(BuildError::InvalidSignature { .. })
        );
        assert_matches!(
            parse("#:def m(a, b=2, c)\n#:enddef\n"),
            Err(BuildError::ParameterOrder { .. })
        );
        assert_matches!(
            parse("#:def m(a, *b, c)\n#:enddef\n"),
            Err(BuildError::ParameterOrder { .. })
        );
        assert_matches!(
            parse("#:def m(a, **b, c)\n#:enddef\n"),
            Err(BuildError::ParameterOrder { .. })
        );
        assert_matches!(
            parse("#:def m(a, a)\n#:enddef\n"),
            Err(BuildError::DuplicateParameter { .. })
        );
    }

    #[test]
    fn inline_def_is_an_error() {
        let e = parse("#{def m()}#x#{enddef}#").unwrap_err();
        assert_matches!(e, BuildError::InlineFormNotAllowed { keyword, .. } => {
            assert_eq!(keyword, "def");
        });
    }

    #[test]
    fn enddef_name_mismatch() {
        let e = parse("#:def m(x)\n#:enddef nonsense\n").unwrap_err();
        assert_matches!(e, BuildError::NameMismatch { expected, found, location } => {
            assert_eq!(expected, "m");
            assert_eq!(found, "nonsense");
            assert_eq!(location.lines, 1..2);
        });
    }

    #[test]
    fn call_and_block_families_may_not_mix() {
        assert_matches!(
            parse("#:block m\n1\n#:endcall\n"),
            Err(BuildError::MismatchedDirective { keyword, .. }) if keyword == "endcall"
        );
        assert_matches!(
            parse("#:call m\n1\n#:endblock\n"),
            Err(BuildError::MismatchedDirective { keyword, .. }) if keyword == "endblock"
        );
        assert_matches!(
            parse("#:call m\n1\n#:contains\n2\n#:endcall\n"),
            Err(BuildError::MismatchedDirective { keyword, .. }) if keyword == "contains"
        );
        assert_matches!(
            parse("#:block m\n1\n#:nextarg\n2\n#:endblock\n"),
            Err(BuildError::MismatchedDirective { keyword, .. }) if keyword == "nextarg"
        );
    }

    #[test]
    fn call_slots_split_at_separators() {
        let nodes = parse("#:call m\nA\n#:nextarg k\nB\n#:endcall\n").unwrap();
        assert_matches!(&nodes[..], [Node::Call(node)] => {
            assert_eq!(node.callee, "m");
            assert_eq!(node.slots.len(), 2);
            assert_eq!(node.slots[0].name, None);
            assert_eq!(node.slots[1].name.as_deref(), Some("k"));
        });
    }

    #[test]
    fn empty_leading_slot_is_dropped() {
        let nodes = parse("#:call m\n#:nextarg\nA\n#:endcall\n").unwrap();
        assert_matches!(&nodes[..], [Node::Call(node)] => {
            assert_eq!(node.slots.len(), 1);
        });
    }

    #[test]
    fn call_without_body_has_no_slots() {
        let nodes = parse("#:call m\n#:endcall\n").unwrap();
        assert_matches!(&nodes[..], [Node::Call(node)] => {
            assert!(node.slots.is_empty());
        });
    }

    #[test]
    fn call_header_arguments_become_expression_slots() {
        let nodes = parse("#:call m(\"h1\", k=\"h2\")\nB\n#:endcall\n").unwrap();
        assert_matches!(&nodes[..], [Node::Call(node)] => {
            assert_eq!(node.callee, "m");
            assert_eq!(node.slots.len(), 3);
            assert_matches!(&node.slots[0].body, SlotBody::Expr(e) => assert_eq!(e, "\"h1\""));
            assert_eq!(node.slots[1].name.as_deref(), Some("k"));
            assert_matches!(&node.slots[2].body, SlotBody::Nodes(_));
        });
    }

    #[test]
    fn endcall_name_mismatch() {
        let e = parse("#:call m\n1\n#:endcall nonsense\n").unwrap_err();
        assert_matches!(e, BuildError::NameMismatch { location, .. } => {
            assert_eq!(location.lines, 2..3);
        });
    }

    #[test]
    fn set_with_and_without_rhs() {
        let nodes = parse("#:set x = 2\n#:set y\n").unwrap();
        assert_matches!(&nodes[..], [Node::Set(a), Node::Set(b)] => {
            assert_eq!(a.target, Target::Name("x".to_string()));
            assert_eq!(a.rhs.as_deref(), Some("2"));
            assert_eq!(b.rhs, None);
        });
    }

    #[test]
    fn set_tuple_targets() {
        let nodes = parse("#:set a, b = 1, 2\n#:set (c, d) = x\n").unwrap();
        assert_matches!(&nodes[..], [Node::Set(a), Node::Set(b)] => {
            assert_eq!(a.target, Target::Tuple(vec!["a".into(), "b".into()]));
            assert_eq!(a.rhs.as_deref(), Some("1, 2"));
            assert_eq!(b.target, Target::Tuple(vec!["c".into(), "d".into()]));
        });
    }

    #[test]
    fn set_errors() {
        assert_matches!(parse("#:set A=\n"), Err(BuildError::EmptySetRhs { .. }));
        assert_matches!(parse("#:set i 1.2.3\n"), Err(BuildError::InvalidTarget { .. }));
        assert_matches!(parse("#:set (a, b = 1\n"), Err(BuildError::InvalidTarget { .. }));
        assert_matches!(parse("#:set a, b) = 1\n"), Err(BuildError::InvalidTarget { .. }));
    }

    #[test]
    fn set_rhs_may_contain_comparisons() {
        let nodes = parse("#:set x = a == b\n").unwrap();
        assert_matches!(&nodes[..], [Node::Set(node)] => {
            assert_eq!(node.rhs.as_deref(), Some("a == b"));
        });
    }

    #[test]
    fn del_and_global_parse_name_lists() {
        let nodes = parse("#:del X, Y\n#:global A\n").unwrap();
        assert_matches!(&nodes[..], [Node::Del(del), Node::Global(global)] => {
            assert_eq!(del.names, ["X", "Y"]);
            assert_eq!(global.names, ["A"]);
        });
    }

    #[test]
    fn del_errors() {
        assert_matches!(parse("#:del\n"), Err(_));
        assert_matches!(parse("#:del [a, b]\n"), Err(BuildError::InvalidNameList { .. }));
        assert_matches!(parse("#:del (a, b\n"), Err(BuildError::InvalidNameList { .. }));
    }

    #[test]
    fn include_requires_quoted_path() {
        let nodes = parse("#:include \"x.inc\"\n").unwrap();
        assert_matches!(&nodes[..], [Node::Include(node)] => {
            assert_eq!(node.path, "x.inc");
        });
        assert_matches!(
            parse("#:include <test.h>\n"),
            Err(BuildError::InvalidIncludePath { .. })
        );
    }

    #[test]
    fn include_and_mute_may_not_be_inline() {
        assert_matches!(
            parse("#{include \"x\"}#\n"),
            Err(BuildError::InlineFormNotAllowed { .. })
        );
        assert_matches!(
            parse("#{mute}#x#{endmute}#\n"),
            Err(BuildError::InlineFormNotAllowed { .. })
        );
        assert_matches!(
            parse("#:mute\nx#{endmute}#\n"),
            Err(BuildError::InlineFormNotAllowed { .. })
        );
    }

    #[test]
    fn mute_with_content_is_an_error() {
        assert_matches!(parse("#:mute TEST\n#:endmute\n"), Err(BuildError::TrailingContent { .. }));
        assert_matches!(parse("#:mute\n#:endmute INV\n"), Err(BuildError::TrailingContent { .. }));
    }

    #[test]
    fn stop_and_assert_are_line_only() {
        let nodes = parse("#:stop 'bye'\n#:assert x > 0\n").unwrap();
        assert_matches!(&nodes[..], [Node::Stop(stop), Node::Stop(assert_)] => {
            assert!(!stop.assert);
            assert!(assert_.assert);
        });
        assert_matches!(
            parse("#{stop 'x'}#\n"),
            Err(BuildError::InlineFormNotAllowed { .. })
        );
        assert_matches!(
            parse("#{assert x}#\n"),
            Err(BuildError::InlineFormNotAllowed { .. })
        );
    }

    #[test]
    fn unknown_directive_is_an_error() {
        let e = parse("#:invalid\n").unwrap_err();
        assert_matches!(e, BuildError::UnknownDirective { keyword, location } => {
            assert_eq!(keyword, "invalid");
            assert_eq!(location.lines, 0..1);
        });
    }

    #[test]
    fn direct_call_keyword_and_brace_stripping() {
        let nodes = parse("@:m(a = b)\n@:m({a = b})\n@:m({{x}}, y)\n").unwrap();
        assert_matches!(&nodes[..], [Node::Call(kw), Node::Call(braced), Node::Call(double)] => {
            assert_eq!(kw.slots[0].name.as_deref(), Some("a"));
            assert_matches!(&kw.slots[0].body, SlotBody::Nodes(nodes) => {
                assert_matches!(&nodes[..], [Node::Text(t, _)] => assert_eq!(t, "b"));
            });
            assert_eq!(braced.slots[0].name, None);
            assert_matches!(&braced.slots[0].body, SlotBody::Nodes(nodes) => {
                assert_matches!(&nodes[..], [Node::Text(t, _)] => assert_eq!(t, "a = b"));
            });
            assert_matches!(&double.slots[0].body, SlotBody::Nodes(nodes) => {
                assert_matches!(&nodes[..], [Node::Text(t, _)] => assert_eq!(t, "{x}"));
            });
        });
    }

    #[test]
    fn direct_call_equality_is_not_a_keyword() {
        let nodes = parse("@:m(a == b)\n").unwrap();
        assert_matches!(&nodes[..], [Node::Call(node)] => {
            assert_eq!(node.slots[0].name, None);
        });
    }

    #[test]
    fn direct_call_substitutions_become_nodes() {
        let nodes = parse("@:m(L1 ${2, 2}$, L3)\n").unwrap();
        assert_matches!(&nodes[..], [Node::Call(node)] => {
            assert_eq!(node.slots.len(), 2);
            assert_matches!(&node.slots[0].body, SlotBody::Nodes(nodes) => {
                assert_matches!(&nodes[..], [Node::Text(t, _), Node::Eval(e)] => {
                    assert_eq!(t, "L1 ");
                    assert_eq!(e.expr, "2, 2");
                });
            });
        });
    }

    #[test]
    fn direct_call_quotes_protect_commas() {
        let nodes = parse("@:m(\"L1, L2\", L3)\n").unwrap();
        assert_matches!(&nodes[..], [Node::Call(node)] => {
            assert_eq!(node.slots.len(), 2);
        });
    }

    #[test]
    fn inline_directive_in_direct_call_is_an_error() {
        let e = parse("@:m(L1 #{if True}#2, 2#{endif}#)\n").unwrap_err();
        assert_matches!(e, BuildError::InlineDirectiveInArgument { .. });
    }

    #[test]
    fn empty_line_eval_is_an_error() {
        assert_matches!(parse("$:\n"), Err(BuildError::EmptyExpression { .. }));
    }
}
