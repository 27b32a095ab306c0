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

//! Executing the directive tree
//!
//! The renderer walks the tree with a growing output buffer, an emission
//! cursor deciding when a line-number marker is due, a mute counter, the
//! environment chain and the active include stack. Macro bodies and argument
//! slots are rendered into capture buffers, during which markers are
//! suppressed; the captured text is re-attributed to the invocation site on
//! emission, one marker per output line.
//!
//! The predefined variables follow the renderer around: `_LINE_`/`_FILE_`
//! name the textual position of the expression being evaluated (inside a
//! macro body, the body), `_THIS_LINE_`/`_THIS_FILE_` the innermost
//! invocation site.

use crate::config::Options;
use crate::error::{Error, ErrorKind};
use crate::linenum::{MarkerFlag, format_marker};
use forp_expr::eval::Expander;
use forp_expr::{Env, ErrorCause, MacroValue, ScopeKind, Value, bind_arguments, is_reserved};
use forp_syntax::source::{Location, STRING_INPUT};
use forp_syntax::syntax::{
    ArgSlot, CallNode, DefNode, EvalNode, ForNode, IfNode, IncludeNode, Node, SetNode, SlotBody,
    StopNode, Target,
};
use forp_syntax::{build, lex};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// Nesting limit for macro expansions; runaway recursion must surface as a
/// diagnostic, not exhaust the stack.
const MAX_EXPANSION_DEPTH: usize = 256;

/// Tree-walking renderer for one preprocessing run
pub(crate) struct Renderer<'a> {
    options: &'a Options,
    env: Env,
    out: String,
    /// File and line the next output line is attributed to
    cursor: Option<(Rc<str>, usize)>,
    /// While positive, output and markers are discarded.
    mute: u32,
    /// While positive, output goes to a capture buffer and markers pause.
    capture: u32,
    /// Canonical paths of the files currently being rendered
    include_stack: Vec<PathBuf>,
    /// Invocation sites of the active macro expansions, innermost last
    invocation: Vec<Location>,
    /// Textual location of the expression currently being evaluated
    current: Location,
    /// `_FILE_` values per input name, honoring `file_var_root`
    file_vars: HashMap<String, String>,
}

impl<'a> Renderer<'a> {
    pub(crate) fn new(options: &'a Options, env: Env) -> Self {
        Renderer {
            options,
            env,
            out: String::new(),
            cursor: None,
            mute: 0,
            capture: 0,
            include_stack: Vec::new(),
            invocation: Vec::new(),
            current: Location::line(Rc::from(STRING_INPUT), 0),
            file_vars: HashMap::new(),
        }
    }

    /// Discards all output this renderer produces.
    pub(crate) fn mute(&mut self) {
        self.mute += 1;
    }

    /// Begins output for the given top-level input.
    pub(crate) fn start(&mut self, file: &Rc<str>) -> Result<(), Error> {
        self.register_file(file, None)?;
        self.current = Location::line(Rc::clone(file), 0);
        if self.markers_active() {
            self.write_marker(file, 0, Some(MarkerFlag::NewFile));
        }
        Ok(())
    }

    pub(crate) fn into_output(self) -> String {
        self.out
    }

    /// Renders a node sequence into the output buffer.
    pub(crate) fn render_nodes(&mut self, nodes: &[Node]) -> Result<(), Error> {
        for node in nodes {
            self.render_node(node)?;
        }
        Ok(())
    }

    fn render_node(&mut self, node: &Node) -> Result<(), Error> {
        match node {
            Node::Text(text, location) => {
                self.sync(location);
                self.write_text(text);
                Ok(())
            }
            // No output; the next emission re-syncs past the comment.
            Node::Comment(_) => Ok(()),
            Node::If(node) => self.render_if(node),
            Node::For(node) => self.render_for(node),
            Node::Def(node) => self.render_def(node),
            Node::Call(node) => self.render_call(node),
            Node::Set(node) => self.render_set(node),
            Node::Del(node) => {
                for name in &node.names {
                    self.env
                        .delete(name)
                        .map_err(|e| self.env_error(e, &node.location))?;
                }
                Ok(())
            }
            Node::Global(node) => {
                for name in &node.names {
                    self.env
                        .declare_global(name)
                        .map_err(|e| self.env_error(e, &node.location))?;
                }
                Ok(())
            }
            Node::Include(node) => self.render_include(node),
            Node::Mute(node) => {
                self.mute += 1;
                let result = self.render_nodes(&node.body);
                self.mute -= 1;
                result
            }
            Node::Eval(node) => self.render_eval(node),
            Node::Stop(node) => self.render_stop(node),
        }
    }

    fn render_if(&mut self, node: &IfNode) -> Result<(), Error> {
        for branch in &node.branches {
            let taken = match &branch.condition {
                Some(condition) => self.eval_value(condition, &branch.location)?.truthy(),
                None => true,
            };
            if taken {
                return self.render_nodes(&branch.body);
            }
        }
        Ok(())
    }

    fn render_for(&mut self, node: &ForNode) -> Result<(), Error> {
        let iterable = self.eval_value(&node.iterable, &node.location)?;
        let items: Vec<Value> = match &iterable {
            Value::Tuple(items) | Value::List(items) => items.as_ref().clone(),
            Value::Str(s) => s.chars().map(|c| Value::string(c.to_string())).collect(),
            Value::Dict(pairs) => pairs.iter().map(|(key, _)| key.clone()).collect(),
            other => {
                return Err(Error::new(
                    ErrorKind::Render,
                    format!("cannot iterate over a value of type {}", other.type_name()),
                    Some(node.location.clone()),
                ));
            }
        };
        for item in items {
            let scope = self.env.push(ScopeKind::Block);
            let saved = std::mem::replace(&mut self.env, scope);
            let result = self
                .bind_loop_target(&node.target, item, &node.location)
                .and_then(|()| self.render_nodes(&node.body));
            self.env = saved;
            result?;
        }
        Ok(())
    }

    /// Binds the loop variables directly in the fresh iteration scope.
    fn bind_loop_target(
        &mut self,
        target: &Target,
        item: Value,
        location: &Location,
    ) -> Result<(), Error> {
        match target {
            Target::Name(name) => self
                .env
                .define(name, item)
                .map_err(|e| self.env_error(e, location)),
            Target::Tuple(names) => {
                let items = self.unpack(names.len(), item, location)?;
                for (name, value) in names.iter().zip(items) {
                    self.env
                        .define(name, value)
                        .map_err(|e| self.env_error(e, location))?;
                }
                Ok(())
            }
        }
    }

    fn render_def(&mut self, node: &DefNode) -> Result<(), Error> {
        self.check_definable(&node.name, &node.location)?;
        for name in node.params.names() {
            self.check_definable(name, &node.location)?;
        }
        let mac = MacroValue {
            name: node.name.clone(),
            params: node.params.clone(),
            body: Rc::new(node.body.clone()),
            env: self.env.clone(),
            location: node.location.clone(),
        };
        self.env
            .define(&node.name, Value::Macro(Rc::new(mac)))
            .map_err(|e| self.env_error(e, &node.location))
    }

    fn check_definable(&self, name: &str, location: &Location) -> Result<(), Error> {
        if is_reserved(name) {
            Err(Error::new(
                ErrorKind::Render,
                format!("name '{name}' is reserved"),
                Some(location.clone()),
            ))
        } else {
            Ok(())
        }
    }

    fn render_set(&mut self, node: &SetNode) -> Result<(), Error> {
        let value = match &node.rhs {
            Some(expr) => self.eval_value(expr, &node.location)?,
            None => Value::None,
        };
        self.assign_target(&node.target, value, &node.location)
    }

    fn assign_target(
        &mut self,
        target: &Target,
        value: Value,
        location: &Location,
    ) -> Result<(), Error> {
        match target {
            Target::Name(name) => self
                .env
                .assign(name, value)
                .map_err(|e| self.env_error(e, location)),
            Target::Tuple(names) => {
                let items = self.unpack(names.len(), value, location)?;
                for (name, item) in names.iter().zip(items) {
                    self.env
                        .assign(name, item)
                        .map_err(|e| self.env_error(e, location))?;
                }
                Ok(())
            }
        }
    }

    fn unpack(
        &self,
        expected: usize,
        value: Value,
        location: &Location,
    ) -> Result<Vec<Value>, Error> {
        let Some(items) = value.sequence() else {
            return Err(Error::new(
                ErrorKind::Render,
                format!("cannot unpack a value of type {}", value.type_name()),
                Some(location.clone()),
            ));
        };
        if items.len() != expected {
            return Err(Error::new(
                ErrorKind::Render,
                format!(
                    "cannot unpack {} values into {expected} names",
                    items.len()
                ),
                Some(location.clone()),
            ));
        }
        Ok(items.to_vec())
    }

    fn render_call(&mut self, node: &CallNode) -> Result<(), Error> {
        let callee = self.eval_value(&node.callee, &node.location)?;
        let mut args = Vec::new();
        let mut kwargs = Vec::new();
        for slot in &node.slots {
            let value = self.slot_value(slot)?;
            match &slot.name {
                Some(name) => kwargs.push((name.clone(), value)),
                None => args.push(value),
            }
        }
        let env = self.env.clone();
        let result = self
            .with_current(&node.location, |r| {
                forp_expr::call_value(&callee, args, kwargs, &env, r, 0..0)
            })
            .map_err(|e| self.expr_error(e, &node.location))?;
        let mut text = match result {
            Value::None => String::new(),
            value => value.to_string(),
        };
        if node.inline {
            self.emit_expansion(&text, &node.location);
        } else {
            text.push('\n');
            self.emit_expansion(&text, &node.location);
            self.sync_after(&node.location);
        }
        Ok(())
    }

    /// Evaluates or renders one argument slot.
    ///
    /// Body slots render to text with one trailing newline dropped, so a
    /// line-form body passes `L1\nL2` rather than `L1\nL2\n`.
    fn slot_value(&mut self, slot: &ArgSlot) -> Result<Value, Error> {
        match &slot.body {
            SlotBody::Expr(expr) => self.eval_value(expr, &slot.location),
            SlotBody::Nodes(nodes) => {
                let mut text = self.capture_nodes(nodes)?;
                if text.ends_with('\n') {
                    text.pop();
                }
                Ok(Value::string(text))
            }
        }
    }

    /// Expands a macro body with bound parameters into a string.
    fn expand_macro(
        &mut self,
        mac: &Rc<MacroValue>,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
        call: &Location,
    ) -> Result<String, Error> {
        if self.invocation.len() >= MAX_EXPANSION_DEPTH {
            return Err(Error::new(
                ErrorKind::Render,
                format!("maximum expansion depth exceeded in macro '{}'", mac.name),
                Some(call.clone()),
            ));
        }
        let bound = bind_arguments(&mac.params, args, kwargs).map_err(|e| {
            let detail = e.into_error::<std::convert::Infallible>(0..0);
            Error::new(
                ErrorKind::Render,
                format!("invalid arguments in call of macro '{}': {detail}", mac.name),
                Some(call.clone()),
            )
        })?;
        let scope = mac.env.push(ScopeKind::Macro);
        for (name, value) in bound.bound {
            scope
                .define(&name, value)
                .map_err(|e| self.env_error(e, call))?;
        }
        for (name, default) in bound.defaults {
            let env = mac.env.clone();
            let value = self
                .with_current(&mac.location, |r| forp_expr::eval(default, &env, r))
                .map_err(|e| self.expr_error(e, &mac.location))?;
            scope
                .define(name, value)
                .map_err(|e| self.env_error(e, call))?;
        }

        self.invocation.push(call.clone());
        let saved = std::mem::replace(&mut self.env, scope);
        let result = self.capture_nodes(&mac.body);
        self.env = saved;
        self.invocation.pop();

        let mut text = result.map_err(|inner| {
            Error::with_cause(
                ErrorKind::Render,
                format!("error rendering macro '{}'", mac.name),
                Some(call.clone()),
                inner,
            )
        })?;
        if text.ends_with('\n') {
            text.pop();
        }
        Ok(text)
    }

    fn render_include(&mut self, node: &IncludeNode) -> Result<(), Error> {
        let Some(path) = self.resolve_include(&node.path, &node.location.file) else {
            return Err(Error::new(
                ErrorKind::Render,
                format!("include file '{}' not found", node.path),
                Some(node.location.clone()),
            ));
        };
        let canonical = path.canonicalize().unwrap_or_else(|_| path.clone());
        if self.include_stack.contains(&canonical) {
            return Err(Error::new(
                ErrorKind::Render,
                format!("circular inclusion of '{}'", node.path),
                Some(node.location.clone()),
            ));
        }
        let display: Rc<str> = Rc::from(path.to_string_lossy().as_ref());
        self.register_file(&display, Some(&node.location))?;
        let text = crate::driver::read_file(&path, self.options.encoding).map_err(|message| {
            Error::new(ErrorKind::Render, message, Some(node.location.clone()))
        })?;
        let nodes = build(lex(&text, &display)?)?;

        self.include_stack.push(canonical);
        if self.markers_active() {
            self.write_marker(&display, 0, Some(MarkerFlag::NewFile));
        }
        let result = self.render_nodes(&nodes);
        self.include_stack.pop();
        result?;
        if self.markers_active() {
            self.write_marker(
                &node.location.file,
                node.location.lines.end,
                Some(MarkerFlag::Return),
            );
        }
        Ok(())
    }

    /// Resolves an include path: absolute as-is, otherwise first against the
    /// including file's directory, then the include directories in order.
    fn resolve_include(&self, path: &str, includer: &str) -> Option<PathBuf> {
        let path = Path::new(path);
        if path.is_absolute() {
            return path.is_file().then(|| path.to_path_buf());
        }
        let base = match includer {
            STRING_INPUT => PathBuf::new(),
            file => Path::new(file).parent().map(Path::to_path_buf).unwrap_or_default(),
        };
        let candidate = base.join(path);
        if candidate.is_file() {
            return Some(candidate);
        }
        self.options
            .includes
            .iter()
            .map(|dir| dir.join(path))
            .find(|candidate| candidate.is_file())
    }

    fn render_eval(&mut self, node: &EvalNode) -> Result<(), Error> {
        let value = self.eval_value(&node.expr, &node.location)?;
        let mut text = match value {
            Value::None => String::new(),
            value => value.to_string(),
        };
        if node.inline {
            self.emit_expansion(&text, &node.location);
        } else {
            text.push('\n');
            self.emit_expansion(&text, &node.location);
            self.sync_after(&node.location);
        }
        Ok(())
    }

    fn render_stop(&mut self, node: &StopNode) -> Result<(), Error> {
        let value = self.eval_value(&node.expr, &node.location)?;
        if node.assert {
            if value.truthy() {
                Ok(())
            } else {
                Err(Error::new(
                    ErrorKind::UserStop,
                    format!("assertion '{}' failed", node.expr),
                    Some(node.location.clone()),
                ))
            }
        } else {
            Err(Error::new(
                ErrorKind::UserStop,
                value.to_string(),
                Some(node.location.clone()),
            ))
        }
    }

    // ----- expression plumbing -------------------------------------------

    /// Evaluates an expression written at `location`.
    fn eval_value(&mut self, expr: &str, location: &Location) -> Result<Value, Error> {
        let env = self.env.clone();
        self.with_current(location, |r| forp_expr::eval(expr, &env, r))
            .map_err(|e| self.expr_error(e, location))
    }

    /// Runs `f` with the textual location set to `location`.
    fn with_current<T>(&mut self, location: &Location, f: impl FnOnce(&mut Self) -> T) -> T {
        let saved = std::mem::replace(&mut self.current, location.clone());
        self.bind_location_vars();
        let result = f(self);
        self.current = saved;
        self.bind_location_vars();
        result
    }

    /// Publishes the location-dependent predefined variables.
    fn bind_location_vars(&self) {
        let textual = &self.current;
        let invocation = self.invocation.last().unwrap_or(textual);
        let env = &self.env;
        env.set_predefined("_LINE_", Value::Int((textual.lines.start + 1) as i64));
        env.set_predefined("_FILE_", Value::string(self.file_var(&textual.file)));
        env.set_predefined(
            "_THIS_LINE_",
            Value::Int((invocation.lines.start + 1) as i64),
        );
        env.set_predefined("_THIS_FILE_", Value::string(self.file_var(&invocation.file)));
    }

    fn file_var(&self, file: &str) -> String {
        self.file_vars
            .get(file)
            .cloned()
            .unwrap_or_else(|| file.to_string())
    }

    /// Records the `_FILE_` value of a newly entered input.
    fn register_file(&mut self, file: &Rc<str>, location: Option<&Location>) -> Result<(), Error> {
        let Some(root) = &self.options.file_var_root else {
            return Ok(());
        };
        if file.as_ref() == STRING_INPUT {
            return Ok(());
        }
        match Path::new(file.as_ref()).strip_prefix(root) {
            Ok(relative) => {
                self.file_vars
                    .insert(file.to_string(), relative.to_string_lossy().into_owned());
                Ok(())
            }
            Err(_) => Err(Error::new(
                ErrorKind::Render,
                format!("file '{file}' is not below the file variable root"),
                location.cloned(),
            )),
        }
    }

    /// Converts an expression error, unwrapping macro expansion failures.
    fn expr_error(&self, e: forp_expr::Error<Error>, location: &Location) -> Error {
        match e.cause {
            ErrorCause::Expand(inner) => inner,
            cause => Error::new(ErrorKind::Eval, cause.to_string(), Some(location.clone())),
        }
    }

    fn env_error(&self, e: forp_expr::EnvError, location: &Location) -> Error {
        Error::new(ErrorKind::Render, e.to_string(), Some(location.clone()))
    }

    // ----- emission -------------------------------------------------------

    fn markers_active(&self) -> bool {
        self.options.line_numbering && self.mute == 0 && self.capture == 0
    }

    fn write_marker(&mut self, file: &Rc<str>, line: usize, flag: Option<MarkerFlag>) {
        self.out.push_str(&format_marker(
            self.options.line_marker_format,
            line,
            file,
            flag,
        ));
        self.cursor = Some((Rc::clone(file), line));
    }

    /// Emits a marker when the cursor disagrees with the origin.
    fn sync(&mut self, location: &Location) {
        self.sync_to(&location.file, location.lines.start);
    }

    /// Re-syncs to the line following a whole-line construct.
    fn sync_after(&mut self, location: &Location) {
        self.sync_to(&location.file, location.lines.end);
    }

    fn sync_to(&mut self, file: &Rc<str>, line: usize) {
        if !self.markers_active() {
            return;
        }
        let in_sync = self
            .cursor
            .as_ref()
            .is_some_and(|(f, l)| f == file && *l == line);
        if !in_sync {
            self.write_marker(file, line, None);
        }
    }

    fn write_text(&mut self, text: &str) {
        if self.mute > 0 {
            return;
        }
        self.out.push_str(text);
        if self.capture == 0 {
            if let Some((_, line)) = &mut self.cursor {
                *line += text.matches('\n').count();
            }
        }
    }

    /// Emits expansion output attributed to `origin`, re-marking every
    /// continuation line so downstream tools resolve them all to the origin.
    fn emit_expansion(&mut self, text: &str, origin: &Location) {
        if self.mute > 0 || text.is_empty() {
            return;
        }
        if !self.markers_active() {
            self.write_text(text);
            return;
        }
        self.sync(origin);
        let mut first = true;
        for piece in text.split_inclusive('\n') {
            if !first {
                self.write_marker(&origin.file, origin.lines.start, None);
            }
            first = false;
            self.write_text(piece);
        }
    }

    /// Renders nodes into a capture buffer instead of the output.
    fn capture_nodes(&mut self, nodes: &[Node]) -> Result<String, Error> {
        self.capture += 1;
        let saved = std::mem::take(&mut self.out);
        let result = self.render_nodes(nodes);
        let captured = std::mem::replace(&mut self.out, saved);
        self.capture -= 1;
        result.map(|()| captured)
    }
}

impl Expander for Renderer<'_> {
    type Error = Error;

    fn expand(
        &mut self,
        mac: &Rc<MacroValue>,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Result<String, Error> {
        let call = self.current.clone();
        self.expand_macro(mac, args, kwargs, &call)
    }
}
