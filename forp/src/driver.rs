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

//! Binding the pipeline together
//!
//! A [`Preprocessor`] owns the configuration and the global environment.
//! Construction loads the configured modules and defines; the environment
//! then persists across [`process_text`](Preprocessor::process_text) and
//! [`process_file`](Preprocessor::process_file) calls.

use crate::config::{Encoding, Options};
use crate::error::{Error, ErrorKind};
use crate::fold::Folder;
use crate::render::Renderer;
use chrono::Local;
use forp_expr::{Env, NoMacros, Value};
use forp_syntax::parser::is_name;
use forp_syntax::source::STRING_INPUT;
use forp_syntax::{build, lex};
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// Exit code for fatal preprocessing errors
pub const ERROR_EXIT_CODE: i32 = 1;
/// Exit code for user-requested stops and failed assertions
pub const USER_ERROR_EXIT_CODE: i32 = 2;

/// Path sentinel selecting the standard input or output stream
pub const STREAM: &str = "-";

/// Maps an error to the process exit code it calls for.
#[must_use]
pub fn exit_code(error: &Error) -> i32 {
    if error.is_user_stop() {
        USER_ERROR_EXIT_CODE
    } else {
        ERROR_EXIT_CODE
    }
}

/// A configured preprocessor
///
/// The global environment is created once: modules are preloaded, then the
/// defines are evaluated left to right. Later processing calls share the
/// environment, so definitions accumulate across inputs, as they did in the
/// original tool.
#[derive(Debug)]
pub struct Preprocessor {
    options: Options,
    env: Env,
}

impl Preprocessor {
    /// Validates the options and prepares the global environment.
    pub fn new(options: Options) -> Result<Self, Error> {
        options.validate()?;
        let env = Env::new();
        env.set_predefined("_SYSTEM_", Value::string(system_name()));
        env.set_predefined("_MACHINE_", Value::string(std::env::consts::ARCH));
        let now = Local::now();
        env.set_predefined("_DATE_", Value::string(now.format("%Y-%m-%d").to_string()));
        env.set_predefined("_TIME_", Value::string(now.format("%H:%M:%S").to_string()));
        let mut this = Preprocessor { options, env };
        this.load_modules()?;
        this.apply_defines()?;
        Ok(this)
    }

    /// The options the preprocessor was created with.
    #[must_use]
    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Preprocesses in-memory text under the `<string>` input name.
    pub fn process_text(&mut self, text: &str) -> Result<String, Error> {
        self.run(text, Rc::from(STRING_INPUT))
    }

    /// Preprocesses `input` into `output`; `-` selects the standard streams.
    pub fn process_file(&mut self, input: &str, output: &str) -> Result<(), Error> {
        let (text, name): (String, Rc<str>) = if input == STREAM {
            let mut buffer = String::new();
            std::io::stdin()
                .read_to_string(&mut buffer)
                .map_err(|e| Error::new(ErrorKind::Config, format!("cannot read input: {e}"), None))?;
            (buffer, Rc::from(STRING_INPUT))
        } else {
            let text = read_file(Path::new(input), self.options.encoding)
                .map_err(|message| Error::new(ErrorKind::Config, message, None))?;
            (text, Rc::from(input))
        };
        let result = self.run(&text, name)?;
        if output == STREAM {
            std::io::stdout()
                .write_all(result.as_bytes())
                .map_err(|e| Error::new(ErrorKind::Config, format!("cannot write output: {e}"), None))
        } else {
            let path = Path::new(output);
            if self.options.create_parent_folder {
                if let Some(parent) = path.parent() {
                    if !parent.as_os_str().is_empty() {
                        fs::create_dir_all(parent).map_err(|e| {
                            Error::new(
                                ErrorKind::Config,
                                format!("cannot create '{}': {e}", parent.display()),
                                None,
                            )
                        })?;
                    }
                }
            }
            let bytes = encode(&result, self.options.encoding)
                .map_err(|message| Error::new(ErrorKind::Config, message, None))?;
            fs::write(path, bytes).map_err(|e| {
                Error::new(
                    ErrorKind::Config,
                    format!("cannot write '{}': {e}", path.display()),
                    None,
                )
            })
        }
    }

    fn run(&mut self, text: &str, file: Rc<str>) -> Result<String, Error> {
        let nodes = build(lex(text, &file)?)?;
        let mut renderer = Renderer::new(&self.options, self.env.clone());
        renderer.start(&file)?;
        renderer.render_nodes(&nodes)?;
        let rendered = renderer.into_output();
        if self.options.no_folding {
            Ok(rendered)
        } else {
            Ok(Folder::new(&self.options).fold(&rendered))
        }
    }

    /// Renders each configured module in a muted pass into the global scope.
    fn load_modules(&mut self) -> Result<(), Error> {
        let modules = self.options.modules.clone();
        for name in &modules {
            let file_name = format!("{name}.fpp");
            let Some(path) = self.resolve_module(&file_name) else {
                return Err(Error::new(
                    ErrorKind::Config,
                    format!("module '{name}' not found"),
                    None,
                ));
            };
            let text = read_file(&path, self.options.encoding)
                .map_err(|message| Error::new(ErrorKind::Config, message, None))?;
            let file: Rc<str> = Rc::from(path.to_string_lossy().as_ref());
            let nodes = build(lex(&text, &file)?)?;
            let mut renderer = Renderer::new(&self.options, self.env.clone());
            renderer.mute();
            renderer.start(&file)?;
            renderer.render_nodes(&nodes)?;
        }
        Ok(())
    }

    /// Modules are searched in the module directories, the include path, and
    /// finally the working directory.
    fn resolve_module(&self, file_name: &str) -> Option<PathBuf> {
        self.options
            .module_dirs
            .iter()
            .chain(self.options.includes.iter())
            .map(|dir| dir.join(file_name))
            .find(|path| path.is_file())
            .or_else(|| {
                let path = PathBuf::from(file_name);
                path.is_file().then_some(path)
            })
    }

    fn apply_defines(&mut self) -> Result<(), Error> {
        let defines = self.options.defines.clone();
        for define in &defines {
            let (name, expr) = match define.split_once('=') {
                Some((name, expr)) => (name.trim(), Some(expr)),
                None => (define.trim(), None),
            };
            if !is_name(name) {
                return Err(Error::new(
                    ErrorKind::Config,
                    format!("invalid define '{define}'"),
                    None,
                ));
            }
            let value = match expr {
                Some(expr) => forp_expr::eval(expr, &self.env, &mut NoMacros).map_err(|e| {
                    Error::new(
                        ErrorKind::Config,
                        format!("error evaluating define '{define}': {e}"),
                        None,
                    )
                })?,
                None => Value::None,
            };
            self.env.assign(name, value).map_err(|e| {
                Error::new(ErrorKind::Config, e.to_string(), None)
            })?;
        }
        Ok(())
    }
}

/// `_SYSTEM_` value in the convention of `uname -s`
fn system_name() -> String {
    match std::env::consts::OS {
        "linux" => "Linux".to_string(),
        "macos" => "Darwin".to_string(),
        "windows" => "Windows".to_string(),
        other => {
            let mut chars = other.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        }
    }
}

/// Reads and decodes a file, reporting failures as plain messages.
pub(crate) fn read_file(path: &Path, encoding: Encoding) -> Result<String, String> {
    let bytes =
        fs::read(path).map_err(|e| format!("cannot read '{}': {e}", path.display()))?;
    decode(bytes, encoding).map_err(|message| {
        format!("cannot decode '{}': {message}", path.display())
    })
}

fn decode(bytes: Vec<u8>, encoding: Encoding) -> Result<String, String> {
    match encoding {
        Encoding::Utf8 => {
            String::from_utf8(bytes).map_err(|_| "invalid UTF-8 in input".to_string())
        }
        Encoding::Latin1 => Ok(bytes.iter().map(|&b| b as char).collect()),
        Encoding::Ascii => {
            if bytes.is_ascii() {
                Ok(String::from_utf8(bytes).expect("ASCII is valid UTF-8"))
            } else {
                Err("non-ASCII byte in input".to_string())
            }
        }
    }
}

fn encode(text: &str, encoding: Encoding) -> Result<Vec<u8>, String> {
    match encoding {
        Encoding::Utf8 => Ok(text.as_bytes().to_vec()),
        Encoding::Latin1 => text
            .chars()
            .map(|c| {
                let code = c as u32;
                u8::try_from(code).map_err(|_| {
                    format!("character '{c}' is not representable in latin-1")
                })
            })
            .collect(),
        Encoding::Ascii => {
            if text.is_ascii() {
                Ok(text.as_bytes().to_vec())
            } else {
                Err("output contains non-ASCII characters".to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn preprocessor(options: Options) -> Preprocessor {
        Preprocessor::new(options).unwrap()
    }

    #[test]
    fn defines_are_available_to_the_input() {
        let options = Options {
            defines: vec!["DEBUG=1".to_string(), "NAME='x'".to_string()],
            ..Options::default()
        };
        let mut pp = preprocessor(options);
        assert_eq!(pp.process_text("${DEBUG}$ ${NAME}$").unwrap(), "1 x");
    }

    #[test]
    fn defines_may_reference_earlier_defines() {
        let options = Options {
            defines: vec!["A=2".to_string(), "B=A * 3".to_string()],
            ..Options::default()
        };
        let mut pp = preprocessor(options);
        assert_eq!(pp.process_text("${B}$").unwrap(), "6");
    }

    #[test]
    fn define_without_value_is_none() {
        let options = Options {
            defines: vec!["FLAG".to_string()],
            ..Options::default()
        };
        let mut pp = preprocessor(options);
        assert_eq!(pp.process_text("${defined('FLAG')}$").unwrap(), "True");
        assert_eq!(pp.process_text("$:FLAG\n").unwrap(), "\n");
    }

    #[test]
    fn invalid_define_is_a_config_error() {
        let options = Options {
            defines: vec!["VAR=1.2.2".to_string()],
            ..Options::default()
        };
        let e = Preprocessor::new(options).unwrap_err();
        assert_eq!(e.kind(), ErrorKind::Config);
        assert_eq!(exit_code(&e), ERROR_EXIT_CODE);
    }

    #[test]
    fn state_persists_across_process_text_calls() {
        let mut pp = preprocessor(Options::default());
        pp.process_text("#:set X = 5\n").unwrap();
        assert_eq!(pp.process_text("${X}$").unwrap(), "5");
    }

    #[test]
    fn modules_preload_definitions() {
        let dir = tempfile::tempdir().unwrap();
        let mut module = fs::File::create(dir.path().join("helpers.fpp")).unwrap();
        writeln!(module, "#:def shout(s)\n${{s.upper()}}$!\n#:enddef").unwrap();
        drop(module);

        let options = Options {
            modules: vec!["helpers".to_string()],
            module_dirs: vec![dir.path().to_path_buf()],
            ..Options::default()
        };
        let mut pp = preprocessor(options);
        assert_eq!(pp.process_text("${shout('hey')}$").unwrap(), "HEY!");
    }

    #[test]
    fn missing_module_is_a_config_error() {
        let options = Options {
            modules: vec!["no_such_module_anywhere".to_string()],
            ..Options::default()
        };
        let e = Preprocessor::new(options).unwrap_err();
        assert_eq!(e.kind(), ErrorKind::Config);
    }

    #[test]
    fn process_file_reads_and_writes() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.F90");
        let output = dir.path().join("sub/out.F90");
        fs::write(&input, "#:set N = 3\nvalue = ${N}$\n").unwrap();

        let options = Options {
            create_parent_folder: true,
            ..Options::default()
        };
        let mut pp = preprocessor(options);
        pp.process_file(input.to_str().unwrap(), output.to_str().unwrap())
            .unwrap();
        assert_eq!(fs::read_to_string(&output).unwrap(), "value = 3\n");
    }

    #[test]
    fn latin1_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.F90");
        let output = dir.path().join("out.F90");
        // "grüß" in latin-1
        fs::write(&input, b"gr\xfc\xdf\n").unwrap();

        let options = Options {
            encoding: Encoding::Latin1,
            ..Options::default()
        };
        let mut pp = preprocessor(options);
        pp.process_file(input.to_str().unwrap(), output.to_str().unwrap())
            .unwrap();
        assert_eq!(fs::read(&output).unwrap(), b"gr\xfc\xdf\n");
    }

    #[test]
    fn user_stop_exit_code() {
        let mut pp = preprocessor(Options::default());
        let e = pp.process_text("#:stop 'enough'\n").unwrap_err();
        assert!(e.is_user_stop());
        assert_eq!(exit_code(&e), USER_ERROR_EXIT_CODE);
    }

    #[test]
    fn system_and_machine_are_bound() {
        let mut pp = preprocessor(Options::default());
        let out = pp.process_text("${_SYSTEM_}$ ${_MACHINE_}$").unwrap();
        assert!(!out.starts_with(' '));
        assert!(out.contains(' '));
    }

    #[test]
    fn date_has_iso_shape() {
        let mut pp = preprocessor(Options::default());
        let out = pp.process_text("${_DATE_}$").unwrap();
        assert_eq!(out.len(), 10);
        assert_eq!(out.as_bytes()[4], b'-');
        assert_eq!(out.as_bytes()[7], b'-');
    }
}
