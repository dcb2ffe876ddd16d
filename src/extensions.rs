//! Declarative extension files.
//!
//! An extension file is a TOML document that registers named capabilities
//! with the renderer without touching the core:
//!
//! ```toml
//! filter_shout = "value | upper"
//! test_even = "value % 2 == 0"
//! parse_specialxml = ".xml"
//! CLASSES = ["jinja2.ext.do"]
//! BLOCK_START_STRING = "<%"
//!
//! [FILTERS]
//! split = "value | split"
//! ```
//!
//! Loading is split in two: [`load_extension_file`] reads and parses the
//! document, [`register_declarations`] maps its entries onto a
//! [`Registrar`].

use crate::constants::BUILTIN_ENGINE_EXTENSIONS;
use crate::error::{Error, Result};
use crate::parsers::ParserRegistry;
use crate::template::read_to_string;
use encoding_rs::Encoding;
use indexmap::IndexMap;
use log::debug;
use minijinja::Environment;
use std::path::Path;

/// Engine syntax settings an extension file may override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyntaxKey {
    BlockStart,
    BlockEnd,
    VariableStart,
    VariableEnd,
    CommentStart,
    CommentEnd,
    LineStatementPrefix,
    LineCommentPrefix,
    NewlineSequence,
}

impl SyntaxKey {
    /// Maps a directive name such as `BLOCK_START_STRING` to its key.
    pub fn from_directive(name: &str) -> Option<Self> {
        let key = match name {
            "BLOCK_START_STRING" => Self::BlockStart,
            "BLOCK_END_STRING" => Self::BlockEnd,
            "VARIABLE_START_STRING" => Self::VariableStart,
            "VARIABLE_END_STRING" => Self::VariableEnd,
            "COMMENT_START_STRING" => Self::CommentStart,
            "COMMENT_END_STRING" => Self::CommentEnd,
            "LINE_STATEMENT_PREFIX" => Self::LineStatementPrefix,
            "LINE_COMMENT_PREFIX" => Self::LineCommentPrefix,
            "NEWLINE_SEQUENCE" => Self::NewlineSequence,
            _ => return None,
        };
        Some(key)
    }
}

/// Capability registration interface targeted by extension files.
pub trait Registrar {
    fn register_test(&mut self, name: &str, body: &str) -> Result<()>;
    fn register_filter(&mut self, name: &str, body: &str) -> Result<()>;
    /// Makes files with `extension` parse like files with `existing`.
    fn register_parser(&mut self, extension: &str, existing: &str) -> Result<()>;
    fn register_class(&mut self, name: &str) -> Result<()>;
    fn register_syntax_override(&mut self, key: SyntaxKey, value: &str) -> Result<()>;
}

/// Capability tables of a rendering session: declared tests and filters,
/// engine extensions, syntax overrides and the data parser registry.
#[derive(Debug, Clone, Default)]
pub struct Capabilities {
    pub tests: IndexMap<String, String>,
    pub filters: IndexMap<String, String>,
    /// Engine extensions named by `CLASSES`. MiniJinja always provides them,
    /// so the list only records the names that passed validation.
    pub classes: Vec<String>,
    pub syntax: IndexMap<SyntaxKey, String>,
    pub parsers: ParserRegistry,
}

impl Registrar for Capabilities {
    fn register_test(&mut self, name: &str, body: &str) -> Result<()> {
        compile_check(name, body)?;
        debug!("Registering test '{name}'");
        self.tests.insert(name.to_string(), body.to_string());
        Ok(())
    }

    fn register_filter(&mut self, name: &str, body: &str) -> Result<()> {
        compile_check(name, body)?;
        debug!("Registering filter '{name}'");
        self.filters.insert(name.to_string(), body.to_string());
        Ok(())
    }

    fn register_parser(&mut self, extension: &str, existing: &str) -> Result<()> {
        debug!("Registering parser '{extension}' as '{existing}'");
        self.parsers.alias(extension, existing)
    }

    fn register_class(&mut self, name: &str) -> Result<()> {
        if !BUILTIN_ENGINE_EXTENSIONS.contains(&name) {
            return Err(Error::ExtensionError(format!(
                "Unable to load extensions, unsupported engine extension '{name}'"
            )));
        }
        if !self.classes.iter().any(|class| class == name) {
            self.classes.push(name.to_string());
        }
        Ok(())
    }

    fn register_syntax_override(&mut self, key: SyntaxKey, value: &str) -> Result<()> {
        self.syntax.insert(key, value.to_string());
        Ok(())
    }
}

fn compile_check(name: &str, body: &str) -> Result<()> {
    let env = Environment::new();
    env.compile_expression(body).map(|_| ()).map_err(|e| {
        Error::ExtensionError(format!("Unable to load extensions, '{name}': {e}"))
    })
}

/// Reads the extension file at `path` and registers its declarations.
pub fn load_extension_file<P: AsRef<Path>>(
    path: P,
    encoding: &'static Encoding,
    registrar: &mut dyn Registrar,
) -> Result<()> {
    let path = path.as_ref();
    debug!("Loading extensions from '{}'", path.display());
    let content = read_to_string(path, encoding)?;
    let table: toml::Table = toml::from_str(&content).map_err(|e| {
        let line = e
            .span()
            .map(|span| content[..span.start.min(content.len())].matches('\n').count() + 1)
            .unwrap_or(1);
        Error::ExtensionError(format!(
            "Unable to load extensions\n{} ({}, line {})",
            capitalize(e.message().trim()),
            path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default(),
            line
        ))
    })?;
    register_declarations(&table, registrar)
}

/// Maps the entries of an extension document onto `registrar`.
///
/// `test_*`, `filter_*` and `parse_*` keys register under the stripped name.
/// A `TESTS`, `FILTERS` or `PARSERS` table takes precedence: when present,
/// the prefixed keys of the same kind are ignored.
pub fn register_declarations(table: &toml::Table, registrar: &mut dyn Registrar) -> Result<()> {
    let tests = bulk_table(table, "TESTS")?;
    let filters = bulk_table(table, "FILTERS")?;
    let parsers = bulk_table(table, "PARSERS")?;

    for (key, value) in table {
        if let Some(name) = key.strip_prefix("test_") {
            if tests.is_none() {
                registrar.register_test(name, string_value(key, value)?)?;
            }
        } else if let Some(name) = key.strip_prefix("filter_") {
            if filters.is_none() {
                registrar.register_filter(name, string_value(key, value)?)?;
            }
        } else if let Some(name) = key.strip_prefix("parse_") {
            if parsers.is_none() {
                registrar.register_parser(name, string_value(key, value)?)?;
            }
        } else if key == "CLASSES" {
            let classes = value.as_array().ok_or_else(|| {
                Error::ExtensionError(
                    "Unable to load extensions, CLASSES must be a list of extension names".into(),
                )
            })?;
            for class in classes {
                registrar.register_class(string_value(key, class)?)?;
            }
        } else if let Some(syntax_key) = SyntaxKey::from_directive(key) {
            registrar.register_syntax_override(syntax_key, string_value(key, value)?)?;
        } else if !matches!(key.as_str(), "TESTS" | "FILTERS" | "PARSERS") {
            debug!("Ignoring extension entry '{key}'");
        }
    }

    for (name, body) in tests.into_iter().flatten() {
        registrar.register_test(name, string_value(name, body)?)?;
    }
    for (name, body) in filters.into_iter().flatten() {
        registrar.register_filter(name, string_value(name, body)?)?;
    }
    for (extension, existing) in parsers.into_iter().flatten() {
        registrar.register_parser(extension, string_value(extension, existing)?)?;
    }
    Ok(())
}

fn bulk_table<'a>(table: &'a toml::Table, key: &str) -> Result<Option<&'a toml::Table>> {
    match table.get(key) {
        None => Ok(None),
        Some(toml::Value::Table(inner)) => Ok(Some(inner)),
        Some(_) => Err(Error::ExtensionError(format!(
            "Unable to load extensions, {key} must be a table"
        ))),
    }
}

fn string_value<'a>(key: &str, value: &'a toml::Value) -> Result<&'a str> {
    value.as_str().ok_or_else(|| {
        Error::ExtensionError(format!("Unable to load extensions, '{key}' must be a string"))
    })
}

fn capitalize(message: &str) -> String {
    let mut chars = message.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
