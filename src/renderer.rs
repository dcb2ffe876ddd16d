//! Template renderer built on MiniJinja.
//!
//! The renderer owns a configured [`Environment`] and applies one of three
//! policies to undefined variables, see [`Mode`].
use crate::constants::BUILTIN_GLOBALS;
use crate::context::Variables;
use crate::dependencies::referenced_templates;
use crate::error::{Error, Result};
use crate::extensions::{Capabilities, SyntaxKey};
use crate::filters::{add_declared_filter, add_declared_test, register_builtin_filters};
use crate::template::read_to_string;
use encoding_rs::Encoding;
use indexmap::IndexMap;
use minijinja::machinery::WhitespaceConfig;
use minijinja::syntax::SyntaxConfig;
use minijinja::value::{Enumerator, Object, ObjectRepr, Rest, Value};
use minijinja::{AutoEscape, Environment, ErrorKind, State, Template, UndefinedBehavior};
use regex::Regex;
use std::collections::BTreeSet;
use std::error::Error as _;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, LazyLock};

static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z_][A-Za-z0-9_]*").expect("valid identifier pattern"));

/// How references to undefined variables are rendered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum Mode {
    /// Undefined variables render as empty text
    #[default]
    #[value(skip)]
    Lenient,
    /// Undefined variables fail the render
    Pedantic,
    /// Undefined variables render as their original `{{ name }}` reference
    Debug,
}

/// Whitespace handling of the template syntax.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Whitespace {
    pub trim_blocks: bool,
    pub lstrip_blocks: bool,
    pub keep_trailing_newline: bool,
}

impl Default for Whitespace {
    fn default() -> Self {
        Self {
            trim_blocks: true,
            lstrip_blocks: true,
            keep_trailing_newline: false,
        }
    }
}

impl From<Whitespace> for WhitespaceConfig {
    fn from(whitespace: Whitespace) -> Self {
        WhitespaceConfig {
            keep_trailing_newline: whitespace.keep_trailing_newline,
            trim_blocks: whitespace.trim_blocks,
            lstrip_blocks: whitespace.lstrip_blocks,
        }
    }
}

/// Builds the engine syntax from extension-file overrides; unset
/// delimiters keep their defaults.
pub fn syntax_config(overrides: &IndexMap<SyntaxKey, String>) -> Result<SyntaxConfig> {
    if overrides.keys().all(|key| *key == SyntaxKey::NewlineSequence) {
        return Ok(SyntaxConfig::default());
    }
    let get = |key: SyntaxKey, default: &str| -> String {
        overrides.get(&key).cloned().unwrap_or_else(|| default.to_string())
    };
    let mut builder = SyntaxConfig::builder();
    builder
        .block_delimiters(get(SyntaxKey::BlockStart, "{%"), get(SyntaxKey::BlockEnd, "%}"))
        .variable_delimiters(get(SyntaxKey::VariableStart, "{{"), get(SyntaxKey::VariableEnd, "}}"))
        .comment_delimiters(get(SyntaxKey::CommentStart, "{#"), get(SyntaxKey::CommentEnd, "#}"));
    if let Some(prefix) = overrides.get(&SyntaxKey::LineStatementPrefix) {
        builder.line_statement_prefix(prefix.clone());
    }
    if let Some(prefix) = overrides.get(&SyntaxKey::LineCommentPrefix) {
        builder.line_comment_prefix(prefix.clone());
    }
    builder.build().map_err(Error::MinijinjaError)
}

/// Trait for template rendering engines.
pub trait TemplateRenderer {
    /// Renders the template `source`, registered as `name`, with `context`.
    fn render(&self, name: &str, source: &str, context: &Variables) -> Result<String>;
}

/// MiniJinja-based template rendering engine.
pub struct MiniJinjaRenderer {
    env: Environment<'static>,
    mode: Mode,
    syntax: SyntaxConfig,
    whitespace: Whitespace,
    newline_sequence: Option<String>,
}

impl MiniJinjaRenderer {
    /// Creates a renderer with default syntax, whitespace and policy.
    pub fn new() -> Self {
        Self::build(
            &Capabilities::default(),
            SyntaxConfig::default(),
            Mode::default(),
            Whitespace::default(),
            Vec::new(),
            encoding_rs::UTF_8,
        )
    }

    /// Builds a renderer with the declared capabilities. Templates referenced
    /// by `include`, `import` or `extends` are looked up in `search_paths`,
    /// first match wins.
    pub fn from_capabilities(
        capabilities: &Capabilities,
        mode: Mode,
        whitespace: Whitespace,
        search_paths: Vec<PathBuf>,
        encoding: &'static Encoding,
    ) -> Result<Self> {
        let syntax = syntax_config(&capabilities.syntax)?;
        Ok(Self::build(capabilities, syntax, mode, whitespace, search_paths, encoding))
    }

    fn build(
        capabilities: &Capabilities,
        syntax: SyntaxConfig,
        mode: Mode,
        whitespace: Whitespace,
        search_paths: Vec<PathBuf>,
        encoding: &'static Encoding,
    ) -> Self {
        let mut env = Environment::new();
        env.set_syntax(syntax.clone());
        env.set_trim_blocks(whitespace.trim_blocks);
        env.set_lstrip_blocks(whitespace.lstrip_blocks);
        env.set_keep_trailing_newline(whitespace.keep_trailing_newline);
        env.set_auto_escape_callback(|_| AutoEscape::None);
        env.set_undefined_behavior(match mode {
            Mode::Pedantic => UndefinedBehavior::Strict,
            Mode::Lenient | Mode::Debug => UndefinedBehavior::Lenient,
        });
        env.set_loader(move |name| {
            for directory in &search_paths {
                let candidate = directory.join(name);
                if candidate.is_file() {
                    return read_to_string(&candidate, encoding).map(Some).map_err(|e| {
                        minijinja::Error::new(ErrorKind::InvalidOperation, e.to_string())
                    });
                }
            }
            Ok(None)
        });

        register_builtin_filters(&mut env);
        for (name, body) in &capabilities.filters {
            add_declared_filter(&mut env, name.clone(), body.clone());
        }
        for (name, body) in &capabilities.tests {
            add_declared_test(&mut env, name.clone(), body.clone());
        }
        if mode == Mode::Debug {
            env.add_test("defined", is_defined_test);
            env.add_test("undefined", is_undefined);
            env.add_filter("default", default_filter);
            env.add_filter("d", default_filter);
        }

        Self {
            env,
            mode,
            syntax,
            whitespace,
            newline_sequence: capabilities.syntax.get(&SyntaxKey::NewlineSequence).cloned(),
        }
    }
}

impl Default for MiniJinjaRenderer {
    fn default() -> Self {
        MiniJinjaRenderer::new()
    }
}

impl TemplateRenderer for MiniJinjaRenderer {
    /// Renders a template string using MiniJinja.
    ///
    /// # Errors
    /// * `Error::UndefinedVariable` in pedantic mode when an undefined
    ///   variable is used
    /// * `Error::MinijinjaError` for syntax and runtime errors
    fn render(&self, name: &str, source: &str, context: &Variables) -> Result<String> {
        let mut env = self.env.clone();
        env.add_template_owned(name.to_string(), source.to_string())?;
        let tmpl = env.get_template(name)?;

        let mut values: IndexMap<String, Value> = context
            .iter()
            .map(|(key, value)| (key.clone(), Value::from_serialize(value)))
            .collect();
        let missing: BTreeSet<String> = match self.mode {
            Mode::Lenient => BTreeSet::new(),
            Mode::Pedantic | Mode::Debug => self
                .undeclared_variables(&env, &tmpl)
                .into_iter()
                .filter(|var| !context.contains_key(var) && !BUILTIN_GLOBALS.contains(&var.as_str()))
                .collect(),
        };
        if self.mode == Mode::Debug {
            for var in &missing {
                values.insert(var.clone(), Value::from_object(DebugUndefined { path: var.clone() }));
            }
        }

        let rendered = tmpl.render(Value::from_serialize(&values)).map_err(|err| {
            if self.mode == Mode::Pedantic {
                if let Some(name) = undefined_name(&err, &env, &missing) {
                    return Error::UndefinedVariable { name };
                }
            }
            Error::MinijinjaError(err)
        })?;

        Ok(match &self.newline_sequence {
            Some(newline) if newline != "\n" => rendered.replace('\n', newline),
            _ => rendered,
        })
    }
}

impl MiniJinjaRenderer {
    /// Variables left undeclared by `root` and by every template it
    /// references literally. Included templates share the caller's context,
    /// so their free names count too.
    fn undeclared_variables(&self, env: &Environment<'_>, root: &Template<'_, '_>) -> BTreeSet<String> {
        let mut undeclared = BTreeSet::new();
        let mut seen = BTreeSet::from([root.name().to_string()]);
        let mut pending = vec![root.name().to_string()];
        while let Some(name) = pending.pop() {
            let Ok(tmpl) = env.get_template(&name) else {
                continue;
            };
            undeclared.extend(tmpl.undeclared_variables(false));
            let references = referenced_templates(
                tmpl.source(),
                &name,
                self.syntax.clone(),
                self.whitespace.into(),
            )
            .unwrap_or_default();
            for reference in references {
                if seen.insert(reference.clone()) {
                    pending.push(reference);
                }
            }
        }
        undeclared
    }
}

/// Works out which variable an undefined-value error refers to. The innermost
/// undefined error of the chain points into the template that failed; a name
/// is only reported when an identifier at that location is really missing.
fn undefined_name(
    err: &minijinja::Error,
    env: &Environment<'_>,
    missing: &BTreeSet<String>,
) -> Option<String> {
    let mut innermost = None;
    let mut current = Some(err);
    while let Some(error) = current {
        if error.kind() == ErrorKind::UndefinedError {
            innermost = Some(error);
        }
        current = error
            .source()
            .and_then(|source| source.downcast_ref::<minijinja::Error>());
    }
    let innermost = innermost?;

    let tmpl = env.get_template(innermost.name()?).ok()?;
    let snippet = tmpl.source().get(innermost.range()?)?;
    IDENTIFIER
        .find_iter(snippet)
        .map(|m| m.as_str())
        .find(|id| missing.contains(*id))
        .map(str::to_string)
}

fn is_undefined(value: &Value) -> bool {
    value.is_undefined() || value.downcast_object_ref::<DebugUndefined>().is_some()
}

fn is_defined_test(value: &Value) -> bool {
    !is_undefined(value)
}

/// `default` that also treats debug stand-ins as undefined.
fn default_filter(
    state: &State,
    value: &Value,
    args: Rest<Value>,
) -> std::result::Result<Value, minijinja::Error> {
    minijinja::filters::default(state, &undefined_if_stand_in(value), args)
}

fn undefined_if_stand_in(value: &Value) -> Value {
    if is_undefined(value) {
        Value::UNDEFINED
    } else {
        value.clone()
    }
}

/// Stand-in for an undefined variable in debug mode. It renders as the
/// reference that produced it, attribute access included, and otherwise
/// behaves like an undefined value: falsy, empty when iterated, and not
/// `defined`.
#[derive(Debug)]
struct DebugUndefined {
    path: String,
}

impl Object for DebugUndefined {
    fn repr(self: &Arc<Self>) -> ObjectRepr {
        ObjectRepr::Iterable
    }

    fn get_value(self: &Arc<Self>, key: &Value) -> Option<Value> {
        Some(Value::from_object(DebugUndefined {
            path: format!("{}.{}", self.path, key),
        }))
    }

    fn enumerate(self: &Arc<Self>) -> Enumerator {
        Enumerator::Empty
    }

    fn is_true(self: &Arc<Self>) -> bool {
        false
    }

    fn render(self: &Arc<Self>, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{{ {} }}}}", self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars(value: serde_json::Value) -> Variables {
        crate::context::into_variables(value).unwrap()
    }

    fn renderer(mode: Mode) -> MiniJinjaRenderer {
        MiniJinjaRenderer::from_capabilities(
            &Capabilities::default(),
            mode,
            Whitespace::default(),
            Vec::new(),
            encoding_rs::UTF_8,
        )
        .unwrap()
    }

    #[test]
    fn test_minijinja_renderer() {
        let engine = MiniJinjaRenderer::new();
        let context = vars(json!({"name": "test", "value": 42}));

        let result = engine.render("t", "Hello {{ name }}!", &context).unwrap();
        assert_eq!(result, "Hello test!");

        let result = engine.render("t", "Value: {{ value }}", &context).unwrap();
        assert_eq!(result, "Value: 42");
    }

    #[test]
    fn test_debug_mode_renders_attribute_reference() {
        let result = renderer(Mode::Debug)
            .render("t", "{{ foo.bar }} {{ known }}", &vars(json!({"known": 1})))
            .unwrap();
        assert_eq!(result, "{{ foo.bar }} 1");
    }

    #[test]
    fn test_debug_mode_keeps_builtin_globals() {
        let result = renderer(Mode::Debug)
            .render("t", "{% for i in range(3) %}{{ i }}{% endfor %}", &Variables::new())
            .unwrap();
        assert_eq!(result, "012");
    }

    #[test]
    fn test_pedantic_mode_names_the_variable() {
        let err = renderer(Mode::Pedantic)
            .render("t", "{{ a }} and {{ foo }}", &vars(json!({"a": 1})))
            .unwrap_err();
        assert_eq!(err.to_string(), "Variable 'foo' is undefined");
    }

    #[test]
    fn test_debug_mode_keeps_undefined_control_flow() {
        let engine = renderer(Mode::Debug);
        let render = |source: &str| engine.render("t", source, &Variables::new()).unwrap();
        assert_eq!(render("{% if foo %}yes{% else %}no{% endif %}"), "no");
        assert_eq!(render("{% for x in items %}{{ x }}{% endfor %}end"), "end");
        assert_eq!(render("{% for x in items %}{{ x }}{% else %}empty{% endfor %}"), "empty");
        assert_eq!(render("{{ foo is defined }} {{ foo.bar is undefined }}"), "false true");
        assert_eq!(render("{{ foo | default('d') }} {{ foo | d('e') }}"), "d e");
        assert_eq!(render("{{ foo | length }}"), "0");
    }

    #[test]
    fn test_debug_mode_leaves_defined_values_alone() {
        let result = renderer(Mode::Debug)
            .render(
                "t",
                "{{ known | default('d') }} {{ known is defined }} {{ '' | default('lax', true) }}",
                &vars(json!({"known": 1})),
            )
            .unwrap();
        assert_eq!(result, "1 true lax");
    }

    #[test]
    fn test_pedantic_mode_missing_attribute_is_an_engine_error() {
        let err = renderer(Mode::Pedantic)
            .render("t", "{{ user.name }}", &vars(json!({"user": {"id": 1}})))
            .unwrap_err();
        assert!(matches!(err, Error::MinijinjaError(_)));
        assert!(!err.to_string().contains("Variable 'user'"));
    }

    #[test]
    fn test_custom_syntax() {
        let mut capabilities = Capabilities::default();
        capabilities.syntax.insert(SyntaxKey::BlockStart, "<%".into());
        capabilities.syntax.insert(SyntaxKey::BlockEnd, "%>".into());
        capabilities.syntax.insert(SyntaxKey::VariableStart, "<<".into());
        capabilities.syntax.insert(SyntaxKey::VariableEnd, ">>".into());
        let renderer = MiniJinjaRenderer::from_capabilities(
            &capabilities,
            Mode::Lenient,
            Whitespace::default(),
            Vec::new(),
            encoding_rs::UTF_8,
        )
        .unwrap();
        let result = renderer
            .render("t", "<% for x in range(0, 3) %><< x >><% endfor %> {{ x }}", &Variables::new())
            .unwrap();
        assert_eq!(result, "012 {{ x }}");
    }

    #[test]
    fn test_newline_sequence() {
        let mut capabilities = Capabilities::default();
        capabilities.syntax.insert(SyntaxKey::NewlineSequence, "\r\n".into());
        let renderer = MiniJinjaRenderer::from_capabilities(
            &capabilities,
            Mode::Lenient,
            Whitespace::default(),
            Vec::new(),
            encoding_rs::UTF_8,
        )
        .unwrap();
        let result = renderer.render("t", "a\nb", &Variables::new()).unwrap();
        assert_eq!(result, "a\r\nb");
    }
}
