//! Build dependency resolution.
//!
//! Templates are parsed, never rendered, and every `include`, `import`,
//! `from ... import` and `extends` whose target is a string literal is
//! resolved against the search paths. Computed targets cannot be resolved
//! statically and are skipped, as are targets found in no search path.

use crate::error::{Error, Result};
use crate::template::read_to_string;
use encoding_rs::Encoding;
use log::debug;
use minijinja::machinery::{self, ast, WhitespaceConfig};
use minijinja::syntax::SyntaxConfig;
use minijinja::value::Value;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Collects the literal template names referenced by `source`, in order of
/// appearance. Fails with `ParseError` when the template does not parse.
pub fn referenced_templates(
    source: &str,
    name: &str,
    syntax_config: SyntaxConfig,
    whitespace_config: WhitespaceConfig,
) -> Result<Vec<String>> {
    let ast = machinery::parse(source, name, syntax_config, whitespace_config).map_err(|e| {
        Error::ParseError {
            path: name.to_string(),
            message: e.to_string(),
        }
    })?;
    let mut collector = ReferenceCollector::default();
    collector.visit_stmt(&ast);
    Ok(collector.references)
}

#[derive(Default)]
struct ReferenceCollector {
    references: Vec<String>,
}

impl ReferenceCollector {
    fn visit_stmt(&mut self, stmt: &ast::Stmt<'_>) {
        match stmt {
            ast::Stmt::Template(template) => self.visit_stmts(&template.children),
            ast::Stmt::ForLoop(for_loop) => {
                self.visit_stmts(&for_loop.body);
                self.visit_stmts(&for_loop.else_body);
            }
            ast::Stmt::IfCond(if_cond) => {
                self.visit_stmts(&if_cond.true_body);
                self.visit_stmts(&if_cond.false_body);
            }
            ast::Stmt::WithBlock(with_block) => self.visit_stmts(&with_block.body),
            ast::Stmt::SetBlock(set_block) => self.visit_stmts(&set_block.body),
            ast::Stmt::AutoEscape(auto_escape) => self.visit_stmts(&auto_escape.body),
            ast::Stmt::FilterBlock(filter_block) => self.visit_stmts(&filter_block.body),
            ast::Stmt::Block(block) => self.visit_stmts(&block.body),
            ast::Stmt::Macro(macro_stmt) => self.visit_stmts(&macro_stmt.body),
            ast::Stmt::CallBlock(call_block) => self.visit_stmts(&call_block.macro_decl.body),
            ast::Stmt::Import(import_stmt) => self.record(&import_stmt.expr),
            ast::Stmt::FromImport(from_import) => self.record(&from_import.expr),
            ast::Stmt::Extends(extends) => self.record(&extends.name),
            ast::Stmt::Include(include) => self.record(&include.name),
            _ => {}
        }
    }

    fn visit_stmts(&mut self, stmts: &[ast::Stmt<'_>]) {
        for stmt in stmts {
            self.visit_stmt(stmt);
        }
    }

    fn record(&mut self, expr: &ast::Expr<'_>) {
        match expr {
            ast::Expr::Const(constant) => match literal_names(&constant.value) {
                Some(names) => self.references.extend(names),
                None => debug!("Skipping non-string template reference"),
            },
            ast::Expr::List(list) => {
                for item in &list.items {
                    self.record(item);
                }
            }
            other => debug!("Skipping dynamic template reference ({})", other.description()),
        }
    }
}

fn literal_names(value: &Value) -> Option<Vec<String>> {
    if let Some(name) = value.as_str() {
        return Some(vec![name.to_owned()]);
    }
    let iter = value.try_iter().ok()?;
    let mut names = Vec::new();
    for item in iter {
        names.extend(literal_names(&item)?);
    }
    Some(names)
}

/// Returns the first existing `search_paths[i]/name`.
pub fn resolve_reference(name: &str, search_paths: &[PathBuf]) -> Option<PathBuf> {
    search_paths
        .iter()
        .map(|directory| directory.join(name))
        .find(|candidate| candidate.is_file())
}

/// Computes the files a template's render depends on.
pub struct DependencyResolver<'a> {
    search_paths: &'a [PathBuf],
    syntax_config: SyntaxConfig,
    whitespace_config: WhitespaceConfig,
    encoding: &'static Encoding,
}

impl<'a> DependencyResolver<'a> {
    pub fn new(
        search_paths: &'a [PathBuf],
        syntax_config: SyntaxConfig,
        whitespace_config: WhitespaceConfig,
        encoding: &'static Encoding,
    ) -> Self {
        Self {
            search_paths,
            syntax_config,
            whitespace_config,
            encoding,
        }
    }

    /// Returns `[template, data files..., extension files..., referenced
    /// templates...]`. Duplicates are kept.
    ///
    /// `template` is `None` for templates without a file; their `source`
    /// is still scanned for references.
    pub fn resolve(
        &self,
        template: Option<&Path>,
        name: &str,
        source: &str,
        data_files: &[PathBuf],
        extension_files: &[PathBuf],
    ) -> Result<Vec<PathBuf>> {
        let mut dependencies: Vec<PathBuf> = template.into_iter().map(Path::to_path_buf).collect();
        dependencies.extend(data_files.iter().cloned());
        dependencies.extend(extension_files.iter().cloned());

        let mut visited = HashSet::new();
        if let Some(template) = template {
            visited.insert(template.to_path_buf());
        }
        self.walk(name, source, &mut visited, &mut dependencies)?;
        Ok(dependencies)
    }

    /// Depth-first walk: every resolved reference is followed by the
    /// references of the template it points to, each template parsed once.
    fn walk(
        &self,
        name: &str,
        source: &str,
        visited: &mut HashSet<PathBuf>,
        dependencies: &mut Vec<PathBuf>,
    ) -> Result<()> {
        let references = referenced_templates(
            source,
            name,
            self.syntax_config.clone(),
            self.whitespace_config.clone(),
        )?;
        for reference in references {
            let Some(path) = resolve_reference(&reference, self.search_paths) else {
                debug!("Template '{reference}' referenced by '{name}' not found, skipping");
                continue;
            };
            dependencies.push(path.clone());
            if visited.insert(path.clone()) {
                let nested = read_to_string(&path, self.encoding)?;
                self.walk(&reference, &nested, visited, dependencies)?;
            }
        }
        Ok(())
    }
}

/// Formats a Makefile rule, `target: dep1 dep2 ...`, with every path shown
/// relative to `cwd` when it lies below it.
pub fn makefile_rule(target: &Path, dependencies: &[PathBuf], cwd: &Path) -> String {
    let dependencies: Vec<String> = dependencies
        .iter()
        .map(|dependency| display_relative(dependency, cwd))
        .collect();
    format!("{}: {}", display_relative(target, cwd), dependencies.join(" "))
}

/// Displays `path` relative to `cwd`, or unchanged when outside of it.
pub fn display_relative(path: &Path, cwd: &Path) -> String {
    let absolute = crate::companion::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    match absolute.strip_prefix(cwd) {
        Ok(relative) if !relative.as_os_str().is_empty() => relative.display().to_string(),
        _ => path.display().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn references(source: &str) -> Vec<String> {
        referenced_templates(source, "inline", SyntaxConfig::default(), WhitespaceConfig::default())
            .unwrap()
    }

    #[test]
    fn include_static_string() {
        assert_eq!(references("{% include 'greeting.html' %}"), vec!["greeting.html"]);
    }

    #[test]
    fn include_list_skips_dynamic_items() {
        assert_eq!(
            references("{% include ['first.html', helper_name, 'second.html'] %}"),
            vec!["first.html", "second.html"]
        );
    }

    #[test]
    fn import_extends_and_nested_blocks() {
        let found = references(
            "{% extends 'base.html' %}{% import 'macros.html' as m %}\
             {% block body %}{% if x %}{% from 'helpers.html' import util %}{% endif %}{% endblock %}",
        );
        assert_eq!(found, vec!["base.html", "macros.html", "helpers.html"]);
    }

    #[test]
    fn dynamic_include_is_skipped() {
        assert!(references("{% include template_name %}").is_empty());
    }

    #[test]
    fn malformed_template_is_a_parse_error() {
        let err = referenced_templates(
            "{% include 'a.html' ",
            "broken.j2",
            SyntaxConfig::default(),
            WhitespaceConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::ParseError { .. }));
    }

    #[test]
    fn makefile_rule_relative_paths() {
        let cwd = Path::new("/work");
        let rule = makefile_rule(
            Path::new("/work/foo.c"),
            &[PathBuf::from("/work/foo.c.jinja"), PathBuf::from("/elsewhere/header.j2inc")],
            cwd,
        );
        assert_eq!(rule, "foo.c: foo.c.jinja /elsewhere/header.j2inc");
    }
}
