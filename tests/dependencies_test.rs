use kiln::dependencies::{makefile_rule, resolve_reference, DependencyResolver};
use kiln::error::Error;
use minijinja::machinery::WhitespaceConfig;
use minijinja::syntax::SyntaxConfig;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn write(root: &Path, name: &str, content: &str) -> PathBuf {
    let path = root.join(name);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, content).unwrap();
    path
}

fn resolve(search_paths: &[PathBuf], template: &Path) -> kiln::error::Result<Vec<PathBuf>> {
    let resolver = DependencyResolver::new(
        search_paths,
        SyntaxConfig::default(),
        WhitespaceConfig::default(),
        encoding_rs::UTF_8,
    );
    let source = fs::read_to_string(template).unwrap();
    let name = template.file_name().unwrap().to_string_lossy().into_owned();
    resolver.resolve(Some(template), &name, &source, &[], &[])
}

#[test]
fn test_list_order() {
    let dir = TempDir::new().unwrap();
    let template = write(dir.path(), "foo.c.jinja", "{% include 'header.j2inc' %}");
    let header = write(dir.path(), "header.j2inc", "");
    let data = dir.path().join("foo.json");
    let extension = dir.path().join("foo.j2ext");

    let search_paths = vec![dir.path().to_path_buf()];
    let resolver = DependencyResolver::new(
        &search_paths,
        SyntaxConfig::default(),
        WhitespaceConfig::default(),
        encoding_rs::UTF_8,
    );
    let deps = resolver
        .resolve(
            Some(&template),
            "foo.c.jinja",
            "{% include 'header.j2inc' %}",
            &[data.clone()],
            &[extension.clone()],
        )
        .unwrap();
    assert_eq!(deps, vec![template, data, extension, header]);
}

#[test]
fn test_transitive_references() {
    let dir = TempDir::new().unwrap();
    let template = write(
        dir.path(),
        "page.html.j2",
        "{% extends 'base.html' %}{% block body %}{% include 'missing.html' %}{% endblock %}",
    );
    let base = write(dir.path(), "base.html", "{% import 'macros.html' as m %}{% block body %}{% endblock %}");
    let macros = write(dir.path(), "macros.html", "{% macro x() %}{% include 'part.html' %}{% endmacro %}");
    let part = write(dir.path(), "part.html", "");

    let deps = resolve(&[dir.path().to_path_buf()], &template).unwrap();
    assert_eq!(deps, vec![template, base, macros, part]);
}

#[test]
fn test_first_search_path_wins() {
    let first = TempDir::new().unwrap();
    let second = TempDir::new().unwrap();
    let template = write(first.path(), "t.j2", "{% include 'shared.j2inc' %}{% include 'only_second.j2inc' %}");
    let shared = write(first.path(), "shared.j2inc", "");
    write(second.path(), "shared.j2inc", "");
    let only_second = write(second.path(), "only_second.j2inc", "");

    let search_paths = vec![first.path().to_path_buf(), second.path().to_path_buf()];
    let deps = resolve(&search_paths, &template).unwrap();
    assert_eq!(deps, vec![template, shared, only_second]);
    assert_eq!(resolve_reference("nowhere.j2inc", &search_paths), None);
}

#[test]
fn test_repeated_references_are_kept() {
    let dir = TempDir::new().unwrap();
    let template = write(dir.path(), "t.j2", "{% include 'a.j2inc' %}{% include 'a.j2inc' %}");
    let a = write(dir.path(), "a.j2inc", "{% include 't.j2' %}");

    let deps = resolve(&[dir.path().to_path_buf()], &template).unwrap();
    assert_eq!(deps, vec![template.clone(), a.clone(), template, a]);
}

#[test]
fn test_dynamic_references_are_skipped() {
    let dir = TempDir::new().unwrap();
    let template = write(dir.path(), "t.j2", "{% include name %}{% include 'x' ~ suffix %}");
    write(dir.path(), "x.j2inc", "");

    let deps = resolve(&[dir.path().to_path_buf()], &template).unwrap();
    assert_eq!(deps, vec![template]);
}

#[test]
fn test_malformed_template_fails() {
    let dir = TempDir::new().unwrap();
    let template = write(dir.path(), "t.j2", "{% if %}");
    let err = resolve(&[dir.path().to_path_buf()], &template).unwrap_err();
    assert!(matches!(err, Error::ParseError { .. }));
}

#[test]
fn test_malformed_included_template_fails() {
    let dir = TempDir::new().unwrap();
    let template = write(dir.path(), "t.j2", "{% include 'broken.j2inc' %}");
    write(dir.path(), "broken.j2inc", "{{ unclosed");
    let err = resolve(&[dir.path().to_path_buf()], &template).unwrap_err();
    assert!(matches!(err, Error::ParseError { .. }));
}

#[test]
fn test_custom_delimiters() {
    let dir = TempDir::new().unwrap();
    let template = write(dir.path(), "t.tex.j2", "<% include 'preamble.tex' %>");
    let preamble = write(dir.path(), "preamble.tex", "");
    let syntax = SyntaxConfig::builder()
        .block_delimiters("<%", "%>")
        .build()
        .unwrap();

    let search_paths = vec![dir.path().to_path_buf()];
    let resolver = DependencyResolver::new(&search_paths, syntax, WhitespaceConfig::default(), encoding_rs::UTF_8);
    let deps = resolver
        .resolve(Some(&template), "t.tex.j2", "<% include 'preamble.tex' %>", &[], &[])
        .unwrap();
    assert_eq!(deps, vec![template, preamble]);
}

#[test]
fn test_stdin_template_lists_only_references() {
    let dir = TempDir::new().unwrap();
    let part = write(dir.path(), "part.j2inc", "");
    let search_paths = vec![dir.path().to_path_buf()];
    let resolver = DependencyResolver::new(
        &search_paths,
        SyntaxConfig::default(),
        WhitespaceConfig::default(),
        encoding_rs::UTF_8,
    );
    let deps = resolver
        .resolve(None, "<stdin>", "{% include 'part.j2inc' %}", &[], &[])
        .unwrap();
    assert_eq!(deps, vec![part]);
}

#[test]
fn test_makefile_rule_outside_cwd() {
    let rule = makefile_rule(
        Path::new("/project/out/foo.c"),
        &[PathBuf::from("/project/foo.c.jinja"), PathBuf::from("/usr/include/x.j2inc")],
        Path::new("/project"),
    );
    assert_eq!(rule, "out/foo.c: foo.c.jinja /usr/include/x.j2inc");
}
