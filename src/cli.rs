//! Command-line interface implementation for kiln.
//! Provides argument parsing and help text formatting using clap.
//!
//! Template variables are given as arbitrary long options
//! (`--hello=world` or `--hello world`). clap only accepts declared
//! options, so [`split_template_variables`] separates them out first.

use crate::constants::DEFAULT_ENCODING;
use crate::context::Variables;
use crate::renderer::Mode;
use clap::{error::ErrorKind, CommandFactory, Parser};
use minijinja::value::ValueKind;
use minijinja::{Environment, UndefinedBehavior};
use serde_json::Value;
use std::collections::HashMap;
use std::ffi::OsString;
use std::path::PathBuf;

/// Command-line arguments structure for kiln.
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "kiln: render templates from structured data files",
    long_about = "Reads the given TEMPLATE and renders it into a new file. A template called \
                  'foo.c.j2' is written into 'foo.c' unless --output is given.\n\n\
                  Template variables may be given on the command line, e.g.\n\n    \
                  kiln --hello=world -o output.txt template.j2"
)]
pub struct Args {
    /// Template file, or `-` to read the template from stdin
    #[arg(value_name = "TEMPLATE")]
    pub template: String,

    /// Place the rendered template into FILENAME, `-` for stdout
    #[arg(short, long, value_name = "FILENAME")]
    pub output: Option<String>,

    /// Read template variables from FILENAME.
    /// Built-in parsers are JSON, YAML, TOML, XML, INI and CSV.
    #[arg(short, long, value_name = "FILENAME")]
    pub variables: Vec<PathBuf>,

    /// Read template extensions from FILENAME
    #[arg(short, long, env = "KILN_EXTENSIONS", value_name = "FILENAME")]
    pub extensions: Option<PathBuf>,

    /// Encoding of templates, data files and output
    #[arg(short = 'c', long, default_value = DEFAULT_ENCODING)]
    pub encoding: String,

    /// Add DIRECTORY to the directories searched for referenced templates
    #[arg(short = 'I', long, visible_alias = "include_path", value_name = "DIRECTORY")]
    pub include_path: Vec<PathBuf>,

    /// Highest directory searched for companion files [default: current directory]
    #[arg(long, value_name = "DIRECTORY")]
    pub root_dir: Option<PathBuf>,

    /// Omit template variable file
    #[arg(long)]
    pub no_variable_file: bool,

    /// Omit template extension file
    #[arg(long)]
    pub no_extension_file: bool,

    /// Keep the first newline after a block tag
    #[arg(long)]
    pub no_trim_blocks: bool,

    /// Keep whitespace before a block tag
    #[arg(long)]
    pub no_lstrip_blocks: bool,

    /// Keep the trailing newline of the template
    #[arg(long)]
    pub keep_trailing_newline: bool,

    /// In pedantic mode undefined variables raise an error.
    /// In debug mode undefined variables print as is.
    #[arg(long, value_enum)]
    pub mode: Option<Mode>,

    /// Print a Makefile compatible list of dependencies. Doesn't render the template.
    #[arg(short = 'M')]
    pub dependencies_only: bool,

    /// Create a Makefile compatible .d file alongside the rendered template
    #[arg(long = "MD")]
    pub dependency_file: bool,

    /// Enable verbose logging output
    #[arg(long)]
    pub verbose: bool,

    /// Variables given as `--name=value` options
    #[arg(skip)]
    pub template_variables: Variables,
}

/// Splits template variable options out of `argv`.
///
/// Every long option clap does not know is a template variable. `-MD` is
/// rewritten to `--MD`. Arguments after `--` are passed through untouched.
pub fn split_template_variables<I, T>(argv: I) -> (Vec<OsString>, Variables)
where
    I: IntoIterator<Item = T>,
    T: Into<OsString>,
{
    let mut command = Args::command();
    command.build();
    let mut longs: HashMap<String, bool> = HashMap::new();
    let mut shorts: HashMap<char, bool> = HashMap::new();
    for arg in command.get_arguments() {
        let takes_value = arg.get_action().takes_values();
        for long in arg.get_long_and_visible_aliases().unwrap_or_default() {
            longs.insert(long.to_string(), takes_value);
        }
        if let Some(short) = arg.get_short() {
            shorts.insert(short, takes_value);
        }
    }

    let mut argv = argv.into_iter().map(Into::into);
    let mut known: Vec<OsString> = argv.next().into_iter().collect();
    let mut variables = Variables::new();

    while let Some(arg) = argv.next() {
        let Some(text) = arg.to_str().map(str::to_owned) else {
            known.push(arg);
            continue;
        };
        if text == "--" {
            known.push(arg);
            known.extend(argv.by_ref());
            break;
        }
        if text == "-MD" {
            known.push("--MD".into());
            continue;
        }
        if let Some(option) = text.strip_prefix("--") {
            let (name, inline_value) = match option.split_once('=') {
                Some((name, value)) => (name, Some(value.to_string())),
                None => (option, None),
            };
            match longs.get(name) {
                Some(takes_value) => {
                    known.push(arg);
                    if *takes_value && inline_value.is_none() {
                        known.extend(argv.next());
                    }
                }
                None => {
                    let value = match inline_value {
                        Some(value) => value,
                        None => match argv.next() {
                            Some(next) => next.to_string_lossy().into_owned(),
                            None => break,
                        },
                    };
                    variables.insert(name.to_string(), parse_literal(&value));
                }
            }
            continue;
        }
        let mut chars = text.chars();
        if let (Some('-'), Some(short), None) = (chars.next(), chars.next(), chars.next()) {
            known.push(arg);
            if shorts.get(&short).copied().unwrap_or(false) {
                known.extend(argv.next());
            }
            continue;
        }
        known.push(arg);
    }

    (known, variables)
}

/// Interprets a command-line value.
///
/// Literals (numbers, booleans, `none`, quoted strings, lists and mappings)
/// are evaluated. Anything else, and any string literal, is read as one CSV
/// record: `a,b,c` becomes a list, a single field stays a string.
pub fn parse_literal(text: &str) -> Value {
    match evaluate_literal(text) {
        Some(Value::String(string)) => split_fields(&string),
        Some(value) => value,
        None => split_fields(text),
    }
}

fn evaluate_literal(text: &str) -> Option<Value> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    let expression = env.compile_expression(text).ok()?;
    let value = expression.eval(()).ok()?;
    if !is_literal(&value) {
        return None;
    }
    serde_json::to_value(&value).ok()
}

fn is_literal(value: &minijinja::Value) -> bool {
    match value.kind() {
        ValueKind::None | ValueKind::Bool | ValueKind::Number | ValueKind::String => true,
        ValueKind::Seq | ValueKind::Map => value
            .try_iter()
            .map(|items| {
                items.into_iter().all(|item| {
                    is_literal(&item)
                        && (value.kind() != ValueKind::Map
                            || value.get_item(&item).map(|v| is_literal(&v)).unwrap_or(false))
                })
            })
            .unwrap_or(false),
        _ => false,
    }
}

fn split_fields(text: &str) -> Value {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());
    let fields: Vec<String> = match reader.records().next() {
        Some(Ok(record)) => record.iter().map(str::to_string).collect(),
        _ => return Value::String(text.to_string()),
    };
    match fields.as_slice() {
        [single] => Value::String(single.clone()),
        _ => Value::Array(fields.into_iter().map(Value::String).collect()),
    }
}

/// Parses command line arguments and returns the Args structure.
///
/// # Returns
/// * `Args` - Parsed command line arguments, template variables included
///
/// # Exits
/// * With status code 1 if required arguments are missing
/// * With clap's default error handling for other argument errors
pub fn get_args() -> Args {
    let (argv, template_variables) = split_template_variables(std::env::args_os());
    match Args::try_parse_from(argv) {
        Ok(mut args) => {
            args.template_variables = template_variables;
            args
        }
        Err(e) => {
            if e.kind() == ErrorKind::MissingRequiredArgument {
                let printed = Args::command()
                    .help_template(
                        r#"{about-section}
{usage-heading} {usage}

{all-args}
{after-help}
"#,
                    )
                    .print_help();
                if printed.is_err() {
                    e.exit();
                }
                std::process::exit(1);
            } else {
                e.exit();
            }
        }
    }
}
