//! kiln renders templates with variables read from structured data files.
//! Data and extension files can be named explicitly or discovered next to
//! the template by file name, and the files a render depends on can be
//! listed as a Makefile rule.

/// Command-line interface module for the kiln application
pub mod cli;

/// Companion file discovery by shared file name stem
pub mod companion;

pub mod constants;

/// Variable context construction and merging
pub mod context;

/// Static analysis of template references for Makefile dependencies
pub mod dependencies;

/// Error types and handling for the kiln application
pub mod error;

/// Declarative extension files registering filters, tests, parsers and
/// syntax settings
pub mod extensions;

/// Filters available to every template
pub mod filters;

pub mod logger;

/// Structured data parsers
/// Supports JSON, YAML, TOML, XML, INI and CSV files
pub mod parsers;

/// Session configuration and per-template overlays
/// Combines all components to produce the final output
pub mod processor;

/// Template rendering on top of MiniJinja
pub mod renderer;

/// Template sources and encoding-aware reading
pub mod template;
