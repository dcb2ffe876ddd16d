//! Error handling for kiln.
//! Defines the error type and result alias used throughout the crate.

use std::io;
use thiserror::Error;

/// Errors raised while discovering, loading or rendering templates.
///
/// The display strings are the user-facing messages printed by
/// [`default_error_handler`].
#[derive(Error, Debug)]
pub enum Error {
    /// Represents errors that occur during file system operations
    #[error("IO error: {0}.")]
    IoError(#[from] io::Error),

    /// Errors reported by the template engine while compiling or rendering
    #[error("Template error: {0}.")]
    MinijinjaError(#[from] minijinja::Error),

    #[error("Template error: {0}.")]
    TemplateError(String),

    /// A data file or template could not be parsed
    #[error("Unable to parse '{path}': {message}")]
    ParseError { path: String, message: String },

    /// No parser is registered for the extension of a data file
    #[error("Unknown variable file extension '{extension}'")]
    UnsupportedDataFile { extension: String },

    #[error("Unrecognized encoding name '{0}'")]
    EncodingError(String),

    /// File content is not valid in the selected encoding
    #[error("Unable to decode '{path}' as {encoding}")]
    DecodeError { path: String, encoding: String },

    /// An extension file is malformed or declares something unsupported
    #[error("{0}")]
    ExtensionError(String),

    /// Raised in pedantic mode when a template uses an undefined variable
    #[error("Variable '{name}' is undefined")]
    UndefinedVariable { name: String },

    #[error("Output error: {0}.")]
    OutputError(String),
}

/// Convenience type alias for Results with [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Default error handler that prints the error and exits the program.
///
/// # Behavior
/// Prints the error message to stderr and exits with status code 1
pub fn default_error_handler(err: Error) {
    eprintln!("Error: {err}");
    std::process::exit(1);
}
