//! Common constants used throughout kiln.

/// Encoding label used when `--encoding` is not given
pub const DEFAULT_ENCODING: &str = "utf-8";

/// File extensions recognised as declarative extension files
pub const EXTENSION_FILE_FORMATS: [&str; 3] = [".j2ext", ".jinja-ext", ".yasha"];

/// Template name used for templates read from stdin
pub const STDIN_TEMPLATE_NAME: &str = "<stdin>";

/// Engine extensions whose behaviour MiniJinja already provides natively
pub const BUILTIN_ENGINE_EXTENSIONS: [&str; 6] = [
    "jinja2.ext.do",
    "jinja2.ext.ExprStmtExtension",
    "jinja2.ext.loopcontrols",
    "jinja2.ext.LoopControlExtension",
    "do",
    "loopcontrols",
];

/// Global functions MiniJinja registers by default
pub const BUILTIN_GLOBALS: [&str; 7] =
    ["range", "dict", "debug", "namespace", "lipsum", "cycler", "joiner"];
