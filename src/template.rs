//! Template sources and encoding-aware file reading.

use crate::constants::STDIN_TEMPLATE_NAME;
use crate::error::{Error, Result};
use encoding_rs::Encoding;
use log::debug;
use std::io::Read;
use std::path::{Path, PathBuf};

/// Represents where the text of a template comes from.
#[derive(Debug, Clone)]
pub enum TemplateSource {
    /// Template file on disk
    Path(PathBuf),
    /// Template text read from stdin; it has no file identity
    Stdin(String),
}

impl std::fmt::Display for TemplateSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TemplateSource::Path(path) => write!(f, "'{}'", path.display()),
            TemplateSource::Stdin(_) => write!(f, "{STDIN_TEMPLATE_NAME}"),
        }
    }
}

impl TemplateSource {
    /// Creates a TemplateSource from a command-line argument.
    /// `-` reads the whole of stdin immediately.
    pub fn from_arg(arg: &str, encoding: &'static Encoding) -> Result<Self> {
        if arg == "-" {
            let mut buffer = Vec::new();
            std::io::stdin().read_to_end(&mut buffer)?;
            let text = decode(&buffer, encoding, STDIN_TEMPLATE_NAME)?;
            return Ok(Self::Stdin(text));
        }
        let path = PathBuf::from(arg);
        if !path.is_file() {
            return Err(Error::TemplateError(format!(
                "template '{}' does not exist",
                path.display()
            )));
        }
        Ok(Self::Path(path))
    }

    /// Name under which the template is registered in the engine.
    pub fn name(&self) -> String {
        match self {
            TemplateSource::Path(path) => path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string()),
            TemplateSource::Stdin(_) => STDIN_TEMPLATE_NAME.to_string(),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        match self {
            TemplateSource::Path(path) => Some(path),
            TemplateSource::Stdin(_) => None,
        }
    }

    /// Directory that anchors relative template lookups.
    pub fn directory(&self) -> PathBuf {
        self.path()
            .and_then(Path::parent)
            .filter(|parent| !parent.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Returns the template text.
    pub fn source(&self, encoding: &'static Encoding) -> Result<String> {
        match self {
            TemplateSource::Path(path) => read_to_string(path, encoding),
            TemplateSource::Stdin(text) => Ok(text.clone()),
        }
    }
}

/// Resolves an encoding label such as `utf-8` or `latin1`.
pub fn resolve_encoding(label: &str) -> Result<&'static Encoding> {
    Encoding::for_label(label.trim().as_bytes())
        .ok_or_else(|| Error::EncodingError(label.to_string()))
}

/// Reads a file and decodes it with `encoding`, rejecting malformed input.
pub fn read_to_string<P: AsRef<Path>>(path: P, encoding: &'static Encoding) -> Result<String> {
    let path = path.as_ref();
    debug!("Reading '{}' as {}", path.display(), encoding.name());
    let bytes = std::fs::read(path)?;
    decode(&bytes, encoding, &path.display().to_string())
}

fn decode(bytes: &[u8], encoding: &'static Encoding, origin: &str) -> Result<String> {
    let (text, _, had_errors) = encoding.decode(bytes);
    if had_errors {
        return Err(Error::DecodeError {
            path: origin.to_string(),
            encoding: encoding.name().to_string(),
        });
    }
    Ok(text.into_owned())
}
