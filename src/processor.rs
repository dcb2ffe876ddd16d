//! Rendering session orchestration.
//!
//! A [`BaseConfiguration`] holds everything shared by the templates of one
//! session. Each template gets its own [`TemplateOverlay`], derived from the
//! base, so extension and data files discovered for one template never leak
//! into another.

use crate::companion::{find_companions, order_by_specificity};
use crate::constants::EXTENSION_FILE_FORMATS;
use crate::context::{merge_context, Variables};
use crate::dependencies::DependencyResolver;
use crate::error::{Error, Result};
use crate::extensions::{load_extension_file, Capabilities};
use crate::renderer::{syntax_config, MiniJinjaRenderer, Mode, TemplateRenderer, Whitespace};
use crate::template::{read_to_string, TemplateSource};
use encoding_rs::Encoding;
use log::debug;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Session-wide configuration.
#[derive(Debug, Clone)]
pub struct BaseConfiguration {
    /// Highest directory searched for companion files
    pub root_dir: PathBuf,
    /// Data files given explicitly, merged in order
    pub data_files: Vec<PathBuf>,
    /// Inline variables; they win over every data file
    pub variables: Variables,
    /// Directories searched for referenced templates after the template's own
    pub search_paths: Vec<PathBuf>,
    pub mode: Mode,
    pub whitespace: Whitespace,
    pub encoding: &'static Encoding,
    /// Discover companion data files
    pub find_data_files: bool,
    /// Discover companion extension files
    pub find_extension_files: bool,
    extension_file: Option<PathBuf>,
    capabilities: Capabilities,
}

impl BaseConfiguration {
    pub fn new<P: Into<PathBuf>>(root_dir: P) -> Self {
        Self {
            root_dir: root_dir.into(),
            data_files: Vec::new(),
            variables: Variables::new(),
            search_paths: Vec::new(),
            mode: Mode::default(),
            whitespace: Whitespace::default(),
            encoding: encoding_rs::UTF_8,
            find_data_files: true,
            find_extension_files: true,
            extension_file: None,
            capabilities: Capabilities::default(),
        }
    }

    /// Loads an explicit extension file into the base capabilities. Once one
    /// is loaded, overlays no longer discover companion extension files.
    pub fn load_extension_file<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();
        load_extension_file(path, self.encoding, &mut self.capabilities)?;
        self.extension_file = Some(path.to_path_buf());
        Ok(())
    }

    pub fn extension_file(&self) -> Option<&Path> {
        self.extension_file.as_deref()
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    /// Derives the configuration used to render `template`.
    ///
    /// Companion extension files are loaded first so the parsers they
    /// register take part in data file discovery.
    pub fn overlay(&self, template: &TemplateSource) -> Result<TemplateOverlay> {
        let source = template.source(self.encoding)?;
        let mut search_paths = vec![template.directory()];
        search_paths.extend(self.search_paths.iter().cloned());

        let mut overlay = TemplateOverlay {
            template: template.clone(),
            source,
            data_files: self.data_files.clone(),
            extension_files: self.extension_file.iter().cloned().collect(),
            variables: self.variables.clone(),
            search_paths,
            capabilities: self.capabilities.clone(),
            mode: self.mode,
            whitespace: self.whitespace,
            encoding: self.encoding,
        };

        let Some(path) = template.path() else {
            return Ok(overlay);
        };

        if self.find_extension_files && self.extension_file.is_none() {
            let companions = find_companions(path, &EXTENSION_FILE_FORMATS, Some(&self.root_dir))?;
            for companion in order_by_specificity(companions) {
                debug!("Loading companion extension file '{}'", companion.display());
                load_extension_file(&companion, self.encoding, &mut overlay.capabilities)?;
                overlay.extension_files.push(companion);
            }
        }

        if self.find_data_files {
            let extensions = overlay.capabilities.parsers.extensions();
            let companions = find_companions(path, &extensions, Some(&self.root_dir))?;
            for companion in order_by_specificity(companions) {
                debug!("Using companion data file '{}'", companion.display());
                overlay.data_files.push(companion);
            }
        }

        Ok(overlay)
    }
}

/// Per-template configuration with its own copies of every mutable table.
#[derive(Debug, Clone)]
pub struct TemplateOverlay {
    template: TemplateSource,
    source: String,
    data_files: Vec<PathBuf>,
    extension_files: Vec<PathBuf>,
    variables: Variables,
    search_paths: Vec<PathBuf>,
    capabilities: Capabilities,
    mode: Mode,
    whitespace: Whitespace,
    encoding: &'static Encoding,
}

impl TemplateOverlay {
    pub fn template(&self) -> &TemplateSource {
        &self.template
    }

    /// Data files in merge order: explicit ones, then companions from the
    /// most general to the most specific.
    pub fn data_files(&self) -> &[PathBuf] {
        &self.data_files
    }

    pub fn extension_files(&self) -> &[PathBuf] {
        &self.extension_files
    }

    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    /// Parses every data file and merges the results under the inline
    /// variables.
    pub fn context(&self) -> Result<Variables> {
        let mut mappings = Vec::with_capacity(self.data_files.len());
        for path in &self.data_files {
            debug!("Parsing data file '{}'", path.display());
            let content = read_to_string(path, self.encoding)?;
            mappings.push(self.capabilities.parsers.parse(&content, path)?);
        }
        Ok(merge_context(&mappings, &self.variables))
    }

    /// Lists the files the rendered output depends on.
    pub fn dependencies(&self) -> Result<Vec<PathBuf>> {
        let resolver = DependencyResolver::new(
            &self.search_paths,
            syntax_config(&self.capabilities.syntax)?,
            self.whitespace.into(),
            self.encoding,
        );
        resolver.resolve(
            self.template.path(),
            &self.template.name(),
            &self.source,
            &self.data_files,
            &self.extension_files,
        )
    }

    pub fn renderer(&self) -> Result<MiniJinjaRenderer> {
        MiniJinjaRenderer::from_capabilities(
            &self.capabilities,
            self.mode,
            self.whitespace,
            self.search_paths.clone(),
            self.encoding,
        )
    }

    /// Renders the template to a string.
    pub fn render(&self) -> Result<String> {
        let context = self.context()?;
        self.renderer()?.render(&self.template.name(), &self.source, &context)
    }
}

/// Where rendered text goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputTarget {
    Stdout,
    File(PathBuf),
}

impl OutputTarget {
    /// `-` selects stdout. Without an explicit output, file templates write
    /// next to themselves minus their last extension and stdin templates
    /// write to stdout.
    pub fn resolve(output: Option<&str>, template: &TemplateSource) -> Result<Self> {
        match output {
            Some("-") => Ok(Self::Stdout),
            Some(path) => Ok(Self::File(PathBuf::from(path))),
            None => default_output(template),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        match self {
            OutputTarget::Stdout => None,
            OutputTarget::File(path) => Some(path),
        }
    }

    /// Encodes `content` and writes it out, creating parent directories.
    pub fn write(&self, content: &str, encoding: &'static Encoding) -> Result<()> {
        let bytes = encode(content, encoding)?;
        match self {
            OutputTarget::Stdout => {
                let mut stdout = std::io::stdout().lock();
                stdout.write_all(&bytes)?;
                stdout.flush()?;
            }
            OutputTarget::File(path) => write_file(path, &bytes)?,
        }
        Ok(())
    }
}

impl std::fmt::Display for OutputTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputTarget::Stdout => write!(f, "-"),
            OutputTarget::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// `foo.c.j2` renders into `foo.c`.
pub fn default_output(template: &TemplateSource) -> Result<OutputTarget> {
    let Some(path) = template.path() else {
        return Ok(OutputTarget::Stdout);
    };
    if path.extension().is_none() {
        return Err(Error::OutputError(format!(
            "cannot derive an output name from '{}', use --output",
            path.display()
        )));
    }
    Ok(OutputTarget::File(path.with_extension("")))
}

/// Path of the Makefile dependency file written next to `output`.
pub fn dependency_file_path(output: &Path) -> PathBuf {
    let mut name = output.as_os_str().to_owned();
    name.push(".d");
    PathBuf::from(name)
}

/// Encodes rendered text for writing. encoding_rs only decodes UTF-16, so
/// both byte orders are produced here, without a byte order mark.
fn encode(content: &str, encoding: &'static Encoding) -> Result<Vec<u8>> {
    if encoding == encoding_rs::UTF_16LE {
        return Ok(content.encode_utf16().flat_map(u16::to_le_bytes).collect());
    }
    if encoding == encoding_rs::UTF_16BE {
        return Ok(content.encode_utf16().flat_map(u16::to_be_bytes).collect());
    }
    let (bytes, used, had_errors) = encoding.encode(content);
    if used != encoding {
        return Err(Error::OutputError(format!(
            "cannot encode output as {}",
            encoding.name()
        )));
    }
    if had_errors {
        return Err(Error::OutputError(format!(
            "rendered text cannot be represented in {}",
            used.name()
        )));
    }
    Ok(bytes.into_owned())
}

fn write_file(path: &Path, content: &[u8]) -> Result<()> {
    let base_path = std::env::current_dir().unwrap_or_default();
    let abs_path = if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_path.join(path)
    };

    if let Some(parent) = abs_path.parent() {
        std::fs::create_dir_all(parent).map_err(Error::IoError)?;
    }
    debug!("Writing '{}'", abs_path.display());
    std::fs::write(abs_path, content).map_err(Error::IoError)
}

/// Writes `content` encoded with `encoding` to `path`.
pub fn write_encoded<P: AsRef<Path>>(path: P, content: &str, encoding: &'static Encoding) -> Result<()> {
    write_file(path.as_ref(), &encode(content, encoding)?)
}
