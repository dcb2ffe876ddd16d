//! kiln's main application entry point and orchestration logic.
//! Handles command-line argument parsing and wires discovery, dependency
//! listing and rendering together for one template.

use kiln::{
    cli::{get_args, Args},
    dependencies::makefile_rule,
    error::{default_error_handler, Result},
    logger::init_logger,
    processor::{dependency_file_path, write_encoded, BaseConfiguration, OutputTarget},
    renderer::Whitespace,
    template::{resolve_encoding, TemplateSource},
};
use log::warn;
use std::path::Path;

/// Main application entry point.
fn main() {
    let args = get_args();

    init_logger(args.verbose);

    if let Err(err) = run(args) {
        default_error_handler(err);
    }
}

/// Main application logic execution.
///
/// # Flow
/// 1. Resolves the encoding and builds the session configuration
/// 2. Derives the template overlay, discovering companion files
/// 3. Prints or writes Makefile dependencies when asked to
/// 4. Renders the template and writes the output
fn run(args: Args) -> Result<()> {
    let encoding = resolve_encoding(&args.encoding)?;
    let cwd = std::env::current_dir()?;

    let mut base = BaseConfiguration::new(args.root_dir.clone().unwrap_or_else(|| cwd.clone()));
    base.encoding = encoding;
    base.data_files = args.variables;
    base.variables = args.template_variables;
    base.search_paths = args.include_path;
    base.mode = args.mode.unwrap_or_default();
    base.whitespace = Whitespace {
        trim_blocks: !args.no_trim_blocks,
        lstrip_blocks: !args.no_lstrip_blocks,
        keep_trailing_newline: args.keep_trailing_newline,
    };
    base.find_data_files = !args.no_variable_file;
    base.find_extension_files = !args.no_extension_file;
    if let Some(extensions) = &args.extensions {
        base.load_extension_file(extensions)?;
    }

    let template = TemplateSource::from_arg(&args.template, encoding)?;
    let overlay = base.overlay(&template)?;
    let output = OutputTarget::resolve(args.output.as_deref(), &template)?;

    if args.dependencies_only || args.dependency_file {
        let target = output.path().unwrap_or(Path::new("-"));
        let rule = makefile_rule(target, &overlay.dependencies()?, &cwd);
        if args.dependencies_only {
            println!("{rule}");
            return Ok(());
        }
        match output.path() {
            Some(path) => write_encoded(dependency_file_path(path), &format!("{rule}\n"), encoding)?,
            None => warn!("Output goes to stdout, not writing a dependency file"),
        }
    }

    let rendered = overlay.render()?;
    output.write(&rendered, encoding)
}
