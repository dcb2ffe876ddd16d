//! Companion file discovery.
//!
//! A companion is a file that shares a template's stem, e.g. `foo.json` or
//! `foo.c.yaml` for the template `foo.c.j2`. Companions are looked up in the
//! template's own directory and, when a root boundary is given, in every
//! ancestor directory up to and including that boundary.

use crate::error::Result;
use log::debug;
use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};

/// Returns every existing companion of `template` carrying one of
/// `extensions`.
///
/// In the template's directory candidates are built from the stem plus every
/// proper prefix of the suffix chain (`foo`, `foo.c` for `foo.c.j2`). In
/// ancestor directories only the bare stem is tried. The template itself is
/// never returned.
pub fn find_companions<P: AsRef<Path>>(
    template: P,
    extensions: &[&str],
    root: Option<&Path>,
) -> Result<BTreeSet<PathBuf>> {
    let template = absolute(template.as_ref())?;
    let mut found = BTreeSet::new();

    let (Some(directory), Some(file_name)) = (template.parent(), template.file_name()) else {
        return Ok(found);
    };
    let file_name = file_name.to_string_lossy();
    let mut parts = file_name.split('.');
    let stem = parts.next().unwrap_or_default();
    let suffixes: Vec<&str> = parts.collect();
    let extensions: Vec<String> = extensions.iter().map(|ext| normalize_extension(ext)).collect();

    debug!("Looking for companions of '{}' in '{}'", template.display(), directory.display());
    for depth in 0..=suffixes.len().saturating_sub(1) {
        let mut base = stem.to_string();
        for suffix in &suffixes[..depth] {
            base.push('.');
            base.push_str(suffix);
        }
        for extension in &extensions {
            let candidate = directory.join(format!("{base}{extension}"));
            if candidate != template && candidate.is_file() {
                debug!("Found companion '{}'", candidate.display());
                found.insert(candidate);
            }
        }
    }

    let Some(root) = root else {
        return Ok(found);
    };
    let root = absolute(root)?;
    if directory == root || !directory.starts_with(&root) {
        return Ok(found);
    }

    let mut current = directory.parent();
    while let Some(ancestor) = current {
        debug!("Looking for companions of '{}' in '{}'", template.display(), ancestor.display());
        for extension in &extensions {
            let candidate = ancestor.join(format!("{stem}{extension}"));
            if candidate.is_file() {
                debug!("Found companion '{}'", candidate.display());
                found.insert(candidate);
            }
        }
        if ancestor == root {
            break;
        }
        current = ancestor.parent();
    }

    Ok(found)
}

/// Orders companions from the most general to the most specific: files in
/// farther ancestors first, then shorter suffix chains, then by name.
///
/// Merging data in this order lets specific companions shadow broad ones.
pub fn order_by_specificity<I>(companions: I) -> Vec<PathBuf>
where
    I: IntoIterator<Item = PathBuf>,
{
    let mut ordered: Vec<PathBuf> = companions.into_iter().collect();
    ordered.sort_by_cached_key(|path| {
        let depth = path.parent().map(|dir| dir.components().count()).unwrap_or(0);
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        (depth, name.matches('.').count(), name)
    });
    ordered
}

/// Ensures an extension carries its leading dot.
pub fn normalize_extension(extension: &str) -> String {
    if extension.starts_with('.') {
        extension.to_string()
    } else {
        format!(".{extension}")
    }
}

/// Makes `path` absolute against the working directory and removes `.` and
/// `..` components lexically.
pub fn absolute(path: &Path) -> Result<PathBuf> {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };
    let mut normalized = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    Ok(normalized)
}
