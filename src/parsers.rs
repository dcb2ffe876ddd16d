//! Structured data parsers.
//!
//! Each parser turns the decoded text of a data file into [`Variables`]. The
//! [`ParserRegistry`] maps a dotted file extension to its parser; extension
//! files can alias new extensions onto existing parsers.

use crate::companion::normalize_extension;
use crate::context::{into_variables, Variables};
use crate::error::{Error, Result};
use indexmap::IndexMap;
use quick_xml::events::{BytesStart, Event};
use serde_json::{Map, Value};
use std::path::Path;

/// Signature shared by every data file parser.
pub type ParseFn = fn(&str, &Path) -> Result<Variables>;

/// Maps file extensions (with leading dot) to parsers.
#[derive(Debug, Clone)]
pub struct ParserRegistry {
    parsers: IndexMap<String, ParseFn>,
}

impl Default for ParserRegistry {
    fn default() -> Self {
        let mut parsers: IndexMap<String, ParseFn> = IndexMap::new();
        parsers.insert(".json".into(), parse_json);
        parsers.insert(".yaml".into(), parse_yaml);
        parsers.insert(".yml".into(), parse_yaml);
        parsers.insert(".toml".into(), parse_toml);
        parsers.insert(".xml".into(), parse_xml);
        parsers.insert(".ini".into(), parse_ini);
        parsers.insert(".csv".into(), parse_csv);
        Self { parsers }
    }
}

impl ParserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, extension: &str) -> Option<ParseFn> {
        self.parsers.get(&normalize_extension(extension)).copied()
    }

    pub fn insert(&mut self, extension: &str, parser: ParseFn) {
        self.parsers.insert(normalize_extension(extension), parser);
    }

    /// Registers `extension` with the parser already used for `existing`.
    pub fn alias(&mut self, extension: &str, existing: &str) -> Result<()> {
        let parser = self.get(existing).ok_or_else(|| {
            Error::ExtensionError(format!(
                "Unable to load extensions, no parser registered for '{}'",
                normalize_extension(existing)
            ))
        })?;
        self.insert(extension, parser);
        Ok(())
    }

    /// Registered extensions, in registration order.
    pub fn extensions(&self) -> Vec<&str> {
        self.parsers.keys().map(String::as_str).collect()
    }

    /// Parses `content` read from `path` with the parser for its extension.
    pub fn parse(&self, content: &str, path: &Path) -> Result<Variables> {
        let extension = path
            .extension()
            .map(|ext| format!(".{}", ext.to_string_lossy()))
            .unwrap_or_default();
        let parser = self
            .get(&extension)
            .ok_or(Error::UnsupportedDataFile { extension })?;
        parser(content, path)
    }
}

fn parse_error(path: &Path, message: impl ToString) -> Error {
    Error::ParseError {
        path: path.display().to_string(),
        message: message.to_string(),
    }
}

fn document(value: Value, path: &Path) -> Result<Variables> {
    into_variables(value).ok_or_else(|| parse_error(path, "top level must be a mapping"))
}

pub fn parse_json(content: &str, path: &Path) -> Result<Variables> {
    if content.trim().is_empty() {
        return Ok(Variables::new());
    }
    let value: Value = serde_json::from_str(content).map_err(|e| parse_error(path, e))?;
    document(value, path)
}

pub fn parse_yaml(content: &str, path: &Path) -> Result<Variables> {
    if content.trim().is_empty() {
        return Ok(Variables::new());
    }
    let value: Value = serde_yaml::from_str(content).map_err(|e| parse_error(path, e))?;
    document(value, path)
}

pub fn parse_toml(content: &str, path: &Path) -> Result<Variables> {
    let table: toml::Table = toml::from_str(content).map_err(|e| parse_error(path, e))?;
    let value = serde_json::to_value(table).map_err(|e| parse_error(path, e))?;
    document(value, path)
}

/// Parses INI files into `{section: {key: value}}` the way Python's
/// `ConfigParser` exposes them: `DEFAULT` always comes first, its keys are
/// inherited by every section, and keys are lowercased.
pub fn parse_ini(content: &str, path: &Path) -> Result<Variables> {
    let ini = ini::Ini::load_from_str(content).map_err(|e| parse_error(path, e))?;
    let mut defaults = Map::new();
    for (section, properties) in ini.iter() {
        if matches!(section, None | Some("DEFAULT")) {
            insert_ini_entries(properties, &mut defaults);
        }
    }

    let mut variables = Variables::new();
    variables.insert("DEFAULT".to_string(), Value::Object(defaults.clone()));
    for (section, properties) in ini.iter() {
        let Some(name) = section.filter(|name| *name != "DEFAULT") else {
            continue;
        };
        let section_entries = variables
            .entry(name.to_string())
            .or_insert_with(|| Value::Object(defaults.clone()));
        if let Value::Object(section_entries) = section_entries {
            insert_ini_entries(properties, section_entries);
        }
    }
    Ok(variables)
}

fn insert_ini_entries(properties: &ini::Properties, into: &mut Map<String, Value>) {
    for (key, value) in properties.iter() {
        into.insert(key.to_lowercase(), Value::String(value.to_string()));
    }
}

/// Parses CSV files into `{file_stem: rows}`.
///
/// When the first row looks like a header, rows become mappings keyed by
/// the header cells, otherwise they are lists of cells.
pub fn parse_csv(content: &str, path: &Path) -> Result<Variables> {
    let name = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(content.as_bytes());
    let mut records = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| parse_error(path, e))?;
        records.push(record.iter().map(str::to_string).collect::<Vec<_>>());
    }

    let rows = match records.split_first() {
        Some((header, data)) if has_header(header, data) => data
            .iter()
            .map(|row| {
                let entries: Map<String, Value> = header
                    .iter()
                    .cloned()
                    .zip(row.iter().cloned().map(Value::String))
                    .collect();
                Value::Object(entries)
            })
            .collect(),
        _ => records
            .into_iter()
            .map(|row| Value::Array(row.into_iter().map(Value::String).collect()))
            .collect(),
    };

    let mut variables = Variables::new();
    variables.insert(name, Value::Array(rows));
    Ok(variables)
}

/// Header sniffing: a column votes for a header when its data cells are all
/// numeric but the first cell is not, or when its data cells share a length
/// the first cell does not have. Columns without a consistent type vote
/// against.
fn has_header(first: &[String], data: &[Vec<String>]) -> bool {
    if data.is_empty() {
        return false;
    }
    let mut votes = 0i32;
    for (column, candidate) in first.iter().enumerate() {
        let cells: Vec<&str> = data
            .iter()
            .filter_map(|row| row.get(column).map(String::as_str))
            .collect();
        if cells.is_empty() {
            continue;
        }
        if cells.iter().all(|cell| is_number(cell)) {
            votes += if is_number(candidate) { -1 } else { 1 };
            continue;
        }
        let length = cells[0].chars().count();
        if cells.iter().all(|cell| cell.chars().count() == length) {
            votes += if candidate.chars().count() == length { -1 } else { 1 };
        }
    }
    votes > 0
}

fn is_number(cell: &str) -> bool {
    let cell = cell.trim();
    !cell.is_empty() && cell.parse::<f64>().is_ok()
}

/// Parses XML the way xmltodict does: attributes become `@name` keys, mixed
/// text becomes `#text`, repeated child elements become lists, text-only
/// elements become strings and empty elements become null.
pub fn parse_xml(content: &str, path: &Path) -> Result<Variables> {
    struct Frame {
        name: String,
        children: Map<String, Value>,
        text: String,
    }

    let mut reader = quick_xml::Reader::from_str(content);
    reader.config_mut().trim_text(true);
    let mut stack = vec![Frame {
        name: String::new(),
        children: Map::new(),
        text: String::new(),
    }];

    loop {
        match reader.read_event().map_err(|e| parse_error(path, e))? {
            Event::Start(element) => {
                let (name, children) = open_element(&element, path)?;
                stack.push(Frame {
                    name,
                    children,
                    text: String::new(),
                });
            }
            Event::Empty(element) => {
                let (name, attributes) = open_element(&element, path)?;
                let value = if attributes.is_empty() {
                    Value::Null
                } else {
                    Value::Object(attributes)
                };
                if let Some(parent) = stack.last_mut() {
                    insert_child(&mut parent.children, name, value);
                }
            }
            Event::Text(text) => {
                let text = text.unescape().map_err(|e| parse_error(path, e))?;
                if let Some(frame) = stack.last_mut() {
                    frame.text.push_str(&text);
                }
            }
            Event::CData(data) => {
                if let Some(frame) = stack.last_mut() {
                    frame.text.push_str(&String::from_utf8_lossy(&data));
                }
            }
            Event::End(_) => {
                if stack.len() < 2 {
                    return Err(parse_error(path, "unbalanced closing tag"));
                }
                let Some(frame) = stack.pop() else { break };
                let value = match (frame.children.is_empty(), frame.text.is_empty()) {
                    (true, true) => Value::Null,
                    (true, false) => Value::String(frame.text),
                    (false, true) => Value::Object(frame.children),
                    (false, false) => {
                        let mut children = frame.children;
                        children.insert("#text".into(), Value::String(frame.text));
                        Value::Object(children)
                    }
                };
                if let Some(parent) = stack.last_mut() {
                    insert_child(&mut parent.children, frame.name, value);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if stack.len() != 1 {
        return Err(parse_error(path, "unexpected end of document"));
    }
    let root = stack.remove(0);
    Ok(root.children.into_iter().collect())
}

fn open_element(element: &BytesStart<'_>, path: &Path) -> Result<(String, Map<String, Value>)> {
    let name = String::from_utf8_lossy(element.name().as_ref()).into_owned();
    let mut attributes = Map::new();
    for attribute in element.attributes() {
        let attribute = attribute.map_err(|e| parse_error(path, e))?;
        let key = String::from_utf8_lossy(attribute.key.as_ref()).into_owned();
        let value = attribute.unescape_value().map_err(|e| parse_error(path, e))?;
        attributes.insert(format!("@{key}"), Value::String(value.into_owned()));
    }
    Ok((name, attributes))
}

fn insert_child(children: &mut Map<String, Value>, name: String, value: Value) {
    match children.get_mut(&name) {
        Some(Value::Array(items)) => items.push(value),
        Some(existing) => {
            let first = existing.take();
            *existing = Value::Array(vec![first, value]);
        }
        None => {
            children.insert(name, value);
        }
    }
}
