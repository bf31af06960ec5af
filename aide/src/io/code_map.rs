//! Code map: a per-file outline of the Python sources under the working root.

use std::fs;
use std::path::Path;
use std::sync::LazyLock;

use anyhow::Result;
use regex::Regex;
use serde_json::{Map, Value, json};
use tracing::{debug, instrument, warn};
use walkdir::{DirEntry, WalkDir};

use crate::io::fs_atomic::write_json_atomic;

pub const CODE_MAP_FILE: &str = "code_map.json";

const SKIPPED_DIRS: [&str; 7] = [
    "venv",
    ".venv",
    ".git",
    ".aide",
    "target",
    "node_modules",
    "benchmark_system_DONT_TOUCH",
];

static IMPORT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*import\s+(.+?)\s*(?:#.*)?$").expect("valid import regex"));
static FROM_IMPORT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*from\s+(\.*[\w.]*)\s+import\b").expect("valid from regex"));
static CLASS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*class\s+([A-Za-z_]\w*)").expect("valid class regex"));
static DEF_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:async\s+)?def\s+([A-Za-z_]\w*)").expect("valid def regex")
});

/// Outline of one source file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileOutline {
    pub imports: Vec<String>,
    pub classes: Vec<String>,
    pub functions: Vec<String>,
}

impl FileOutline {
    fn to_value(&self) -> Value {
        json!({
            "imports": self.imports,
            "classes": self.classes,
            "functions": self.functions,
        })
    }
}

/// Extract imports, classes and functions from Python source text.
pub fn outline_python(source: &str) -> FileOutline {
    let mut outline = FileOutline::default();
    for line in source.lines() {
        if let Some(caps) = IMPORT_RE.captures(line) {
            outline.imports.extend(
                caps[1]
                    .split(',')
                    .filter_map(|part| part.split_whitespace().next())
                    .map(str::to_string),
            );
        } else if let Some(caps) = FROM_IMPORT_RE.captures(line) {
            outline.imports.push(caps[1].to_string());
        } else if let Some(caps) = CLASS_RE.captures(line) {
            outline.classes.push(caps[1].to_string());
        } else if let Some(caps) = DEF_RE.captures(line) {
            outline.functions.push(caps[1].to_string());
        }
    }
    outline
}

/// Build the code map of `root` without writing it.
///
/// Keys are `/`-separated paths relative to `root`, sorted. Files that cannot
/// be read map to `{"error": "Failed to parse: ..."}`.
pub fn build_code_map(root: &Path) -> Map<String, Value> {
    let mut map = Map::new();
    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !is_skipped_dir(entry));
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!(err = %err, "skipping unreadable path");
                continue;
            }
        };
        if !entry.file_type().is_file()
            || entry.path().extension().and_then(|ext| ext.to_str()) != Some("py")
        {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        let key = relative
            .components()
            .map(|part| part.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let value = match fs::read_to_string(entry.path()) {
            Ok(source) => outline_python(&source).to_value(),
            Err(err) => json!({"error": format!("Failed to parse: {err}")}),
        };
        map.insert(key, value);
    }
    map
}

/// Build the code map of `root` and persist it to `code_map.json`.
#[instrument(skip_all, fields(root = %root.display()))]
pub fn write_code_map(root: &Path) -> Result<Value> {
    let map = Value::Object(build_code_map(root));
    write_json_atomic(&root.join(CODE_MAP_FILE), &map)?;
    debug!(files = map.as_object().map_or(0, Map::len), "code map written");
    Ok(map)
}

fn is_skipped_dir(entry: &DirEntry) -> bool {
    entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| SKIPPED_DIRS.contains(&name))
}
