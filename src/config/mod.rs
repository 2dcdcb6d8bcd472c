//! Declarative block configuration
//!
//! A conf file describes blocks without code. It is TOML; every top-level
//! table is one entry and every value is a string:
//!
//! ```toml
//! [gain]
//! factory = "/dsp/gain"
//! source = "gain.lua"
//! function = "gain"
//! input_types = "float32"
//! output_types = "float32"
//! # optional
//! doc_source = "gain_docs.lua"
//! preload_libraries = "./libgain.so libm.so.6"
//! calling_convention = "positional"
//! ```
//!
//! Anything else (a bare top-level key, a non-string value) is a parse error.
//! Relative paths resolve against the conf file's directory. Library names
//! without a `/` are left to the dynamic loader's search path.
//!
//! Entries are turned into block factories by [`registry::BlockRegistry`].

pub mod registry;

pub use registry::BlockRegistry;

use crate::error::{BlockError, Result, ResultExt};
use crate::pipeline::port::PortSpec;
use crate::scripting::CallingConvention;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Conf file extension
pub const CONF_FILE_EXTENSION: &str = "toml";

/// Validated plugin path, e.g. `/dsp/gain`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct FactoryPath(String);

impl FactoryPath {
    /// A factory path starts with `/` and has one or more non-empty segments
    /// of ASCII letters, digits, `_` and `-`.
    pub fn parse(path: &str) -> Result<Self> {
        let invalid = || BlockError::InvalidFactoryPath(path.to_string());
        let rest = path.strip_prefix('/').ok_or_else(invalid)?;
        let valid_segment = |segment: &str| {
            !segment.is_empty()
                && segment
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        };
        if !rest.split('/').all(valid_segment) {
            return Err(invalid());
        }
        Ok(Self(path.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Last segment, used as the default block name.
    pub fn leaf(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }
}

impl fmt::Display for FactoryPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Everything needed to construct and bind one block.
#[derive(Debug, Clone, Serialize)]
pub struct FactoryArgs {
    /// Entry name (the conf table name).
    pub name: String,
    pub factory: FactoryPath,
    /// Resolved, existing script file.
    pub source: PathBuf,
    pub function: String,
    pub input_types: Vec<String>,
    pub output_types: Vec<String>,
    /// Documentation source. Validated and recorded, never parsed.
    pub doc_source: PathBuf,
    pub preload_libraries: Vec<PathBuf>,
    pub calling_convention: CallingConvention,
    /// Conf file the entry came from.
    pub conf_path: PathBuf,
}

impl FactoryArgs {
    /// Source argument for `set_source`: the path itself for `.lua` files,
    /// otherwise the file's contents.
    pub fn source_text(&self) -> Result<String> {
        let is_script = self
            .source
            .extension()
            .is_some_and(|ext| ext == crate::scripting::SCRIPT_EXTENSION);
        if is_script {
            Ok(self.source.to_string_lossy().into_owned())
        } else {
            std::fs::read_to_string(&self.source).map_err(BlockError::from)
        }
    }
}

fn required<'a>(entry: &'a BTreeMap<String, String>, key: &'static str) -> Result<&'a str> {
    entry
        .get(key)
        .map(String::as_str)
        .ok_or(BlockError::MissingConfigKey(key))
}

fn tokenize(value: &str) -> Vec<String> {
    value.split_whitespace().map(str::to_string).collect()
}

fn existing_file(conf_dir: &Path, value: &str) -> Result<PathBuf> {
    let path = conf_dir.join(value);
    if path.exists() {
        Ok(path)
    } else {
        Err(BlockError::SourceNotFound(path))
    }
}

fn library_path(conf_dir: &Path, value: &str) -> PathBuf {
    if value.contains('/') {
        conf_dir.join(value)
    } else {
        PathBuf::from(value)
    }
}

/// Parse one conf entry.
///
/// `conf_path` is the file the entry was read from; relative paths resolve
/// against its directory.
pub fn parse_entry(
    name: &str,
    entry: &BTreeMap<String, String>,
    conf_path: &Path,
) -> Result<FactoryArgs> {
    let conf_dir = conf_path.parent().unwrap_or_else(|| Path::new(""));

    let factory = FactoryPath::parse(required(entry, "factory")?)?;
    let source = existing_file(conf_dir, required(entry, "source")?)?;
    let function = required(entry, "function")?.to_string();
    let input_types = tokenize(required(entry, "input_types")?);
    let output_types = tokenize(required(entry, "output_types")?);

    // Fail here rather than at construction.
    PortSpec::parse(input_types.as_slice(), output_types.as_slice())?;

    let doc_source = match entry.get("doc_source") {
        Some(doc) => existing_file(conf_dir, doc)?,
        None => source.clone(),
    };
    let preload_libraries = entry
        .get("preload_libraries")
        .map(|value| {
            value
                .split_whitespace()
                .map(|lib| library_path(conf_dir, lib))
                .collect()
        })
        .unwrap_or_default();
    let calling_convention = entry
        .get("calling_convention")
        .map(|value| value.parse::<CallingConvention>())
        .transpose()?
        .unwrap_or_default();

    Ok(FactoryArgs {
        name: name.to_string(),
        factory,
        source,
        function,
        input_types,
        output_types,
        doc_source,
        preload_libraries,
        calling_convention,
        conf_path: conf_path.to_path_buf(),
    })
}

/// Parse conf file text. Entries are returned in table-name order.
pub fn parse_conf(content: &str, conf_path: &Path) -> Result<Vec<FactoryArgs>> {
    let tables: BTreeMap<String, BTreeMap<String, String>> = toml::from_str(content)
        .map_err(|e| BlockError::Config(format!("Failed to parse conf file: {}", e)))?;

    tables
        .iter()
        .map(|(name, entry)| {
            parse_entry(name, entry, conf_path).with_context(|| format!("[{}]", name))
        })
        .collect()
}

/// Read and parse a conf file.
pub fn load_conf_file(path: impl AsRef<Path>) -> Result<Vec<FactoryArgs>> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| {
        BlockError::Config(format!("Failed to read conf file {}: {}", path.display(), e))
    })?;

    let entries = parse_conf(&content, path).with_context(|| path.display().to_string())?;
    tracing::debug!("Loaded {} entries from {:?}", entries.len(), path);
    Ok(entries)
}
