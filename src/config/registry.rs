//! Registry of conf-declared block factories.

use crate::config::{load_conf_file, FactoryArgs};
use crate::error::{BlockError, Result, ResultExt};
use crate::pipeline::nodes::LuaJitBlock;
use std::collections::BTreeMap;
use std::path::Path;

/// Prefix under which conf-declared factories are registered.
pub const REGISTRY_PREFIX: &str = "/blocks";

/// Block factories keyed by registry path (`/blocks/dsp/gain`).
#[derive(Debug, Default)]
pub struct BlockRegistry {
    factories: BTreeMap<String, FactoryArgs>,
}

impl BlockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory and return its registry path. A later registration
    /// under the same path replaces the earlier one.
    pub fn register(&mut self, args: FactoryArgs) -> String {
        let path = format!("{}{}", REGISTRY_PREFIX, args.factory);
        if self.factories.contains_key(&path) {
            tracing::warn!("Replacing factory {} with entry from {:?}", path, args.conf_path);
        } else {
            tracing::debug!("Registered factory {}", path);
        }
        self.factories.insert(path.clone(), args);
        path
    }

    /// Register every entry of a conf file.
    pub fn load_conf_file(&mut self, path: impl AsRef<Path>) -> Result<Vec<String>> {
        let entries = load_conf_file(path)?;
        Ok(entries.into_iter().map(|args| self.register(args)).collect())
    }

    pub fn get(&self, path: &str) -> Option<&FactoryArgs> {
        self.factories.get(path)
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// Construct a bound, idle block from the factory at `path`.
    ///
    /// Setters are not exposed as registered calls on the result: a factory
    /// block's source is fixed by its conf entry.
    pub fn make(&self, path: &str) -> Result<LuaJitBlock> {
        let args = self
            .factories
            .get(path)
            .ok_or_else(|| BlockError::Config(format!("No factory registered at {}", path)))?;

        build(args).with_context(|| path.to_string())
    }
}

fn build(args: &FactoryArgs) -> Result<LuaJitBlock> {
    let mut block = LuaJitBlock::make(
        args.input_types.as_slice(),
        args.output_types.as_slice(),
        false,
    )?;
    block.set_name(args.factory.leaf());
    block.set_source(&args.source_text()?, &args.function)?;
    block.set_preloaded_libraries(args.preload_libraries.iter().cloned())?;
    block.set_calling_convention(args.calling_convention)?;
    Ok(block)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::node::BlockState;
    use crate::scripting::CallingConvention;

    const CONF: &str = r#"
[gain]
factory = "/dsp/gain"
source = "gain.lua"
function = "gain"
input_types = "float32"
output_types = "float32"
calling_convention = "record"

[sum]
factory = "/dsp/sum"
source = "gain.lua"
function = "sum"
input_types = "float32 float32"
output_types = "float32"
"#;

    const SOURCE: &str = r#"
local M = {}
function M.gain(args) end
function M.sum(inputs, num_inputs, outputs, num_outputs, elems) end
return M
"#;

    #[test]
    fn test_load_and_make() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("gain.lua"), SOURCE).unwrap();
        let conf = dir.path().join("blocks.toml");
        std::fs::write(&conf, CONF).unwrap();

        let mut registry = BlockRegistry::new();
        let paths = registry.load_conf_file(&conf).unwrap();
        assert_eq!(paths, vec!["/blocks/dsp/gain", "/blocks/dsp/sum"]);
        assert_eq!(registry.len(), 2);

        let gain = registry.make("/blocks/dsp/gain").unwrap();
        assert_eq!(gain.name(), "gain");
        assert_eq!(gain.state(), BlockState::SourceBound);
        assert_eq!(gain.calling_convention(), CallingConvention::Record);
        assert!(gain.registered_calls().is_empty());

        let sum = registry.make("/blocks/dsp/sum").unwrap();
        assert_eq!(sum.input_types().len(), 2);
        assert_eq!(sum.entry_point().unwrap().function_name(), "sum");
    }

    #[test]
    fn test_make_unknown_path() {
        let registry = BlockRegistry::new();
        assert!(matches!(
            registry.make("/blocks/nothing"),
            Err(BlockError::Config(_))
        ));
    }

    #[test]
    fn test_make_reports_binding_errors() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("gain.lua"), "return {}").unwrap();
        let conf = dir.path().join("blocks.toml");
        std::fs::write(&conf, CONF).unwrap();

        let mut registry = BlockRegistry::new();
        registry.load_conf_file(&conf).unwrap();

        let err = registry.make("/blocks/dsp/gain").unwrap_err();
        assert!(matches!(err.root(), BlockError::EntryPointNotFound(name) if name == "gain"));
        assert!(err.to_string().starts_with("/blocks/dsp/gain"));
    }
}
