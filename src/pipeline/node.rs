//! Block lifecycle vocabulary shared by every block implementation.
//!
//! A block moves through `Constructed → SourceBound ⇄ Active`. The two idle
//! states accept reconfiguration; `Active` accepts only `work()` and
//! `deactivate()`.

use std::fmt;

/// Lifecycle state of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockState {
    /// Ports declared and runtime initialized, no entry point bound yet.
    Constructed,
    /// Entry point bound; block is idle and can be rebound or activated.
    SourceBound,
    /// Activated by the host; `work()` may be called.
    Active,
}

impl BlockState {
    /// Whether reconfiguration (source, libraries) is allowed.
    pub fn is_idle(&self) -> bool {
        !matches!(self, BlockState::Active)
    }
}

impl fmt::Display for BlockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockState::Constructed => f.write_str("constructed"),
            BlockState::SourceBound => f.write_str("source-bound"),
            BlockState::Active => f.write_str("active"),
        }
    }
}

/// Argument of a registered call made by a host through
/// [`LuaJitBlock::call`](crate::pipeline::nodes::LuaJitBlock::call).
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
    String(String),
    List(Vec<String>),
}

impl ConfigValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConfigValue::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            ConfigValue::List(v) => Some(v),
            _ => None,
        }
    }

    /// Name of the variant, for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            ConfigValue::String(_) => "string",
            ConfigValue::List(_) => "list",
        }
    }
}

impl From<&str> for ConfigValue {
    fn from(value: &str) -> Self {
        ConfigValue::String(value.to_string())
    }
}

impl From<Vec<String>> for ConfigValue {
    fn from(value: Vec<String>) -> Self {
        ConfigValue::List(value)
    }
}
