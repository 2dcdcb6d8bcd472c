//! Entry point resolution.
//!
//! User source is loaded into a fresh namespace of the block's runtime and the
//! requested function is looked up there. Two source layouts are accepted:
//!
//! Module style, where the chunk returns a table of functions:
//! ```lua
//! local M = {}
//! function M.gain(inputs, num_inputs, outputs, num_outputs, elems) ... end
//! return M
//! ```
//!
//! Global style, where the chunk defines functions at top level:
//! ```lua
//! function gain(inputs, num_inputs, outputs, num_outputs, elems) ... end
//! ```
//!
//! Dotted names (`Filters.gain`) walk nested tables.

use crate::error::{lua_error_message, BlockError, Result};
use crate::scripting::runtime::{ScriptRuntime, SourceOrigin};
use mlua::{Function, Table, Value};

/// A validated, callable block function.
///
/// Holding an `EntryPoint` means validation succeeded; there is no
/// unvalidated form.
#[derive(Clone)]
pub struct EntryPoint {
    origin: SourceOrigin,
    function_name: String,
    callable: Function,
    /// Keeps the source's namespace alive alongside the function.
    namespace: Table,
}

impl EntryPoint {
    pub fn origin(&self) -> &SourceOrigin {
        &self.origin
    }

    pub fn function_name(&self) -> &str {
        &self.function_name
    }

    pub fn callable(&self) -> &Function {
        &self.callable
    }

    pub fn namespace(&self) -> &Table {
        &self.namespace
    }
}

impl std::fmt::Debug for EntryPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntryPoint")
            .field("origin", &self.origin)
            .field("function_name", &self.function_name)
            .finish()
    }
}

/// Load `source` into a new namespace of `runtime` and bind `function_name`.
pub fn resolve(runtime: &ScriptRuntime, source: &str, function_name: &str) -> Result<EntryPoint> {
    let origin = SourceOrigin::classify(source);
    let namespace = runtime.new_namespace()?;
    let module = runtime.load_source(&origin, &namespace)?;

    match lookup(&module, &namespace, function_name)? {
        Value::Function(callable) => {
            tracing::debug!("Resolved entry point {} from {:?}", function_name, origin);
            Ok(EntryPoint {
                origin,
                function_name: function_name.to_string(),
                callable,
                namespace,
            })
        }
        Value::Nil => Err(BlockError::EntryPointNotFound(function_name.to_string())),
        other => Err(BlockError::EntryPointNotCallable {
            name: function_name.to_string(),
            found: other.type_name().to_string(),
        }),
    }
}

/// Find `name` in the chunk's returned module table first, then in the
/// namespace's own fields. Globals reached through the namespace's `__index`
/// are not entry points.
fn lookup(module: &Value, namespace: &Table, name: &str) -> Result<Value> {
    let lua_error = |e: mlua::Error| BlockError::ScriptLoad(lua_error_message(&e));
    let mut segments = name.split('.');
    let Some(first) = segments.next().filter(|s| !s.is_empty()) else {
        return Ok(Value::Nil);
    };

    let mut current = match module {
        Value::Table(table) => table.get::<Value>(first).map_err(lua_error)?,
        _ => Value::Nil,
    };
    if current.is_nil() {
        current = namespace.raw_get::<Value>(first).map_err(lua_error)?;
    }

    for segment in segments {
        current = match current {
            Value::Table(table) => table.get::<Value>(segment).map_err(lua_error)?,
            _ => return Ok(Value::Nil),
        };
    }

    Ok(current)
}
