//! Per-block LuaJIT state.
//!
//! A [`ScriptRuntime`] owns one `mlua::Lua` with the standard libraries, `jit`
//! and `ffi` opened and the BlockEnv adapter installed. Nothing in it is shared
//! with other blocks, so a broken script can only ever corrupt its own block.
//!
//! All calls into user code go through [`ScriptRuntime::call_protected`], which
//! turns every Lua failure into a [`BlockError`].

use crate::error::{lua_error_message, BlockError, Result};
use crate::scripting::marshal::CallingConvention;
use mlua::{FromLuaMulti, Function, IntoLuaMulti, Lua, LuaOptions, StdLib, Table, Value};
use std::borrow::Cow;
use std::path::{Path, PathBuf};

/// Extension that marks a source string as a script file path.
pub const SCRIPT_EXTENSION: &str = "lua";

const BLOCK_ENV_SOURCE: &str = include_str!("block_env.lua");

/// Where block source comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceOrigin {
    /// Script text given inline.
    Literal(String),
    /// Path to a `.lua` file.
    File(PathBuf),
}

impl SourceOrigin {
    /// Decide whether `source` names a file or is script text.
    ///
    /// A single line ending in `.lua` is a path; everything else, including
    /// multi-line text that happens to end in `.lua`, is literal source.
    pub fn classify(source: &str) -> Self {
        let path = Path::new(source);
        let single_line = !source.contains('\n');
        if single_line && path.extension().is_some_and(|ext| ext == SCRIPT_EXTENSION) {
            SourceOrigin::File(path.to_path_buf())
        } else {
            SourceOrigin::Literal(source.to_string())
        }
    }

    fn chunk_name(&self) -> String {
        match self {
            SourceOrigin::Literal(_) => "=block source".to_string(),
            SourceOrigin::File(path) => format!("@{}", path.display()),
        }
    }

    fn read(&self) -> Result<Cow<'_, str>> {
        match self {
            SourceOrigin::Literal(text) => Ok(Cow::Borrowed(text)),
            SourceOrigin::File(path) => match std::fs::read_to_string(path) {
                Ok(text) => Ok(Cow::Owned(text)),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    Err(BlockError::SourceNotFound(path.clone()))
                }
                Err(e) => Err(BlockError::Io(e)),
            },
        }
    }
}

/// One isolated LuaJIT execution context.
pub struct ScriptRuntime {
    lua: Lua,
    new_namespace: Function,
    call_positional: Function,
    call_record: Function,
}

impl ScriptRuntime {
    /// Open the libraries and install the BlockEnv adapter.
    ///
    /// A failure here means the embedding itself is broken and is reported as
    /// [`BlockError::Bootstrap`].
    pub fn new() -> Result<Self> {
        // SAFETY: `ffi` is how block functions reach host buffers and native
        // libraries. User scripts are trusted with raw memory.
        let lua = unsafe { Lua::unsafe_new_with(StdLib::ALL_SAFE | StdLib::FFI, LuaOptions::new()) };

        let bootstrap = |e: mlua::Error| BlockError::Bootstrap(lua_error_message(&e));
        let block_env: Table = lua
            .load(BLOCK_ENV_SOURCE)
            .set_name("=BlockEnv")
            .eval()
            .map_err(bootstrap)?;
        lua.globals()
            .set("BlockEnv", block_env.clone())
            .map_err(bootstrap)?;

        let new_namespace = block_env.get::<Function>("new_namespace").map_err(bootstrap)?;
        let call_positional = block_env
            .get::<Function>("call_positional")
            .map_err(bootstrap)?;
        let call_record = block_env.get::<Function>("call_record").map_err(bootstrap)?;

        Ok(Self {
            lua,
            new_namespace,
            call_positional,
            call_record,
        })
    }

    /// Create a fresh namespace whose misses fall through to the globals.
    pub fn new_namespace(&self) -> Result<Table> {
        self.new_namespace
            .call::<Table>(())
            .map_err(|e| BlockError::Bootstrap(lua_error_message(&e)))
    }

    /// Compile `origin` with `namespace` as its environment and run the chunk,
    /// returning its first result.
    pub fn load_source(&self, origin: &SourceOrigin, namespace: &Table) -> Result<Value> {
        let text = origin.read()?;
        let load_error = |e: mlua::Error| BlockError::ScriptLoad(lua_error_message(&e));

        let chunk = self
            .lua
            .load(text.as_ref())
            .set_name(origin.chunk_name())
            .set_environment(namespace.clone())
            .into_function()
            .map_err(load_error)?;

        chunk.call::<Value>(()).map_err(load_error)
    }

    /// Call `function` with every Lua error captured as
    /// [`BlockError::ScriptExecution`] carrying the runtime's message.
    ///
    /// Blocks for the full duration of the call, including nested FFI calls.
    /// There is no timeout: a function that never returns never returns here.
    pub fn call_protected<R: FromLuaMulti>(
        &self,
        function: &Function,
        args: impl IntoLuaMulti,
    ) -> Result<R> {
        function.call::<R>(args).map_err(BlockError::from_lua_error)
    }

    /// BlockEnv adapter implementing a calling convention.
    pub fn adapter(&self, convention: CallingConvention) -> &Function {
        match convention {
            CallingConvention::Positional => &self.call_positional,
            CallingConvention::Record => &self.call_record,
        }
    }

    /// `jit.version` of the embedded runtime.
    pub fn version(&self) -> Result<String> {
        let jit: Table = self.lua.globals().get("jit").map_err(BlockError::from_lua_error)?;
        jit.get::<String>("version").map_err(BlockError::from_lua_error)
    }

    pub fn lua(&self) -> &Lua {
        &self.lua
    }
}

impl std::fmt::Debug for ScriptRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptRuntime")
            .field("used_memory", &self.lua.used_memory())
            .finish()
    }
}
