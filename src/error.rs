//! Error handling for luajit-block
//!
//! Every failure that crosses the block boundary, whether it comes from the
//! Lua runtime, the dynamic loader, a conf file or a lifecycle mistake, is
//! reported as a [`BlockError`].

use crate::pipeline::node::BlockState;
use crate::pipeline::port::PortDirection;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for block operations
#[derive(Error, Debug)]
pub enum BlockError {
    /// A path-like source does not exist on disk
    #[error("Source file not found: {}", .0.display())]
    SourceNotFound(PathBuf),

    /// Script source failed to parse, compile or run its top-level chunk
    #[error("Script load error: {0}")]
    ScriptLoad(String),

    /// The named entry point is not defined by the loaded source
    #[error("The given field ({0}) does not exist")]
    EntryPointNotFound(String),

    /// The named entry point exists but is not a function
    #[error("The given field ({name}) must be a function. Found {found}")]
    EntryPointNotCallable { name: String, found: String },

    /// Operation is not allowed in the block's current lifecycle state
    #[error("Cannot {operation} while block is {state}")]
    InvalidState {
        operation: &'static str,
        state: BlockState,
    },

    /// `work()` or `activate()` before any successful `set_source`
    #[error("LuaJIT function not set")]
    NoFunctionBound,

    /// The user function raised while processing buffers
    #[error("{0}")]
    ScriptExecution(String),

    /// A preloaded native library failed to load at activation
    #[error("Failed to load native library {}: {message}", path.display())]
    NativeLibraryLoad { path: PathBuf, message: String },

    /// The embedded BlockEnv bootstrap could not be installed
    #[error("Runtime bootstrap failed: {0}")]
    Bootstrap(String),

    /// Host passed a different number of buffers than the block declares
    #[error("Expected {expected} {direction} buffers, got {actual}")]
    ArityMismatch {
        direction: PortDirection,
        expected: usize,
        actual: usize,
    },

    /// Host port element type differs from the declared port type
    #[error("{direction} port {index} is declared as {expected}, host buffer is {actual}")]
    PortTypeMismatch {
        direction: PortDirection,
        index: usize,
        expected: String,
        actual: String,
    },

    /// Port type tag is not recognized
    #[error("Unknown type tag: {0}")]
    UnknownType(String),

    /// Registered call does not exist on this block
    #[error("No registered call named {0}")]
    UnknownCall(String),

    /// A call received arguments of the wrong shape
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Conf entry is missing a required key
    #[error("No {0}")]
    MissingConfigKey(&'static str),

    /// Factory path does not follow the plugin path syntax
    #[error("Invalid factory path: {0}")]
    InvalidFactoryPath(String),

    /// Errors related to conf file loading
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<BlockError>,
    },
}

impl BlockError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        BlockError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Create a script execution error from a Lua error, keeping the
    /// runtime's own message text.
    pub fn from_lua_error(err: mlua::Error) -> Self {
        BlockError::ScriptExecution(lua_error_message(&err))
    }

    /// Strip context layers and return the innermost error.
    pub fn root(&self) -> &BlockError {
        match self {
            BlockError::WithContext { source, .. } => source.root(),
            other => other,
        }
    }
}

/// Extract the runtime's message from a Lua error, unwrapping callback and
/// context layers down to the original cause.
///
/// Protected calls append a stack traceback to runtime errors; only the text
/// before it is kept.
pub(crate) fn lua_error_message(err: &mlua::Error) -> String {
    match err {
        mlua::Error::RuntimeError(message) | mlua::Error::MemoryError(message) => {
            strip_traceback(message).to_string()
        }
        mlua::Error::SyntaxError { message, .. } => strip_traceback(message).to_string(),
        mlua::Error::CallbackError { cause, .. } => lua_error_message(cause),
        mlua::Error::WithContext { cause, .. } => lua_error_message(cause),
        other => strip_traceback(&other.to_string()).to_string(),
    }
}

fn strip_traceback(message: &str) -> &str {
    message
        .split_once("\nstack traceback:")
        .map_or(message, |(head, _)| head)
}

/// Result type alias for block operations
pub type Result<T> = std::result::Result<T, BlockError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_error_display() {
        let err = BlockError::EntryPointNotFound("process".to_string());
        assert_eq!(err.to_string(), "The given field (process) does not exist");
    }

    #[test]
    fn test_not_callable_reports_found_type() {
        let err = BlockError::EntryPointNotCallable {
            name: "gain".to_string(),
            found: "number".to_string(),
        };
        assert!(err.to_string().contains("must be a function"));
        assert!(err.to_string().ends_with("Found number"));
    }

    #[test]
    fn test_error_with_context() {
        let err = BlockError::MissingConfigKey("factory");
        let with_ctx = err.with_context("blocks.conf");
        assert!(with_ctx.to_string().contains("blocks.conf"));
        assert!(matches!(with_ctx.root(), BlockError::MissingConfigKey("factory")));
    }

    #[test]
    fn test_invalid_state_message() {
        let err = BlockError::InvalidState {
            operation: "set source",
            state: BlockState::Active,
        };
        assert_eq!(err.to_string(), "Cannot set source while block is active");
    }

    #[test]
    fn test_lua_message_unwraps_callback_layers() {
        let inner = mlua::Error::RuntimeError("user.lua:3: boom".to_string());
        let wrapped = mlua::Error::CallbackError {
            traceback: "stack traceback:".to_string(),
            cause: Arc::new(inner),
        };
        let err = BlockError::from_lua_error(wrapped);
        assert_eq!(err.to_string(), "user.lua:3: boom");
    }

    #[test]
    fn test_lua_message_drops_traceback() {
        let err = mlua::Error::RuntimeError(
            "block source:1: boom\nstack traceback:\n\t[C]: in function 'error'".to_string(),
        );
        assert_eq!(BlockError::from_lua_error(err).to_string(), "block source:1: boom");

        let plain = mlua::Error::RuntimeError("no traceback here".to_string());
        assert_eq!(lua_error_message(&plain), "no traceback here");
    }
}
