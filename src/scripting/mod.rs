//! LuaJIT embedding for block functions
//!
//! Each block owns a [`ScriptRuntime`]: an isolated LuaJIT state with `ffi`
//! enabled and the BlockEnv adapter installed. User source is bound to a
//! block through [`resolve`], and every call hands the function raw buffer
//! addresses prepared by the [`BufferMarshaller`].
//!
//! ## Writing a block function
//!
//! With the default positional convention a function receives the input and
//! output address arrays, their lengths, and the number of elements to
//! process. The arrays are `void*[]`; cast each entry to the element type of
//! its port:
//!
//! ```lua
//! local ffi = require("ffi")
//!
//! local Blocks = {}
//!
//! function Blocks.add_three(inputs, num_inputs, outputs, num_outputs, elems)
//!     local a = ffi.cast("const float*", inputs[0])
//!     local b = ffi.cast("const float*", inputs[1])
//!     local c = ffi.cast("const float*", inputs[2])
//!     local out = ffi.cast("float*", outputs[0])
//!     for i = 0, elems - 1 do
//!         out[i] = a[i] + b[i] + c[i]
//!     end
//! end
//!
//! return Blocks
//! ```
//!
//! Calling into a preloaded native library:
//!
//! ```lua
//! local ffi = require("ffi")
//! ffi.cdef[[ void scale_floats(const float* in, float* out, size_t n); ]]
//!
//! function scale(inputs, num_inputs, outputs, num_outputs, elems)
//!     ffi.C.scale_floats(inputs[0], outputs[0], elems)
//! end
//! ```
//!
//! Raising an error (`error("...")`) fails that `work()` call without
//! consuming or producing anything.

pub mod entry_point;
pub mod marshal;
pub mod runtime;

pub use entry_point::{resolve, EntryPoint};
pub use marshal::{BufferMarshaller, CallingConvention, InvocationFrame};
pub use runtime::{ScriptRuntime, SourceOrigin, SCRIPT_EXTENSION};

use crate::error::Result;
use std::sync::OnceLock;

static RUNTIME_INFO: OnceLock<String> = OnceLock::new();

/// JSON description of the embedded runtime, e.g.
/// `{"LuaJIT Version":"LuaJIT 2.1.1713773202"}`. Computed once per process.
pub fn runtime_info() -> Result<String> {
    if let Some(info) = RUNTIME_INFO.get() {
        return Ok(info.clone());
    }

    let runtime = ScriptRuntime::new()?;
    let info = serde_json::json!({ "LuaJIT Version": runtime.version()? }).to_string();
    Ok(RUNTIME_INFO.get_or_init(|| info).clone())
}
