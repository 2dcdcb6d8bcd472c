//! # luajit-block: LuaJIT-scripted blocks for streaming dataflow engines
//!
//! A block is one stage of a streaming pipeline. This crate lets the stage's
//! work be written as a LuaJIT function that reads and writes the host's
//! buffers in place through the `ffi` library, optionally calling into native
//! libraries preloaded when the block is activated.
//!
//! ## Architecture
//!
//! - **Scripting**: one isolated [`ScriptRuntime`] per block, entry point
//!   resolution and zero-copy buffer marshalling
//! - **Native**: scoped loading of shared libraries whose symbols scripts reach
//!   through `ffi.C`
//! - **Pipeline**: the [`LuaJitBlock`] lifecycle, host port traits and a
//!   simple in-memory buffer implementation
//! - **Config**: declarative TOML conf files turned into block factories
//!
//! ## Example
//!
//! ```ignore
//! use luajit_block::{BlockRunner, DType, InputBuffer, LuaJitBlock, OutputBuffer};
//!
//! let mut block = LuaJitBlock::new(&["float32"], &["float32"])?;
//! block.set_source("filters/gain.lua", "gain")?;
//!
//! let mut inputs = [InputBuffer::from_f32(&[1.0, 2.0, 3.0])];
//! let mut outputs = [OutputBuffer::with_capacity(DType::float32(), 3)];
//! BlockRunner::new(&mut block).run_to_completion(&mut inputs, &mut outputs)?;
//! ```

pub mod config;
pub mod error;
pub mod native;
pub mod pipeline;
pub mod scripting;

// Re-export commonly used types
pub use config::{load_conf_file, BlockRegistry, FactoryArgs};
pub use error::{BlockError, Result};
pub use pipeline::{
    BlockRunner, BlockState, DType, InputBuffer, InputPort, LuaJitBlock, OutputBuffer, OutputPort,
};
pub use scripting::{runtime_info, CallingConvention, ScriptRuntime};
