//! Block-side view of a streaming pipeline.
//!
//! A host engine owns topology, scheduling and buffer allocation. What it
//! hands a block on every call is one [`InputPort`] per input stream and one
//! [`OutputPort`] per output stream: typed, contiguous memory regions plus a
//! cursor the block advances after a successful call.
//!
//! ```text
//! host buffers ──► LuaJitBlock::work ──► BufferMarshaller ──► Lua function
//!      ▲                                                          │
//!      └───────────── consume / produce (on success) ◄────────────┘
//! ```

pub mod buffer;
pub mod executor;
pub mod node;
pub mod nodes;
pub mod port;

pub use buffer::{InputBuffer, OutputBuffer};
pub use executor::{BlockRunner, RunSummary};
pub use node::{BlockState, ConfigValue};
pub use nodes::LuaJitBlock;
pub use port::{DType, InputPort, OutputPort, PortDirection, PortSpec};
