//! Block implementations.

pub mod luajit_block;

pub use luajit_block::LuaJitBlock;
