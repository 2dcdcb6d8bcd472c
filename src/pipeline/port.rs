//! Port descriptors and the host buffer interface.
//!
//! A block declares its ports as ordered lists of [`DType`]s. The host engine
//! exposes its memory regions through [`InputPort`] and [`OutputPort`]; the
//! block never allocates or copies buffer contents itself.

use crate::error::{BlockError, Result};
use std::ffi::c_void;
use std::fmt;

/// Whether a port is an input or output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortDirection {
    Input,
    Output,
}

impl fmt::Display for PortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortDirection::Input => f.write_str("input"),
            PortDirection::Output => f.write_str("output"),
        }
    }
}

/// Element type of a port, parsed from a type tag such as `float32` or
/// `complex_int16`.
///
/// Only the element size matters to the block; interpreting the bytes is the
/// script's job.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DType {
    name: String,
    size: usize,
}

impl DType {
    /// Parse a type tag.
    pub fn parse(tag: &str) -> Result<Self> {
        let tag = tag.trim();
        let (complex, scalar) = match tag.strip_prefix("complex_") {
            Some(rest) => (true, rest),
            None => (false, tag),
        };

        let scalar_size = match scalar {
            "int8" | "uint8" => 1,
            "int16" | "uint16" => 2,
            "int32" | "uint32" | "float32" => 4,
            "int64" | "uint64" | "float64" => 8,
            _ => return Err(BlockError::UnknownType(tag.to_string())),
        };

        Ok(Self {
            name: tag.to_string(),
            size: if complex { scalar_size * 2 } else { scalar_size },
        })
    }

    /// 32-bit float, the most common stream type.
    pub fn float32() -> Self {
        Self {
            name: "float32".to_string(),
            size: 4,
        }
    }

    /// The tag this type was parsed from.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Size of one element in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_complex(&self) -> bool {
        self.name.starts_with("complex_")
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Declared input and output types of a block, fixed at construction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortSpec {
    pub inputs: Vec<DType>,
    pub outputs: Vec<DType>,
}

impl PortSpec {
    /// Parse both tag lists.
    pub fn parse<S: AsRef<str>>(input_types: &[S], output_types: &[S]) -> Result<Self> {
        Ok(Self {
            inputs: input_types
                .iter()
                .map(|t| DType::parse(t.as_ref()))
                .collect::<Result<_>>()?,
            outputs: output_types
                .iter()
                .map(|t| DType::parse(t.as_ref()))
                .collect::<Result<_>>()?,
        })
    }

    pub fn arity(&self, direction: PortDirection) -> usize {
        match direction {
            PortDirection::Input => self.inputs.len(),
            PortDirection::Output => self.outputs.len(),
        }
    }
}

/// A host-owned readable region with a read cursor.
#[cfg_attr(test, mockall::automock)]
pub trait InputPort {
    /// Element type of the buffer.
    fn dtype(&self) -> &DType;

    /// Elements available to read.
    fn elements(&self) -> usize;

    /// Address of the first unread element.
    fn as_ptr(&self) -> *const c_void;

    /// Advance the read cursor.
    fn consume(&mut self, elements: usize);
}

/// A host-owned writable region with a write cursor.
#[cfg_attr(test, mockall::automock)]
pub trait OutputPort {
    /// Element type of the buffer.
    fn dtype(&self) -> &DType;

    /// Elements of free space available to write.
    fn elements(&self) -> usize;

    /// Address of the first free element.
    fn as_mut_ptr(&mut self) -> *mut c_void;

    /// Advance the write cursor.
    fn produce(&mut self, elements: usize);
}
