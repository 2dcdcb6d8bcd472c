//! Buffer marshalling between host ports and block functions.
//!
//! Only addresses, counts and the element count cross into Lua; buffer
//! contents are never touched or copied. The host's addresses are written
//! into two scratch arrays owned by the [`BufferMarshaller`] and handed to the
//! BlockEnv adapter as light userdata, which LuaJIT casts to `void**`.
//!
//! ## Calling conventions
//!
//! | Version | Convention   | User function signature |
//! |---------|--------------|-------------------------|
//! | 2       | `positional` | `fn(inputs, num_inputs, outputs, num_outputs, elems)` |
//! | 1       | `record`     | `fn({inputBuffers, numInputs, outputBuffers, numOutputs, elems})` |
//!
//! Address arrays are 0-indexed in both.

use crate::error::{BlockError, Result};
use crate::pipeline::port::{DType, PortDirection, PortSpec};
use crate::scripting::runtime::ScriptRuntime;
use mlua::{Function, LightUserData};
use serde::de::value::StrDeserializer;
use serde::de::IntoDeserializer;
use serde::{Deserialize, Serialize};
use std::ffi::c_void;
use std::fmt;
use std::str::FromStr;

/// Argument layout a block function is called with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallingConvention {
    /// Separate address arrays and counts.
    #[default]
    #[serde(alias = "2")]
    Positional,
    /// A single table bundling the same values.
    #[serde(alias = "1")]
    Record,
}

impl CallingConvention {
    /// Wire contract version.
    pub fn version(&self) -> u32 {
        match self {
            CallingConvention::Record => 1,
            CallingConvention::Positional => 2,
        }
    }
}

impl FromStr for CallingConvention {
    type Err = BlockError;

    /// Accepts the lowercase name or the version number.
    fn from_str(s: &str) -> Result<Self> {
        let name = s.trim();
        let deserializer: StrDeserializer<'_, serde::de::value::Error> = name.into_deserializer();
        Self::deserialize(deserializer).map_err(|_| {
            BlockError::InvalidArgument(format!("unknown calling convention '{}'", name))
        })
    }
}

impl fmt::Display for CallingConvention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallingConvention::Positional => f.write_str("positional"),
            CallingConvention::Record => f.write_str("record"),
        }
    }
}

/// Converts per-call port addresses into block function arguments.
#[derive(Debug)]
pub struct BufferMarshaller {
    ports: PortSpec,
    convention: CallingConvention,
    // Addresses stored as usize, which has the layout of `void*`. Capacity
    // never exceeds the declared arity.
    input_addrs: Vec<usize>,
    output_addrs: Vec<usize>,
}

impl BufferMarshaller {
    pub fn new(ports: PortSpec) -> Self {
        Self {
            input_addrs: Vec::with_capacity(ports.inputs.len()),
            output_addrs: Vec::with_capacity(ports.outputs.len()),
            ports,
            convention: CallingConvention::default(),
        }
    }

    pub fn ports(&self) -> &PortSpec {
        &self.ports
    }

    pub fn convention(&self) -> CallingConvention {
        self.convention
    }

    pub fn set_convention(&mut self, convention: CallingConvention) {
        self.convention = convention;
    }

    /// Check arity and port types, then stage the addresses for one call.
    pub fn marshal<'p, I, O>(
        &mut self,
        inputs: I,
        outputs: O,
        elements: usize,
    ) -> Result<InvocationFrame<'_>>
    where
        I: IntoIterator<Item = (&'p DType, *const c_void)>,
        O: IntoIterator<Item = (&'p DType, *mut c_void)>,
    {
        // The frame owns the scratch borrow from here on, so it is cleared
        // even when validation below fails.
        let mut frame = InvocationFrame {
            input_addrs: &mut self.input_addrs,
            output_addrs: &mut self.output_addrs,
            elements,
            convention: self.convention,
        };

        stage(
            &self.ports.inputs,
            inputs,
            frame.input_addrs,
            PortDirection::Input,
        )?;
        stage(
            &self.ports.outputs,
            outputs.into_iter().map(|(dtype, ptr)| (dtype, ptr.cast_const())),
            frame.output_addrs,
            PortDirection::Output,
        )?;

        Ok(frame)
    }

    /// Staged address count, for checking that frames clean up after themselves.
    pub fn staged(&self) -> (usize, usize) {
        (self.input_addrs.len(), self.output_addrs.len())
    }
}

fn stage<'p>(
    declared: &[DType],
    ports: impl IntoIterator<Item = (&'p DType, *const c_void)>,
    addrs: &mut Vec<usize>,
    direction: PortDirection,
) -> Result<()> {
    let mut actual = 0;
    for (index, (dtype, ptr)) in ports.into_iter().enumerate() {
        actual += 1;
        let Some(expected) = declared.get(index) else {
            continue;
        };
        if expected != dtype {
            return Err(BlockError::PortTypeMismatch {
                direction,
                index,
                expected: expected.name().to_string(),
                actual: dtype.name().to_string(),
            });
        }
        addrs.push(ptr as usize);
    }

    if actual != declared.len() {
        return Err(BlockError::ArityMismatch {
            direction,
            expected: declared.len(),
            actual,
        });
    }
    Ok(())
}

/// Marshalled arguments of one call. Dropping the frame clears the scratch
/// arrays, whatever the call's outcome.
pub struct InvocationFrame<'m> {
    input_addrs: &'m mut Vec<usize>,
    output_addrs: &'m mut Vec<usize>,
    elements: usize,
    convention: CallingConvention,
}

impl InvocationFrame<'_> {
    pub fn elements(&self) -> usize {
        self.elements
    }

    pub fn num_inputs(&self) -> usize {
        self.input_addrs.len()
    }

    pub fn num_outputs(&self) -> usize {
        self.output_addrs.len()
    }

    /// Call `callable` through the BlockEnv adapter for this frame's
    /// convention.
    pub fn invoke(&mut self, runtime: &ScriptRuntime, callable: &Function) -> Result<()> {
        let inputs = LightUserData(self.input_addrs.as_mut_ptr().cast::<c_void>());
        let outputs = LightUserData(self.output_addrs.as_mut_ptr().cast::<c_void>());

        runtime.call_protected::<()>(
            runtime.adapter(self.convention),
            (
                callable.clone(),
                inputs,
                self.input_addrs.len(),
                outputs,
                self.output_addrs.len(),
                self.elements,
            ),
        )
    }
}

impl Drop for InvocationFrame<'_> {
    fn drop(&mut self) {
        self.input_addrs.clear();
        self.output_addrs.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ptr;

    fn float_ports(inputs: usize, outputs: usize) -> PortSpec {
        PortSpec {
            inputs: vec![DType::float32(); inputs],
            outputs: vec![DType::float32(); outputs],
        }
    }

    fn function(runtime: &ScriptRuntime, source: &str) -> Function {
        runtime.lua().load(source).eval().unwrap()
    }

    #[test]
    fn test_convention_parsing() {
        assert_eq!(
            "record".parse::<CallingConvention>().unwrap(),
            CallingConvention::Record
        );
        assert_eq!(
            "2".parse::<CallingConvention>().unwrap(),
            CallingConvention::Positional
        );
        assert_eq!(
            " 1 ".parse::<CallingConvention>().unwrap(),
            CallingConvention::Record
        );
        assert!(matches!(
            "packed".parse::<CallingConvention>(),
            Err(BlockError::InvalidArgument(message)) if message == "unknown calling convention 'packed'"
        ));
        assert_eq!(CallingConvention::default().version(), 2);
        assert_eq!(
            serde_json::to_string(&CallingConvention::Record).unwrap(),
            "\"record\""
        );
    }

    #[test]
    fn test_arity_mismatch() {
        let f32_type = DType::float32();
        let mut marshaller = BufferMarshaller::new(float_ports(2, 1));

        assert!(matches!(
            marshaller.marshal(
                [(&f32_type, ptr::null())],
                [(&f32_type, ptr::null_mut())],
                4,
            ),
            Err(BlockError::ArityMismatch {
                direction: PortDirection::Input,
                expected: 2,
                actual: 1
            })
        ));
        assert_eq!(marshaller.staged(), (0, 0));
    }

    #[test]
    fn test_extra_ports_are_not_staged() {
        let f32_type = DType::float32();
        let mut marshaller = BufferMarshaller::new(float_ports(0, 1));

        assert!(matches!(
            marshaller.marshal(
                [],
                [(&f32_type, ptr::null_mut()), (&f32_type, ptr::null_mut())],
                1,
            ),
            Err(BlockError::ArityMismatch { actual: 2, .. })
        ));
        assert_eq!(marshaller.staged(), (0, 0));
    }

    #[test]
    fn test_port_type_mismatch() {
        let int_type = DType::parse("int16").unwrap();
        let mut marshaller = BufferMarshaller::new(float_ports(1, 0));

        match marshaller.marshal([(&int_type, ptr::null())], [], 1) {
            Err(BlockError::PortTypeMismatch {
                index,
                expected,
                actual,
                ..
            }) => {
                assert_eq!(index, 0);
                assert_eq!(expected, "float32");
                assert_eq!(actual, "int16");
            }
            Err(other) => panic!("expected PortTypeMismatch, got {:?}", other),
            Ok(_) => panic!("expected PortTypeMismatch"),
        };
    }

    #[test]
    fn test_positional_invoke_passes_addresses() {
        let runtime = ScriptRuntime::new().unwrap();
        let callable = function(
            &runtime,
            r#"
            local ffi = require("ffi")
            return function(inputs, num_inputs, outputs, num_outputs, elems)
                local a = ffi.cast("const float*", inputs[0])
                local b = ffi.cast("const float*", inputs[1])
                local out = ffi.cast("float*", outputs[0])
                for i = 0, elems - 1 do
                    out[i] = a[i] * b[i] + num_inputs + num_outputs
                end
            end
            "#,
        );

        let a = [1.0f32, 2.0, 3.0];
        let b = [4.0f32, 5.0, 6.0];
        let mut out = [0.0f32; 3];
        let f32_type = DType::float32();
        let mut marshaller = BufferMarshaller::new(float_ports(2, 1));

        {
            let mut frame = marshaller
                .marshal(
                    [
                        (&f32_type, a.as_ptr().cast::<c_void>()),
                        (&f32_type, b.as_ptr().cast::<c_void>()),
                    ],
                    [(&f32_type, out.as_mut_ptr().cast::<c_void>())],
                    3,
                )
                .unwrap();
            assert_eq!(frame.num_inputs(), 2);
            frame.invoke(&runtime, &callable).unwrap();
        }

        assert_eq!(out, [7.0, 13.0, 21.0]);
        assert_eq!(marshaller.staged(), (0, 0));
    }

    #[test]
    fn test_record_invoke() {
        let runtime = ScriptRuntime::new().unwrap();
        let callable = function(
            &runtime,
            r#"
            local ffi = require("ffi")
            return function(args)
                local out = ffi.cast("float*", args.outputBuffers[0])
                for i = 0, args.elems - 1 do
                    out[i] = args.numInputs * 10 + args.numOutputs
                end
            end
            "#,
        );

        let mut out = [0.0f32; 2];
        let f32_type = DType::float32();
        let mut marshaller = BufferMarshaller::new(float_ports(0, 1));
        marshaller.set_convention(CallingConvention::Record);

        let mut frame = marshaller
            .marshal([], [(&f32_type, out.as_mut_ptr().cast::<c_void>())], 2)
            .unwrap();
        frame.invoke(&runtime, &callable).unwrap();
        drop(frame);

        assert_eq!(out, [1.0, 1.0]);
    }

    #[test]
    fn test_scratch_cleared_after_failed_call() {
        let runtime = ScriptRuntime::new().unwrap();
        let callable = function(&runtime, "return function() error('nope') end");
        let f32_type = DType::float32();
        let input = [0.0f32];
        let mut marshaller = BufferMarshaller::new(float_ports(1, 0));

        let result = marshaller
            .marshal([(&f32_type, input.as_ptr().cast::<c_void>())], [], 1)
            .and_then(|mut frame| frame.invoke(&runtime, &callable));

        assert!(matches!(result, Err(BlockError::ScriptExecution(m)) if m.contains("nope")));
        assert_eq!(marshaller.staged(), (0, 0));
    }
}
