//! Block runner: drives one block over in-memory buffers until its inputs are
//! exhausted.
//!
//! This is not a scheduler. A host engine calls `work()` itself; the runner
//! covers the CLI and tests, where a whole stream is already in memory.

use crate::error::Result;
use crate::pipeline::nodes::LuaJitBlock;
use crate::pipeline::port::{InputPort, OutputPort};
use std::time::{Duration, Instant};

/// Outcome of a completed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    /// `work()` calls that processed at least one element.
    pub calls: u64,
    /// Elements consumed from each input (and produced on each output).
    pub elements: usize,
    pub elapsed: Duration,
}

/// Runs a block to completion.
pub struct BlockRunner<'b> {
    block: &'b mut LuaJitBlock,
    /// Upper bound on elements per `work()` call, if any.
    chunk_size: Option<usize>,
}

impl<'b> BlockRunner<'b> {
    pub fn new(block: &'b mut LuaJitBlock) -> Self {
        Self {
            block,
            chunk_size: None,
        }
    }

    /// Limit each call to `chunk_size` elements by capping the output space
    /// offered to the block.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = Some(chunk_size.max(1));
        self
    }

    /// Activate, call `work()` until it returns 0, then deactivate.
    ///
    /// The block is deactivated on every exit path, including a failed call.
    pub fn run_to_completion<I, O>(self, inputs: &mut [I], outputs: &mut [O]) -> Result<RunSummary>
    where
        I: InputPort,
        O: OutputPort,
    {
        let start = Instant::now();
        self.block.activate()?;

        let result = match self.chunk_size {
            Some(chunk_size) => {
                let mut capped: Vec<Capped<'_, O>> = outputs
                    .iter_mut()
                    .map(|port| Capped {
                        inner: port,
                        limit: chunk_size,
                    })
                    .collect();
                drive(self.block, inputs, capped.as_mut_slice())
            }
            None => drive(self.block, inputs, outputs),
        };

        if let Err(e) = self.block.deactivate() {
            tracing::warn!("{}: deactivate after run failed: {}", self.block.name(), e);
        }

        let (calls, elements) = result?;
        let summary = RunSummary {
            calls,
            elements,
            elapsed: start.elapsed(),
        };
        tracing::info!(
            "{}: processed {} elements in {} calls ({:?})",
            self.block.name(),
            summary.elements,
            summary.calls,
            summary.elapsed
        );
        Ok(summary)
    }
}

fn drive<I, O>(block: &mut LuaJitBlock, inputs: &mut [I], outputs: &mut [O]) -> Result<(u64, usize)>
where
    I: InputPort,
    O: OutputPort,
{
    let mut calls = 0;
    let mut elements = 0;
    loop {
        let processed = block.work(inputs, outputs)?;
        if processed == 0 {
            return Ok((calls, elements));
        }
        calls += 1;
        elements += processed;
    }
}

/// Output port wrapper offering at most `limit` elements per call.
struct Capped<'p, O> {
    inner: &'p mut O,
    limit: usize,
}

impl<O: OutputPort> OutputPort for Capped<'_, O> {
    fn dtype(&self) -> &crate::pipeline::port::DType {
        self.inner.dtype()
    }

    fn elements(&self) -> usize {
        self.inner.elements().min(self.limit)
    }

    fn as_mut_ptr(&mut self) -> *mut std::ffi::c_void {
        self.inner.as_mut_ptr()
    }

    fn produce(&mut self, elements: usize) {
        self.inner.produce(elements)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BlockError;
    use crate::pipeline::buffer::{InputBuffer, OutputBuffer};
    use crate::pipeline::node::BlockState;
    use crate::pipeline::port::DType;

    const SOURCE: &str = r#"
local ffi = require("ffi")
local M = {}
function M.negate(inputs, num_inputs, outputs, num_outputs, elems)
    local src = ffi.cast("const float*", inputs[0])
    local dst = ffi.cast("float*", outputs[0])
    for i = 0, elems - 1 do
        dst[i] = -src[i]
    end
end
function M.boom(inputs, num_inputs, outputs, num_outputs, elems)
    error("boom")
end
return M
"#;

    fn block(function: &str) -> LuaJitBlock {
        let mut block = LuaJitBlock::new(&["float32"], &["float32"]).unwrap();
        block.set_source(SOURCE, function).unwrap();
        block
    }

    #[test]
    fn test_run_single_call() {
        let mut block = block("negate");
        let mut inputs = [InputBuffer::from_f32(&[1.0, 2.0, 3.0])];
        let mut outputs = [OutputBuffer::with_capacity(DType::float32(), 3)];

        let summary = BlockRunner::new(&mut block)
            .run_to_completion(&mut inputs, &mut outputs)
            .unwrap();

        assert_eq!(summary.calls, 1);
        assert_eq!(summary.elements, 3);
        assert_eq!(outputs[0].to_f32(), vec![-1.0, -2.0, -3.0]);
        assert_eq!(block.state(), BlockState::SourceBound);
    }

    #[test]
    fn test_run_in_chunks() {
        let mut block = block("negate");
        let samples: Vec<f32> = (0..10).map(|i| i as f32).collect();
        let mut inputs = [InputBuffer::from_f32(&samples)];
        let mut outputs = [OutputBuffer::with_capacity(DType::float32(), 10)];

        let summary = BlockRunner::new(&mut block)
            .with_chunk_size(4)
            .run_to_completion(&mut inputs, &mut outputs)
            .unwrap();

        assert_eq!(summary.calls, 3);
        assert_eq!(summary.elements, 10);
        assert_eq!(block.invocations(), 3);
        assert_eq!(
            outputs[0].to_f32(),
            samples.iter().map(|x| -x).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_failed_run_deactivates() {
        let mut block = block("boom");
        let mut inputs = [InputBuffer::from_f32(&[1.0])];
        let mut outputs = [OutputBuffer::with_capacity(DType::float32(), 1)];

        let result = BlockRunner::new(&mut block).run_to_completion(&mut inputs, &mut outputs);
        assert!(matches!(result, Err(BlockError::ScriptExecution(_))));
        assert_eq!(block.state(), BlockState::SourceBound);
        assert_eq!(inputs[0].consumed(), 0);
    }

    #[test]
    fn test_run_unbound_block() {
        let mut block = LuaJitBlock::new(&["float32"], &["float32"]).unwrap();
        let mut inputs = [InputBuffer::from_f32(&[1.0])];
        let mut outputs = [OutputBuffer::with_capacity(DType::float32(), 1)];

        assert!(matches!(
            BlockRunner::new(&mut block).run_to_completion(&mut inputs, &mut outputs),
            Err(BlockError::NoFunctionBound)
        ));
        assert_eq!(block.state(), BlockState::Constructed);
    }
}
