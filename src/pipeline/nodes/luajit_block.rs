//! LuaJIT-scripted pipeline block.
//!
//! ## Lifecycle
//!
//! ```text
//! Constructed ──set_source──► SourceBound ──activate──► Active
//!                               ▲    │                    │
//!                   set_source ─┘    └◄──deactivate───────┘
//! ```
//!
//! Source, preloaded libraries and the calling convention can only change
//! while idle. `work()` only runs while active.
//!
//! ## Work
//!
//! Each `work()` call processes `min(available)` elements across every input
//! and output port. The block function reads and writes the host buffers in
//! place; cursors advance only if it returns without raising.

use crate::error::{BlockError, Result};
use crate::native::LoadedLibraries;
use crate::pipeline::node::{BlockState, ConfigValue};
use crate::pipeline::port::{DType, InputPort, OutputPort, PortSpec};
use crate::scripting::{resolve, BufferMarshaller, CallingConvention, EntryPoint, ScriptRuntime};
use std::path::PathBuf;

/// Registered calls available to hosts when setters are exposed.
const SETTER_CALLS: &[&str] = &[
    "set_source",
    "set_preloaded_libraries",
    "set_calling_convention",
];

/// A pipeline block backed by a LuaJIT function.
pub struct LuaJitBlock {
    /// Human-readable name for this block instance.
    name: String,
    runtime: ScriptRuntime,
    marshaller: BufferMarshaller,
    entry_point: Option<EntryPoint>,
    /// Paths loaded at the next activation.
    pending_libraries: Vec<PathBuf>,
    /// Libraries held for the current activation.
    loaded_libraries: Option<LoadedLibraries>,
    expose_setters: bool,
    state: BlockState,
    /// Successful block function calls.
    invocations: u64,
}

impl LuaJitBlock {
    /// Create a block with the given port type tags.
    ///
    /// When `expose_setters` is false, the setters are not reachable through
    /// [`call`](Self::call); the typed methods stay available to the code that
    /// constructed the block.
    pub fn make<S: AsRef<str>>(
        input_types: &[S],
        output_types: &[S],
        expose_setters: bool,
    ) -> Result<Self> {
        let ports = PortSpec::parse(input_types, output_types)?;
        let runtime = ScriptRuntime::new()?;

        tracing::debug!(
            "Created LuaJIT block with {} inputs, {} outputs",
            ports.inputs.len(),
            ports.outputs.len()
        );

        Ok(Self {
            name: "LuaJIT Block".to_string(),
            runtime,
            marshaller: BufferMarshaller::new(ports),
            entry_point: None,
            pending_libraries: Vec::new(),
            loaded_libraries: None,
            expose_setters,
            state: BlockState::Constructed,
            invocations: 0,
        })
    }

    /// Create a block with setters exposed.
    pub fn new<S: AsRef<str>>(input_types: &[S], output_types: &[S]) -> Result<Self> {
        Self::make(input_types, output_types, true)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn state(&self) -> BlockState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == BlockState::Active
    }

    pub fn input_types(&self) -> &[DType] {
        &self.marshaller.ports().inputs
    }

    pub fn output_types(&self) -> &[DType] {
        &self.marshaller.ports().outputs
    }

    pub fn entry_point(&self) -> Option<&EntryPoint> {
        self.entry_point.as_ref()
    }

    pub fn preloaded_libraries(&self) -> &[PathBuf] {
        &self.pending_libraries
    }

    /// Libraries currently loaded for this block.
    pub fn loaded_library_count(&self) -> usize {
        self.loaded_libraries.as_ref().map_or(0, LoadedLibraries::len)
    }

    pub fn calling_convention(&self) -> CallingConvention {
        self.marshaller.convention()
    }

    /// Number of block function calls that returned successfully.
    pub fn invocations(&self) -> u64 {
        self.invocations
    }

    fn require_idle(&self, operation: &'static str) -> Result<()> {
        if self.state.is_idle() {
            Ok(())
        } else {
            Err(BlockError::InvalidState {
                operation,
                state: self.state,
            })
        }
    }

    /// Load `source` (literal Lua or a `.lua` path) and bind `function_name`
    /// as the block function.
    ///
    /// On failure the previous binding and state are kept.
    pub fn set_source(&mut self, source: &str, function_name: &str) -> Result<()> {
        self.require_idle("set source")?;

        let entry_point = resolve(&self.runtime, source, function_name).inspect_err(|e| {
            tracing::warn!("{}: failed to bind {}: {}", self.name, function_name, e);
        })?;

        self.entry_point = Some(entry_point);
        self.state = BlockState::SourceBound;
        tracing::debug!("{}: bound function {}", self.name, function_name);
        Ok(())
    }

    /// Replace the list of native libraries loaded at activation.
    pub fn set_preloaded_libraries<P: Into<PathBuf>>(
        &mut self,
        paths: impl IntoIterator<Item = P>,
    ) -> Result<()> {
        self.require_idle("set preloaded libraries")?;
        self.pending_libraries = paths.into_iter().map(Into::into).collect();
        Ok(())
    }

    /// Select the argument layout the block function expects.
    pub fn set_calling_convention(&mut self, convention: CallingConvention) -> Result<()> {
        self.require_idle("set calling convention")?;
        self.marshaller.set_convention(convention);
        Ok(())
    }

    /// Load the preloaded libraries and start accepting `work()`.
    ///
    /// Libraries load all-or-nothing: if one fails, the ones already loaded
    /// are unloaded and the block stays idle.
    pub fn activate(&mut self) -> Result<()> {
        match self.state {
            BlockState::Constructed => return Err(BlockError::NoFunctionBound),
            BlockState::Active => {
                return Err(BlockError::InvalidState {
                    operation: "activate",
                    state: self.state,
                })
            }
            BlockState::SourceBound => {}
        }

        let libraries = LoadedLibraries::load_all(&self.pending_libraries)?;
        tracing::debug!(
            "{}: activated with {} preloaded libraries",
            self.name,
            libraries.len()
        );

        self.loaded_libraries = Some(libraries);
        self.state = BlockState::Active;
        Ok(())
    }

    /// Stop accepting `work()` and unload every preloaded library.
    pub fn deactivate(&mut self) -> Result<()> {
        if self.state != BlockState::Active {
            return Err(BlockError::InvalidState {
                operation: "deactivate",
                state: self.state,
            });
        }

        let unloaded = self.loaded_library_count();
        self.loaded_libraries = None;
        self.state = BlockState::SourceBound;
        tracing::debug!("{}: deactivated, unloaded {} libraries", self.name, unloaded);
        Ok(())
    }

    /// Run the block function over every element available on all ports.
    ///
    /// Returns the number of elements consumed from each input and produced
    /// on each output. Zero available elements is not an error: the function
    /// is not called and `Ok(0)` is returned.
    pub fn work<I, O>(&mut self, inputs: &mut [I], outputs: &mut [O]) -> Result<usize>
    where
        I: InputPort,
        O: OutputPort,
    {
        let Some(entry_point) = self.entry_point.as_ref() else {
            return Err(BlockError::NoFunctionBound);
        };
        if self.state != BlockState::Active {
            return Err(BlockError::InvalidState {
                operation: "work",
                state: self.state,
            });
        }

        let elements = inputs
            .iter()
            .map(InputPort::elements)
            .chain(outputs.iter().map(OutputPort::elements))
            .min()
            .unwrap_or(0);
        if elements == 0 {
            return Ok(0);
        }

        let mut frame = self.marshaller.marshal(
            inputs.iter().map(|port| (port.dtype(), port.as_ptr())),
            outputs.iter_mut().map(|port| {
                let ptr = port.as_mut_ptr();
                (port.dtype(), ptr)
            }),
            elements,
        )?;
        let result = frame.invoke(&self.runtime, entry_point.callable());
        drop(frame);

        if let Err(e) = result {
            tracing::warn!("{}: {} failed: {}", self.name, entry_point.function_name(), e);
            return Err(e);
        }

        for input in inputs.iter_mut() {
            input.consume(elements);
        }
        for output in outputs.iter_mut() {
            output.produce(elements);
        }

        self.invocations += 1;
        tracing::trace!("{}: processed {} elements", self.name, elements);
        Ok(elements)
    }

    /// Names accepted by [`call`](Self::call).
    pub fn registered_calls(&self) -> &'static [&'static str] {
        if self.expose_setters {
            SETTER_CALLS
        } else {
            &[]
        }
    }

    /// Dispatch a registered call by name.
    ///
    /// - `set_source(source: String, function: String)`
    /// - `set_preloaded_libraries(paths: List)`
    /// - `set_calling_convention(convention: String)`
    pub fn call(&mut self, name: &str, args: &[ConfigValue]) -> Result<()> {
        if !self.registered_calls().contains(&name) {
            return Err(BlockError::UnknownCall(name.to_string()));
        }

        match (name, args) {
            ("set_source", [ConfigValue::String(source), ConfigValue::String(function)]) => {
                self.set_source(source, function)
            }
            ("set_preloaded_libraries", [ConfigValue::List(paths)]) => {
                self.set_preloaded_libraries(paths.iter().map(PathBuf::from))
            }
            ("set_calling_convention", [ConfigValue::String(convention)]) => {
                self.set_calling_convention(convention.parse()?)
            }
            _ => Err(BlockError::InvalidArgument(format!(
                "{}({})",
                name,
                args.iter().map(ConfigValue::kind).collect::<Vec<_>>().join(", ")
            ))),
        }
    }
}

impl Drop for LuaJitBlock {
    fn drop(&mut self) {
        if self.loaded_library_count() > 0 {
            tracing::debug!(
                "{}: dropped while active, unloading {} libraries",
                self.name,
                self.loaded_library_count()
            );
        }
    }
}

impl std::fmt::Debug for LuaJitBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LuaJitBlock")
            .field("name", &self.name)
            .field("state", &self.state)
            .field("entry_point", &self.entry_point)
            .field("input_types", &self.input_types())
            .field("output_types", &self.output_types())
            .field("pending_libraries", &self.pending_libraries)
            .field("invocations", &self.invocations)
            .finish()
    }
}
