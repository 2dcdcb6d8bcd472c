//! In-memory host buffers.
//!
//! [`InputBuffer`] and [`OutputBuffer`] are the simplest possible host side of
//! the port interface: a linear, 8-byte aligned allocation with a single
//! cursor. The runner, the CLI and the tests use them; a real engine plugs its
//! own ring buffers in through [`InputPort`]/[`OutputPort`].

use crate::pipeline::port::{DType, InputPort, OutputPort};
use std::ffi::c_void;

/// Aligned byte storage. Backed by `u64` words so every supported element
/// type is naturally aligned.
#[derive(Debug, Clone, Default)]
struct AlignedBytes {
    words: Vec<u64>,
    len: usize,
}

impl AlignedBytes {
    fn zeroed(len: usize) -> Self {
        Self {
            words: vec![0; len.div_ceil(8)],
            len,
        }
    }

    fn as_bytes(&self) -> &[u8] {
        // SAFETY: `words` holds at least `len` initialized bytes and u8 has
        // no alignment requirement.
        unsafe { std::slice::from_raw_parts(self.words.as_ptr().cast::<u8>(), self.len) }
    }

    fn as_bytes_mut(&mut self) -> &mut [u8] {
        // SAFETY: as above, and we hold the unique borrow of `words`.
        unsafe { std::slice::from_raw_parts_mut(self.words.as_mut_ptr().cast::<u8>(), self.len) }
    }

    fn extend_from_slice(&mut self, bytes: &[u8]) {
        let start = self.len;
        let new_len = start + bytes.len();
        self.words.resize(new_len.div_ceil(8), 0);
        self.len = new_len;
        self.as_bytes_mut()[start..].copy_from_slice(bytes);
    }

    fn base_ptr(&self) -> *const u8 {
        self.words.as_ptr().cast()
    }

    fn base_mut_ptr(&mut self) -> *mut u8 {
        self.words.as_mut_ptr().cast()
    }
}

/// Readable host buffer holding queued elements.
#[derive(Debug, Clone)]
pub struct InputBuffer {
    dtype: DType,
    storage: AlignedBytes,
    /// Read cursor in elements.
    read: usize,
}

impl InputBuffer {
    /// Create an empty buffer.
    pub fn new(dtype: DType) -> Self {
        Self {
            dtype,
            storage: AlignedBytes::default(),
            read: 0,
        }
    }

    /// Create a buffer holding `bytes`. Trailing bytes that do not form a
    /// whole element are kept but never exposed.
    pub fn from_bytes(dtype: DType, bytes: &[u8]) -> Self {
        let mut buffer = Self::new(dtype);
        buffer.push_bytes(bytes);
        buffer
    }

    /// Create a `float32` buffer from samples.
    pub fn from_f32(samples: &[f32]) -> Self {
        let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_ne_bytes()).collect();
        Self::from_bytes(DType::float32(), &bytes)
    }

    /// Queue more raw bytes behind the existing ones.
    pub fn push_bytes(&mut self, bytes: &[u8]) {
        self.storage.extend_from_slice(bytes);
    }

    /// Queue more `float32` samples.
    pub fn push_f32(&mut self, samples: &[f32]) {
        let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_ne_bytes()).collect();
        self.push_bytes(&bytes);
    }

    /// Total whole elements ever queued.
    pub fn total_elements(&self) -> usize {
        self.storage.len / self.dtype.size()
    }

    /// Elements consumed so far.
    pub fn consumed(&self) -> usize {
        self.read
    }
}

impl InputPort for InputBuffer {
    fn dtype(&self) -> &DType {
        &self.dtype
    }

    fn elements(&self) -> usize {
        self.total_elements() - self.read
    }

    fn as_ptr(&self) -> *const c_void {
        self.storage
            .base_ptr()
            .wrapping_add(self.read * self.dtype.size())
            .cast()
    }

    fn consume(&mut self, elements: usize) {
        debug_assert!(elements <= self.elements());
        self.read += elements;
    }
}

/// Writable host buffer with a fixed capacity.
#[derive(Debug, Clone)]
pub struct OutputBuffer {
    dtype: DType,
    storage: AlignedBytes,
    capacity: usize,
    /// Write cursor in elements.
    written: usize,
}

impl OutputBuffer {
    /// Create a zeroed buffer with room for `capacity` elements.
    pub fn with_capacity(dtype: DType, capacity: usize) -> Self {
        let storage = AlignedBytes::zeroed(capacity * dtype.size());
        Self {
            dtype,
            storage,
            capacity,
            written: 0,
        }
    }

    /// Elements produced so far.
    pub fn produced(&self) -> usize {
        self.written
    }

    /// Bytes of every produced element.
    pub fn as_bytes(&self) -> &[u8] {
        &self.storage.as_bytes()[..self.written * self.dtype.size()]
    }

    /// Produced elements read back as `float32` samples.
    pub fn to_f32(&self) -> Vec<f32> {
        self.as_bytes()
            .chunks_exact(4)
            .map(|chunk| f32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect()
    }

    /// Take the produced bytes and reset the write cursor, keeping capacity.
    pub fn drain(&mut self) -> Vec<u8> {
        let bytes = self.as_bytes().to_vec();
        self.written = 0;
        bytes
    }
}

impl OutputPort for OutputBuffer {
    fn dtype(&self) -> &DType {
        &self.dtype
    }

    fn elements(&self) -> usize {
        self.capacity - self.written
    }

    fn as_mut_ptr(&mut self) -> *mut c_void {
        let offset = self.written * self.dtype.size();
        self.storage.base_mut_ptr().wrapping_add(offset).cast()
    }

    fn produce(&mut self, elements: usize) {
        debug_assert!(elements <= self.elements());
        self.written += elements;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_cursor() {
        let mut input = InputBuffer::from_f32(&[1.0, 2.0, 3.0]);
        assert_eq!(input.elements(), 3);

        let base = input.as_ptr() as usize;
        input.consume(2);
        assert_eq!(input.elements(), 1);
        assert_eq!(input.as_ptr() as usize, base + 8);
        assert_eq!(input.consumed(), 2);
    }

    #[test]
    fn test_input_push_grows() {
        let mut input = InputBuffer::from_f32(&[1.0]);
        input.consume(1);
        input.push_f32(&[2.0, 3.0]);
        assert_eq!(input.elements(), 2);
        assert_eq!(input.total_elements(), 3);
    }

    #[test]
    fn test_partial_trailing_element_hidden() {
        let input = InputBuffer::from_bytes(DType::parse("int32").unwrap(), &[0u8; 10]);
        assert_eq!(input.elements(), 2);
    }

    #[test]
    fn test_output_alignment() {
        let mut output = OutputBuffer::with_capacity(DType::parse("complex_float64").unwrap(), 4);
        assert_eq!(output.as_mut_ptr() as usize % 8, 0);
    }

    #[test]
    fn test_output_produce_and_drain() {
        let mut output = OutputBuffer::with_capacity(DType::parse("float32").unwrap(), 4);
        let ptr = output.as_mut_ptr().cast::<f32>();
        // SAFETY: capacity is 4 elements.
        unsafe {
            *ptr = 1.5;
            *ptr.add(1) = -2.0;
        }
        output.produce(2);

        assert_eq!(output.elements(), 2);
        assert_eq!(output.to_f32(), vec![1.5, -2.0]);
        assert_eq!(output.drain().len(), 8);
        assert_eq!(output.produced(), 0);
    }
}
