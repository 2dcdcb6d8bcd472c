//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

pub mod builders;

use std::path::{Path, PathBuf};
use std::process::Command;

/// Assert two floats are approximately equal
pub fn assert_float_eq(a: f64, b: f64, epsilon: f64) {
    assert!(
        (a - b).abs() < epsilon,
        "Expected {} to be approximately equal to {} (epsilon: {})",
        a,
        b,
        epsilon
    );
}

/// Write a script file into `dir` and return its path
pub fn write_script(dir: &Path, name: &str, source: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, source).expect("failed to write script");
    path
}

/// Set to turn a missing or failing C compiler into a test failure.
pub const REQUIRE_CC_ENV: &str = "LUAJIT_BLOCK_REQUIRE_CC";

/// Compile C source into a shared library in `dir` with the system `cc`.
///
/// Returns `None` when the library cannot be built so callers can skip; the
/// reason is printed to stderr. Panics instead when `REQUIRE_CC_ENV` is set.
pub fn compile_shared_library(dir: &Path, name: &str, source: &str) -> Option<PathBuf> {
    let source_path = dir.join(format!("{}.c", name));
    let library_path = dir.join(format!("lib{}.so", name));
    std::fs::write(&source_path, source).expect("failed to write C source");

    let reason = match Command::new("cc")
        .args(["-shared", "-fPIC", "-O2", "-o"])
        .arg(&library_path)
        .arg(&source_path)
        .status()
    {
        Ok(status) if status.success() => return Some(library_path),
        Ok(status) => format!("cc exited with {} for {}", status, name),
        Err(e) => format!("no C compiler available ({})", e),
    };

    if std::env::var_os(REQUIRE_CC_ENV).is_some() {
        panic!("{}; {} is set", reason, REQUIRE_CC_ENV);
    }
    eprintln!("SKIPPED: {}", reason);
    None
}

/// Native-endian bytes of float32 samples
pub fn f32_bytes(samples: &[f32]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_ne_bytes()).collect()
}
