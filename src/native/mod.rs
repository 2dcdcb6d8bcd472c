//! Native library preloading.
//!
//! Block scripts reach compiled C code through `ffi.C`, which resolves names
//! against the process's global symbol table. Loading a library here with
//! global visibility (`RTLD_GLOBAL` on Unix) is what makes its exports
//! callable as `ffi.C.name` once the script has `ffi.cdef`'d them.
//!
//! Libraries are scoped resources: [`LoadedLibraries`] owns every handle of one
//! block activation and unloads them when dropped.
//!
//! # Hazards
//!
//! - The symbol table is process-wide. Two blocks loading libraries that
//!   export the same name resolve in unspecified order; nothing here arbitrates.
//! - LuaJIT caches resolved `ffi.C` symbols. A script must not call into a
//!   library after the block that loaded it was deactivated.

use crate::error::{BlockError, Result};
use libloading::Library;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

static LIVE_LIBRARIES: AtomicUsize = AtomicUsize::new(0);

/// Number of library handles currently held by all blocks in the process.
pub fn live_library_count() -> usize {
    LIVE_LIBRARIES.load(Ordering::SeqCst)
}

/// One loaded shared library.
pub struct NativeLibrary {
    path: PathBuf,
    // Dropping the handle unloads the library.
    _handle: Library,
}

impl NativeLibrary {
    /// Load `path` with its symbols visible to `ffi.C`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let handle = open_global(path).map_err(|e| BlockError::NativeLibraryLoad {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        LIVE_LIBRARIES.fetch_add(1, Ordering::SeqCst);
        tracing::debug!("Loaded native library {:?}", path);

        Ok(Self {
            path: path.to_path_buf(),
            _handle: handle,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for NativeLibrary {
    fn drop(&mut self) {
        LIVE_LIBRARIES.fetch_sub(1, Ordering::SeqCst);
        tracing::debug!("Unloading native library {:?}", self.path);
    }
}

impl std::fmt::Debug for NativeLibrary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeLibrary")
            .field("path", &self.path)
            .finish()
    }
}

#[cfg(unix)]
fn open_global(path: &Path) -> std::result::Result<Library, libloading::Error> {
    use libloading::os::unix::{Library as UnixLibrary, RTLD_GLOBAL, RTLD_NOW};

    // SAFETY: loading runs the library's initializers. Preloaded libraries
    // are supplied by the block's owner, who vouches for them.
    unsafe { UnixLibrary::open(Some(path), RTLD_NOW | RTLD_GLOBAL) }.map(Library::from)
}

#[cfg(not(unix))]
fn open_global(path: &Path) -> std::result::Result<Library, libloading::Error> {
    // SAFETY: see the Unix variant.
    unsafe { Library::new(path) }
}

/// Every library loaded for one activation of a block.
#[derive(Debug, Default)]
pub struct LoadedLibraries {
    libraries: Vec<NativeLibrary>,
}

impl LoadedLibraries {
    /// Load all `paths` in order, or none of them.
    ///
    /// If any load fails, the libraries loaded before it are unloaded before
    /// the error is returned.
    pub fn load_all<P: AsRef<Path>>(paths: &[P]) -> Result<Self> {
        let mut libraries = Vec::with_capacity(paths.len());
        for path in paths {
            match NativeLibrary::load(path) {
                Ok(library) => libraries.push(library),
                Err(e) => {
                    tracing::warn!(
                        "Rolling back {} preloaded libraries: {}",
                        libraries.len(),
                        e
                    );
                    return Err(e);
                }
            }
        }
        Ok(Self { libraries })
    }

    pub fn len(&self) -> usize {
        self.libraries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.libraries.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.libraries.iter().map(NativeLibrary::path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial(native_libraries)]
    fn test_missing_library() {
        let before = live_library_count();
        match NativeLibrary::load("/nonexistent/libmissing.so") {
            Err(BlockError::NativeLibraryLoad { path, message }) => {
                assert_eq!(path, PathBuf::from("/nonexistent/libmissing.so"));
                assert!(!message.is_empty());
            }
            other => panic!("expected NativeLibraryLoad, got {:?}", other),
        }
        assert_eq!(live_library_count(), before);
    }

    #[test]
    #[serial(native_libraries)]
    fn test_empty_set() {
        let libraries = LoadedLibraries::load_all::<&str>(&[]).unwrap();
        assert!(libraries.is_empty());
    }

    #[cfg(target_os = "linux")]
    #[test]
    #[serial(native_libraries)]
    fn test_load_and_unload_counts() {
        let before = live_library_count();
        let libraries = LoadedLibraries::load_all(&["libm.so.6", "libc.so.6"]).unwrap();
        assert_eq!(libraries.len(), 2);
        assert_eq!(live_library_count(), before + 2);
        assert_eq!(
            libraries.paths().collect::<Vec<_>>(),
            vec![Path::new("libm.so.6"), Path::new("libc.so.6")]
        );

        drop(libraries);
        assert_eq!(live_library_count(), before);
    }

    #[cfg(target_os = "linux")]
    #[test]
    #[serial(native_libraries)]
    fn test_partial_failure_rolls_back() {
        let before = live_library_count();
        let result = LoadedLibraries::load_all(&["libm.so.6", "/nonexistent/libmissing.so"]);
        assert!(matches!(result, Err(BlockError::NativeLibraryLoad { .. })));
        assert_eq!(live_library_count(), before);
    }
}
