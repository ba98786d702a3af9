// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Platform-specific handling of the `libpython` shared library.

use {
    crate::error::{Error, Result},
    libloading::Library,
    std::path::Path,
};

#[cfg(target_os = "macos")]
const LIBRARY_EXTENSION: &str = ".dylib";

#[cfg(target_family = "windows")]
const LIBRARY_EXTENSION: &str = ".dll";

#[cfg(not(any(target_os = "macos", target_family = "windows")))]
const LIBRARY_EXTENSION: &str = ".so";

/// Validate that a path plausibly refers to a `libpython` shared library.
///
/// The file must exist and its name must contain the platform's shared
/// library extension. Versioned names like `libpython3.11.so.1.0` are
/// accepted.
pub fn validate_library_path(path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();

    if path.as_os_str().is_empty() {
        return Err(Error::EmptyLibraryPath);
    }

    if !path.exists() {
        return Err(Error::LibraryNotFound(path.to_path_buf()));
    }

    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    if !file_name.contains(LIBRARY_EXTENSION) {
        return Err(Error::InvalidLibraryExtension {
            path: path.to_path_buf(),
            expected: LIBRARY_EXTENSION,
            os: std::env::consts::OS,
        });
    }

    Ok(())
}

/// Open the shared library.
///
/// On UNIX the library is opened with `RTLD_GLOBAL`. Extension modules in
/// the standard library (`math`, `_socket`, ...) do not link against
/// `libpython` and expect its symbols to be globally visible.
#[cfg(target_family = "unix")]
pub(crate) fn load_library(path: &Path) -> Result<Library> {
    use libloading::os::unix::{Library as UnixLibrary, RTLD_GLOBAL, RTLD_NOW};

    let library = unsafe { UnixLibrary::open(Some(path), RTLD_NOW | RTLD_GLOBAL) }.map_err(
        |source| Error::LibraryLoad {
            path: path.to_path_buf(),
            source,
        },
    )?;

    log::debug!("loaded Python library from {}", path.display());

    Ok(library.into())
}

#[cfg(target_family = "windows")]
pub(crate) fn load_library(path: &Path) -> Result<Library> {
    let library = unsafe { Library::new(path) }.map_err(|source| Error::LibraryLoad {
        path: path.to_path_buf(),
        source,
    })?;

    log::debug!("loaded Python library from {}", path.display());

    Ok(library)
}
