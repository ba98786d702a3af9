// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Tests driving a live interpreter.
//!
//! CPython can only be initialized once per process, so every test here runs
//! in a forked process via `rusty_fork_test!`.

use {
    crate::{validate_library_path, DynamicPythonInterpreter},
    once_cell::sync::Lazy,
    std::{path::PathBuf, process::Command},
};

mod concurrency;
mod conversion;

/// Environment variable pointing at the `libpython` to test against.
pub const LIBPYTHON_ENV: &str = "PYEMBED_DYNAMIC_LIBPYTHON";

const PYTHON: &str = if cfg!(windows) { "python" } else { "python3" };

/// Path to a shared `libpython`, if one could be found.
pub static LIBPYTHON: Lazy<Option<PathBuf>> = Lazy::new(find_libpython);

fn find_libpython() -> Option<PathBuf> {
    if let Some(path) = std::env::var_os(LIBPYTHON_ENV) {
        return Some(PathBuf::from(path));
    }

    let output = Command::new(PYTHON)
        .args([
            "-c",
            "import sysconfig; v = sysconfig.get_config_var; \
             print(v('LIBDIR') or ''); print(v('LDLIBRARY') or ''); print(v('INSTSONAME') or '')",
        ])
        .output()
        .ok()?;

    if !output.status.success() {
        return None;
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let mut lines = stdout.lines();
    let libdir = PathBuf::from(lines.next()?.trim());

    // LDLIBRARY may name a static library on builds without --enable-shared.
    lines
        .map(|name| libdir.join(name.trim()))
        .find(|path| validate_library_path(path).is_ok())
}

/// Construct an interpreter handle, or `None` if no `libpython` is available.
pub fn new_interpreter() -> Option<DynamicPythonInterpreter> {
    match LIBPYTHON.as_ref() {
        Some(path) => Some(DynamicPythonInterpreter::new(path).unwrap()),
        None => {
            eprintln!(
                "skipping: no shared libpython found; set {} to run this test",
                LIBPYTHON_ENV
            );
            None
        }
    }
}

/// Construct and start an interpreter handle.
pub fn started_interpreter() -> Option<DynamicPythonInterpreter> {
    let interp = new_interpreter()?;
    interp.start().unwrap();
    Some(interp)
}

/// The Python executable `LIBPYTHON` was discovered from.
///
/// `None` if the library was given through the environment, in which case
/// the executable on `PATH` may belong to another installation.
pub fn matching_python() -> Option<&'static str> {
    if std::env::var_os(LIBPYTHON_ENV).is_some() {
        None
    } else {
        Some(PYTHON)
    }
}

/// Evaluate a Python expression with `matching_python()` and return its
/// printed value.
pub fn python_eval(expression: &str) -> Option<String> {
    let output = Command::new(matching_python()?)
        .args(["-c", &format!("print({})", expression)])
        .output()
        .ok()?;

    if output.status.success() {
        Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
    } else {
        None
    }
}
