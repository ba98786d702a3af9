// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error types and translation of Python exceptions into them.

use {
    crate::{gate::Python, interpreter::InterpreterState, object::PyRef},
    std::{
        fmt::{Display, Formatter},
        path::PathBuf,
        ptr::null_mut,
    },
    thiserror::Error,
};

/// A Python exception captured from the interpreter.
///
/// The traceback is not preserved.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PythonException {
    /// Name of the exception class, e.g. `ZeroDivisionError`.
    pub type_name: Option<String>,
    /// `str()` of the exception value.
    pub message: String,
}

impl PythonException {
    fn unknown() -> Self {
        Self {
            type_name: None,
            message: "unknown Python error".to_string(),
        }
    }
}

impl Display for PythonException {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.type_name {
            Some(type_name) if self.message.is_empty() => type_name.fmt(f),
            Some(type_name) => write!(f, "{}: {}", type_name, self.message),
            None => self.message.fmt(f),
        }
    }
}

impl std::error::Error for PythonException {}

/// Error type for this crate.
#[derive(Debug, Error)]
pub enum Error {
    #[error("library path cannot be empty")]
    EmptyLibraryPath,

    #[error("library file does not exist: {0}")]
    LibraryNotFound(PathBuf),

    #[error("library file should have a {expected} extension on {os}: {path}")]
    InvalidLibraryExtension {
        path: PathBuf,
        expected: &'static str,
        os: &'static str,
    },

    #[error("failed to load libpython from {path}: {source}")]
    LibraryLoad {
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },

    #[error("required symbol {symbol} not found in Python library: {source}")]
    MissingSymbol {
        symbol: &'static str,
        #[source]
        source: libloading::Error,
    },

    #[error("another Python interpreter handle is live in this process")]
    HandleAlreadyLive,

    #[error("cannot {operation}: interpreter is {state}")]
    InvalidState {
        operation: &'static str,
        state: InterpreterState,
    },

    #[error("a Python interpreter is already initialized in this process")]
    AlreadyInitialized,

    #[error("Python interpreter initialization failed")]
    InitializationFailed,

    #[error("Python interpreter cannot be re-initialized after finalization")]
    ReinitializationUnsupported,

    #[error("Python interpreter finalization failed with code: {0}")]
    FinalizationFailed(i32),

    #[error("failed to spawn interpreter thread: {0}")]
    OwnerThreadSpawn(#[source] std::io::Error),

    #[error("interpreter thread exited without finalizing")]
    OwnerThreadFailed,

    #[error("interpreter lock poisoned by a panicking thread")]
    GatePoisoned,

    #[error("unsupported host type: {0}")]
    UnsupportedHostType(&'static str),

    #[error("unsupported Python type: {0}")]
    UnsupportedPythonType(String),

    #[error("failed to create Python {0}")]
    ObjectCreation(&'static str),

    #[error("{what} contains a NUL byte")]
    NulByte { what: String },

    #[error("Python integer out of 64-bit range: {0}")]
    IntegerOutOfRange(PythonException),

    #[error("value nesting exceeds {0} levels")]
    NestingTooDeep(usize),

    #[error("failed to convert list item {index}: {source}")]
    ListItem {
        index: usize,
        #[source]
        source: Box<Error>,
    },

    #[error("failed to convert dict value for key '{key}': {source}")]
    DictValue {
        key: String,
        #[source]
        source: Box<Error>,
    },

    #[error("failed to convert argument {index}: {source}")]
    Argument {
        index: usize,
        #[source]
        source: Box<Error>,
    },

    #[error("Python error: {0}")]
    Python(PythonException),

    #[error("failed to import module '{module}': {source}")]
    ImportFailed {
        module: String,
        #[source]
        source: PythonException,
    },

    #[error("attribute '{attribute}' not found in module '{module}': {source}")]
    AttributeNotFound {
        module: String,
        attribute: String,
        #[source]
        source: PythonException,
    },

    #[error("error calling '{module}.{attribute}': {source}")]
    CallFailed {
        module: String,
        attribute: String,
        #[source]
        source: PythonException,
    },

    #[error("call to '{module}.{attribute}' returned no value")]
    NoReturnValue { module: String, attribute: String },

    #[error("result type mismatch: expected {expected}, got {actual}")]
    ResultTypeMismatch {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("source code cannot be empty")]
    EmptySource,

    #[error("file does not exist: {0}")]
    FileNotFound(PathBuf),

    #[error("failed to read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("virtual environment path cannot be empty")]
    VenvPathEmpty,

    #[error("virtual environment does not exist: {0}")]
    VenvNotFound(PathBuf),

    #[error("invalid virtual environment: missing {0}")]
    VenvMissingLibDir(PathBuf),

    #[error("could not find site-packages directory in virtual environment: {0}")]
    VenvSitePackagesNotFound(PathBuf),

    #[cfg(feature = "serialization")]
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[cfg(feature = "serialization")]
    #[error("float {0} cannot be represented in JSON")]
    NonFiniteFloat(f64),
}

/// Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Fetch and clear the pending Python exception.
///
/// If no exception is pending, a generic "unknown" exception is returned: some
/// entry points signal failure via return code without setting one. The
/// interpreter's error indicator is always clear when this returns.
pub(crate) fn fetch_error(py: Python<'_>) -> PythonException {
    let api = py.api();

    if unsafe { (api.py_err_occurred)() }.is_null() {
        return PythonException::unknown();
    }

    let mut ptype = null_mut();
    let mut pvalue = null_mut();
    let mut ptraceback = null_mut();
    unsafe { (api.py_err_fetch)(&mut ptype, &mut pvalue, &mut ptraceback) };

    // Released on every path below.
    let ptype = unsafe { PyRef::from_owned_ptr(py, ptype) };
    let pvalue = unsafe { PyRef::from_owned_ptr(py, pvalue) };
    let _ptraceback = unsafe { PyRef::from_owned_ptr(py, ptraceback) };

    let type_name = ptype
        .as_ref()
        .and_then(|t| py.getattr(t.borrow(), c"__name__"))
        .and_then(|name| py.str_to_string(name.borrow()));

    let message = match pvalue {
        Some(value) => py
            .str_of(value.borrow())
            .unwrap_or_else(|| "Python error occurred but failed to get error string".to_string()),
        None => String::new(),
    };

    // Anything raised while formatting must not leak into a later call.
    unsafe { (api.py_err_clear)() };

    PythonException { type_name, message }
}

/// Fetch the pending exception if any, returning `None` if none is set.
pub(crate) fn take_pending(py: Python<'_>) -> Option<PythonException> {
    if unsafe { (py.api().py_err_occurred)() }.is_null() {
        None
    } else {
        Some(fetch_error(py))
    }
}
