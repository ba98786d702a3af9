// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Bridge Rust and Python string types.

use {
    crate::{
        error::{Error, Result},
        symbols::PythonApi,
    },
    libc::{c_void, size_t, wchar_t},
    std::{
        ffi::{CString, OsStr},
        ptr::null_mut,
    },
};

#[cfg(target_family = "unix")]
use std::os::unix::ffi::OsStrExt;

/// A `wchar_t*` allocated by `Py_DecodeLocale()`.
///
/// Pre-initialization setters like `Py_SetPythonHome()` store the pointer
/// rather than copying it, so instances must outlive the interpreter.
#[derive(Debug)]
pub(crate) struct OwnedPyStr {
    data: *mut wchar_t,
    free: unsafe extern "C" fn(*mut c_void),
}

// The buffer is exclusively owned and only handed to the interpreter, whose
// access is serialized by the gate.
unsafe impl Send for OwnedPyStr {}

impl OwnedPyStr {
    pub(crate) fn as_wchar_ptr(&self) -> *const wchar_t {
        self.data
    }

    /// Decode a host OS string with the locale encoding.
    ///
    /// Returns `Ok(None)` if the library does not export the decoding
    /// functions.
    pub(crate) fn from_os_str(api: &PythonApi, s: &OsStr) -> Result<Option<Self>> {
        let (decode, free) = match (api.py_decode_locale, api.py_mem_raw_free) {
            (Some(decode), Some(free)) => (decode, free),
            _ => return Ok(None),
        };

        // Py_DecodeLocale() needs a trailing NULL.
        let cs = os_str_to_cstring(s)?;

        let size: *mut size_t = null_mut();
        let data = unsafe { decode(cs.as_ptr(), size) };

        if data.is_null() {
            Err(Error::ObjectCreation("wide string"))
        } else {
            Ok(Some(Self { data, free }))
        }
    }
}

impl Drop for OwnedPyStr {
    fn drop(&mut self) {
        unsafe { (self.free)(self.data as *mut c_void) }
    }
}

#[cfg(target_family = "unix")]
fn os_str_to_cstring(s: &OsStr) -> Result<CString> {
    CString::new(s.as_bytes()).map_err(|_| Error::NulByte {
        what: format!("path {:?}", s),
    })
}

#[cfg(not(target_family = "unix"))]
fn os_str_to_cstring(s: &OsStr) -> Result<CString> {
    CString::new(s.to_string_lossy().as_bytes()).map_err(|_| Error::NulByte {
        what: format!("path {:?}", s),
    })
}

/// Convert source code to a C string for the `PyRun_*` APIs.
pub(crate) fn source_to_cstring(code: &str) -> Result<CString> {
    CString::new(code).map_err(|_| Error::NulByte {
        what: "source code".to_string(),
    })
}

/// Render a host string as a Python `str` literal.
///
/// Used when generating Python source that embeds host data such as file
/// system paths.
pub(crate) fn python_str_literal(s: &str) -> String {
    let mut res = String::with_capacity(s.len() + 2);
    res.push('\'');

    for c in s.chars() {
        match c {
            '\\' => res.push_str("\\\\"),
            '\'' => res.push_str("\\'"),
            '\n' => res.push_str("\\n"),
            '\r' => res.push_str("\\r"),
            '\t' => res.push_str("\\t"),
            '\0' => res.push_str("\\x00"),
            c => res.push(c),
        }
    }

    res.push('\'');
    res
}
