// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Serialization of interpreter access across host threads.

Every operation that touches the interpreter runs inside [`Gate::enter()`]:
a single host mutex held for the whole operation. Operations from different
threads are therefore totally ordered and never interleave inside the
interpreter.

Inside the gate, the calling thread additionally acquires the GIL through
`PyGILState_Ensure()` ([`GilGuard`]). Rust threads are OS threads and never
migrate, so the per-thread state bookkeeping of that API holds. The mutex is
the serialization mechanism; the GIL acquisition only gives the calling
thread a valid thread state, which CPython 3.12+ requires.

Interpreter-side code must not call back into the host handle while an
operation is running: the mutex is not re-entrant and this would deadlock.
*/

use {
    crate::{
        error::{Error, Result},
        symbols::{PyGilStateState, PythonApi},
    },
    std::sync::{Mutex, MutexGuard},
};

/// Marker that the GIL is held by the current thread.
///
/// Functions operating on Python objects take this token. It can only be
/// obtained from a [`GilGuard`] or from code that just initialized the
/// interpreter.
#[derive(Clone, Copy)]
pub(crate) struct Python<'py> {
    api: &'py PythonApi,
}

impl<'py> Python<'py> {
    /// Obtain a token without acquiring the GIL.
    ///
    /// The caller must hold the GIL for the lifetime of the token.
    pub(crate) unsafe fn assume_gil_acquired(api: &'py PythonApi) -> Self {
        Self { api }
    }

    pub(crate) fn api(self) -> &'py PythonApi {
        self.api
    }
}

/// Holds the GIL via `PyGILState_Ensure()` until dropped.
pub(crate) struct GilGuard<'a> {
    api: &'a PythonApi,
    state: PyGilStateState,
}

impl<'a> GilGuard<'a> {
    /// Acquire the GIL. The interpreter must be initialized.
    pub(crate) fn acquire(api: &'a PythonApi) -> Self {
        let state = unsafe { (api.py_gil_state_ensure)() };

        Self { api, state }
    }

    pub(crate) fn python(&self) -> Python<'_> {
        unsafe { Python::assume_gil_acquired(self.api) }
    }
}

impl<'a> Drop for GilGuard<'a> {
    fn drop(&mut self) {
        unsafe { (self.api.py_gil_state_release)(self.state) };
    }
}

/// The single mutual-exclusion lock guarding interpreter access.
pub(crate) struct Gate<T> {
    lock: Mutex<T>,
}

impl<T> Gate<T> {
    pub(crate) fn new(value: T) -> Self {
        Self {
            lock: Mutex::new(value),
        }
    }

    /// Block until the gate is free and enter it.
    ///
    /// The gate is released when the returned guard is dropped.
    pub(crate) fn enter(&self) -> Result<MutexGuard<'_, T>> {
        self.lock.lock().map_err(|_| Error::GatePoisoned)
    }
}
