// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Resolution of CPython C API entry points from a loaded library.

use {
    crate::error::{Error, Result},
    libc::{c_char, c_double, c_int, c_long, c_longlong, c_void, size_t, wchar_t},
    libloading::Library,
};

/// Opaque CPython object.
#[repr(C)]
pub(crate) struct PyObject {
    _private: [u8; 0],
}

pub(crate) type PySsizeT = isize;

/// `PyGILState_STATE`.
pub(crate) type PyGilStateState = c_int;

/// `Py_file_input` from `compile.h`.
pub(crate) const PY_FILE_INPUT: c_int = 257;

type ObjectFn = unsafe extern "C" fn(*mut PyObject) -> *mut PyObject;

/// The CPython C API functions this crate calls.
///
/// Fields are grouped by the object protocol they belong to. Entry points
/// that not every supported CPython release exports are `Option`s and must
/// be checked at each call site.
#[derive(Clone, Copy)]
pub(crate) struct PythonApi {
    // Interpreter lifecycle.
    pub py_initialize_ex: unsafe extern "C" fn(c_int),
    pub py_finalize_ex: unsafe extern "C" fn() -> c_int,
    pub py_is_initialized: unsafe extern "C" fn() -> c_int,

    // Thread state.
    pub py_eval_save_thread: unsafe extern "C" fn() -> *mut c_void,
    pub py_eval_restore_thread: unsafe extern "C" fn(*mut c_void),
    pub py_gil_state_ensure: unsafe extern "C" fn() -> PyGilStateState,
    pub py_gil_state_release: unsafe extern "C" fn(PyGilStateState),

    // Code execution.
    pub py_run_string_flags: unsafe extern "C" fn(
        *const c_char,
        c_int,
        *mut PyObject,
        *mut PyObject,
        *mut c_void,
    ) -> *mut PyObject,
    pub py_import_add_module: unsafe extern "C" fn(*const c_char) -> *mut PyObject,
    pub py_module_get_dict: ObjectFn,
    pub py_import_import_module: unsafe extern "C" fn(*const c_char) -> *mut PyObject,

    // Generic object protocol.
    pub py_object_get_attr_string:
        unsafe extern "C" fn(*mut PyObject, *const c_char) -> *mut PyObject,
    pub py_object_call_object: unsafe extern "C" fn(*mut PyObject, *mut PyObject) -> *mut PyObject,
    pub py_object_type: ObjectFn,
    pub py_object_str: ObjectFn,
    pub py_inc_ref: unsafe extern "C" fn(*mut PyObject),
    pub py_dec_ref: unsafe extern "C" fn(*mut PyObject),

    // Exceptions.
    pub py_err_occurred: unsafe extern "C" fn() -> *mut PyObject,
    pub py_err_fetch: unsafe extern "C" fn(*mut *mut PyObject, *mut *mut PyObject, *mut *mut PyObject),
    pub py_err_clear: unsafe extern "C" fn(),

    // Scalars.
    pub py_unicode_from_string_and_size:
        unsafe extern "C" fn(*const c_char, PySsizeT) -> *mut PyObject,
    pub py_unicode_as_utf8_and_size: unsafe extern "C" fn(*mut PyObject, *mut PySsizeT) -> *const c_char,
    pub py_long_from_long_long: unsafe extern "C" fn(c_longlong) -> *mut PyObject,
    pub py_long_as_long_long: unsafe extern "C" fn(*mut PyObject) -> c_longlong,
    pub py_bool_from_long: unsafe extern "C" fn(c_long) -> *mut PyObject,
    pub py_object_is_true: unsafe extern "C" fn(*mut PyObject) -> c_int,
    pub py_float_from_double: unsafe extern "C" fn(c_double) -> *mut PyObject,
    pub py_float_as_double: unsafe extern "C" fn(*mut PyObject) -> c_double,

    // Containers.
    pub py_list_new: unsafe extern "C" fn(PySsizeT) -> *mut PyObject,
    pub py_list_size: unsafe extern "C" fn(*mut PyObject) -> PySsizeT,
    pub py_list_get_item: unsafe extern "C" fn(*mut PyObject, PySsizeT) -> *mut PyObject,
    /// Steals a reference to the item, even on failure.
    pub py_list_set_item: unsafe extern "C" fn(*mut PyObject, PySsizeT, *mut PyObject) -> c_int,
    pub py_tuple_new: unsafe extern "C" fn(PySsizeT) -> *mut PyObject,
    /// Steals a reference to the item, even on failure.
    pub py_tuple_set_item: unsafe extern "C" fn(*mut PyObject, PySsizeT, *mut PyObject) -> c_int,
    pub py_dict_new: unsafe extern "C" fn() -> *mut PyObject,
    /// Does not steal: the dict takes its own reference to the value.
    pub py_dict_set_item_string:
        unsafe extern "C" fn(*mut PyObject, *const c_char, *mut PyObject) -> c_int,
    pub py_dict_keys: ObjectFn,
    pub py_dict_get_item_with_error:
        unsafe extern "C" fn(*mut PyObject, *mut PyObject) -> *mut PyObject,

    /// Address of the `None` singleton (`_Py_NoneStruct`).
    pub none: *mut PyObject,

    // Optional entry points.
    /// `PyType_GetName()`, Python 3.11+.
    pub py_type_get_name: Option<ObjectFn>,
    /// `Py_SetPythonHome()`, removed in Python 3.13.
    pub py_set_python_home: Option<unsafe extern "C" fn(*const wchar_t)>,
    /// `Py_SetProgramName()`, removed in Python 3.13.
    pub py_set_program_name: Option<unsafe extern "C" fn(*const wchar_t)>,
    pub py_decode_locale: Option<unsafe extern "C" fn(*const c_char, *mut size_t) -> *mut wchar_t>,
    pub py_mem_raw_free: Option<unsafe extern "C" fn(*mut c_void)>,
}

// The table only holds addresses into the loaded library, which is kept
// alive for at least as long as the table. Calls through it are serialized
// by the interpreter gate.
unsafe impl Send for PythonApi {}
unsafe impl Sync for PythonApi {}

unsafe fn required<T: Copy>(library: &Library, symbol: &'static str) -> Result<T> {
    let sym = library
        .get::<T>(symbol.as_bytes())
        .map_err(|source| Error::MissingSymbol { symbol, source })?;

    Ok(*sym)
}

unsafe fn optional<T: Copy>(library: &Library, symbol: &str) -> Option<T> {
    library.get::<T>(symbol.as_bytes()).ok().map(|sym| *sym)
}

impl PythonApi {
    /// Resolve all entry points from a loaded `libpython`.
    ///
    /// Fails on the first missing required symbol. The library must outlive
    /// the returned table.
    pub(crate) unsafe fn bind(library: &Library) -> Result<Self> {
        let api = Self {
            py_initialize_ex: required(library, "Py_InitializeEx")?,
            py_finalize_ex: required(library, "Py_FinalizeEx")?,
            py_is_initialized: required(library, "Py_IsInitialized")?,

            py_eval_save_thread: required(library, "PyEval_SaveThread")?,
            py_eval_restore_thread: required(library, "PyEval_RestoreThread")?,
            py_gil_state_ensure: required(library, "PyGILState_Ensure")?,
            py_gil_state_release: required(library, "PyGILState_Release")?,

            py_run_string_flags: required(library, "PyRun_StringFlags")?,
            py_import_add_module: required(library, "PyImport_AddModule")?,
            py_module_get_dict: required(library, "PyModule_GetDict")?,
            py_import_import_module: required(library, "PyImport_ImportModule")?,

            py_object_get_attr_string: required(library, "PyObject_GetAttrString")?,
            py_object_call_object: required(library, "PyObject_CallObject")?,
            py_object_type: required(library, "PyObject_Type")?,
            py_object_str: required(library, "PyObject_Str")?,
            py_inc_ref: required(library, "Py_IncRef")?,
            py_dec_ref: required(library, "Py_DecRef")?,

            py_err_occurred: required(library, "PyErr_Occurred")?,
            py_err_fetch: required(library, "PyErr_Fetch")?,
            py_err_clear: required(library, "PyErr_Clear")?,

            py_unicode_from_string_and_size: required(library, "PyUnicode_FromStringAndSize")?,
            py_unicode_as_utf8_and_size: required(library, "PyUnicode_AsUTF8AndSize")?,
            py_long_from_long_long: required(library, "PyLong_FromLongLong")?,
            py_long_as_long_long: required(library, "PyLong_AsLongLong")?,
            py_bool_from_long: required(library, "PyBool_FromLong")?,
            py_object_is_true: required(library, "PyObject_IsTrue")?,
            py_float_from_double: required(library, "PyFloat_FromDouble")?,
            py_float_as_double: required(library, "PyFloat_AsDouble")?,

            py_list_new: required(library, "PyList_New")?,
            py_list_size: required(library, "PyList_Size")?,
            py_list_get_item: required(library, "PyList_GetItem")?,
            py_list_set_item: required(library, "PyList_SetItem")?,
            py_tuple_new: required(library, "PyTuple_New")?,
            py_tuple_set_item: required(library, "PyTuple_SetItem")?,
            py_dict_new: required(library, "PyDict_New")?,
            py_dict_set_item_string: required(library, "PyDict_SetItemString")?,
            py_dict_keys: required(library, "PyDict_Keys")?,
            py_dict_get_item_with_error: required(library, "PyDict_GetItemWithError")?,

            none: required(library, "_Py_NoneStruct")?,

            py_type_get_name: optional(library, "PyType_GetName"),
            py_set_python_home: optional(library, "Py_SetPythonHome"),
            py_set_program_name: optional(library, "Py_SetProgramName"),
            py_decode_locale: optional(library, "Py_DecodeLocale"),
            py_mem_raw_free: optional(library, "PyMem_RawFree"),
        };

        log::debug!(
            "bound CPython API; optional entry points present: {}",
            api.optional_symbols_present()
        );

        Ok(api)
    }

    fn optional_symbols_present(&self) -> usize {
        [
            self.py_type_get_name.is_some(),
            self.py_set_python_home.is_some(),
            self.py_set_program_name.is_some(),
            self.py_decode_locale.is_some(),
            self.py_mem_raw_free.is_some(),
        ]
        .iter()
        .filter(|present| **present)
        .count()
    }
}
