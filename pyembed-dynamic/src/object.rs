// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Reference-counted handles to Python objects.

CPython APIs return either *new* references, which the caller must release
exactly once, or *borrowed* references, which the caller must not release.
We model the former as [`PyRef`] (released on drop) and the latter as
[`PyBorrowed`] (a lifetime-bound view). Container mutation follows the same
split: [`Python::list_set_stealing()`] and [`Python::tuple_set_stealing()`]
take a `PyRef` by value because the underlying APIs steal the reference,
while [`Python::dict_set_borrowing()`] takes `&PyRef` because
`PyDict_SetItemString()` acquires its own reference.

Raw helpers in this module return `None` on failure and leave the Python
exception set. Callers decide how to translate it.
*/

use {
    crate::{
        error::{Error, Result},
        gate::Python,
        symbols::{PyObject, PySsizeT},
    },
    libc::{c_char, c_long},
    std::{ffi::CStr, marker::PhantomData, ptr::NonNull},
};

/// An owned (strong) reference to a Python object.
pub(crate) struct PyRef<'py> {
    py: Python<'py>,
    ptr: NonNull<PyObject>,
}

impl<'py> PyRef<'py> {
    /// Take ownership of a new reference. Returns `None` for NULL.
    pub(crate) unsafe fn from_owned_ptr(py: Python<'py>, ptr: *mut PyObject) -> Option<Self> {
        NonNull::new(ptr).map(|ptr| Self { py, ptr })
    }

    pub(crate) fn as_ptr(&self) -> *mut PyObject {
        self.ptr.as_ptr()
    }

    /// Give up ownership without releasing, e.g. to a stealing API.
    pub(crate) fn into_ptr(self) -> *mut PyObject {
        let ptr = self.ptr.as_ptr();
        std::mem::forget(self);
        ptr
    }

    pub(crate) fn borrow(&self) -> PyBorrowed<'_> {
        PyBorrowed {
            ptr: self.ptr,
            _owner: PhantomData,
        }
    }
}

impl<'py> Clone for PyRef<'py> {
    fn clone(&self) -> Self {
        self.borrow().retain(self.py)
    }
}

impl<'py> Drop for PyRef<'py> {
    fn drop(&mut self) {
        unsafe { (self.py.api().py_dec_ref)(self.ptr.as_ptr()) };
    }
}

/// A borrowed reference, valid while its owner keeps the object alive.
#[derive(Clone, Copy)]
pub(crate) struct PyBorrowed<'a> {
    ptr: NonNull<PyObject>,
    _owner: PhantomData<&'a PyObject>,
}

impl<'a> PyBorrowed<'a> {
    pub(crate) unsafe fn from_ptr(ptr: *mut PyObject) -> Option<Self> {
        NonNull::new(ptr).map(|ptr| Self {
            ptr,
            _owner: PhantomData,
        })
    }

    pub(crate) fn as_ptr(self) -> *mut PyObject {
        self.ptr.as_ptr()
    }

    /// Acquire a strong reference.
    pub(crate) fn retain<'py>(self, py: Python<'py>) -> PyRef<'py> {
        unsafe { (py.api().py_inc_ref)(self.ptr.as_ptr()) };
        PyRef { py, ptr: self.ptr }
    }
}

fn ssize(n: usize) -> Result<PySsizeT> {
    PySsizeT::try_from(n).map_err(|_| Error::ObjectCreation("container of that size"))
}

impl<'py> Python<'py> {
    /// Whether a Python exception is set.
    pub(crate) fn err_occurred(self) -> bool {
        !unsafe { (self.api().py_err_occurred)() }.is_null()
    }

    pub(crate) fn is_none(self, obj: PyBorrowed<'_>) -> bool {
        obj.as_ptr() == self.api().none
    }

    /// New reference to `None`.
    pub(crate) fn none(self) -> PyRef<'py> {
        let ptr = self.api().none;
        unsafe {
            (self.api().py_inc_ref)(ptr);
            // Resolved symbol addresses are never NULL.
            PyRef {
                py: self,
                ptr: NonNull::new_unchecked(ptr),
            }
        }
    }

    pub(crate) fn new_str(self, s: &str) -> Result<PyRef<'py>> {
        let len = ssize(s.len())?;
        unsafe {
            let ptr = (self.api().py_unicode_from_string_and_size)(s.as_ptr() as *const c_char, len);
            PyRef::from_owned_ptr(self, ptr)
        }
        .ok_or(Error::ObjectCreation("str"))
    }

    pub(crate) fn new_int(self, v: i64) -> Result<PyRef<'py>> {
        unsafe { PyRef::from_owned_ptr(self, (self.api().py_long_from_long_long)(v)) }
            .ok_or(Error::ObjectCreation("int"))
    }

    pub(crate) fn new_float(self, v: f64) -> Result<PyRef<'py>> {
        unsafe { PyRef::from_owned_ptr(self, (self.api().py_float_from_double)(v)) }
            .ok_or(Error::ObjectCreation("float"))
    }

    pub(crate) fn new_bool(self, v: bool) -> Result<PyRef<'py>> {
        unsafe { PyRef::from_owned_ptr(self, (self.api().py_bool_from_long)(c_long::from(v))) }
            .ok_or(Error::ObjectCreation("bool"))
    }

    pub(crate) fn new_list(self, len: usize) -> Result<PyRef<'py>> {
        let len = ssize(len)?;
        unsafe { PyRef::from_owned_ptr(self, (self.api().py_list_new)(len)) }
            .ok_or(Error::ObjectCreation("list"))
    }

    pub(crate) fn new_tuple(self, len: usize) -> Result<PyRef<'py>> {
        let len = ssize(len)?;
        unsafe { PyRef::from_owned_ptr(self, (self.api().py_tuple_new)(len)) }
            .ok_or(Error::ObjectCreation("tuple"))
    }

    pub(crate) fn new_dict(self) -> Result<PyRef<'py>> {
        unsafe { PyRef::from_owned_ptr(self, (self.api().py_dict_new)()) }
            .ok_or(Error::ObjectCreation("dict"))
    }

    /// Store `item` at `index` of a freshly created list. Steals `item`.
    pub(crate) fn list_set_stealing(
        self,
        list: &PyRef<'py>,
        index: usize,
        item: PyRef<'py>,
    ) -> Result<()> {
        let index = ssize(index)?;
        // The list owns the item from here on, even if the call fails.
        let res = unsafe { (self.api().py_list_set_item)(list.as_ptr(), index, item.into_ptr()) };

        if res == 0 {
            Ok(())
        } else {
            Err(Error::Python(crate::error::fetch_error(self)))
        }
    }

    /// Store `item` at `index` of a freshly created tuple. Steals `item`.
    pub(crate) fn tuple_set_stealing(
        self,
        tuple: &PyRef<'py>,
        index: usize,
        item: PyRef<'py>,
    ) -> Result<()> {
        let index = ssize(index)?;
        let res = unsafe { (self.api().py_tuple_set_item)(tuple.as_ptr(), index, item.into_ptr()) };

        if res == 0 {
            Ok(())
        } else {
            Err(Error::Python(crate::error::fetch_error(self)))
        }
    }

    /// Set `dict[key] = value`. The caller keeps its reference to `value`.
    pub(crate) fn dict_set_borrowing(
        self,
        dict: &PyRef<'py>,
        key: &CStr,
        value: &PyRef<'py>,
    ) -> Result<()> {
        let res = unsafe {
            (self.api().py_dict_set_item_string)(dict.as_ptr(), key.as_ptr(), value.as_ptr())
        };

        if res == 0 {
            Ok(())
        } else {
            Err(Error::Python(crate::error::fetch_error(self)))
        }
    }

    pub(crate) fn list_len(self, list: PyBorrowed<'_>) -> usize {
        let len = unsafe { (self.api().py_list_size)(list.as_ptr()) };
        usize::try_from(len).unwrap_or(0)
    }

    /// Borrowed reference to `list[index]`.
    pub(crate) fn list_get_borrowed<'a>(
        self,
        list: PyBorrowed<'a>,
        index: usize,
    ) -> Option<PyBorrowed<'a>> {
        let index = PySsizeT::try_from(index).ok()?;
        unsafe { PyBorrowed::from_ptr((self.api().py_list_get_item)(list.as_ptr(), index)) }
    }

    /// New list of the dict's keys.
    pub(crate) fn dict_keys(self, dict: PyBorrowed<'_>) -> Option<PyRef<'py>> {
        unsafe { PyRef::from_owned_ptr(self, (self.api().py_dict_keys)(dict.as_ptr())) }
    }

    /// Borrowed reference to `dict[key]`, `None` if absent or on error.
    pub(crate) fn dict_get_borrowed<'a>(
        self,
        dict: PyBorrowed<'a>,
        key: PyBorrowed<'_>,
    ) -> Option<PyBorrowed<'a>> {
        unsafe {
            PyBorrowed::from_ptr((self.api().py_dict_get_item_with_error)(
                dict.as_ptr(),
                key.as_ptr(),
            ))
        }
    }

    /// `getattr(obj, name)`.
    pub(crate) fn getattr(self, obj: PyBorrowed<'_>, name: &CStr) -> Option<PyRef<'py>> {
        unsafe {
            PyRef::from_owned_ptr(
                self,
                (self.api().py_object_get_attr_string)(obj.as_ptr(), name.as_ptr()),
            )
        }
    }

    /// `str(obj)` copied into a host string.
    pub(crate) fn str_of(self, obj: PyBorrowed<'_>) -> Option<String> {
        let s = unsafe { PyRef::from_owned_ptr(self, (self.api().py_object_str)(obj.as_ptr())) }?;
        self.str_to_string(s.borrow())
    }

    /// Copy the contents of a `str` object into a host string.
    ///
    /// The UTF-8 buffer is owned by the string object; only the copy escapes.
    pub(crate) fn str_to_string(self, obj: PyBorrowed<'_>) -> Option<String> {
        let mut size: PySsizeT = 0;
        let data = unsafe { (self.api().py_unicode_as_utf8_and_size)(obj.as_ptr(), &mut size) };

        if data.is_null() {
            return None;
        }

        let size = usize::try_from(size).ok()?;
        let bytes = unsafe { std::slice::from_raw_parts(data as *const u8, size) };

        Some(String::from_utf8_lossy(bytes).into_owned())
    }

    /// Name of the object's type, e.g. `int` or `NoneType`.
    ///
    /// Resolved by reading `type(obj).__name__`, which works on every
    /// CPython version. `PyType_GetName()` is used when available. Returns
    /// `"unknown"` if the name cannot be determined; no exception is left set.
    pub(crate) fn type_name(self, obj: PyBorrowed<'_>) -> String {
        let name = unsafe { PyRef::from_owned_ptr(self, (self.api().py_object_type)(obj.as_ptr())) }
            .and_then(|type_obj| match self.api().py_type_get_name {
                Some(get_name) => unsafe {
                    PyRef::from_owned_ptr(self, get_name(type_obj.as_ptr()))
                },
                None => self.getattr(type_obj.borrow(), c"__name__"),
            })
            .and_then(|name| self.str_to_string(name.borrow()));

        match name {
            Some(name) => name,
            None => {
                if self.err_occurred() {
                    unsafe { (self.api().py_err_clear)() };
                }
                "unknown".to_string()
            }
        }
    }
}
