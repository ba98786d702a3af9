// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Functionality for evaluating Python code and calling Python functions.

use {
    crate::{
        conversion::{to_host, to_python},
        error::{fetch_error, take_pending, Error, Result},
        gate::Python,
        object::PyRef,
        pystr::source_to_cstring,
        symbols::PY_FILE_INPUT,
        value::Value,
    },
    std::{ffi::CString, ptr::null_mut, time::Duration},
};

/// Runs Python code provided by a string in the `__main__` namespace.
///
/// Definitions made by the code persist in `__main__` and are visible to
/// later calls. A raised exception is translated and cleared.
pub(crate) fn run_code(py: Python, code: &str) -> Result<()> {
    if code.is_empty() {
        return Err(Error::EmptySource);
    }

    let code = source_to_cstring(code)?;
    let api = py.api();

    unsafe {
        // Borrowed references.
        let main = (api.py_import_add_module)(c"__main__".as_ptr());
        if main.is_null() {
            return Err(Error::Python(fetch_error(py)));
        }

        let main_dict = (api.py_module_get_dict)(main);
        if main_dict.is_null() {
            return Err(Error::Python(fetch_error(py)));
        }

        let res = (api.py_run_string_flags)(
            code.as_ptr(),
            PY_FILE_INPUT,
            main_dict,
            main_dict,
            null_mut(),
        );

        match PyRef::from_owned_ptr(py, res) {
            Some(_res) => match take_pending(py) {
                Some(e) => Err(Error::Python(e)),
                None => Ok(()),
            },
            None => Err(Error::Python(fetch_error(py))),
        }
    }
}

fn name_to_cstring(name: &str, what: &str) -> Result<CString> {
    CString::new(name).map_err(|_| Error::NulByte {
        what: format!("{} name {:?}", what, name),
    })
}

/// Call `module.attribute(*args)` and convert the result to a host value.
///
/// The module is imported if it isn't already.
pub(crate) fn invoke(py: Python, module: &str, attribute: &str, args: &[Value]) -> Result<Value> {
    let module_c = name_to_cstring(module, "module")?;
    let attribute_c = name_to_cstring(attribute, "attribute")?;
    let api = py.api();

    let module_obj =
        unsafe { PyRef::from_owned_ptr(py, (api.py_import_import_module)(module_c.as_ptr())) }
            .ok_or_else(|| Error::ImportFailed {
                module: module.to_string(),
                source: fetch_error(py),
            })?;

    let callable = py
        .getattr(module_obj.borrow(), &attribute_c)
        .ok_or_else(|| Error::AttributeNotFound {
            module: module.to_string(),
            attribute: attribute.to_string(),
            source: fetch_error(py),
        })?;

    let arg_tuple = py.new_tuple(args.len())?;

    for (index, arg) in args.iter().enumerate() {
        let arg = to_python(py, arg).map_err(|e| Error::Argument {
            index,
            source: Box::new(e),
        })?;

        // Stolen by the tuple. On error above, `arg_tuple` is released once
        // along with the items inserted so far.
        py.tuple_set_stealing(&arg_tuple, index, arg)?;
    }

    log::trace!("calling {}.{} with {} arguments", module, attribute, args.len());

    let res = unsafe {
        PyRef::from_owned_ptr(
            py,
            (api.py_object_call_object)(callable.as_ptr(), arg_tuple.as_ptr()),
        )
    };

    let res = match res {
        Some(res) => res,
        None => {
            return Err(match take_pending(py) {
                Some(source) => Error::CallFailed {
                    module: module.to_string(),
                    attribute: attribute.to_string(),
                    source,
                },
                None => Error::NoReturnValue {
                    module: module.to_string(),
                    attribute: attribute.to_string(),
                },
            })
        }
    };

    to_host(py, res.borrow())
}

/// Python source for the best-effort cleanup pass run before finalization.
///
/// Collects garbage, gives non-main threads `thread_join_timeout` each to
/// exit and evicts modules that are neither built in nor part of the
/// standard library from `sys.modules`. Every step swallows its own errors.
pub(crate) fn cleanup_script(thread_join_timeout: Duration) -> String {
    format!(
        r#"def _pyembed_dynamic_cleanup():
    import gc, sys
    gc.collect()
    try:
        import threading
        skip = (threading.main_thread(), threading.current_thread())
        for t in threading.enumerate():
            if t not in skip and t.is_alive():
                try:
                    t.join(timeout={timeout})
                except Exception:
                    pass
    except Exception:
        pass
    keep = set(sys.builtin_module_names) | set(getattr(sys, 'stdlib_module_names', ()))
    for name in list(sys.modules):
        if name.startswith('_') or name.split('.')[0] in keep:
            continue
        try:
            del sys.modules[name]
        except Exception:
            pass
    gc.collect()
_pyembed_dynamic_cleanup()
del _pyembed_dynamic_cleanup
"#,
        timeout = thread_join_timeout.as_secs_f64()
    )
}
