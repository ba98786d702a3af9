// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Marshal values between the host and Python objects.

use {
    crate::{
        error::{fetch_error, take_pending, Error, Result},
        gate::Python,
        object::{PyBorrowed, PyRef},
        value::Value,
    },
    std::{collections::BTreeMap, ffi::CString},
};

/// Maximum container nesting converted in either direction.
///
/// Self-referencing Python containers would otherwise recurse forever.
pub(crate) const MAX_DEPTH: usize = 256;

/// Convert a host value to a new Python object reference.
pub(crate) fn to_python<'py>(py: Python<'py>, value: &Value) -> Result<PyRef<'py>> {
    to_python_depth(py, value, 0)
}

fn to_python_depth<'py>(py: Python<'py>, value: &Value, depth: usize) -> Result<PyRef<'py>> {
    if depth > MAX_DEPTH {
        return Err(Error::NestingTooDeep(MAX_DEPTH));
    }

    match value {
        Value::None => Ok(py.none()),
        Value::Str(v) => py.new_str(v),
        Value::Int(v) => py.new_int(*v),
        Value::Float(v) => py.new_float(*v),
        Value::Bool(v) => py.new_bool(*v),
        Value::List(items) => {
            let list = py.new_list(items.len())?;

            for (index, item) in items.iter().enumerate() {
                let item = to_python_depth(py, item, depth + 1).map_err(|e| Error::ListItem {
                    index,
                    source: Box::new(e),
                })?;

                py.list_set_stealing(&list, index, item)?;
            }

            Ok(list)
        }
        Value::Dict(items) => {
            let dict = py.new_dict()?;

            for (key, item) in items {
                let ckey = CString::new(key.as_str()).map_err(|_| Error::NulByte {
                    what: format!("dict key {:?}", key),
                })?;

                let item = to_python_depth(py, item, depth + 1).map_err(|e| Error::DictValue {
                    key: key.clone(),
                    source: Box::new(e),
                })?;

                // The dict takes its own reference; ours is released when
                // `item` goes out of scope.
                py.dict_set_borrowing(&dict, &ckey, &item)?;
            }

            Ok(dict)
        }
    }
}

/// Convert a Python object to a host value.
///
/// The object's type is identified by the exact name of its runtime type.
/// `bool` is distinct from `int` this way even though it subclasses it.
/// Instances of subclasses of the supported types are rejected.
pub(crate) fn to_host(py: Python<'_>, obj: PyBorrowed<'_>) -> Result<Value> {
    to_host_depth(py, obj, 0)
}

fn to_host_depth(py: Python<'_>, obj: PyBorrowed<'_>, depth: usize) -> Result<Value> {
    if depth > MAX_DEPTH {
        return Err(Error::NestingTooDeep(MAX_DEPTH));
    }

    if py.is_none(obj) {
        return Ok(Value::None);
    }

    let type_name = py.type_name(obj);

    match type_name.as_str() {
        "NoneType" => Ok(Value::None),
        "str" => py
            .str_to_string(obj)
            .map(Value::Str)
            .ok_or_else(|| Error::Python(fetch_error(py))),
        "bool" => {
            let res = unsafe { (py.api().py_object_is_true)(obj.as_ptr()) };
            if res < 0 {
                Err(Error::Python(fetch_error(py)))
            } else {
                Ok(Value::Bool(res != 0))
            }
        }
        "int" => {
            let v = unsafe { (py.api().py_long_as_long_long)(obj.as_ptr()) };
            if v == -1 {
                if let Some(e) = take_pending(py) {
                    return Err(Error::IntegerOutOfRange(e));
                }
            }
            Ok(Value::Int(v))
        }
        "float" => {
            let v = unsafe { (py.api().py_float_as_double)(obj.as_ptr()) };
            if v == -1.0 {
                if let Some(e) = take_pending(py) {
                    return Err(Error::Python(e));
                }
            }
            Ok(Value::Float(v))
        }
        "list" => {
            let len = py.list_len(obj);
            let mut items = Vec::with_capacity(len);

            for index in 0..len {
                // Borrowed: the list retains ownership of its items.
                let item = py
                    .list_get_borrowed(obj, index)
                    .ok_or_else(|| Error::Python(fetch_error(py)))?;

                items.push(
                    to_host_depth(py, item, depth + 1).map_err(|e| Error::ListItem {
                        index,
                        source: Box::new(e),
                    })?,
                );
            }

            Ok(Value::List(items))
        }
        "dict" => {
            let keys = py
                .dict_keys(obj)
                .ok_or_else(|| Error::Python(fetch_error(py)))?;

            let mut items = BTreeMap::new();

            for index in 0..py.list_len(keys.borrow()) {
                let key_obj = match py.list_get_borrowed(keys.borrow(), index) {
                    Some(key) => key,
                    None => return Err(Error::Python(fetch_error(py))),
                };

                if py.is_none(key_obj) || py.type_name(key_obj) != "str" {
                    continue;
                }

                let key = py
                    .str_to_string(key_obj)
                    .ok_or_else(|| Error::Python(fetch_error(py)))?;

                let item = match py.dict_get_borrowed(obj, key_obj) {
                    Some(item) => item,
                    None => match take_pending(py) {
                        Some(e) => return Err(Error::Python(e)),
                        None => continue,
                    },
                };

                let value = to_host_depth(py, item, depth + 1).map_err(|e| Error::DictValue {
                    key: key.clone(),
                    source: Box::new(e),
                })?;

                items.insert(key, value);
            }

            Ok(Value::Dict(items))
        }
        _ => Err(Error::UnsupportedPythonType(type_name)),
    }
}
