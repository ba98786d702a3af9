// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Host-side representation of values exchanged with the interpreter.

use {
    crate::error::{Error, Result},
    std::{
        any::{type_name, Any},
        collections::{BTreeMap, HashMap},
    },
};

/// A value that can cross the host/interpreter boundary.
///
/// This is a closed set: `None`, `str`, `int` (64-bit), `float`, `bool`,
/// `list` and `dict` with `str` keys. Anything else fails to marshal.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    None,
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    List(Vec<Value>),
    Dict(BTreeMap<String, Value>),
}

impl Value {
    /// Short name of this value's shape, as used in error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::None => "None",
            Self::Str(_) => "str",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Bool(_) => "bool",
            Self::List(_) => "list",
            Self::Dict(_) => "dict",
        }
    }

    /// Convert an arbitrary host value by inspecting its type at run-time.
    ///
    /// Supports `()`, strings, integers, floats, booleans and `Value`, plus
    /// `Option`s, `Vec`s and `String`-keyed `BTreeMap`s and `HashMap`s with
    /// elements of those types. Unsigned and pointer-sized integers must fit
    /// in an `i64`. Any other type, including deeper nesting of host
    /// containers, fails with [`Error::UnsupportedHostType`] naming it.
    pub fn from_host<T: Any>(value: &T) -> Result<Self> {
        let any = value as &dyn Any;
        let name = type_name::<T>();

        macro_rules! lossless {
            ($($t:ty),*) => {
                $(
                    if let Some(v) = any.downcast_ref::<$t>() {
                        return Ok(Self::from(v.clone()));
                    }
                    if let Some(v) = any.downcast_ref::<Option<$t>>() {
                        return Ok(Self::from(v.clone()));
                    }
                    if let Some(v) = any.downcast_ref::<Vec<$t>>() {
                        return Ok(Self::from(v.clone()));
                    }
                    if let Some(v) = any.downcast_ref::<BTreeMap<String, $t>>() {
                        return Ok(Self::from(v.clone()));
                    }
                    if let Some(v) = any.downcast_ref::<HashMap<String, $t>>() {
                        return Ok(Self::from(v.clone()));
                    }
                )*
            };
        }

        macro_rules! checked {
            ($($t:ty),*) => {
                $(
                    if let Some(v) = any.downcast_ref::<$t>() {
                        return checked_int(*v, name);
                    }
                    if let Some(v) = any.downcast_ref::<Option<$t>>() {
                        return (*v).map_or(Ok(Self::None), |v| checked_int(v, name));
                    }
                    if let Some(v) = any.downcast_ref::<Vec<$t>>() {
                        return v
                            .iter()
                            .map(|v| checked_int(*v, name))
                            .collect::<Result<Vec<_>>>()
                            .map(Self::List);
                    }
                    if let Some(v) = any.downcast_ref::<BTreeMap<String, $t>>() {
                        return v
                            .iter()
                            .map(|(k, v)| Ok((k.clone(), checked_int(*v, name)?)))
                            .collect::<Result<BTreeMap<_, _>>>()
                            .map(Self::Dict);
                    }
                    if let Some(v) = any.downcast_ref::<HashMap<String, $t>>() {
                        return v
                            .iter()
                            .map(|(k, v)| Ok((k.clone(), checked_int(*v, name)?)))
                            .collect::<Result<BTreeMap<_, _>>>()
                            .map(Self::Dict);
                    }
                )*
            };
        }

        lossless!(
            i8,
            i16,
            i32,
            i64,
            u8,
            u16,
            u32,
            f32,
            f64,
            bool,
            String,
            &'static str,
            Value
        );
        checked!(u64, usize, isize);

        if any.downcast_ref::<()>().is_some() {
            return Ok(Self::None);
        }

        Err(Error::UnsupportedHostType(name))
    }
}

fn checked_int<I: TryInto<i64>>(v: I, name: &'static str) -> Result<Value> {
    v.try_into()
        .map(Value::Int)
        .map_err(|_| Error::UnsupportedHostType(name))
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Self::None
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

macro_rules! from_integer {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Value {
                fn from(v: $t) -> Self {
                    Self::Int(i64::from(v))
                }
            }
        )*
    };
}

from_integer!(i8, i16, i32, i64, u8, u16, u32);

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Self::Float(f64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Self::None)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Self::List(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<BTreeMap<String, T>> for Value {
    fn from(v: BTreeMap<String, T>) -> Self {
        Self::Dict(v.into_iter().map(|(k, v)| (k, v.into())).collect())
    }
}

impl<T: Into<Value>> From<HashMap<String, T>> for Value {
    fn from(v: HashMap<String, T>) -> Self {
        Self::Dict(v.into_iter().map(|(k, v)| (k, v.into())).collect())
    }
}

/// Checked conversion from an untyped [`Value`] to a concrete host type.
///
/// Conversions are exact: an `int` does not convert to `f64` and a `bool`
/// does not convert to `i64`. A mismatch yields
/// [`Error::ResultTypeMismatch`] naming both shapes.
pub trait FromValue: Sized {
    fn from_value(value: Value) -> Result<Self>;
}

fn mismatch<T>(value: &Value) -> Error {
    Error::ResultTypeMismatch {
        expected: type_name::<T>(),
        actual: value.kind_name(),
    }
}

impl FromValue for Value {
    fn from_value(value: Value) -> Result<Self> {
        Ok(value)
    }
}

impl FromValue for () {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::None => Ok(()),
            other => Err(mismatch::<Self>(&other)),
        }
    }
}

impl FromValue for String {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Str(v) => Ok(v),
            other => Err(mismatch::<Self>(&other)),
        }
    }
}

impl FromValue for i64 {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Int(v) => Ok(v),
            other => Err(mismatch::<Self>(&other)),
        }
    }
}

impl FromValue for i32 {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Int(v) => Self::try_from(v).map_err(|_| mismatch::<Self>(&value)),
            other => Err(mismatch::<Self>(&other)),
        }
    }
}

impl FromValue for f64 {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Float(v) => Ok(v),
            other => Err(mismatch::<Self>(&other)),
        }
    }
}

impl FromValue for bool {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Bool(v) => Ok(v),
            other => Err(mismatch::<Self>(&other)),
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::None => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

impl<T: FromValue> FromValue for Vec<T> {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::List(items) => items.into_iter().map(T::from_value).collect(),
            other => Err(mismatch::<Self>(&other)),
        }
    }
}

impl<T: FromValue> FromValue for BTreeMap<String, T> {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Dict(items) => items
                .into_iter()
                .map(|(k, v)| Ok((k, T::from_value(v)?)))
                .collect(),
            other => Err(mismatch::<Self>(&other)),
        }
    }
}

impl<T: FromValue> FromValue for HashMap<String, T> {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Dict(items) => items
                .into_iter()
                .map(|(k, v)| Ok((k, T::from_value(v)?)))
                .collect(),
            other => Err(mismatch::<Self>(&other)),
        }
    }
}
