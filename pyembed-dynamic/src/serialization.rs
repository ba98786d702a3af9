// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Bridge between [`Value`] and serde data types.

use {
    crate::{
        error::{Error, Result},
        interpreter::DynamicPythonInterpreter,
        value::Value,
    },
    serde::{de::DeserializeOwned, Serialize},
    std::collections::BTreeMap,
};

impl TryFrom<serde_json::Value> for Value {
    type Error = Error;

    /// JSON integers must fit in an `i64`. Larger ones fail rather than
    /// being rounded to a float.
    fn try_from(v: serde_json::Value) -> Result<Self> {
        Ok(match v {
            serde_json::Value::Null => Self::None,
            serde_json::Value::Bool(v) => Self::Bool(v),
            serde_json::Value::Number(n) => {
                if let Some(v) = n.as_i64() {
                    Self::Int(v)
                } else if n.is_u64() {
                    return Err(Error::UnsupportedHostType("u64"));
                } else {
                    Self::Float(n.as_f64().ok_or(Error::UnsupportedHostType("serde_json::Number"))?)
                }
            }
            serde_json::Value::String(v) => Self::Str(v),
            serde_json::Value::Array(items) => Self::List(
                items
                    .into_iter()
                    .map(Self::try_from)
                    .collect::<Result<Vec<_>>>()?,
            ),
            serde_json::Value::Object(items) => Self::Dict(
                items
                    .into_iter()
                    .map(|(k, v)| Ok((k, Self::try_from(v)?)))
                    .collect::<Result<BTreeMap<_, _>>>()?,
            ),
        })
    }
}

impl TryFrom<Value> for serde_json::Value {
    type Error = Error;

    fn try_from(v: Value) -> Result<Self> {
        Ok(match v {
            Value::None => Self::Null,
            Value::Bool(v) => Self::Bool(v),
            Value::Int(v) => Self::from(v),
            Value::Float(v) => serde_json::Number::from_f64(v)
                .map(Self::Number)
                .ok_or(Error::NonFiniteFloat(v))?,
            Value::Str(v) => Self::String(v),
            Value::List(items) => Self::Array(
                items
                    .into_iter()
                    .map(Self::try_from)
                    .collect::<Result<Vec<_>>>()?,
            ),
            Value::Dict(items) => Self::Object(
                items
                    .into_iter()
                    .map(|(k, v)| Ok((k, Self::try_from(v)?)))
                    .collect::<Result<serde_json::Map<_, _>>>()?,
            ),
        })
    }
}

impl DynamicPythonInterpreter {
    /// Call `module.attribute(request)` with serde types on both ends.
    ///
    /// `request` is serialized to its JSON data model and passed as a single
    /// argument. The result is deserialized into `Resp`.
    pub fn invoke_serde<Req, Resp>(&self, module: &str, attribute: &str, request: &Req) -> Result<Resp>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let arg = Value::try_from(serde_json::to_value(request)?)?;
        let res = self.invoke(module, attribute, &[arg])?;

        Ok(serde_json::from_value(serde_json::Value::try_from(res)?)?)
    }
}

#[cfg(test)]
mod tests {
    use {super::*, serde_json::json};

    #[test]
    fn json_to_value() -> Result<()> {
        let v = Value::try_from(json!({"a": [1, 2.5, null], "b": true, "c": "x"}))?;

        let mut expected = BTreeMap::new();
        expected.insert(
            "a".to_string(),
            Value::List(vec![Value::Int(1), Value::Float(2.5), Value::None]),
        );
        expected.insert("b".to_string(), Value::Bool(true));
        expected.insert("c".to_string(), Value::Str("x".into()));

        assert_eq!(v, Value::Dict(expected));

        Ok(())
    }

    #[test]
    fn integers_beyond_i64_rejected() -> Result<()> {
        assert!(matches!(
            Value::try_from(json!(u64::MAX)),
            Err(Error::UnsupportedHostType("u64"))
        ));
        assert!(matches!(
            Value::try_from(json!({"nested": [1, (1u64 << 63) + 1]})),
            Err(Error::UnsupportedHostType("u64"))
        ));

        assert_eq!(Value::try_from(json!(i64::MAX))?, Value::Int(i64::MAX));
        assert_eq!(Value::try_from(json!(i64::MIN))?, Value::Int(i64::MIN));
        assert_eq!(Value::try_from(json!(1e300))?, Value::Float(1e300));

        Ok(())
    }

    #[test]
    fn value_to_json() -> Result<()> {
        let v = Value::from(vec![Value::Int(-3), Value::Str("s".into()), Value::None]);
        assert_eq!(serde_json::Value::try_from(v)?, json!([-3, "s", null]));

        assert!(matches!(
            serde_json::Value::try_from(Value::Float(f64::INFINITY)),
            Err(Error::NonFiniteFloat(_))
        ));

        Ok(())
    }
}
