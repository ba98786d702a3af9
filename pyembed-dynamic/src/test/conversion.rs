// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use {
    super::started_interpreter,
    crate::{
        conversion::{to_host, to_python},
        DynamicPythonInterpreter, Error, Value,
    },
    indoc::indoc,
    rusty_fork::rusty_fork_test,
    std::{collections::BTreeMap, sync::mpsc},
};

fn dict(items: &[(&str, Value)]) -> Value {
    Value::Dict(
        items
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect::<BTreeMap<_, _>>(),
    )
}

fn sample_values() -> Vec<Value> {
    vec![
        Value::None,
        Value::from(""),
        Value::from("plain ascii"),
        Value::from("ünïcödé ✓ 🐍"),
        Value::Int(0),
        Value::Int(-1),
        Value::Int(i64::MAX),
        Value::Int(i64::MIN),
        Value::Float(0.0),
        Value::Float(-2.5),
        Value::Float(f64::MAX),
        Value::Float(f64::MIN_POSITIVE),
        Value::Bool(true),
        Value::Bool(false),
        Value::List(vec![]),
        Value::List(vec![Value::Int(1), Value::from("two"), Value::None, Value::Bool(false)]),
        dict(&[]),
        dict(&[
            ("name", Value::from("x")),
            ("nested", Value::List(vec![dict(&[("deep", Value::Float(1.5))])])),
            ("flag", Value::Bool(true)),
        ]),
    ]
}

fn with_identity(interp: &DynamicPythonInterpreter) {
    interp
        .run_source(indoc! {r#"
            def identity(x):
                return x
        "#})
        .unwrap();
}

rusty_fork_test! {
    #[test]
    fn round_trip_direct() {
        let interp = match started_interpreter() {
            Some(interp) => interp,
            None => return,
        };

        interp
            .with_python("test", |py| {
                for value in sample_values() {
                    let obj = to_python(py, &value)?;
                    assert_eq!(to_host(py, obj.borrow())?, value);
                }
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn round_trip_through_call() {
        let interp = match started_interpreter() {
            Some(interp) => interp,
            None => return,
        };
        with_identity(&interp);

        for value in sample_values() {
            assert_eq!(
                interp.invoke("__main__", "identity", &[value.clone()]).unwrap(),
                value
            );
        }
    }

    #[test]
    fn negative_zero_sign() {
        let interp = match started_interpreter() {
            Some(interp) => interp,
            None => return,
        };
        with_identity(&interp);

        match interp.invoke("__main__", "identity", &[Value::Float(-0.0)]).unwrap() {
            Value::Float(v) => assert!(v == 0.0 && v.is_sign_negative()),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn bool_precedence() {
        let interp = match started_interpreter() {
            Some(interp) => interp,
            None => return,
        };

        interp.run_source(indoc! {r#"
            def truth():
                return True

            def mixed():
                return [True, 1, False, 0]

            def is_bool(x):
                return type(x) is bool
        "#}).unwrap();

        assert_eq!(interp.invoke("__main__", "truth", &[]).unwrap(), Value::Bool(true));
        assert_eq!(
            interp.invoke("__main__", "mixed", &[]).unwrap(),
            Value::List(vec![Value::Bool(true), Value::Int(1), Value::Bool(false), Value::Int(0)])
        );
        assert_eq!(
            interp.invoke("__main__", "is_bool", &[Value::Bool(false)]).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            interp.invoke("__main__", "is_bool", &[Value::Int(0)]).unwrap(),
            Value::Bool(false)
        );
    }

    #[test]
    fn unsupported_python_types() {
        let interp = match started_interpreter() {
            Some(interp) => interp,
            None => return,
        };

        interp.run_source(indoc! {r#"
            import collections

            def a_set():
                return {1, 2}

            def a_tuple():
                return (1, 2)

            def nested_bytes():
                return {"ok": 1, "bad": [b"raw"]}

            def ordered():
                return collections.OrderedDict(a=1)
        "#}).unwrap();

        for (function, expected) in [("a_set", "set"), ("a_tuple", "tuple"), ("ordered", "OrderedDict")] {
            match interp.invoke("__main__", function, &[]) {
                Err(Error::UnsupportedPythonType(name)) => assert_eq!(name, expected),
                other => panic!("{}: unexpected result: {:?}", function, other),
            }
        }

        match interp.invoke("__main__", "nested_bytes", &[]) {
            Err(e @ Error::DictValue { .. }) => {
                let message = e.to_string();
                assert!(message.contains("'bad'"), "{}", message);
                assert!(message.contains("bytes"), "{}", message);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn non_string_dict_keys_skipped() {
        let interp = match started_interpreter() {
            Some(interp) => interp,
            None => return,
        };

        interp.run_source(indoc! {r#"
            def mixed_keys():
                return {"a": 1, 2: "two", None: 3}
        "#}).unwrap();

        assert_eq!(
            interp.invoke("__main__", "mixed_keys", &[]).unwrap(),
            dict(&[("a", Value::Int(1))])
        );
    }

    #[test]
    fn integer_out_of_range() {
        let interp = match started_interpreter() {
            Some(interp) => interp,
            None => return,
        };

        interp.run_source(indoc! {r#"
            def huge():
                return 2 ** 70
        "#}).unwrap();

        match interp.invoke("__main__", "huge", &[]) {
            Err(Error::IntegerOutOfRange(e)) => {
                assert_eq!(e.type_name.as_deref(), Some("OverflowError"))
            }
            other => panic!("unexpected result: {:?}", other),
        }

        // The overflow does not leave an exception behind.
        interp.run_source("z = 3").unwrap();
    }

    #[test]
    fn self_referencing_list() {
        let interp = match started_interpreter() {
            Some(interp) => interp,
            None => return,
        };

        interp.run_source(indoc! {r#"
            def cyclic():
                items = []
                items.append(items)
                return items
        "#}).unwrap();

        let err = interp.invoke("__main__", "cyclic", &[]).unwrap_err();
        assert!(err.to_string().contains("nesting exceeds 256 levels"));
    }

    #[test]
    fn partial_argument_failure() {
        let interp = match started_interpreter() {
            Some(interp) => interp,
            None => return,
        };

        interp.run_source(indoc! {r#"
            import sys

            def none_refs():
                return sys.getrefcount(None)

            def five(a, b, c, d, e):
                return [a, b, c, d, e]
        "#}).unwrap();

        let bad = dict(&[("bad\0key", Value::Int(1))]);
        let args = vec![Value::None, Value::None, bad, Value::None, Value::None];

        let before = match interp.invoke("__main__", "none_refs", &[]).unwrap() {
            Value::Int(v) => v,
            other => panic!("unexpected result: {:?}", other),
        };

        for _ in 0..100 {
            match interp.invoke("__main__", "five", &args) {
                Err(Error::Argument { index, source }) => {
                    assert_eq!(index, 2);
                    assert!(matches!(*source, Error::NulByte { .. }));
                }
                other => panic!("unexpected result: {:?}", other),
            }
        }

        let after = match interp.invoke("__main__", "none_refs", &[]).unwrap() {
            Value::Int(v) => v,
            other => panic!("unexpected result: {:?}", other),
        };

        // A leak or a double release of the two inserted arguments would
        // move the count by at least 200.
        assert!((after - before).abs() < 50, "before={} after={}", before, after);

        // The interpreter is still healthy.
        let ok = vec![Value::None, Value::None, Value::Int(3), Value::None, Value::None];
        assert_eq!(
            interp.invoke("__main__", "five", &ok).unwrap(),
            Value::List(ok.clone())
        );
    }

    #[test]
    fn unsupported_host_type() {
        let interp = match started_interpreter() {
            Some(interp) => interp,
            None => return,
        };
        with_identity(&interp);

        let (tx, _rx) = mpsc::channel::<String>();

        let err = Value::from_host(&tx).unwrap_err();
        assert!(matches!(err, Error::UnsupportedHostType(name) if name.contains("Sender")));

        // Supported host values flow through the same entry point.
        let arg = Value::from_host(&42u16).unwrap();
        assert_eq!(interp.invoke("__main__", "identity", &[arg]).unwrap(), Value::Int(42));
    }
}
