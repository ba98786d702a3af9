// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use {
    super::{new_interpreter, started_interpreter, LIBPYTHON},
    crate::{DynamicPythonInterpreter, Error, InterpreterConfig, InterpreterState, Value},
    indoc::indoc,
    rusty_fork::rusty_fork_test,
    std::{sync::Arc, thread},
};

const THREADS: i64 = 50;
const CALLS_PER_THREAD: i64 = 20;

rusty_fork_test! {
    #[test]
    fn concurrent_invoke_serialized() {
        let interp = match started_interpreter() {
            Some(interp) => Arc::new(interp),
            None => return,
        };

        // Read-increment-write with a yield in between. Without serialization
        // updates would be lost.
        interp.run_source(indoc! {r#"
            import time

            counter = 0

            def increment(step):
                global counter
                current = counter
                time.sleep(0)
                counter = current + step
                return counter

            def get_counter():
                return counter
        "#}).unwrap();

        let handles = (0..THREADS)
            .map(|_| {
                let interp = interp.clone();
                thread::spawn(move || {
                    for _ in 0..CALLS_PER_THREAD {
                        interp.invoke("__main__", "increment", &[Value::Int(2)]).unwrap();
                    }
                })
            })
            .collect::<Vec<_>>();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(
            interp.invoke("__main__", "get_counter", &[]).unwrap(),
            Value::Int(THREADS * CALLS_PER_THREAD * 2)
        );

        interp.stop().unwrap();
    }

    #[test]
    fn concurrent_source_and_invoke() {
        let interp = match started_interpreter() {
            Some(interp) => Arc::new(interp),
            None => return,
        };

        interp.run_source("results = []").unwrap();
        interp.run_source(indoc! {r#"
            def count():
                return len(results)
        "#}).unwrap();

        let handles = (0..THREADS)
            .map(|i| {
                let interp = interp.clone();
                thread::spawn(move || {
                    interp.run_source(&format!("results.append({})", i)).unwrap();
                    interp.invoke("__main__", "count", &[]).unwrap()
                })
            })
            .collect::<Vec<_>>();

        for handle in handles {
            assert!(matches!(handle.join().unwrap(), Value::Int(n) if n >= 1 && n <= THREADS));
        }

        assert_eq!(interp.invoke("__main__", "count", &[]).unwrap(), Value::Int(THREADS));
    }

    #[test]
    fn invoke_from_thread_stop_from_main() {
        let interp = match started_interpreter() {
            Some(interp) => Arc::new(interp),
            None => return,
        };

        let worker = interp.clone();
        let res = thread::spawn(move || worker.invoke("math", "floor", &[Value::Float(2.7)]))
            .join()
            .unwrap()
            .unwrap();
        assert_eq!(res, Value::Int(2));

        interp.stop().unwrap();
    }

    #[test]
    fn stop_from_worker_thread() {
        let interp = match started_interpreter() {
            Some(interp) => Arc::new(interp),
            None => return,
        };

        interp.run_source("import threading").unwrap();

        let worker = interp.clone();
        thread::spawn(move || worker.stop()).join().unwrap().unwrap();

        assert_eq!(interp.state().unwrap(), InterpreterState::Finalized);
        assert!(!interp.is_initialized());
    }

    #[test]
    fn stop_from_worker_without_cleanup() {
        let path = match LIBPYTHON.as_ref() {
            Some(path) => path.clone(),
            None => return,
        };

        let config = InterpreterConfig {
            cleanup_on_stop: false,
            ..Default::default()
        };
        let interp = Arc::new(DynamicPythonInterpreter::with_config(&path, config).unwrap());
        interp.start().unwrap();

        let worker = interp.clone();
        thread::spawn(move || worker.stop()).join().unwrap().unwrap();

        assert_eq!(interp.state().unwrap(), InterpreterState::Finalized);
    }

    #[test]
    fn drop_last_handle_on_worker() {
        let path = match LIBPYTHON.as_ref() {
            Some(path) => path.clone(),
            None => return,
        };

        let interp = DynamicPythonInterpreter::new(&path).unwrap();
        interp.start().unwrap();
        interp.run_source("values = [1, 2, 3]").unwrap();

        let interp = Arc::new(interp);
        let worker = interp.clone();
        drop(interp);

        thread::spawn(move || drop(worker)).join().unwrap();

        // Finalized on drop: the handle slot is free but the process cannot
        // start another interpreter.
        let interp = DynamicPythonInterpreter::new(&path).unwrap();
        assert!(matches!(interp.start(), Err(Error::ReinitializationUnsupported)));
    }

    #[test]
    fn start_on_worker_invoke_and_stop_on_main() {
        let interp = match new_interpreter() {
            Some(interp) => Arc::new(interp),
            None => return,
        };

        let worker = interp.clone();
        thread::spawn(move || worker.start()).join().unwrap().unwrap();

        assert_eq!(
            interp.invoke("math", "floor", &[Value::Float(7.5)]).unwrap(),
            Value::Int(7)
        );

        interp.stop().unwrap();
    }
}
