// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*!
Control a Python interpreter loaded from a shared library at run-time.

The `pyembed-dynamic` crate drives an embedded CPython interpreter without
linking against `libpython` at build time. Instead, a `libpython` shared
library is opened with `dlopen()` (or `LoadLibrary()` on Windows), the
subset of the CPython C API we need is resolved into function pointers,
and a single interpreter is managed through those pointers.

The most important type in this crate is
[`DynamicPythonInterpreter`](struct.DynamicPythonInterpreter.html). It owns
the loaded library, manages the interpreter lifecycle
(uninitialized, initialized, finalized), runs source code and calls
functions in the interpreter. Values cross the boundary as
[`Value`](enum.Value.html) instances, a closed set of primitive and
container types that round-trip losslessly.

```no_run
use pyembed_dynamic::{DynamicPythonInterpreter, Value};

let interp = DynamicPythonInterpreter::new("/usr/lib/libpython3.11.so")?;
interp.start()?;
interp.run_source("def add(a, b):\n    return a + b\n")?;
let res = interp.invoke("__main__", "add", &[Value::from(10), Value::from(25)])?;
assert_eq!(res, Value::Int(35));
interp.stop()?;
# Ok::<(), pyembed_dynamic::Error>(())
```

# Threading

CPython has global state and the C API is not safe to call from multiple
threads without coordination. `DynamicPythonInterpreter` is `Send + Sync`
and serializes every operation touching the interpreter through a single
mutex. Calls from different threads are therefore totally ordered and a
long-running call blocks every other caller until it returns.

The interpreter is initialized and finalized on a thread owned by the
handle, so `start()`, `stop()` and the final drop may happen on any
threads.

# Dependencies

Under the hood, `pyembed-dynamic` uses the following crates:

* `dunce`
* `libc`
* `libloading`
* `log`
* `thiserror`
* `serde` and `serde_json` (with the `serialization` feature)
*/

mod config;
mod conversion;
mod error;
mod gate;
mod interpreter;
mod object;
mod platform;
mod pystr;
mod python_eval;
#[cfg(feature = "serialization")]
mod serialization;
mod symbols;
mod value;
pub mod venv;

#[cfg(test)]
mod test;

pub use crate::{
    config::{InterpreterConfig, VenvPathTiming},
    error::{Error, PythonException, Result},
    interpreter::{DynamicPythonInterpreter, InterpreterState},
    platform::validate_library_path,
    value::{FromValue, Value},
    venv::VirtualEnvConfig,
};
