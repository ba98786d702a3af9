// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Manage a Python interpreter loaded from a shared library.

use {
    crate::{
        config::InterpreterConfig,
        error::{Error, Result},
        gate::{Gate, GilGuard, Python},
        platform::{load_library, validate_library_path},
        pystr::OwnedPyStr,
        python_eval::{cleanup_script, invoke, run_code},
        symbols::PythonApi,
        value::{FromValue, Value},
        venv::VirtualEnvConfig,
    },
    libc::c_int,
    libloading::Library,
    std::{
        fmt::{Display, Formatter},
        mem::ManuallyDrop,
        path::{Path, PathBuf},
        sync::{
            atomic::{AtomicBool, Ordering},
            mpsc,
        },
        thread::JoinHandle,
        time::Duration,
    },
};

/// Set while a `DynamicPythonInterpreter` exists in this process.
static LIVE_HANDLE: AtomicBool = AtomicBool::new(false);

/// Set once any interpreter has been finalized in this process.
static PROCESS_FINALIZED: AtomicBool = AtomicBool::new(false);

/// Lifecycle state of the interpreter.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InterpreterState {
    Uninitialized,
    Initialized,
    /// Terminal. The interpreter cannot be started again in this process.
    Finalized,
}

impl Display for InterpreterState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Uninitialized => "uninitialized",
            Self::Initialized => "initialized",
            Self::Finalized => "finalized",
        })
    }
}

/// Releases the process-wide live handle flag on drop.
struct LiveHandleToken(());

impl LiveHandleToken {
    fn acquire() -> Result<Self> {
        LIVE_HANDLE
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| Self(()))
            .map_err(|_| Error::HandleAlreadyLive)
    }
}

impl Drop for LiveHandleToken {
    fn drop(&mut self) {
        LIVE_HANDLE.store(false, Ordering::Release);
    }
}

/// Thread that initialized the interpreter and will finalize it.
///
/// It parks on `finalize` after startup. Sending on (or dropping) the
/// channel wakes it up. The thread's result is the `Py_FinalizeEx()` status,
/// or `None` if it exited without finalizing.
struct OwnerThread {
    finalize: mpsc::Sender<()>,
    handle: JoinHandle<Option<c_int>>,
}

/// What the owner thread does around `Py_InitializeEx()` and `Py_FinalizeEx()`.
struct OwnerTasks {
    install_signal_handlers: bool,
    activation_script: Option<String>,
    cleanup_timeout: Option<Duration>,
}

/// Body of the owner thread.
///
/// `started` receives the outcome of initialization and venv activation.
/// The GIL is released while the thread waits for the finalization request.
fn run_owner_thread(
    api: PythonApi,
    tasks: OwnerTasks,
    started: mpsc::Sender<Result<()>>,
    finalize: mpsc::Receiver<()>,
) -> Option<c_int> {
    unsafe { (api.py_initialize_ex)(c_int::from(tasks.install_signal_handlers)) };

    if unsafe { (api.py_is_initialized)() } == 0 {
        let _ = started.send(Err(Error::InitializationFailed));
        return None;
    }

    let res = match &tasks.activation_script {
        Some(script) => {
            log::debug!("activating virtual environment");
            // Py_InitializeEx() returns with the GIL held.
            let py = unsafe { Python::assume_gil_acquired(&api) };
            run_code(py, script)
        }
        None => Ok(()),
    };

    let tstate = unsafe { (api.py_eval_save_thread)() };

    if started.send(res).is_err() || finalize.recv().is_err() {
        log::warn!("interpreter handle went away; not finalizing");
        return None;
    }

    unsafe { (api.py_eval_restore_thread)(tstate) };

    if let Some(timeout) = tasks.cleanup_timeout {
        let py = unsafe { Python::assume_gil_acquired(&api) };
        if let Err(e) = run_code(py, &cleanup_script(timeout)) {
            log::warn!("ignoring error from interpreter cleanup: {}", e);
        }
    }

    Some(unsafe { (api.py_finalize_ex)() })
}

/// Mutable state guarded by the gate.
struct Lifecycle {
    state: InterpreterState,
    owner: Option<OwnerThread>,
    /// Wide strings handed to pre-initialization setters. CPython keeps
    /// pointers to them.
    retained_strings: Vec<OwnedPyStr>,
}

/// Manages a Python interpreter from a dynamically loaded `libpython`.
///
/// Python interpreters have global state and there can only be a single
/// instance of this type per process: [`new()`](#method.new) fails with
/// [`Error::HandleAlreadyLive`] while another instance exists.
///
/// The interpreter goes through the states of [`InterpreterState`] in order.
/// A stopped interpreter cannot be restarted, not even through a new
/// instance, since CPython does not support re-initialization reliably.
///
/// All methods take `&self` and are serialized by an internal lock, so an
/// instance can be shared between threads with `Arc`.
///
/// `start()` spawns a thread that calls `Py_InitializeEx()` and later
/// `Py_FinalizeEx()`, so that CPython sees both on the same OS thread no
/// matter which threads call `start()`, `stop()` or drop the handle. Python
/// code treats that thread as its main thread.
pub struct DynamicPythonInterpreter {
    api: PythonApi,
    /// Never unloaded once an interpreter was started from it.
    library: ManuallyDrop<Library>,
    library_path: PathBuf,
    config: InterpreterConfig,
    gate: Gate<Lifecycle>,
    _live: LiveHandleToken,
}

impl DynamicPythonInterpreter {
    /// Load `libpython` from a path with the default configuration.
    pub fn new(library_path: impl AsRef<Path>) -> Result<Self> {
        Self::with_config(library_path, InterpreterConfig::default())
    }

    /// Load `libpython` from a path.
    ///
    /// The library is opened and every required C API symbol is resolved.
    /// No interpreter is started.
    pub fn with_config(library_path: impl AsRef<Path>, config: InterpreterConfig) -> Result<Self> {
        let library_path = library_path.as_ref();
        validate_library_path(library_path)?;

        let live = LiveHandleToken::acquire()?;

        let library = load_library(library_path)?;
        let api = unsafe { PythonApi::bind(&library) }?;

        Ok(Self {
            api,
            library: ManuallyDrop::new(library),
            library_path: library_path.to_path_buf(),
            config,
            gate: Gate::new(Lifecycle {
                state: InterpreterState::Uninitialized,
                owner: None,
                retained_strings: vec![],
            }),
            _live: live,
        })
    }

    /// Path of the loaded `libpython`.
    pub fn library_path(&self) -> &Path {
        &self.library_path
    }

    pub fn config(&self) -> &InterpreterConfig {
        &self.config
    }

    /// Current lifecycle state.
    pub fn state(&self) -> Result<InterpreterState> {
        Ok(self.gate.enter()?.state)
    }

    /// Whether the interpreter is started and running.
    pub fn is_initialized(&self) -> bool {
        match self.gate.enter() {
            Ok(lifecycle) => {
                lifecycle.state == InterpreterState::Initialized
                    && unsafe { (self.api.py_is_initialized)() } != 0
            }
            Err(_) => false,
        }
    }

    /// Initialize the interpreter.
    pub fn start(&self) -> Result<()> {
        self.start_impl(None)
    }

    /// Initialize the interpreter with a virtual environment activated.
    ///
    /// Which settings are applied before and after `Py_InitializeEx()` is
    /// governed by [`InterpreterConfig::venv_path_timing`]. If activation
    /// fails after initialization, the interpreter stays initialized and
    /// the error is returned.
    ///
    /// On Python releases without `Py_SetPythonHome()`, an
    /// `alternate_install_root` is applied by setting `PYTHONHOME` in this
    /// process's environment. That write is not synchronized with other host
    /// threads reading the environment, so call this before spawning any.
    pub fn start_with_venv_config(&self, venv: &VirtualEnvConfig) -> Result<()> {
        self.start_impl(Some(venv))
    }

    fn start_impl(&self, venv: Option<&VirtualEnvConfig>) -> Result<()> {
        let mut lifecycle = self.gate.enter()?;

        if lifecycle.state != InterpreterState::Uninitialized {
            return Err(Error::InvalidState {
                operation: "start",
                state: lifecycle.state,
            });
        }

        if PROCESS_FINALIZED.load(Ordering::Acquire) {
            return Err(Error::ReinitializationUnsupported);
        }

        if unsafe { (self.api.py_is_initialized)() } != 0 {
            return Err(Error::AlreadyInitialized);
        }

        let timing = self.config.venv_path_timing;

        // Validate before changing any interpreter state.
        let activation_script = match venv {
            Some(venv) if timing.applies_post_initialization() => {
                Some(venv.activation_script()?)
            }
            Some(venv) => {
                venv.validate()?;
                None
            }
            None => None,
        };

        if let Some(venv) = venv {
            if timing.applies_pre_initialization() {
                self.apply_pre_initialization(&mut lifecycle, venv)?;
            }
        }

        log::debug!("initializing Python interpreter from {}", self.library_path.display());

        let tasks = OwnerTasks {
            install_signal_handlers: self.config.install_signal_handlers,
            activation_script,
            cleanup_timeout: self
                .config
                .cleanup_on_stop
                .then_some(self.config.thread_join_timeout),
        };
        let api = self.api;
        let (started_tx, started_rx) = mpsc::channel();
        let (finalize_tx, finalize_rx) = mpsc::channel();

        let handle = std::thread::Builder::new()
            .name("pyembed-dynamic".to_string())
            .spawn(move || run_owner_thread(api, tasks, started_tx, finalize_rx))
            .map_err(Error::OwnerThreadSpawn)?;

        let res = match started_rx.recv() {
            Ok(Err(Error::InitializationFailed)) | Err(_) => {
                let _ = handle.join();
                return Err(Error::InitializationFailed);
            }
            Ok(res) => res,
        };

        lifecycle.state = InterpreterState::Initialized;
        lifecycle.owner = Some(OwnerThread {
            finalize: finalize_tx,
            handle,
        });

        log::debug!("Python interpreter initialized");

        res
    }

    fn apply_pre_initialization(
        &self,
        lifecycle: &mut Lifecycle,
        venv: &VirtualEnvConfig,
    ) -> Result<()> {
        if let Some(exe) = venv.python_executable() {
            match (
                self.api.py_set_program_name,
                OwnedPyStr::from_os_str(&self.api, exe.as_os_str())?,
            ) {
                (Some(set_program_name), Some(name)) => {
                    log::debug!("setting program name to {}", exe.display());
                    unsafe { set_program_name(name.as_wchar_ptr()) };
                    lifecycle.retained_strings.push(name);
                }
                _ => {
                    log::debug!("Py_SetProgramName() unavailable; not setting program name");
                }
            }
        }

        if let Some(home) = &venv.alternate_install_root {
            match (
                self.api.py_set_python_home,
                OwnedPyStr::from_os_str(&self.api, home.as_os_str())?,
            ) {
                (Some(set_python_home), Some(home_w)) => {
                    log::debug!("setting Python home to {}", home.display());
                    unsafe { set_python_home(home_w.as_wchar_ptr()) };
                    lifecycle.retained_strings.push(home_w);
                }
                _ => {
                    log::warn!(
                        "Py_SetPythonHome() unavailable; setting PYTHONHOME={}",
                        home.display()
                    );
                    std::env::set_var("PYTHONHOME", home);
                }
            }
        }

        Ok(())
    }

    /// Finalize the interpreter.
    ///
    /// May be called from any thread. Callers must ensure no other thread
    /// issues calls concurrently. In-flight calls complete first. The state
    /// is `Finalized` afterwards even if an error is returned.
    pub fn stop(&self) -> Result<()> {
        let mut lifecycle = self.gate.enter()?;

        if lifecycle.state != InterpreterState::Initialized {
            return Err(Error::InvalidState {
                operation: "stop",
                state: lifecycle.state,
            });
        }

        self.finalize(&mut lifecycle)
    }

    fn finalize(&self, lifecycle: &mut Lifecycle) -> Result<()> {
        lifecycle.state = InterpreterState::Finalized;
        PROCESS_FINALIZED.store(true, Ordering::Release);

        let owner = match lifecycle.owner.take() {
            Some(owner) => owner,
            None => return Ok(()),
        };

        // Finalization runs on the thread that initialized the interpreter,
        // whichever thread calls this.
        let _ = owner.finalize.send(());

        match owner.handle.join() {
            Ok(Some(code)) if code < 0 => Err(Error::FinalizationFailed(code)),
            Ok(Some(_)) => {
                log::debug!("Python interpreter finalized");
                Ok(())
            }
            Ok(None) | Err(_) => Err(Error::OwnerThreadFailed),
        }
    }

    /// Run the given operation with the GIL held, provided the interpreter
    /// is initialized.
    pub(crate) fn with_python<T>(
        &self,
        operation: &'static str,
        f: impl FnOnce(Python<'_>) -> Result<T>,
    ) -> Result<T> {
        let lifecycle = self.gate.enter()?;

        if lifecycle.state != InterpreterState::Initialized {
            return Err(Error::InvalidState {
                operation,
                state: lifecycle.state,
            });
        }

        let gil = GilGuard::acquire(&self.api);
        f(gil.python())
    }

    /// Run Python source code in the `__main__` namespace.
    ///
    /// Names defined by the code are visible to later calls from any thread.
    pub fn run_source(&self, code: &str) -> Result<()> {
        self.with_python("run source", |py| run_code(py, code))
    }

    /// Run the Python source file at a path in the `__main__` namespace.
    pub fn run_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        self.with_python("run file", |py| {
            if !path.exists() {
                return Err(Error::FileNotFound(path.to_path_buf()));
            }

            let code = std::fs::read_to_string(path).map_err(|source| Error::FileRead {
                path: path.to_path_buf(),
                source,
            })?;

            run_code(py, &code)
        })
    }

    /// Call `module.attribute(*args)`, importing `module` if needed.
    pub fn invoke(&self, module: &str, attribute: &str, args: &[Value]) -> Result<Value> {
        self.with_python("invoke", |py| invoke(py, module, attribute, args))
    }

    /// Call `module.attribute(request)` and convert the result to `Resp`.
    ///
    /// A result of another shape yields [`Error::ResultTypeMismatch`].
    pub fn invoke_typed<Req, Resp>(&self, module: &str, attribute: &str, request: Req) -> Result<Resp>
    where
        Req: Into<Value>,
        Resp: FromValue,
    {
        let res = self.invoke(module, attribute, &[request.into()])?;

        Resp::from_value(res)
    }
}

impl Drop for DynamicPythonInterpreter {
    fn drop(&mut self) {
        let started = match self.gate.enter() {
            Ok(mut lifecycle) => {
                if lifecycle.state == InterpreterState::Initialized {
                    log::warn!("finalizing Python interpreter on drop");
                    if let Err(e) = self.finalize(&mut lifecycle) {
                        log::warn!("error finalizing Python interpreter: {}", e);
                    }
                }

                lifecycle.state != InterpreterState::Uninitialized
            }
            Err(_) => {
                log::warn!("interpreter lock poisoned; not finalizing on drop");
                true
            }
        };

        if !started {
            unsafe { ManuallyDrop::drop(&mut self.library) };
        }
    }
}
