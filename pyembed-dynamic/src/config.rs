// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Data structures for configuring a dynamically loaded Python interpreter.

use std::time::Duration;

#[cfg(feature = "serialization")]
use serde::{Deserialize, Serialize};

/// When virtual environment settings are applied relative to interpreter start.
///
/// Some settings (program name, installation root) only take effect if set
/// before the interpreter bootstraps. Others (`sys.path` rewriting) are
/// Python statements and need a running interpreter. Whether applying the
/// bootstrap settings is correct depends on the CPython release in use, so
/// this is configurable.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serialization", derive(Deserialize, Serialize))]
#[cfg_attr(feature = "serialization", serde(rename_all = "kebab-case"))]
pub enum VenvPathTiming {
    /// Only apply settings before `Py_InitializeEx()`.
    PreInitialization,
    /// Only run the `sys.path` rewrite after `Py_InitializeEx()`.
    PostInitialization,
    /// Do both.
    Both,
}

impl Default for VenvPathTiming {
    fn default() -> Self {
        Self::Both
    }
}

impl VenvPathTiming {
    pub(crate) fn applies_pre_initialization(self) -> bool {
        matches!(self, Self::PreInitialization | Self::Both)
    }

    pub(crate) fn applies_post_initialization(self) -> bool {
        matches!(self, Self::PostInitialization | Self::Both)
    }
}

/// Configuration of a [`DynamicPythonInterpreter`](crate::DynamicPythonInterpreter).
#[derive(Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serialization", derive(Deserialize, Serialize))]
#[cfg_attr(feature = "serialization", serde(default))]
pub struct InterpreterConfig {
    /// Whether Python installs its signal handlers (`SIGINT` etc).
    ///
    /// Passed to `Py_InitializeEx()`. Defaults to `false` so the host
    /// process keeps control of its signals.
    pub install_signal_handlers: bool,

    /// Whether `stop()` runs a best-effort cleanup pass before finalizing.
    pub cleanup_on_stop: bool,

    /// How long the cleanup pass waits on each live Python thread.
    pub thread_join_timeout: Duration,

    /// When virtual environment settings are applied.
    pub venv_path_timing: VenvPathTiming,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            install_signal_handlers: false,
            cleanup_on_stop: true,
            thread_join_timeout: Duration::from_millis(100),
            venv_path_timing: VenvPathTiming::default(),
        }
    }
}
