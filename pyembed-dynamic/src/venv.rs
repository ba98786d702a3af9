// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Virtual environment support.

A [`VirtualEnvConfig`] describes a Python virtual environment whose packages
should be importable from the embedded interpreter. It is consumed by
[`DynamicPythonInterpreter::start_with_venv_config()`](crate::DynamicPythonInterpreter::start_with_venv_config)
in up to two phases (see [`VenvPathTiming`](crate::VenvPathTiming)):

1. Before `Py_InitializeEx()`: the venv's `python` executable is announced as
   the program name and an alternate installation root (`PYTHONHOME`) is set.
2. After `Py_InitializeEx()`: the script from
   [`VirtualEnvConfig::activation_script()`] rewrites `sys.path`.
*/

use {
    crate::{
        error::{Error, Result},
        pystr::python_str_literal,
    },
    std::path::{Path, PathBuf},
};

#[cfg(feature = "serialization")]
use serde::{Deserialize, Serialize};

#[cfg(windows)]
const LIB_DIR: &str = "Lib";
#[cfg(not(windows))]
const LIB_DIR: &str = "lib";

/// Configuration of a virtual environment to activate in the interpreter.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "serialization", derive(Deserialize, Serialize))]
#[cfg_attr(feature = "serialization", serde(default))]
pub struct VirtualEnvConfig {
    /// Root directory of the virtual environment.
    pub root: PathBuf,

    /// Whether the system-wide site-packages directories are searched after
    /// the virtual environment's.
    pub include_system_packages: bool,

    /// Additional directories to prepend to `sys.path`.
    pub extra_search_paths: Vec<PathBuf>,

    /// Alternate Python installation root (`PYTHONHOME`).
    pub alternate_install_root: Option<PathBuf>,
}

impl VirtualEnvConfig {
    /// Construct an instance for a virtual environment root with defaults.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Default::default()
        }
    }

    /// Validate the configuration, returning the canonical root path.
    pub fn validate(&self) -> Result<PathBuf> {
        if self.root.as_os_str().is_empty() {
            return Err(Error::VenvPathEmpty);
        }

        if !self.root.exists() {
            return Err(Error::VenvNotFound(self.root.clone()));
        }

        let lib_dir = self.root.join(LIB_DIR);
        if !lib_dir.is_dir() {
            return Err(Error::VenvMissingLibDir(lib_dir));
        }

        dunce::canonicalize(&self.root).map_err(|_| Error::VenvNotFound(self.root.clone()))
    }

    /// Path to the `python` executable inside the virtual environment, if any.
    pub fn python_executable(&self) -> Option<PathBuf> {
        let exe = if cfg!(windows) {
            self.root.join("Scripts").join("python.exe")
        } else {
            self.root.join("bin").join("python")
        };

        if exe.exists() {
            Some(exe)
        } else {
            None
        }
    }

    /// Python source code that activates the virtual environment in a running
    /// interpreter.
    ///
    /// The script sets `VIRTUAL_ENV`, puts the venv's site-packages first on
    /// `sys.path` and drops every other site-packages entry. System
    /// site-packages are appended back if requested. Extra search paths are
    /// then prepended, each at most once. All helper names are removed from
    /// `__main__` afterwards.
    pub fn activation_script(&self) -> Result<String> {
        let root = self.validate()?;
        let site_packages = site_packages_dir(&root)?;

        let mut lines = vec![
            "def _pyembed_dynamic_activate_venv():".to_string(),
            "    import os, sys".to_string(),
            format!(
                "    os.environ['VIRTUAL_ENV'] = {}",
                python_str_literal(&root.to_string_lossy())
            ),
            format!(
                "    venv_site_packages = {}",
                python_str_literal(&site_packages.to_string_lossy())
            ),
            "    essential = [".to_string(),
            "        p for p in sys.path".to_string(),
            "        if p == '' or os.path.basename(os.path.normpath(p)) not in ('site-packages', 'dist-packages')".to_string(),
            "    ]".to_string(),
            "    sys.path[:] = [venv_site_packages] + essential".to_string(),
        ];

        if self.include_system_packages {
            lines.extend(
                [
                    "    try:",
                    "        import site",
                    "        for p in site.getsitepackages():",
                    "            if p not in sys.path:",
                    "                sys.path.append(p)",
                    "    except Exception:",
                    "        pass",
                ]
                .iter()
                .map(|s| s.to_string()),
            );
        }

        for path in &self.extra_search_paths {
            let literal = python_str_literal(&path.to_string_lossy());
            lines.push(format!("    if {} not in sys.path:", literal));
            lines.push(format!("        sys.path.insert(0, {})", literal));
        }

        lines.push("_pyembed_dynamic_activate_venv()".to_string());
        lines.push("del _pyembed_dynamic_activate_venv".to_string());

        Ok(lines.join("\n") + "\n")
    }
}

/// Locate the `site-packages` directory of a virtual environment.
///
/// This is `Lib/site-packages` on Windows and `lib/python*/site-packages`
/// elsewhere. When multiple `python*` directories exist, the
/// lexicographically first one containing `site-packages` wins.
pub fn site_packages_dir(root: &Path) -> Result<PathBuf> {
    let lib_dir = root.join(LIB_DIR);

    if !lib_dir.is_dir() {
        return Err(Error::VenvMissingLibDir(lib_dir));
    }

    if cfg!(windows) {
        let candidate = lib_dir.join("site-packages");
        return if candidate.is_dir() {
            Ok(candidate)
        } else {
            Err(Error::VenvSitePackagesNotFound(root.to_path_buf()))
        };
    }

    let entries = std::fs::read_dir(&lib_dir).map_err(|source| Error::FileRead {
        path: lib_dir.clone(),
        source,
    })?;

    let mut candidates = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_name().to_string_lossy().starts_with("python"))
        .map(|entry| entry.path().join("site-packages"))
        .filter(|path| path.is_dir())
        .collect::<Vec<_>>();
    candidates.sort();

    candidates
        .into_iter()
        .next()
        .ok_or_else(|| Error::VenvSitePackagesNotFound(root.to_path_buf()))
}
