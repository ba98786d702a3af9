// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use {
    anyhow::{anyhow, Context, Result},
    clap::{value_parser, Arg, ArgAction, ArgMatches, Command},
    log::LevelFilter,
    pyembed_dynamic::{DynamicPythonInterpreter, Value, VirtualEnvConfig},
    std::path::PathBuf,
};

const PYRUN_VERSION: &str = env!("CARGO_PKG_VERSION");

const ABOUT: &str = "\
Run Python code in a libpython shared library loaded at run-time.

The library to load is given by --library or the PYRUN_LIBPYTHON
environment variable. It is typically named like libpython3.11.so,
libpython3.11.dylib or python311.dll.
";

const CALL_ABOUT: &str = "\
Call a function in a Python module.

MODULE is imported if needed. Use `__main__` for functions defined by
--setup code.

Each ARG is parsed as JSON. An ARG that is not valid JSON is passed as
a string. The function's return value is printed to stdout as JSON.
";

const VENV_CONFIG_ABOUT: &str = "\
Path to a JSON file describing the virtual environment to activate.

Keys are `root`, `include_system_packages`, `extra_search_paths` and
`alternate_install_root`. --venv, --venv-system-site-packages and
--venv-path override or extend values from this file.
";

fn command() -> Command {
    Command::new("pyrun")
        .version(PYRUN_VERSION)
        .author("Gregory Szorc <gregory.szorc@gmail.com>")
        .about("Run Python code in a dynamically loaded libpython")
        .long_about(ABOUT)
        .arg_required_else_help(true)
        .subcommand_required(true)
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .short('v')
                .global(true)
                .action(ArgAction::Count)
                .help("Increase logging verbosity. Can be specified multiple times."),
        )
        .arg(
            Arg::new("library")
                .long("library")
                .env("PYRUN_LIBPYTHON")
                .global(true)
                .value_name("PATH")
                .value_parser(value_parser!(PathBuf))
                .help("Path to the libpython shared library to load"),
        )
        .arg(
            Arg::new("venv")
                .long("venv")
                .global(true)
                .value_name("DIR")
                .value_parser(value_parser!(PathBuf))
                .help("Virtual environment to activate"),
        )
        .arg(
            Arg::new("venv_system_site_packages")
                .long("venv-system-site-packages")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Also search system site-packages after the virtual environment's"),
        )
        .arg(
            Arg::new("venv_path")
                .long("venv-path")
                .global(true)
                .value_name("DIR")
                .action(ArgAction::Append)
                .value_parser(value_parser!(PathBuf))
                .help("Additional directory to put on sys.path"),
        )
        .arg(
            Arg::new("venv_config")
                .long("venv-config")
                .global(true)
                .value_name("FILE")
                .value_parser(value_parser!(PathBuf))
                .help("JSON file describing the virtual environment to activate")
                .long_help(VENV_CONFIG_ABOUT),
        )
        .arg(
            Arg::new("setup")
                .long("setup")
                .global(true)
                .value_name("CODE")
                .action(ArgAction::Append)
                .help("Python code to run before the command"),
        )
        .subcommand(
            Command::new("exec")
                .about("Execute Python source code")
                .arg(
                    Arg::new("code")
                        .required(true)
                        .value_name("CODE")
                        .help("Python source code to execute"),
                ),
        )
        .subcommand(
            Command::new("run")
                .about("Execute a Python source file")
                .arg(
                    Arg::new("path")
                        .required(true)
                        .value_name("FILE")
                        .value_parser(value_parser!(PathBuf))
                        .help("Path to Python file to execute"),
                ),
        )
        .subcommand(
            Command::new("call")
                .about("Call a function in a Python module")
                .long_about(CALL_ABOUT)
                .arg(
                    Arg::new("module")
                        .required(true)
                        .value_name("MODULE")
                        .help("Name of module containing the function"),
                )
                .arg(
                    Arg::new("function")
                        .required(true)
                        .value_name("FUNCTION")
                        .help("Name of function to call"),
                )
                .arg(
                    Arg::new("args")
                        .value_name("ARG")
                        .num_args(0..)
                        .allow_hyphen_values(true)
                        .help("Positional arguments to the function"),
                ),
        )
}

fn init_logging(verbosity: u8) {
    let log_level = match verbosity {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level.as_str()));

    // Disable log context except at higher log levels.
    if log_level <= LevelFilter::Info {
        builder
            .format_timestamp(None)
            .format_level(false)
            .format_target(false);
    }

    builder.init();
}

/// Resolve the virtual environment to activate from arguments, if any.
fn venv_config(matches: &ArgMatches) -> Result<Option<VirtualEnvConfig>> {
    let mut config = match matches.get_one::<PathBuf>("venv_config") {
        Some(path) => {
            let data = std::fs::read(path)
                .with_context(|| format!("reading venv config {}", path.display()))?;
            let config: VirtualEnvConfig = serde_json::from_slice(&data)
                .with_context(|| format!("parsing venv config {}", path.display()))?;
            Some(config)
        }
        None => None,
    };

    if let Some(root) = matches.get_one::<PathBuf>("venv") {
        config.get_or_insert_with(VirtualEnvConfig::default).root = root.clone();
    }

    if let Some(config) = config.as_mut() {
        if matches.get_flag("venv_system_site_packages") {
            config.include_system_packages = true;
        }

        if let Some(paths) = matches.get_many::<PathBuf>("venv_path") {
            config.extra_search_paths.extend(paths.cloned());
        }
    } else if matches.get_flag("venv_system_site_packages")
        || matches.get_many::<PathBuf>("venv_path").is_some()
    {
        return Err(anyhow!("--venv or --venv-config is required to configure a virtual environment"));
    }

    Ok(config)
}

/// Parse a command line argument as JSON, falling back to a string.
fn parse_call_arg(arg: &str) -> Result<Value> {
    match serde_json::from_str::<serde_json::Value>(arg) {
        Ok(value) => {
            Value::try_from(value).with_context(|| format!("converting argument {}", arg))
        }
        Err(_) => Ok(Value::Str(arg.to_string())),
    }
}

fn command_call(interp: &DynamicPythonInterpreter, args: &ArgMatches) -> Result<()> {
    let module = args
        .get_one::<String>("module")
        .ok_or_else(|| anyhow!("module argument is required"))?;
    let function = args
        .get_one::<String>("function")
        .ok_or_else(|| anyhow!("function argument is required"))?;
    let call_args = args
        .get_many::<String>("args")
        .unwrap_or_default()
        .map(|arg| parse_call_arg(arg))
        .collect::<Result<Vec<_>>>()?;

    let res = interp.invoke(module, function, &call_args)?;
    let json = serde_json::Value::try_from(res)?;

    println!("{}", json);

    Ok(())
}

fn run_command(interp: &DynamicPythonInterpreter, matches: &ArgMatches) -> Result<()> {
    if let Some(setup) = matches.get_many::<String>("setup") {
        for code in setup {
            interp.run_source(code).context("running setup code")?;
        }
    }

    match matches.subcommand() {
        Some(("exec", args)) => {
            let code = args
                .get_one::<String>("code")
                .ok_or_else(|| anyhow!("code argument is required"))?;
            interp.run_source(code)?;
            Ok(())
        }
        Some(("run", args)) => {
            let path = args
                .get_one::<PathBuf>("path")
                .ok_or_else(|| anyhow!("path argument is required"))?;
            interp.run_file(path)?;
            Ok(())
        }
        Some(("call", args)) => command_call(interp, args),
        _ => Err(anyhow!("invalid sub-command")),
    }
}

pub fn run() -> Result<i32> {
    let matches = command().get_matches();

    init_logging(matches.get_count("verbose"));

    let library = matches
        .get_one::<PathBuf>("library")
        .ok_or_else(|| anyhow!("no libpython specified; pass --library or set PYRUN_LIBPYTHON"))?;

    let venv = venv_config(&matches)?;

    let interp = DynamicPythonInterpreter::new(library)?;

    match &venv {
        Some(venv) => {
            log::info!("activating virtual environment {}", venv.root.display());
            interp.start_with_venv_config(venv)?;
        }
        None => interp.start()?,
    }

    let res = run_command(&interp, &matches);

    // Finalizing flushes Python's stdio, so it also runs after failures.
    let stop_res = interp.stop();

    res?;
    stop_res?;

    Ok(0)
}
