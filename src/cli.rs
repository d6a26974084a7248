//! Command-line front-end.
//!
//! The surface is small: print the version or the default config, or
//! load a config file and run. `--worker` and `--daemonize` only flag
//! the loaded config; spawning and detaching are the supervisor's job.

use std::path::PathBuf;

use clap::Parser;

use crate::config::{loader, Config};
use crate::error::Error;

#[derive(Debug, Parser)]
#[command(name = "canopy", about = "TLS terminating reverse proxy", disable_version_flag = true)]
pub struct Cli {
    /// Print the version
    #[arg(short = 'v', long = "version")]
    pub version: bool,

    /// Load a JSON configuration file
    #[arg(short = 'c', long = "config", value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Print the default JSON config
    #[arg(long = "default-config")]
    pub default_config: bool,

    /// Daemonize the process
    #[cfg(unix)]
    #[arg(short = 'd', long = "daemonize")]
    pub daemonize: bool,

    /// Run as a worker process (set by the supervisor)
    #[arg(long = "worker", hide = true)]
    pub worker: bool,
}

impl Cli {
    fn daemonize(&self) -> bool {
        #[cfg(unix)]
        {
            self.daemonize
        }
        #[cfg(not(unix))]
        {
            false
        }
    }
}

/// What the parsed command line asks for.
#[derive(Debug)]
pub enum Action {
    /// Print `v<major>.<minor>`.
    Version,
    /// Print the default JSON config.
    DefaultConfig,
    /// Print usage; no config was given.
    Usage,
    /// Load succeeded; run the proxy.
    Run(Box<Config>),
}

/// Turn parsed flags into an action, loading the config when asked.
pub fn evaluate(cli: Cli) -> Result<Action, Error> {
    if cli.version {
        return Ok(Action::Version);
    }
    if cli.default_config {
        return Ok(Action::DefaultConfig);
    }
    let Some(path) = cli.config.as_deref() else {
        return Ok(Action::Usage);
    };

    let mut config = loader::load(path)?;
    config.is_daemon = cli.daemonize();
    config.is_worker = cli.worker;
    config.exe_path = Some(std::env::current_exe().map_err(Error::ExePath)?);
    Ok(Action::Run(Box::new(config)))
}

/// The version line `-v` prints.
pub fn version_line() -> String {
    format!(
        "v{}.{}",
        env!("CARGO_PKG_VERSION_MAJOR"),
        env!("CARGO_PKG_VERSION_MINOR")
    )
}
