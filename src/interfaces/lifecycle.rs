//! Process lifecycle hooks

use std::ffi::OsString;
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::Command;

use tracing::info;

use crate::{Error, Result};

pub trait ProcessLifecycle: Send + Sync {
    /// Replace the running process once all calls are gone. Only returns
    /// when the restart could not be carried out.
    fn drain_and_restart(&self) -> Result<()>;
}

/// Re-executes the binary with the arguments and working directory it was
/// started with
#[derive(Debug, Clone)]
pub struct ExecRestart {
    cwd: PathBuf,
    argv: Vec<OsString>,
}

impl ExecRestart {
    /// Record the current invocation; call early, before anything changes
    /// the working directory
    pub fn capture() -> Result<Self> {
        let cwd = std::env::current_dir()?;
        let argv: Vec<OsString> = std::env::args_os().collect();
        if argv.is_empty() {
            return Err(Error::internal("Empty argument vector, cannot restart"));
        }
        Ok(Self { cwd, argv })
    }
}

impl ProcessLifecycle for ExecRestart {
    fn drain_and_restart(&self) -> Result<()> {
        info!("Re-executing {:?} in {}", self.argv[0], self.cwd.display());
        std::env::set_current_dir(&self.cwd)?;
        let err = Command::new(&self.argv[0]).args(&self.argv[1..]).exec();
        Err(Error::internal(format!("exec failed: {}", err)))
    }
}
