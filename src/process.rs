//! A command to run as an external process.

use std::path::PathBuf;

#[cfg(unix)]
pub use crate::process_posix::{spawn, wait_group, Pid};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub argv: Vec<String>,
    pub cwd: Option<PathBuf>,
    /// Overrides layered on top of the inherited environment.
    pub env: Vec<(String, String)>,
}

impl Command {
    pub fn new<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Command {
            argv: argv.into_iter().map(Into::into).collect(),
            cwd: None,
            env: Vec::new(),
        }
    }

    /// A command line interpreted by /bin/sh.
    pub fn shell(cmdline: &str) -> Self {
        Command::new(["/bin/sh", "-c", cmdline])
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, val: impl Into<String>) -> Self {
        self.env.push((key.into(), val.into()));
        self
    }

    /// The command line as displayed to the user.
    pub fn display(&self) -> String {
        self.argv.join(" ")
    }
}
