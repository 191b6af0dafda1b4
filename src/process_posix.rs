//! Spawning into, and reaping from, a posix process group.
//!
//! Processes are spawned with std's Command but reaped with waitpid() on
//! the whole group, so a single blocking call can wait for whichever member
//! of the pool finishes first.

use crate::process::Command;
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::process::{ExitStatus, Stdio};

pub type Pid = libc::pid_t;

/// Spawn `cmd`.  With `group` None the process leads a new process group
/// (whose id is its pid); otherwise it joins the given group.
pub fn spawn(cmd: &Command, group: Option<Pid>) -> std::io::Result<Pid> {
    let (program, args) = match cmd.argv.split_first() {
        Some(split) => split,
        None => {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty command line",
            ))
        }
    };
    let mut proc = std::process::Command::new(program);
    proc.args(args).stdin(Stdio::null());
    if let Some(dir) = &cmd.cwd {
        proc.current_dir(dir);
    }
    for (key, val) in &cmd.env {
        proc.env(key, val);
    }
    proc.process_group(group.unwrap_or(0));

    // Dropping the Child does not wait; wait_group reaps it.
    let child = proc.spawn()?;
    Ok(child.id() as Pid)
}

/// Block until any process in `group` exits, returning its pid and status.
pub fn wait_group(group: Pid) -> std::io::Result<(Pid, ExitStatus)> {
    loop {
        let mut status: libc::c_int = 0;
        // Safety: waitpid only writes through the status pointer.
        let pid = unsafe { libc::waitpid(-group, &mut status, 0) };
        if pid < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err);
        }
        return Ok((pid, ExitStatus::from_raw(status)));
    }
}
