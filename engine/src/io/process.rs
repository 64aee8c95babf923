//! Launch step commands in their own process group and tear the group down.
//!
//! On unix every step runs as the leader of a fresh process group, so a single
//! `killpg` reaches the shell, the command it started, and anything those
//! spawned in the background. Other platforms only reach the direct child.

use std::collections::BTreeMap;
use std::io;
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Context, Result};
use tracing::{debug, error, instrument, warn};

/// Handle to the process group of one launched step.
///
/// The group id is the leader's pid, which the kernel may hand out again once
/// the leader has been reaped. Signals are therefore only sent while the
/// leader is alive or a zombie: [`Self::reap`] kills the group before it
/// collects the leader, and every signal after that is a no-op.
#[derive(Debug, Clone)]
pub struct ProcessGroup {
    leader: u32,
    reaped: Arc<Mutex<bool>>,
}

impl ProcessGroup {
    fn new(leader: u32) -> Self {
        Self {
            leader,
            reaped: Arc::new(Mutex::new(false)),
        }
    }

    pub fn leader_pid(&self) -> u32 {
        self.leader
    }

    /// Forcefully terminate every process in the group.
    ///
    /// Idempotent: a group that already exited counts as killed.
    pub fn kill(&self) -> io::Result<()> {
        let reaped = self.lock();
        if *reaped {
            return Ok(());
        }
        platform::kill_group(self.leader)
    }

    /// Ask the group to stop gracefully. Same idempotence as [`Self::kill`].
    pub fn interrupt(&self) -> io::Result<()> {
        let reaped = self.lock();
        if *reaped {
            return Ok(());
        }
        platform::interrupt_group(self.leader)
    }

    /// Block until `leader` exits, kill whatever is left of its group, then reap it.
    ///
    /// `leader` must be the child this group was spawned with.
    pub fn reap(&self, leader: &mut Child) -> io::Result<ExitStatus> {
        platform::await_exit(leader)?;
        let mut reaped = self.lock();
        if !*reaped {
            if let Err(err) = platform::kill_group(self.leader) {
                warn!(pid = self.leader, err = %err, "failed to kill step process group");
            }
        }
        let status = leader.wait();
        *reaped = true;
        status
    }

    fn lock(&self) -> MutexGuard<'_, bool> {
        self.reaped
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Variables of the current process. Entries that are not valid UTF-8 are dropped.
pub fn inherited_env() -> BTreeMap<String, String> {
    std::env::vars_os()
        .filter_map(|(key, value)| Some((key.into_string().ok()?, value.into_string().ok()?)))
        .collect()
}

/// Command running `cmd` through the platform shell.
pub fn shell_command(cmd: &str) -> Command {
    let mut command = Command::new(platform::SHELL);
    command.arg(platform::SHELL_FLAG).arg(cmd);
    command
}

/// Spawn `cmd` in `workdir` as the leader of a new process group.
///
/// The child sees exactly `env` (the inherited environment is cleared), reads
/// from a null stdin, and writes to piped stdout/stderr.
#[instrument(skip_all, fields(workdir = %workdir.display()))]
pub fn spawn_group(
    cmd: &str,
    workdir: &Path,
    env: &BTreeMap<String, String>,
) -> Result<(Child, ProcessGroup)> {
    let mut command = shell_command(cmd);
    command
        .current_dir(workdir)
        .env_clear()
        .envs(env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    platform::detach(&mut command);

    debug!("spawning step process group");
    let child = match command.spawn() {
        Ok(child) => child,
        Err(err) => {
            error!(err = %err, "failed to spawn step command");
            return Err(err).with_context(|| format!("spawn `{cmd}` in {}", workdir.display()));
        }
    };
    let group = ProcessGroup::new(child.id());
    debug!(pid = group.leader, "step process group started");
    Ok((child, group))
}

#[cfg(unix)]
mod platform {
    use std::io;
    use std::mem;
    use std::os::unix::process::CommandExt;
    use std::process::{Child, Command};

    pub const SHELL: &str = "sh";
    pub const SHELL_FLAG: &str = "-c";

    pub fn detach(command: &mut Command) {
        command.process_group(0);
    }

    /// Wait for `child` to exit without reaping it.
    #[allow(unsafe_code)]
    pub fn await_exit(child: &mut Child) -> io::Result<()> {
        let pid = libc::id_t::from(child.id());
        loop {
            // SAFETY: siginfo_t is plain data for which all-zero bytes are valid,
            // and waitid only writes into the struct we hand it.
            let mut info: libc::siginfo_t = unsafe { mem::zeroed() };
            // SAFETY: `info` is a valid, exclusively borrowed siginfo_t.
            let rc = unsafe {
                libc::waitid(libc::P_PID, pid, &mut info, libc::WEXITED | libc::WNOWAIT)
            };
            if rc == 0 {
                return Ok(());
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        }
    }

    pub fn kill_group(leader: u32) -> io::Result<()> {
        signal_group(leader, libc::SIGKILL)
    }

    pub fn interrupt_group(leader: u32) -> io::Result<()> {
        signal_group(leader, libc::SIGTERM)
    }

    #[allow(unsafe_code)]
    fn signal_group(leader: u32, signal: libc::c_int) -> io::Result<()> {
        let pgid = libc::pid_t::try_from(leader)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
        // SAFETY: killpg takes plain integers and touches no memory of ours.
        let rc = unsafe { libc::killpg(pgid, signal) };
        if rc == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ESRCH) {
            return Ok(());
        }
        Err(err)
    }
}

#[cfg(not(unix))]
mod platform {
    use std::io;
    use std::process::{Child, Command, Stdio};

    pub const SHELL: &str = "cmd";
    pub const SHELL_FLAG: &str = "/C";

    pub fn detach(_command: &mut Command) {}

    /// The open process handle keeps the pid reserved, so waiting here is safe.
    pub fn await_exit(child: &mut Child) -> io::Result<()> {
        child.wait().map(|_| ())
    }

    /// Terminates the direct child only.
    pub fn kill_group(leader: u32) -> io::Result<()> {
        // taskkill fails for processes that already exited; that is still "killed".
        Command::new("taskkill")
            .args(["/PID", &leader.to_string(), "/F"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|_| ())
    }

    pub fn interrupt_group(leader: u32) -> io::Result<()> {
        Command::new("taskkill")
            .args(["/PID", &leader.to_string()])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|_| ())
    }
}
