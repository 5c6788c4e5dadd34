//! Shell-command executor.
//!
//! Every host-tool interaction in this crate — `nmcli`, `bluetoothctl`,
//! `hciconfig`, `btmgmt`, `iwgetid`, `iptables`, `dnsmasq`, `sdptool` — funnels
//! through [`run`]. This is the one seam the rest of the crate is testable
//! by substitution against: a fake executor can replace the real one in
//! integration tests without touching any caller.
//!
//! Commands run over [`tokio::process::Command`] so a shell-out is a
//! suspension point, not a blocking syscall.

use log::debug;
use tokio::process::Command;

/// Fixed PATH every child process runs with, matching the host's own
/// bring-up environment rather than whatever inherited `$PATH` the daemon
/// happened to start with.
const FIXED_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// Outcome of a shell invocation. Never an `Err` on non-zero exit — the
/// caller decides what a failing exit code means for its own operation.
#[derive(Debug, Clone)]
pub struct ShellResult {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl ShellResult {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self { success: true, stdout: stdout.into(), stderr: String::new(), exit_code: 0 }
    }
}

/// Run a single bash command line, returning its captured output.
///
/// Only `PATH` is overridden; the rest of the child's environment is
/// inherited, since `nmcli`/`bluetoothctl` expect `XDG_RUNTIME_DIR` and
/// `DBUS_SESSION_BUS_ADDRESS` to reach the system bus on some hosts.
pub async fn run(command_line: &str) -> ShellResult {
    debug!("shell: {command_line}");
    let output = Command::new("/bin/bash")
        .arg("-c")
        .arg(command_line)
        .env("PATH", FIXED_PATH)
        .output()
        .await;

    match output {
        Ok(out) => ShellResult {
            success: out.status.success(),
            stdout: String::from_utf8_lossy(&out.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
            exit_code: out.status.code().unwrap_or(-1),
        },
        Err(e) => ShellResult {
            success: false,
            stdout: String::new(),
            stderr: format!("failed to spawn child process: {e}"),
            exit_code: -1,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_stdout_on_success() {
        let res = run("echo hello").await;
        assert!(res.success);
        assert_eq!(res.stdout.trim(), "hello");
        assert_eq!(res.exit_code, 0);
    }

    #[tokio::test]
    async fn never_errs_on_nonzero_exit() {
        let res = run("exit 7").await;
        assert!(!res.success);
        assert_eq!(res.exit_code, 7);
    }

    #[tokio::test]
    async fn fixed_path_is_applied() {
        let res = run("echo $PATH").await;
        assert!(res.success);
        assert_eq!(res.stdout.trim(), FIXED_PATH);
    }
}
