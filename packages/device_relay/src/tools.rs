//! External command runners for the device-control endpoints.

use std::process::Stdio;

/// Result of a command that was run to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    pub ok: bool,
    /// Exit code, `-1` when the process could not be started or was killed
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutcome {
    /// Combined output, for pattern checks.
    pub fn output(&self) -> String {
        format!("{}{}", self.stdout, self.stderr)
    }

    /// Best single message describing a failure.
    pub fn failure_message(&self) -> String {
        if !self.stderr.is_empty() {
            self.stderr.clone()
        } else if !self.stdout.is_empty() {
            self.stdout.clone()
        } else {
            format!("exited with status {}", self.code)
        }
    }
}

/// Run a command and capture its trimmed output. A missing executable is
/// reported as a failed outcome rather than an error.
pub async fn run(program: &str, args: &[&str]) -> CommandOutcome {
    match tokio::process::Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .await
    {
        Ok(output) => CommandOutcome {
            ok: output.status.success(),
            code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        },
        Err(e) => CommandOutcome {
            ok: false,
            code: -1,
            stdout: String::new(),
            stderr: format!("Failed to run {}: {}", program, e),
        },
    }
}

/// Start a command with no stdio and leave it running on its own.
/// Returns the child's pid when the OS reports one.
///
/// The child handle is dropped without `kill_on_drop`; the runtime reaps it
/// once it exits.
pub fn spawn_detached(program: &str, args: &[&str]) -> std::io::Result<Option<u32>> {
    let mut command = tokio::process::Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());

    #[cfg(unix)]
    command.process_group(0);

    let child = command.spawn()?;
    Ok(child.id())
}
