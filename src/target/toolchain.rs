use crate::generate::context::CancelToken;
use anyhow::{Context, Result, anyhow};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::Duration;

/// Outcome of a cancellable toolchain step.
#[derive(Debug, PartialEq, Eq)]
pub enum ToolStatus {
    Success,
    Cancelled,
}

/// One external toolchain invocation.
#[derive(Debug, Clone)]
pub struct ToolCommand {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    /// Environment overrides (e.g. `CC`) passed through on the subprocess.
    pub envs: Vec<(String, String)>,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: vec![],
            cwd: cwd.into(),
            envs: vec![],
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I: IntoIterator<Item = S>, S: Into<String>>(mut self, args: I) -> Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }
}

/// Run `command` to completion, polling the cancel token. On cancellation the
/// child is killed, not merely abandoned. On non-zero exit the toolchain's own
/// diagnostic text is surfaced verbatim in the error.
pub fn run_cancellable(command: &ToolCommand, cancel: &CancelToken) -> Result<ToolStatus> {
    log::debug!(
        "Running {} {} in {}",
        command.program,
        command.args.join(" "),
        command.cwd.display()
    );

    let mut cmd = Command::new(&command.program);
    cmd.args(&command.args)
        .current_dir(&command.cwd)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    for (key, value) in &command.envs {
        cmd.env(key, value);
    }

    let mut child = cmd
        .spawn()
        .with_context(|| format!("Failed to spawn toolchain command '{}'", command.program))?;

    let output = loop {
        if cancel.is_cancelled() {
            let _ = child.kill();
            let _ = child.wait();
            return Ok(ToolStatus::Cancelled);
        }
        if child
            .try_wait()
            .with_context(|| format!("Failed to poll '{}'", command.program))?
            .is_some()
        {
            break child
                .wait_with_output()
                .with_context(|| format!("Failed to read output of '{}'", command.program))?;
        }
        std::thread::sleep(Duration::from_millis(20));
    };

    let stderr = String::from_utf8_lossy(&output.stderr);
    if !output.status.success() {
        let stdout = String::from_utf8_lossy(&output.stdout);
        return Err(anyhow!(
            "'{}' exited with {}:\n{}{}",
            command.program,
            output.status,
            stdout,
            stderr
        ));
    }
    if crate::helpers::contains_ascii_characters(&stderr) {
        log::warn!("{}", stderr.trim_end());
    }
    Ok(ToolStatus::Success)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn successful_command_returns_success() {
        let dir = tempfile::tempdir().unwrap();
        let command = ToolCommand::new("true", dir.path());
        assert_eq!(run_cancellable(&command, &CancelToken::new()).unwrap(), ToolStatus::Success);
    }

    #[test]
    fn failing_command_surfaces_its_output() {
        let dir = tempfile::tempdir().unwrap();
        let command = ToolCommand::new("sh", dir.path()).args(["-c", "echo boom >&2; exit 3"]);
        let err = run_cancellable(&command, &CancelToken::new()).unwrap_err();
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn missing_binary_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let command = ToolCommand::new("definitely-not-a-real-toolchain", dir.path());
        let err = run_cancellable(&command, &CancelToken::new()).unwrap_err();
        assert!(err.to_string().contains("Failed to spawn"));
    }

    #[test]
    fn pre_cancelled_token_kills_the_subprocess() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();
        let command = ToolCommand::new("sleep", dir.path()).arg("30");
        let started = std::time::Instant::now();
        assert_eq!(run_cancellable(&command, &cancel).unwrap(), ToolStatus::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
