//! Running the Open vSwitch command-line tools

use crate::error::SwitchError;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

/// Runs `program args...`, optionally feeding `input` on stdin, and returns
/// stdout. A non-zero exit status is an error carrying stderr.
pub(crate) async fn run(
    program: &str,
    args: &[String],
    input: Option<&str>,
    limit: Duration,
) -> Result<String, SwitchError> {
    let command_line = format!("{} {}", program, args.join(" "));
    debug!("Running {}", command_line);

    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(if input.is_some() { Stdio::piped() } else { Stdio::null() })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command.spawn().map_err(|e| SwitchError::Spawn {
        command: program.to_string(),
        source: e,
    })?;

    let execution = async {
        if let (Some(input), Some(mut stdin)) = (input, child.stdin.take()) {
            stdin.write_all(input.as_bytes()).await?;
            // stdin is closed on drop so the tool sees EOF
        }
        child.wait_with_output().await
    };

    let output = timeout(limit, execution)
        .await
        .map_err(|_| SwitchError::Timeout {
            command: command_line.clone(),
            seconds: limit.as_secs(),
        })?
        .map_err(|e| SwitchError::Spawn {
            command: program.to_string(),
            source: e,
        })?;

    if !output.status.success() {
        return Err(SwitchError::Command {
            command: command_line,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
