//! Managed subprocess execution for external trainers, evaluators and plot
//! renderers.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::config::ExternalCommand;
use crate::error::ExternalError;

/// Replace every `{name}` in `arg` with its value.
///
/// Unknown placeholders are left as they are.
pub fn substitute(arg: &str, vars: &[(&str, String)]) -> String {
    vars.iter().fold(arg.to_string(), |acc, (name, value)| {
        acc.replace(&format!("{{{name}}}"), value)
    })
}

/// Run `command` with placeholders substituted, returning its stdout.
///
/// A non-zero exit status is reported with the process's stderr.
pub async fn run(
    command: &ExternalCommand,
    vars: &[(&str, String)],
    cwd: &Path,
    stdin: Option<&[u8]>,
) -> Result<Vec<u8>, ExternalError> {
    let args: Vec<String> = command.args.iter().map(|a| substitute(a, vars)).collect();
    let timeout = Duration::from_secs(command.timeout_secs);

    debug!(program = %command.program, ?args, "Running external command");

    let result = tokio::time::timeout(timeout, async {
        let mut child = Command::new(&command.program)
            .args(&args)
            .current_dir(cwd)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ExternalError::Failed(format!("failed to spawn '{}': {e}", command.program))
            })?;

        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(input).await?;
            pipe.shutdown().await?;
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ExternalError::Failed(format!(
                "'{}' failed ({}): {}",
                command.program,
                output.status,
                stderr.trim()
            )));
        }
        Ok(output.stdout)
    })
    .await;

    match result {
        Ok(inner) => inner,
        Err(_) => Err(ExternalError::Timeout {
            timeout_secs: command.timeout_secs,
        }),
    }
}
