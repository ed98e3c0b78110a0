//! External command runner for the rendering tools.

use std::ffi::OsStr;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::debug;

use repotutor_shared::{RepoTutorError, Result};

/// Keep at most this many bytes of tool stderr in error messages.
const MAX_STDERR_BYTES: usize = 2048;

/// Run `command` with `args`, failing on spawn error, non-zero exit or timeout.
///
/// `command` may carry leading arguments (`"npx mmdc"`); they are split on
/// whitespace and placed before `args`.
pub(crate) async fn run_tool<I, S>(
    command: &str,
    args: I,
    cwd: Option<&Path>,
    timeout: Duration,
) -> Result<()>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut parts = command.split_whitespace();
    let Some(program) = parts.next() else {
        return Err(RepoTutorError::config("empty tool command"));
    };

    let mut cmd = Command::new(program);
    cmd.args(parts)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }

    let child = cmd.spawn().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            RepoTutorError::Render(format!("`{program}` not found. Is it installed and on PATH?"))
        } else {
            RepoTutorError::Render(format!("failed to spawn `{program}`: {e}"))
        }
    })?;

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            return Err(RepoTutorError::Render(format!("`{program}` failed: {e}")));
        }
        Err(_) => {
            return Err(RepoTutorError::Render(format!(
                "`{program}` timed out after {}s",
                timeout.as_secs()
            )));
        }
    };

    if !output.status.success() {
        return Err(RepoTutorError::Render(format!(
            "`{program}` exited with {}: {}",
            output.status,
            stderr_tail(&output.stderr)
        )));
    }

    debug!(program, "tool finished");
    Ok(())
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    if text.len() <= MAX_STDERR_BYTES {
        return text.to_string();
    }
    let mut start = text.len() - MAX_STDERR_BYTES;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    format!("...{}", &text[start..])
}
