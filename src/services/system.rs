//! Process helpers shared by the device-facing services.

use tokio::process::Command;

use crate::types::UpdaterError;

/// Run a command and return its stdout. Non-zero exit is an error carrying stderr.
pub async fn run_command(command: &str, args: &[String]) -> Result<String, UpdaterError> {
    let output = Command::new(command).args(args).output().await?;
    if output.status.success() {
        return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
    }

    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    Err(UpdaterError::Command(if stderr.is_empty() {
        format!(
            "Command `{}` with args {:?} failed with status {}",
            command, args, output.status
        )
    } else {
        format!(
            "Command `{}` with args {:?} failed: {}",
            command, args, stderr
        )
    }))
}
