//! Device-facing services backed by a configurable command line (`adb` by default).

use async_trait::async_trait;
use reqwest::Url;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::system::run_command;
use super::{Installer, PackageRegistry};
use crate::pending::InstallResultRouter;
use crate::types::{InstallResult, InstalledVersion, UpdaterError};

const ARTIFACT_PLACEHOLDER: &str = "{artifact}";
const MIME_PLACEHOLDER: &str = "{mime}";
const PACKAGE_PLACEHOLDER: &str = "{package}";

fn split_command(template: &[String]) -> Result<(&str, &[String]), UpdaterError> {
    match template.split_first() {
        Some((program, args)) if !program.trim().is_empty() => Ok((program.as_str(), args)),
        _ => Err(UpdaterError::Config("Command template is empty".to_string())),
    }
}

fn substitute(args: &[String], replacements: &[(&str, &str)]) -> Vec<String> {
    args.iter()
        .map(|arg| {
            replacements
                .iter()
                .fold(arg.clone(), |acc, (key, value)| acc.replace(*key, value))
        })
        .collect()
}

/// Local filesystem path for a `file://` URI; other strings pass through.
fn artifact_path(artifact_uri: &str) -> String {
    Url::parse(artifact_uri)
        .ok()
        .filter(|url| url.scheme() == "file")
        .and_then(|url| url.to_file_path().ok())
        .map(|path| path.to_string_lossy().into_owned())
        .unwrap_or_else(|| artifact_uri.to_string())
}

/// Runs the install command in the background and reports its exit status
/// as the install result.
pub struct CommandInstaller {
    command: Vec<String>,
}

impl CommandInstaller {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }
}

#[async_trait]
impl Installer for CommandInstaller {
    async fn request_install(
        &self,
        artifact_uri: &str,
        mime_type: &str,
        request_code: i32,
        results: Arc<InstallResultRouter>,
    ) -> Result<(), UpdaterError> {
        let (program, args) = split_command(&self.command)?;
        let program = program.to_string();
        let path = artifact_path(artifact_uri);
        let args = substitute(
            args,
            &[(ARTIFACT_PLACEHOLDER, path.as_str()), (MIME_PLACEHOLDER, mime_type)],
        );
        info!(program = %program, ?args, "Launching installer");

        tokio::spawn(async move {
            let result = match run_command(&program, &args).await {
                Ok(stdout) => {
                    debug!(output = %stdout.trim(), "Installer finished");
                    InstallResult::Installed
                }
                Err(err) => {
                    warn!(error = ?err, "Installer reported failure");
                    InstallResult::Failed(err.to_string())
                }
            };
            results.deliver(request_code, result);
        });

        Ok(())
    }
}

/// Queries the installed version through a command whose output contains
/// a `versionName=<version>` line.
pub struct CommandRegistry {
    command: Vec<String>,
}

impl CommandRegistry {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }
}

#[async_trait]
impl PackageRegistry for CommandRegistry {
    async fn installed_version(&self, package_id: &str) -> Result<InstalledVersion, UpdaterError> {
        let (program, args) = split_command(&self.command)?;
        let args = substitute(args, &[(PACKAGE_PLACEHOLDER, package_id)]);
        let output = run_command(program, &args).await?;
        Ok(parse_version_name(&output))
    }
}

fn parse_version_name(output: &str) -> InstalledVersion {
    output
        .lines()
        .filter_map(|line| line.trim().strip_prefix("versionName="))
        .map(str::trim)
        .find(|version| !version.is_empty())
        .map(|version| InstalledVersion::Installed(version.to_string()))
        .unwrap_or(InstalledVersion::NotInstalled)
}
