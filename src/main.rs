use std::sync::Arc;

use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use whats_updater::services::{
    CommandInstaller, CommandRegistry, HttpPageSource, LocalDownloadQueue, SysfsNetworkMonitor,
};
use whats_updater::{Config, Services, UpdateController, UpdaterError};

#[derive(Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum Output<'a, T: Serialize> {
    View { payload: &'a T },
    Install { payload: &'a T },
    Rejected { message: String },
}

fn emit<T: Serialize>(output: &Output<'_, T>) {
    match serde_json::to_string(output) {
        Ok(line) => println!("{line}"),
        Err(err) => error!(error = ?err, "Failed to serialize output"),
    }
}

fn reject(err: &UpdaterError) {
    emit::<()>(&Output::Rejected {
        message: err.to_string(),
    });
}

async fn check(controller: Arc<UpdateController>) {
    match controller.check_for_update().await {
        Ok(view) => emit(&Output::View { payload: &view }),
        Err(err) => {
            warn!(error = %err, "Check rejected");
            reject(&err);
        }
    }
}

async fn install(controller: Arc<UpdateController>) {
    match controller.install_update().await {
        Ok(report) => {
            emit(&Output::Install { payload: &report });
            emit(&Output::View {
                payload: &controller.view(),
            });
        }
        Err(err) => {
            warn!(error = %err, "Install rejected");
            reject(&err);
        }
    }
}

fn build_controller(config: &Config) -> Result<UpdateController, UpdaterError> {
    let services = Services {
        page: Arc::new(HttpPageSource::new(config.http_timeout())?),
        network: Arc::new(SysfsNetworkMonitor::new(config.network_policy)),
        registry: Arc::new(CommandRegistry::new(config.version_command.clone())),
        queue: Arc::new(LocalDownloadQueue::new(Some(config.http_timeout() * 20))?),
        installer: Arc::new(CommandInstaller::new(config.install_command.clone())),
    };
    UpdateController::from_config(config, services)
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Config::load().await;
    let controller = match build_controller(&config) {
        Ok(controller) => Arc::new(controller),
        Err(err) => {
            error!(error = %err, "Failed to initialise updater");
            std::process::exit(1);
        }
    };

    // Initial check, as when the view first becomes visible.
    tokio::spawn(check(controller.clone()));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(err) => {
                error!(error = ?err, "Failed to read command");
                break;
            }
        };
        match line.trim() {
            "" => continue,
            "check" | "refresh" => {
                tokio::spawn(check(controller.clone()));
            }
            "install" => {
                tokio::spawn(install(controller.clone()));
            }
            "status" => emit(&Output::View {
                payload: &controller.view(),
            }),
            "quit" | "exit" => break,
            other => warn!(command = other, "Unknown command"),
        }
    }

    info!("Shutting down");
    controller.teardown();
}
