//! The `custodyd` daemon.
//!
//! Owns the shared [`FamilyRegistry`], starts the monitors feeding it and
//! serves the management API until a termination signal arrives.

use std::sync::Arc;

use anyhow::{Context, Result};
use custody_core::{
    FamilyRegistry, ProcessControl, RegistryLimits, SignalProcessControl, control::Controller,
};
use engine_api::server::{self, EngineAPIContext};
use file_system_monitor::{FileGuard, InodeResolver};
use nix::unistd::geteuid;
use process_monitor::{ProcessGuard, ProcessMonitorHandle, ProcessWatcher, start_process_monitor};
use tokio::signal::unix::{SignalKind, signal};

use crate::cli::custodyd::CustodyDaemonOpts;

mod config;

pub use config::CustodyConfig;

/// General configuration section for settings not tied to a monitor.
const GENERAL_CONFIG: &str = "custody";
const REGISTRY_CONFIG: &str = "registry";

/// Entry points for the platform event sources.
///
/// The daemon builds these and hands them to the caller of
/// [`custody_daemon_run`], which connects its process and filesystem feeds.
#[derive(Clone)]
pub struct Monitors {
    pub registry: Arc<FamilyRegistry>,
    pub process_monitor: ProcessMonitorHandle,
    pub process_guard: Arc<ProcessGuard>,
    pub file_guard: Arc<FileGuard>,
}

pub async fn custody_daemon_run<F>(options: &CustodyDaemonOpts, connect_feeds: F) -> Result<()>
where
    F: FnOnce(&Monitors) -> Result<()>,
{
    log::trace!("Custody Daemon Options: {:?}", options);

    if !geteuid().is_root() {
        log::warn!("Not running as root: terminating foreign processes will fail");
    }

    let config = if let Some(custom_file) = &options.config_file {
        CustodyConfig::with_custom_file(custom_file)?
    } else {
        CustodyConfig::new()?
    };
    log::debug!("Configuration loaded from {}", config.config_file().display());

    let monitors = start_monitors(&config)?;
    let process_control: Arc<dyn ProcessControl> = Arc::new(SignalProcessControl);

    connect_feeds(&monitors).context("Error connecting event feeds")?;

    let server_handle = {
        let general_config = config.section(GENERAL_CONFIG);
        let custom_socket_path = general_config.get_raw("api_socket_path");
        let controller = Controller::new(monitors.registry.clone(), process_control);

        server::run_api_server(
            EngineAPIContext {
                controller,
                version: crate::metadata::VERSION.to_string(),
            },
            custom_socket_path,
        )?
    };

    let mut sig_int = signal(SignalKind::interrupt())?;
    let mut sig_term = signal(SignalKind::terminate())?;
    let mut sig_hup = signal(SignalKind::hangup())?;

    tokio::select! {
        _ = sig_int.recv() => log::trace!("SIGINT received"),
        _ = sig_term.recv() => log::trace!("SIGTERM received"),
        _ = sig_hup.recv() => log::trace!("SIGHUP received"),
    }

    log::info!("Terminating the Engine Api Server...");
    server_handle.stop().await;

    log::info!(
        "Releasing {} watched families...",
        monitors.registry.family_count()
    );
    // wakes every root still waiting for its children
    monitors.registry.clear();

    Ok(())
}

fn start_monitors(config: &CustodyConfig) -> Result<Monitors> {
    let limits = RegistryLimits::try_from(&config.section(REGISTRY_CONFIG))
        .with_context(|| format!("Invalid [{REGISTRY_CONFIG}] configuration"))?;
    log::info!(
        "Tracking up to {} families ({} processes, {} files each)",
        limits.max_families,
        limits.max_members,
        limits.max_files
    );
    let registry = Arc::new(FamilyRegistry::new(limits));

    let process_config =
        process_monitor::Config::try_from(&config.section(process_monitor::MODULE_NAME))
            .with_context(|| format!("Invalid [{}] configuration", process_monitor::MODULE_NAME))?;
    let watcher = ProcessWatcher::new(
        registry.clone(),
        Arc::new(SignalProcessControl),
        process_config,
    );

    let fs_config =
        file_system_monitor::Config::try_from(&config.section(file_system_monitor::MODULE_NAME))
            .with_context(|| {
                format!("Invalid [{}] configuration", file_system_monitor::MODULE_NAME)
            })?;
    let file_guard = FileGuard::new(registry.clone(), Arc::new(InodeResolver), fs_config);

    Ok(Monitors {
        process_monitor: start_process_monitor(watcher),
        process_guard: Arc::new(ProcessGuard::new(registry.clone())),
        file_guard: Arc::new(file_guard),
        registry,
    })
}
