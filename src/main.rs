//! airpatch helper binary.
//!
//! Runs the routing daemon and publishes the IPC surface, or performs a
//! single routing operation and exits.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;

use airpatch::devices::{merge_graph_clients, AlsaDeviceProvider, DeviceProvider};
use airpatch::launcher::{ProcessLauncher, ServiceLauncher};
use airpatch::server::{AudioServer, JackServer};
use airpatch::{
    DaemonConfig, IpcServer, ProfileStore, RouteError, RoutingController, RoutingDaemon,
    SwitchOutcome,
};

#[derive(Parser)]
#[command(
    name = "airpatch",
    version,
    about = "Broadcast-safe audio routing daemon"
)]
struct Cli {
    /// Print the device list and server status, then exit.
    #[arg(short = 's', long)]
    scan: bool,

    /// Print profile names and attributes, then exit.
    #[arg(short = 'l', long)]
    list_profiles: bool,

    /// Activate the named profile, wait for the settle delay, then print
    /// the device status.
    #[arg(short = 'p', long, value_name = "NAME")]
    profile: Option<String>,

    /// Print input sources in preference order, marking the active one.
    #[arg(long, alias = "ls")]
    list_sources: bool,

    /// Switch the broadcast input to the named client.
    #[arg(short = 'i', long, value_name = "CLIENT")]
    switch_input: Option<String>,

    /// Clear all non-critical connections of the named client.
    #[arg(short = 'd', long, value_name = "CLIENT")]
    disconnect: Option<String>,

    /// Run without publishing the IPC service.
    #[arg(short = 't', long)]
    test: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    if cli.scan {
        return scan_devices();
    }
    if cli.list_profiles {
        return list_profiles();
    }
    if let Some(name) = &cli.profile {
        return activate_profile(name).await;
    }
    if cli.list_sources {
        return list_sources();
    }
    if let Some(client) = &cli.switch_input {
        return switch_input(client);
    }
    if let Some(client) = &cli.disconnect {
        return disconnect_all(client);
    }

    run_daemon(cli.test).await
}

fn build_controller() -> (RoutingController, Arc<dyn ServiceLauncher>) {
    let config = DaemonConfig::default();
    let server: Arc<dyn AudioServer> = Arc::new(JackServer::new());
    // One-shot invocations need a session immediately; the daemon's status
    // poller takes over from here.
    server.refresh_session();

    let store_path = config
        .profile_store_path
        .clone()
        .unwrap_or_else(ProfileStore::default_path);
    let store = ProfileStore::open(store_path);
    let launcher: Arc<dyn ServiceLauncher> = Arc::new(ProcessLauncher::default());
    let controller = RoutingController::new(server, launcher.clone(), store, config);
    (controller, launcher)
}

fn print_device_status(controller: &RoutingController) {
    let mut devices = AlsaDeviceProvider.scan();
    merge_graph_clients(&mut devices, &controller.graph().snapshot());

    println!("=== Audio Devices ===");
    for device in &devices {
        println!("{}", device.name);
        println!("  id:      {}", device.card_id);
        println!("  type:    {}", device.device_type);
        println!("  inputs:  {}", device.input_channels);
        println!("  outputs: {}", device.output_channels);
        println!("  active:  {}", if device.is_active { "yes" } else { "no" });
    }
    println!(
        "Audio server: {}",
        if controller.server().is_running() {
            "running"
        } else {
            "not running"
        }
    );
}

fn scan_devices() -> ExitCode {
    let (controller, _launcher) = build_controller();
    if let Err(err) = controller.graph().refresh() {
        tracing::warn!(?err, "graph refresh failed");
    }
    print_device_status(&controller);
    ExitCode::SUCCESS
}

fn list_profiles() -> ExitCode {
    let (controller, _launcher) = build_controller();
    println!("=== Profiles ===");
    for profile in controller.store().profiles() {
        println!("{}", profile.name);
        if !profile.description.is_empty() {
            println!("  {}", profile.description);
        }
        println!("  auto_activate: {}", profile.auto_activate);
        if !profile.auto_clients.is_empty() {
            println!("  auto_clients:  {}", profile.auto_clients.join(", "));
        }
        for (client, value) in &profile.priorities {
            println!("  priority:      {client} = {value}");
        }
        for (source, sink) in &profile.connections {
            println!("  edge:          {source} -> {sink}");
        }
    }
    ExitCode::SUCCESS
}

async fn activate_profile(name: &str) -> ExitCode {
    let (mut controller, _launcher) = build_controller();
    match controller.load_profile(name).await {
        Ok(()) => {}
        Err(RouteError::UnknownProfile { name }) => {
            eprintln!("unknown profile: {name}");
            return ExitCode::from(1);
        }
        Err(err) => {
            tracing::warn!(?err, "profile activation degraded");
        }
    }

    tokio::time::sleep(controller.config().settle_delay).await;
    controller.complete_activation();

    print_device_status(&controller);
    ExitCode::SUCCESS
}

fn list_sources() -> ExitCode {
    let (controller, _launcher) = build_controller();
    if let Err(err) = controller.graph().refresh() {
        tracing::warn!(?err, "graph refresh failed");
    }
    let active = controller.current_input_source(&controller.source_host());

    println!("=== Input Sources ===");
    for source in controller.enumerate_input_sources() {
        let marker = if Some(&source) == active.as_ref() {
            " (active)"
        } else {
            ""
        };
        println!("{source}{marker}");
    }
    ExitCode::SUCCESS
}

fn switch_input(client: &str) -> ExitCode {
    let (mut controller, _launcher) = build_controller();
    let target = controller.source_host();
    match controller.switch_input(client, &target) {
        Ok(SwitchOutcome::Switched) => {
            println!("input switched to {client}");
            ExitCode::SUCCESS
        }
        Ok(SwitchOutcome::Partial { failed }) => {
            eprintln!("input partially switched; failed pairs:");
            for (source, sink) in failed {
                eprintln!("  {source} -> {sink}");
            }
            ExitCode::from(1)
        }
        Err(err) => {
            eprintln!("input switch failed: {err}");
            ExitCode::from(1)
        }
    }
}

fn disconnect_all(client: &str) -> ExitCode {
    let (mut controller, _launcher) = build_controller();
    match controller.disconnect_all_from(client) {
        Ok(()) => {
            println!("cleared non-critical connections of {client}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("disconnect refused: {err}");
            ExitCode::from(1)
        }
    }
}

async fn run_daemon(test_mode: bool) -> ExitCode {
    let (controller, launcher) = build_controller();
    let events = controller.events();
    let socket_path = controller
        .config()
        .socket_path
        .clone()
        .unwrap_or_else(DaemonConfig::default_socket_path);

    let daemon = RoutingDaemon::new(controller, Arc::new(AlsaDeviceProvider), launcher);
    let handle = daemon.handle();

    if test_mode {
        tracing::info!("test mode: IPC service not published");
    } else {
        let ipc = IpcServer::new(socket_path, handle.clone(), &events);
        tokio::spawn(async move {
            if let Err(err) = ipc.run().await {
                tracing::error!(?err, "IPC service failed");
            }
        });
    }

    let shutdown = handle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutting down");
            shutdown.shutdown().await;
        }
    });

    daemon.run().await;
    ExitCode::SUCCESS
}
