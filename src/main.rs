//! Background Geolocation CLI
//!
//! Replays scripted platform traces through the watcher lifecycle core.

use anyhow::{bail, Context};
use background_geolocation::{
    config::PluginConfig,
    coordinator::{Coordinator, CoordinatorHandle, PlatformEventSink, Subscription},
    diagnostics::create_shared_log_with_persistence,
    platform::{
        PermissionState, PlatformError, PlatformEvent, PlatformFlavor, RawFix, SimPlatform,
        StreamToken,
    },
    GeolocationPlugin, WatcherOptions, VERSION,
};
use chrono::{DateTime, Duration, Utc};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "bg-geolocation")]
#[command(version = VERSION)]
#[command(about = "Watcher lifecycle core for background geolocation", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a platform trace against a simulated device
    Replay {
        /// JSON trace file
        trace: PathBuf,

        /// Forward accepted fixes to the configured remote session store
        #[arg(long)]
        forward: bool,
    },

    /// Resolve a coordinate to a what3words address
    Lookup {
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,

        #[arg(long, allow_hyphen_values = true)]
        lng: f64,

        /// API key (defaults to the configured key)
        #[arg(long)]
        key: Option<String>,
    },

    /// Show cumulative diagnostics
    Status,

    /// Show configuration
    Config,
}

/// A scripted session on a simulated device.
#[derive(Debug, Deserialize)]
struct Trace {
    /// Defaults to the configured flavor
    #[serde(default)]
    flavor: Option<PlatformFlavor>,
    /// Device clock at the start of the trace
    #[serde(default = "Utc::now")]
    start: DateTime<Utc>,
    #[serde(default = "full_permission")]
    permission: PermissionState,
    #[serde(default = "default_watcher_id")]
    watcher_id: String,
    #[serde(default)]
    options: WatcherOptions,
    #[serde(default)]
    steps: Vec<Step>,
}

fn full_permission() -> PermissionState {
    PermissionState::Full
}

fn default_watcher_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[derive(Debug, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
enum Step {
    Advance { millis: i64 },
    Fixes { fixes: Vec<RawFix> },
    Error { error: PlatformError },
    Permission { state: PermissionState, granted: bool },
    Authorization { state: PermissionState },
    LastKnown { fix: Option<RawFix> },
    Pause,
    Resume,
    Unsubscribe,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Replay { trace, forward } => cmd_replay(&trace, forward),
        Commands::Lookup { lat, lng, key } => cmd_lookup(lat, lng, key),
        Commands::Status => cmd_status(),
        Commands::Config => cmd_config(),
    }
}

fn cmd_replay(path: &PathBuf, forward: bool) -> anyhow::Result<()> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read {path:?}"))?;
    let trace: Trace = serde_json::from_str(&content).context("Invalid trace")?;

    let config = PluginConfig::load().unwrap_or_default();
    if let Err(e) = config.ensure_directories() {
        tracing::warn!("Could not create directories: {}", e);
    }
    let diagnostics = create_shared_log_with_persistence(config.diagnostics_path());

    let probe = SimPlatform::new(trace.flavor.unwrap_or(config.flavor), trace.start);
    probe.set_permission(trace.permission);

    let mut plugin = GeolocationPlugin::new(Box::new(probe.clone()), diagnostics.clone())
        .with_notification_defaults(config.notification.clone());
    if forward {
        plugin = attach_forwarder(plugin, &config, diagnostics.clone())?;
    }

    let coordinator = Coordinator::spawn(plugin)?;
    let handle = coordinator.handle();

    let subscription = handle.add_watcher(trace.watcher_id.clone(), trace.options.clone())?;
    tracing::info!(id = %subscription.id, outcome = ?subscription.outcome, "watcher added");
    flush(&handle, &probe, &subscription)?;

    for step in trace.steps {
        apply_step(&handle, &probe, &subscription.id, step)?;
        flush(&handle, &probe, &subscription)?;
    }

    coordinator.shutdown();

    if let Err(e) = diagnostics.save() {
        tracing::warn!("Could not save diagnostics: {}", e);
    }
    eprintln!();
    eprintln!("{}", diagnostics.summary());
    Ok(())
}

#[cfg(feature = "remote")]
fn attach_forwarder(
    plugin: GeolocationPlugin,
    config: &PluginConfig,
    diagnostics: background_geolocation::SharedDiagnosticsLog,
) -> anyhow::Result<GeolocationPlugin> {
    if !config.forwarding_configured() {
        bail!(
            "Remote forwarding needs session_store.project_id in {:?}",
            PluginConfig::config_path()
        );
    }
    let forwarder = background_geolocation::RemoteLogForwarder::from_config(config, diagnostics)?;
    Ok(plugin.with_forwarder(forwarder))
}

#[cfg(not(feature = "remote"))]
fn attach_forwarder(
    _plugin: GeolocationPlugin,
    _config: &PluginConfig,
    _diagnostics: background_geolocation::SharedDiagnosticsLog,
) -> anyhow::Result<GeolocationPlugin> {
    bail!("--forward requires the remote feature")
}

fn send_to_stream(
    sink: &PlatformEventSink,
    probe: &SimPlatform,
    build: impl FnOnce(StreamToken) -> PlatformEvent,
) {
    match current_token(probe) {
        Some(token) => {
            sink.send(build(token));
        }
        None => tracing::warn!("No native stream yet, step skipped"),
    }
}

/// Token of the most recently created stream.
fn current_token(probe: &SimPlatform) -> Option<StreamToken> {
    probe.streams().keys().next_back().copied()
}

fn apply_step(
    handle: &CoordinatorHandle,
    probe: &SimPlatform,
    watcher_id: &str,
    step: Step,
) -> anyhow::Result<()> {
    let sink = handle.platform_sink();

    match step {
        Step::Advance { millis } => probe.advance(Duration::milliseconds(millis)),
        Step::Fixes { fixes } => {
            send_to_stream(&sink, probe, |token| PlatformEvent::Fixes { token, fixes })
        }
        Step::Error { error } => {
            send_to_stream(&sink, probe, |token| PlatformEvent::Error { token, error })
        }
        Step::Permission { state, granted } => {
            probe.set_permission(state);
            sink.send(PlatformEvent::PermissionResult { granted });
        }
        Step::Authorization { state } => {
            probe.set_permission(state);
            let token = current_token(probe).unwrap_or(StreamToken(0));
            sink.send(PlatformEvent::AuthorizationChanged { token, state });
        }
        Step::LastKnown { fix } => {
            send_to_stream(&sink, probe, |token| PlatformEvent::LastKnown { token, fix })
        }
        Step::Pause => handle.host_paused(),
        Step::Resume => handle.host_resumed(),
        Step::Unsubscribe => match handle.remove_watcher(watcher_id) {
            Ok(()) => tracing::info!(id = %watcher_id, "watcher removed"),
            Err(e) => println!(
                "{}",
                serde_json::json!({ "unsubscribe_error": e.code(), "message": e.to_string() })
            ),
        },
    }
    Ok(())
}

/// Feed queued platform callbacks back in, wait for the coordinator to
/// catch up, then print everything the subscriber received.
fn flush(
    handle: &CoordinatorHandle,
    probe: &SimPlatform,
    subscription: &Subscription,
) -> anyhow::Result<()> {
    let sink = handle.platform_sink();
    for event in probe.take_events() {
        sink.send(event);
    }
    // Commands are processed in order, so a reply means everything before it ran.
    handle.watcher_ids()?;

    while let Ok(event) = subscription.events.try_recv() {
        println!("{}", serde_json::to_string(&event)?);
    }
    Ok(())
}

#[cfg(feature = "remote")]
fn cmd_lookup(lat: f64, lng: f64, key: Option<String>) -> anyhow::Result<()> {
    use background_geolocation::{AddressLookup, What3WordsClient};

    let config = PluginConfig::load().unwrap_or_default();
    let client = What3WordsClient::new(&config.address_lookup, config.request_timeout)?;
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    let words = runtime.block_on(client.words_for(lat, lng, key.as_deref()))?;
    println!("///{words}");
    Ok(())
}

#[cfg(not(feature = "remote"))]
fn cmd_lookup(_lat: f64, _lng: f64, _key: Option<String>) -> anyhow::Result<()> {
    bail!("lookup requires the remote feature")
}

fn cmd_status() -> anyhow::Result<()> {
    let config = PluginConfig::load().unwrap_or_default();

    println!("Background Geolocation Status");
    println!("=============================");
    println!();
    println!("Platform flavor: {:?}", config.flavor);
    println!(
        "Remote forwarding: {}",
        if config.forwarding_configured() {
            "configured"
        } else {
            "not configured"
        }
    );
    println!();

    let stats_path = config.diagnostics_path();
    if stats_path.exists() {
        let content = std::fs::read_to_string(&stats_path)?;
        let stats: serde_json::Value = serde_json::from_str(&content)?;
        println!("Cumulative Statistics:");
        if let Some(map) = stats.as_object() {
            for (key, value) in map {
                println!("  {key}: {value}");
            }
        }
    } else {
        println!("No previous session data found.");
    }
    Ok(())
}

fn cmd_config() -> anyhow::Result<()> {
    let config = PluginConfig::load()?;

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", PluginConfig::config_path());
    println!();
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}
