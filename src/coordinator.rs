//! Single coordinating thread for the plugin.
//!
//! The native location APIs are only safe to use from the thread that owns
//! them, so every plugin call and every native callback is sent as a
//! [`Command`] to one thread that owns the [`GeolocationPlugin`]. Callers
//! get a cloneable [`CoordinatorHandle`]; native callbacks get a
//! [`PlatformEventSink`].

use crate::error::PluginError;
use crate::platform::PlatformEvent;
use crate::plugin::{GeolocationPlugin, SubscribeOutcome};
use crate::watcher::{WatcherEvent, WatcherOptions};
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use std::thread::{self, JoinHandle};

/// Work executed on the coordinating thread.
pub enum Command {
    AddWatcher {
        id: String,
        options: WatcherOptions,
        subscriber: Sender<WatcherEvent>,
        reply: Sender<Result<SubscribeOutcome, PluginError>>,
    },
    RemoveWatcher {
        id: String,
        reply: Sender<Result<(), PluginError>>,
    },
    OpenSettings {
        reply: Sender<Result<(), PluginError>>,
    },
    WatcherIds {
        reply: Sender<Vec<String>>,
    },
    Platform(PlatformEvent),
    HostPaused,
    HostResumed,
    Shutdown,
}

fn coordinator_stopped() -> PluginError {
    PluginError::ServiceUnavailable("Coordinator stopped".to_string())
}

/// An open subscriber channel.
#[derive(Debug)]
pub struct Subscription {
    pub id: String,
    pub outcome: SubscribeOutcome,
    /// Fixes and errors for this watcher. Disconnects once the watcher is
    /// removed or its pending request is refused.
    pub events: Receiver<WatcherEvent>,
}

/// Sender for native callbacks, usable from any thread.
#[derive(Debug, Clone)]
pub struct PlatformEventSink {
    commands: Sender<Command>,
}

impl PlatformEventSink {
    /// Queue a callback for the coordinating thread. Returns false once the
    /// coordinator has stopped.
    pub fn send(&self, event: PlatformEvent) -> bool {
        self.commands.send(Command::Platform(event)).is_ok()
    }
}

/// Cloneable handle for calling into the plugin.
#[derive(Debug, Clone)]
pub struct CoordinatorHandle {
    commands: Sender<Command>,
}

impl CoordinatorHandle {
    fn request<T>(&self, build: impl FnOnce(Sender<T>) -> Command) -> Result<T, PluginError> {
        let (reply_tx, reply_rx) = bounded(1);
        self.commands
            .send(build(reply_tx))
            .map_err(|_| coordinator_stopped())?;
        reply_rx.recv().map_err(|_| coordinator_stopped())
    }

    /// Subscribe under `id`. Returns once the coordinator has either started
    /// the watcher or parked it behind a permission prompt.
    pub fn add_watcher(
        &self,
        id: impl Into<String>,
        options: WatcherOptions,
    ) -> Result<Subscription, PluginError> {
        let id = id.into();
        let (events_tx, events_rx) = unbounded();
        let outcome = self.request(|reply| Command::AddWatcher {
            id: id.clone(),
            options,
            subscriber: events_tx,
            reply,
        })??;

        Ok(Subscription {
            id,
            outcome,
            events: events_rx,
        })
    }

    pub fn remove_watcher(&self, id: impl Into<String>) -> Result<(), PluginError> {
        let id = id.into();
        self.request(|reply| Command::RemoveWatcher { id, reply })?
    }

    pub fn open_settings(&self) -> Result<(), PluginError> {
        self.request(|reply| Command::OpenSettings { reply })?
    }

    pub fn watcher_ids(&self) -> Result<Vec<String>, PluginError> {
        self.request(|reply| Command::WatcherIds { reply })
    }

    pub fn host_paused(&self) {
        let _ = self.commands.send(Command::HostPaused);
    }

    pub fn host_resumed(&self) {
        let _ = self.commands.send(Command::HostResumed);
    }

    pub fn platform_sink(&self) -> PlatformEventSink {
        PlatformEventSink {
            commands: self.commands.clone(),
        }
    }
}

/// Owns the coordinating thread. Dropping it shuts the plugin down.
pub struct Coordinator {
    handle: CoordinatorHandle,
    thread: Option<JoinHandle<()>>,
}

impl Coordinator {
    /// Move `plugin` onto a new coordinating thread.
    pub fn spawn(plugin: GeolocationPlugin) -> Result<Self, PluginError> {
        let (commands_tx, commands_rx) = unbounded();

        let thread = thread::Builder::new()
            .name("geolocation-coordinator".to_string())
            .spawn(move || run(plugin, commands_rx))
            .map_err(|e| {
                PluginError::ServiceUnavailable(format!("Failed to start coordinator: {e}"))
            })?;

        Ok(Self {
            handle: CoordinatorHandle {
                commands: commands_tx,
            },
            thread: Some(thread),
        })
    }

    pub fn handle(&self) -> CoordinatorHandle {
        self.handle.clone()
    }

    /// Stop every watcher and wait for the coordinating thread to exit.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = self.handle.commands.send(Command::Shutdown);
            if thread.join().is_err() {
                tracing::error!("Coordinator thread panicked");
            }
        }
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(mut plugin: GeolocationPlugin, commands: Receiver<Command>) {
    tracing::debug!("coordinator started");

    while let Ok(command) = commands.recv() {
        match command {
            Command::AddWatcher {
                id,
                options,
                subscriber,
                reply,
            } => {
                let _ = reply.send(plugin.add_watcher(&id, options, subscriber));
            }
            Command::RemoveWatcher { id, reply } => {
                let _ = reply.send(plugin.remove_watcher(&id));
            }
            Command::OpenSettings { reply } => {
                let _ = reply.send(plugin.open_settings());
            }
            Command::WatcherIds { reply } => {
                let _ = reply.send(plugin.watcher_ids());
            }
            Command::Platform(event) => {
                let outcome = plugin.handle_platform_event(event);
                tracing::trace!(?outcome, "platform event dispatched");
            }
            Command::HostPaused => plugin.on_host_paused(),
            Command::HostResumed => plugin.on_host_resumed(),
            Command::Shutdown => break,
        }
    }

    plugin.shutdown();
    tracing::debug!("coordinator stopped");
}
