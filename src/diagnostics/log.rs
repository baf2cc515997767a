//! Counters describing what the plugin did with incoming fixes.
//!
//! Forwarding failures never reach subscribers, so this log is the only
//! place they become visible.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Diagnostics counters for the current session.
#[derive(Debug)]
pub struct DiagnosticsLog {
    /// Fix batches received from the native layer
    fixes_received: AtomicU64,
    /// Fixes delivered to subscribers
    fixes_delivered: AtomicU64,
    /// Fixes dropped for predating their watcher
    stale_dropped: AtomicU64,
    /// Fixes dropped because no watcher owned the stream
    unmapped_dropped: AtomicU64,
    /// Native errors surfaced to subscribers
    native_errors: AtomicU64,
    /// Watchers failed with NOT_AUTHORIZED
    permission_denials: AtomicU64,
    /// Session store writes that succeeded
    forwards_succeeded: AtomicU64,
    /// Session store writes that failed
    forwards_failed: AtomicU64,
    /// Address lookups that fell back to the placeholder
    lookup_fallbacks: AtomicU64,
    started_at: DateTime<Utc>,
    /// Counters accumulate across runs when set
    persist_path: Option<PathBuf>,
}

impl DiagnosticsLog {
    /// Create a new diagnostics log.
    pub fn new() -> Self {
        Self {
            fixes_received: AtomicU64::new(0),
            fixes_delivered: AtomicU64::new(0),
            stale_dropped: AtomicU64::new(0),
            unmapped_dropped: AtomicU64::new(0),
            native_errors: AtomicU64::new(0),
            permission_denials: AtomicU64::new(0),
            forwards_succeeded: AtomicU64::new(0),
            forwards_failed: AtomicU64::new(0),
            lookup_fallbacks: AtomicU64::new(0),
            started_at: Utc::now(),
            persist_path: None,
        }
    }

    /// Create a diagnostics log that accumulates into `path`.
    pub fn with_persistence(path: PathBuf) -> Self {
        let log = Self {
            persist_path: Some(path),
            ..Self::new()
        };

        if let Err(e) = log.restore() {
            tracing::warn!("Could not load previous diagnostics: {}", e);
        }

        log
    }

    pub fn record_fixes_received(&self) {
        self.fixes_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fix_delivered(&self) {
        self.fixes_delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stale_dropped(&self) {
        self.stale_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unmapped_dropped(&self) {
        self.unmapped_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_native_error(&self) {
        self.native_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_permission_denial(&self) {
        self.permission_denials.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_forward_succeeded(&self) {
        self.forwards_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_forward_failed(&self) {
        self.forwards_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_lookup_fallback(&self) {
        self.lookup_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot of every counter.
    pub fn stats(&self) -> DiagnosticsStats {
        DiagnosticsStats {
            fixes_received: self.fixes_received.load(Ordering::Relaxed),
            fixes_delivered: self.fixes_delivered.load(Ordering::Relaxed),
            stale_dropped: self.stale_dropped.load(Ordering::Relaxed),
            unmapped_dropped: self.unmapped_dropped.load(Ordering::Relaxed),
            native_errors: self.native_errors.load(Ordering::Relaxed),
            permission_denials: self.permission_denials.load(Ordering::Relaxed),
            forwards_succeeded: self.forwards_succeeded.load(Ordering::Relaxed),
            forwards_failed: self.forwards_failed.load(Ordering::Relaxed),
            lookup_fallbacks: self.lookup_fallbacks.load(Ordering::Relaxed),
            session_start: self.started_at,
            session_duration_secs: (Utc::now() - self.started_at).num_seconds().max(0) as u64,
        }
    }

    /// Human-readable report for the CLI.
    pub fn summary(&self) -> String {
        let stats = self.stats();
        format!(
            "Fix Handling:\n\
             - Fix batches received: {}\n\
             - Fixes delivered: {}\n\
             - Stale fixes dropped: {}\n\
             - Unmapped fixes dropped: {}\n\
             - Native errors surfaced: {}\n\
             - Permission denials: {}\n\
             \n\
             Remote Logging:\n\
             - Session writes succeeded: {}\n\
             - Session writes failed: {}\n\
             - Address lookup fallbacks: {}",
            stats.fixes_received,
            stats.fixes_delivered,
            stats.stale_dropped,
            stats.unmapped_dropped,
            stats.native_errors,
            stats.permission_denials,
            stats.forwards_succeeded,
            stats.forwards_failed,
            stats.lookup_fallbacks
        )
    }

    /// Write the current counters to the persistence file, if any.
    pub fn save(&self) -> io::Result<()> {
        let Some(path) = &self.persist_path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let snapshot = Snapshot {
            stats: self.stats(),
            saved_at: Utc::now(),
        };
        let json = serde_json::to_vec_pretty(&snapshot).map_err(io::Error::other)?;
        std::fs::write(path, json)
    }

    /// Seed the counters from a previous run.
    fn restore(&self) -> io::Result<()> {
        let Some(path) = &self.persist_path else {
            return Ok(());
        };
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
        };
        let snapshot: Snapshot = serde_json::from_slice(&bytes).map_err(io::Error::other)?;

        for (counter, value) in self.counters().into_iter().zip(snapshot.stats.counts()) {
            counter.store(value, Ordering::Relaxed);
        }
        Ok(())
    }

    fn counters(&self) -> [&AtomicU64; 9] {
        [
            &self.fixes_received,
            &self.fixes_delivered,
            &self.stale_dropped,
            &self.unmapped_dropped,
            &self.native_errors,
            &self.permission_denials,
            &self.forwards_succeeded,
            &self.forwards_failed,
            &self.lookup_fallbacks,
        ]
    }
}

impl Default for DiagnosticsLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of diagnostics counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticsStats {
    pub fixes_received: u64,
    pub fixes_delivered: u64,
    pub stale_dropped: u64,
    pub unmapped_dropped: u64,
    pub native_errors: u64,
    pub permission_denials: u64,
    pub forwards_succeeded: u64,
    pub forwards_failed: u64,
    pub lookup_fallbacks: u64,
    pub session_start: DateTime<Utc>,
    pub session_duration_secs: u64,
}

impl DiagnosticsStats {
    /// Counter values in the order of [`DiagnosticsLog`]'s fields.
    fn counts(&self) -> [u64; 9] {
        [
            self.fixes_received,
            self.fixes_delivered,
            self.stale_dropped,
            self.unmapped_dropped,
            self.native_errors,
            self.permission_denials,
            self.forwards_succeeded,
            self.forwards_failed,
            self.lookup_fallbacks,
        ]
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    #[serde(flatten)]
    stats: DiagnosticsStats,
    saved_at: DateTime<Utc>,
}

/// Thread-safe shared diagnostics log.
pub type SharedDiagnosticsLog = Arc<DiagnosticsLog>;

/// Create a new shared diagnostics log.
pub fn create_shared_log() -> SharedDiagnosticsLog {
    Arc::new(DiagnosticsLog::new())
}

/// Create a new shared diagnostics log with persistence.
pub fn create_shared_log_with_persistence(path: PathBuf) -> SharedDiagnosticsLog {
    Arc::new(DiagnosticsLog::with_persistence(path))
}
