//! Diagnostics for the plugin core and the remote logging path.

pub mod log;

pub use log::{
    create_shared_log, create_shared_log_with_persistence, DiagnosticsLog, DiagnosticsStats,
    SharedDiagnosticsLog,
};
