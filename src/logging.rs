//! Structured logging bootstrap.
//!
//! Stdout is reserved for the IPC protocol, so every log line goes
//! to stderr. JSON formatting is used outside debug builds so the parent
//! process can pipe our stderr into its own structured log aggregation.

use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber. Safe to call once; a second
/// call is a no-op (the global subscriber can only be set once per process).
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter);

    if cfg!(debug_assertions) {
        let _ = subscriber.try_init();
    } else {
        let _ = subscriber.json().try_init();
    }
}
