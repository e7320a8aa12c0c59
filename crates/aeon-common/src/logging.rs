//! Process-wide logging init, shared by the server and client binaries.
//!
//! Grounded in §4.15's ambient logging stack: `tracing` + `tracing-subscriber`
//! configured once from the parsed config, rather than the teacher's
//! `Com_Printf`-to-stdout convention — this workspace's config already
//! exposes `log_file`/`log_to_stdout`/`log_level`, which a `tracing`
//! `EnvFilter` + file/stdout writer maps onto directly.

use std::fs::OpenOptions;
use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber. Safe to call once per process;
/// subsequent calls are a no-op (matches `tracing`'s own global-once
/// semantics via `try_init`).
pub fn init_logging(log_level: &str, log_file: &str, log_to_stdout: bool) {
    let level = normalize_level(log_level);
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);

    if !log_file.is_empty() {
        if let Ok(file) = OpenOptions::new().create(true).append(true).open(log_file) {
            let _ = builder.with_writer(file).try_init();
            return;
        }
    }

    if log_to_stdout {
        let _ = builder.try_init();
    }
}

/// `critical` isn't a `tracing` level; the config taxonomy (§6.2) borrows it
/// from the original system's log-level vocabulary, so map it to `error`.
/// `off` disables logging entirely.
fn normalize_level(level: &str) -> &'static str {
    match level {
        "trace" => "trace",
        "debug" => "debug",
        "info" => "info",
        "warn" => "warn",
        "error" | "critical" => "error",
        "off" => "off",
        _ => "info",
    }
}
