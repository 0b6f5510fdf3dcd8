//! Log output for the CLI.
//!
//! Logs go to stderr so `status --json` stays machine-readable on stdout.
//! The level comes from `RUST_LOG` (default `info`). Setting
//! `WRITELOCK_DEBUG_LOG` to `1`, `true` or `yes` forces `debug` regardless
//! of `RUST_LOG`, which is the switch to flip when a lock looks stuck on a
//! user's machine.

use std::env;
use tracing_subscriber::EnvFilter;

const DEBUG_ENV: &str = "WRITELOCK_DEBUG_LOG";

pub fn init() {
    let filter = if debug_forced() {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn debug_forced() -> bool {
    env::var(DEBUG_ENV)
        .map(|value| matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}
