//! Ambient, human-facing process logging (component 8). Initialized once
//! from `RUST_LOG` (default `info`), and used for server lifecycle events
//! only — the per-operation audit trail lives in `log_sink` and is always
//! on regardless of this logger's configured level.

pub fn init() {
	env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
}
