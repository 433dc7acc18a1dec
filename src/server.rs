//! Top-level wiring: config → store → socket → workers → dispatcher →
//! shutdown. Grounded on `original_source/src/server.c`'s `main`.

use std::fs;
use std::os::unix::net::UnixListener;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;

use log::info;

use crate::clients::ClientRegistry;
use crate::config::ServerConfig;
use crate::dispatch::Dispatcher;
use crate::error::ServerError;
use crate::log_sink::LogSink;
use crate::queue::TaskQueue;
use crate::signals::SignalState;
use crate::store::Store;
use crate::wake::WakeChannel;
use crate::worker::Worker;

pub fn run(config_path: &Path) -> Result<(), ServerError> {
	let config = ServerConfig::load(config_path)?;
	info!(
		"config loaded: {} workers, max_files={}, max_bytes={}, policy={:?}",
		config.workers_no, config.max_files_no, config.storage_size, config.policy
	);

	let store = Arc::new(Store::new(config.max_files_no as usize, config.storage_size, config.policy));
	let log_sink = Arc::new(LogSink::open(Path::new(&config.log_path))?);
	let task_queue = Arc::new(TaskQueue::new(config.task_queue_capacity));
	let registry = Arc::new(ClientRegistry::new());
	let wake = Arc::new(WakeChannel::new()?);
	let signals = SignalState::install()?;
	let hard_stop = signals.hard_stop.clone();

	let socket_path = Path::new(&config.socket_path);
	if socket_path.exists() {
		fs::remove_file(socket_path)?;
	}
	let listener = UnixListener::bind(socket_path)?;
	info!("listening on {}", config.socket_path);

	let worker_handles: Vec<_> = (0..config.workers_no as usize)
		.map(|id| {
			let worker = Worker {
				id,
				store: store.clone(),
				registry: registry.clone(),
				task_queue: task_queue.clone(),
				wake: wake.clone(),
				log_sink: log_sink.clone(),
				hard_stop: hard_stop.clone(),
			};
			thread::spawn(move || worker.run())
		})
		.collect();
	info!("spawned {} workers", worker_handles.len());

	let mut dispatcher =
		Dispatcher::new(listener, wake, signals, registry, task_queue, worker_handles.len());
	dispatcher.run();

	for handle in worker_handles {
		let _ = handle.join();
	}

	if socket_path.exists() {
		let _ = fs::remove_file(socket_path);
	}

	if hard_stop.load(Ordering::SeqCst) {
		info!("server exiting after a fatal condition");
	} else {
		info!("server exited cleanly");
	}

	Ok(())
}
