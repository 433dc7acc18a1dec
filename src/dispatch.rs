//! The dispatcher's readiness loop (component 4, SPEC_FULL.md §4.3).
//!
//! Grounded on `original_source/src/server.c`'s `select`-based main loop,
//! translated to `libc::poll` over an explicit descriptor list (see
//! SPEC_FULL.md §9 for why `poll` replaces `select` here) — the conceptual
//! shape (master set, wake pipe, accept loop, task handoff, soft/hard
//! shutdown) is unchanged.

use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::net::UnixListener;
use std::sync::Arc;

use log::{debug, info, warn};

use crate::clients::ClientRegistry;
use crate::queue::{Task, TaskQueue};
use crate::signals::SignalState;
use crate::wake::WakeChannel;

pub struct Dispatcher {
	listener: UnixListener,
	wake: Arc<WakeChannel>,
	signals: SignalState,
	registry: Arc<ClientRegistry>,
	task_queue: Arc<TaskQueue>,
	worker_count: usize,
}

impl Dispatcher {
	pub fn new(
		listener: UnixListener,
		wake: Arc<WakeChannel>,
		signals: SignalState,
		registry: Arc<ClientRegistry>,
		task_queue: Arc<TaskQueue>,
		worker_count: usize,
	) -> Dispatcher {
		Dispatcher { listener, wake, signals, registry, task_queue, worker_count }
	}

	/// Runs until a hard stop is requested, or a soft stop is requested and
	/// the last client disconnects. Returns once all connections are closed
	/// and workers have been asked to exit.
	pub fn run(&mut self) {
		let listen_fd = self.listener.as_raw_fd();
		let wake_fd = self.wake.read_fd();
		let signal_fd = self.signals.read_fd;

		let mut armed: Vec<RawFd> = vec![listen_fd, wake_fd, signal_fd];
		let mut online_clients: usize = 0;

		info!("dispatcher listening");

		'outer: loop {
			if self.signals.is_hard_stop() {
				info!("hard stop requested, closing all connections");
				self.registry.close_all();
				break;
			}

			let mut pollfds: Vec<libc::pollfd> =
				armed.iter().map(|&fd| libc::pollfd { fd, events: libc::POLLIN, revents: 0 }).collect();

			let rc = unsafe { libc::poll(pollfds.as_mut_ptr(), pollfds.len() as libc::nfds_t, -1) };
			if rc < 0 {
				let err = std::io::Error::last_os_error();
				if err.kind() == std::io::ErrorKind::Interrupted {
					if self.signals.is_draining() && online_clients == 0 {
						break;
					}
					continue;
				}
				warn!("poll failed: {err}");
				break;
			}

			let ready: Vec<RawFd> = pollfds
				.iter()
				.filter(|pfd| pfd.revents & libc::POLLIN != 0)
				.map(|pfd| pfd.fd)
				.collect();

			for fd in ready {
				if fd == signal_fd {
					self.signals.drain();
					continue;
				}
				if fd == wake_fd {
					for frame in self.wake.drain() {
						if frame > 0 {
							armed.push(frame);
						} else {
							online_clients = online_clients.saturating_sub(1);
							if online_clients == 0 && self.signals.is_draining() {
								break 'outer;
							}
						}
					}
					continue;
				}
				if fd == listen_fd {
					match self.listener.accept() {
						Ok((stream, _addr)) => {
							if self.signals.is_draining() {
								drop(stream);
								continue;
							}
							match self.registry.insert(stream) {
								Ok(client_fd) => {
									armed.push(client_fd);
									online_clients += 1;
									debug!("accepted client fd={client_fd}");
								}
								Err(err) => warn!("failed to register client: {err}"),
							}
						}
						Err(err) => warn!("accept failed: {err}"),
					}
					continue;
				}

				// A connected client has a request ready: hand it to a
				// worker and disarm it until that worker re-arms it.
				armed.retain(|&armed_fd| armed_fd != fd);
				self.task_queue.enqueue(Task::Client(fd));
			}
		}

		info!("dispatcher shutting down, draining {} online clients", online_clients);
		self.task_queue.shutdown(self.worker_count);
	}
}
