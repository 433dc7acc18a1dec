//! The worker routine (component 6, SPEC_FULL.md §4.6).
//!
//! Grounded on `original_source/src/server.c`'s `worker_routine` (left
//! unimplemented in the original; this module is the sole behavioural
//! authority) and on the teacher's per-client dispatch shape in
//! `src/message.rs::process_message`, generalized from an in-process enum
//! match to the wire protocol's opcodes.

use std::io::Write;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{error, warn};

use crate::clients::ClientRegistry;
use crate::log_sink::{AuditRecord, LogSink, Outcome};
use crate::queue::{Task, TaskQueue};
use crate::store::{OpOutcome, Store};
use crate::wake::WakeChannel;
use crate::wire::{self, Opcode, Request, Response, O_CREATE, O_LOCK};

pub struct Worker {
	pub id: usize,
	pub store: Arc<Store>,
	pub registry: Arc<ClientRegistry>,
	pub task_queue: Arc<TaskQueue>,
	pub wake: Arc<WakeChannel>,
	pub log_sink: Arc<LogSink>,
	pub hard_stop: Arc<AtomicBool>,
}

impl Worker {
	pub fn run(&self) {
		loop {
			match self.task_queue.dequeue() {
				None | Some(Task::Shutdown) => break,
				Some(Task::Client(fd)) => self.handle_one(fd),
			}
		}
	}

	fn handle_one(&self, fd: RawFd) {
		let client = fd as u64;

		let request = self.registry.apply(fd, |conn| wire::read_request(&mut conn.reader));

		let request = match request {
			Some(Ok(req)) => req,
			Some(Err(_)) | None => {
				// Disconnected, or sent a malformed frame: drop the client.
				self.store.disconnect_client(client);
				self.registry.remove(fd);
				let _ = self.wake.post_gone();
				return;
			}
		};

		if request.opcode == Opcode::Terminate {
			self.store.disconnect_client(client);
			self.registry.remove(fd);
			let _ = self.wake.post_gone();
			return;
		}

		let response = self.dispatch(client, fd, &request);
		let fatal = response.status == wire::Status::Fatal;

		let written = self.registry.apply(fd, |conn| {
			wire::write_response(&mut conn.writer, &response)?;
			conn.writer.flush()
		});

		match written {
			Some(Ok(())) if !fatal => {
				let _ = self.wake.post_ready(fd);
			}
			_ => {
				self.store.disconnect_client(client);
				self.registry.remove(fd);
				let _ = self.wake.post_gone();
			}
		}

		if fatal {
			self.hard_stop.store(true, Ordering::SeqCst);
			error!("worker {} hit a fatal store condition, requesting shutdown", self.id);
		}
	}

	fn dispatch(&self, client: u64, fd: RawFd, request: &Request) -> Response {
		let opcode_name = opcode_name(request.opcode);
		let (response, outcome, bytes_moved) = match request.opcode {
			Opcode::Open => {
				let create = request.flags & O_CREATE != 0;
				let lock = request.flags & O_LOCK != 0;
				match self.store.open(&request.name, create, lock, client) {
					Ok(()) => (Response::success(), Outcome::Success, 0),
					Err(o) => (outcome_response(o), o.into(), 0),
				}
			}
			Opcode::Close => match self.store.close(&request.name, client) {
				Ok(()) => (Response::success(), Outcome::Success, 0),
				Err(o) => (outcome_response(o), o.into(), 0),
			},
			Opcode::Read => match self.store.read(&request.name, client) {
				Ok(bytes) => {
					let len = bytes.len() as u64;
					(Response::success_with(bytes), Outcome::Success, len)
				}
				Err(o) => (outcome_response(o), o.into(), 0),
			},
			Opcode::ReadN => {
				let files = self.store.read_n(request.n, client);
				let bytes_moved = files.iter().map(|(_, b)| b.len() as u64).sum();
				(Response::success().with_evictees(files), Outcome::Success, bytes_moved)
			}
			Opcode::Write => match self.store.write(&request.name, request.payload.clone(), client) {
				Ok(evicted) => {
					let moved = request.payload.len() as u64;
					(Response::success().with_evictees(evicted), Outcome::Success, moved)
				}
				Err(o) => (outcome_response(o), o.into(), 0),
			},
			Opcode::Append => match self.store.append(&request.name, request.payload.clone(), client) {
				Ok(evicted) => {
					let moved = request.payload.len() as u64;
					(Response::success().with_evictees(evicted), Outcome::Success, moved)
				}
				Err(o) => (outcome_response(o), o.into(), 0),
			},
			Opcode::Lock => match self.store.lock(&request.name, client, &self.hard_stop, || !peer_alive(fd)) {
				Ok(()) => (Response::success(), Outcome::Success, 0),
				Err(o) => (outcome_response(o), o.into(), 0),
			},
			Opcode::Unlock => match self.store.unlock(&request.name, client) {
				Ok(()) => (Response::success(), Outcome::Success, 0),
				Err(o) => (outcome_response(o), o.into(), 0),
			},
			Opcode::Remove => match self.store.remove(&request.name, client) {
				Ok(()) => (Response::success(), Outcome::Success, 0),
				Err(o) => (outcome_response(o), o.into(), 0),
			},
			Opcode::Terminate => unreachable!("handled before dispatch"),
		};

		if outcome != Outcome::Success {
			warn!("client {client} {opcode_name} failed: {outcome:?}");
		}

		self.log_sink.record(AuditRecord {
			worker_id: self.id,
			client_id: client,
			opcode: opcode_name,
			target: Some(&request.name),
			outcome,
			bytes_moved,
		});

		response
	}
}

/// Non-blocking peek at a client socket a worker currently owns exclusively
/// (disarmed at the dispatcher for the duration of the request). Lets a
/// worker blocked inside `Store::lock` notice its own client hung up without
/// ever reading a byte that belongs to the protocol stream.
fn peer_alive(fd: RawFd) -> bool {
	let mut probe = [0u8; 1];
	let n = unsafe {
		libc::recv(fd, probe.as_mut_ptr() as *mut libc::c_void, probe.len(), libc::MSG_PEEK | libc::MSG_DONTWAIT)
	};
	if n == 0 {
		return false;
	}
	if n < 0 {
		let err = std::io::Error::last_os_error();
		return matches!(err.raw_os_error(), Some(libc::EAGAIN) | Some(libc::EWOULDBLOCK));
	}
	true
}

fn outcome_response(outcome: OpOutcome) -> Response {
	match outcome {
		OpOutcome::Failure => Response::failure(),
		OpOutcome::Fatal => Response::fatal(),
	}
}

fn opcode_name(opcode: Opcode) -> &'static str {
	match opcode {
		Opcode::Open => "OPEN",
		Opcode::Close => "CLOSE",
		Opcode::Read => "READ",
		Opcode::Write => "WRITE",
		Opcode::Append => "APPEND",
		Opcode::ReadN => "READ_N",
		Opcode::Lock => "LOCK",
		Opcode::Unlock => "UNLOCK",
		Opcode::Remove => "REMOVE",
		Opcode::Terminate => "TERMINATE",
	}
}
