//! End-to-end tests driving a real server process over its Unix socket,
//! covering the scenarios in SPEC_FULL.md §8 and the wire codec's ambient
//! property that every opcode's request/response round-trips over a live
//! connection (not just the in-memory `Cursor` tests in `src/wire.rs`).

use std::io::Write as _;
use std::os::unix::net::UnixStream;
use std::thread;
use std::time::Duration;

use filestored::wire::{self, Opcode, Request, Response, Status, O_CREATE, O_LOCK};

struct Harness {
	socket_path: std::path::PathBuf,
	_dir: tempfile::TempDir,
}

impl Harness {
	fn start(policy: &str, max_files: u32, max_bytes: u64) -> Harness {
		let dir = tempfile::tempdir().unwrap();
		let socket_path = dir.path().join("store.sock");
		let log_path = dir.path().join("store.log");
		let config_path = dir.path().join("config.txt");

		std::fs::write(
			&config_path,
			format!(
				"NUMBER OF THREAD WORKERS = 2\n\
				 MAXIMUM NUMBER OF STORABLE FILES = {max_files}\n\
				 MAXIMUM STORAGE SIZE = {max_bytes}\n\
				 SOCKET FILE PATH = {}\n\
				 LOG FILE PATH = {}\n\
				 REPLACEMENT POLICY = {policy}\n",
				socket_path.display(),
				log_path.display(),
			),
		)
		.unwrap();

		thread::spawn(move || {
			let _ = filestored::server::run(&config_path);
		});

		wait_for_socket(&socket_path);
		Harness { socket_path, _dir: dir }
	}

	fn connect(&self) -> UnixStream {
		UnixStream::connect(&self.socket_path).unwrap()
	}
}

fn wait_for_socket(path: &std::path::Path) {
	for _ in 0..200 {
		if path.exists() && UnixStream::connect(path).is_ok() {
			return;
		}
		thread::sleep(Duration::from_millis(10));
	}
	panic!("server did not bind {path:?} in time");
}

fn roundtrip(stream: &mut UnixStream, req: Request) -> Response {
	wire::write_request(stream, &req).unwrap();
	stream.flush().unwrap();
	wire::read_response(stream).unwrap()
}

fn open(name: &[u8], flags: u32) -> Request {
	Request { opcode: Opcode::Open, name: name.to_vec(), flags, n: 0, payload: Vec::new() }
}

fn close(name: &[u8]) -> Request {
	Request { opcode: Opcode::Close, name: name.to_vec(), flags: 0, n: 0, payload: Vec::new() }
}

fn read(name: &[u8]) -> Request {
	Request { opcode: Opcode::Read, name: name.to_vec(), flags: 0, n: 0, payload: Vec::new() }
}

fn write(name: &[u8], payload: &[u8]) -> Request {
	Request { opcode: Opcode::Write, name: name.to_vec(), flags: 0, n: 0, payload: payload.to_vec() }
}

fn append(name: &[u8], payload: &[u8]) -> Request {
	Request { opcode: Opcode::Append, name: name.to_vec(), flags: 0, n: 0, payload: payload.to_vec() }
}

fn lock(name: &[u8]) -> Request {
	Request { opcode: Opcode::Lock, name: name.to_vec(), flags: 0, n: 0, payload: Vec::new() }
}

fn unlock(name: &[u8]) -> Request {
	Request { opcode: Opcode::Unlock, name: name.to_vec(), flags: 0, n: 0, payload: Vec::new() }
}

fn remove(name: &[u8]) -> Request {
	Request { opcode: Opcode::Remove, name: name.to_vec(), flags: 0, n: 0, payload: Vec::new() }
}

#[test]
fn create_write_read_over_the_wire() {
	let harness = Harness::start("0", 8, 4096);
	let mut client = harness.connect();

	let resp = roundtrip(&mut client, open(b"greeting.txt", O_CREATE | O_LOCK));
	assert_eq!(resp.status, Status::Success);

	let resp = roundtrip(&mut client, write(b"greeting.txt", b"hello, file store"));
	assert_eq!(resp.status, Status::Success);
	assert!(resp.evictees.is_empty());

	let resp = roundtrip(&mut client, read(b"greeting.txt"));
	assert_eq!(resp.status, Status::Success);
	assert_eq!(resp.payload.unwrap(), b"hello, file store");
}

#[test]
fn append_grows_an_open_file() {
	let harness = Harness::start("0", 8, 4096);
	let mut client = harness.connect();

	roundtrip(&mut client, open(b"log.txt", O_CREATE));
	roundtrip(&mut client, append(b"log.txt", b"line one\n"));
	roundtrip(&mut client, append(b"log.txt", b"line two\n"));

	let resp = roundtrip(&mut client, read(b"log.txt"));
	assert_eq!(resp.status, Status::Success);
	assert_eq!(resp.payload.unwrap(), b"line one\nline two\n");
}

#[test]
fn second_writer_is_rejected_until_lock_is_released() {
	let harness = Harness::start("0", 8, 4096);
	let mut owner = harness.connect();
	let mut rival = harness.connect();

	roundtrip(&mut owner, open(b"shared.txt", O_CREATE | O_LOCK));

	let resp = roundtrip(&mut rival, open(b"shared.txt", O_LOCK));
	assert_eq!(resp.status, Status::Failure, "rival cannot take a lock someone else holds");

	roundtrip(&mut owner, unlock(b"shared.txt"));
	let resp = roundtrip(&mut rival, open(b"shared.txt", O_LOCK));
	assert_eq!(resp.status, Status::Success, "lock is free once the owner releases it");
}

#[test]
fn fifo_eviction_makes_room_for_a_new_file() {
	let harness = Harness::start("0", 2, 4096);
	let mut client = harness.connect();

	roundtrip(&mut client, open(b"first.txt", O_CREATE));
	roundtrip(&mut client, open(b"second.txt", O_CREATE));
	let resp = roundtrip(&mut client, open(b"third.txt", O_CREATE));
	assert_eq!(resp.status, Status::Success, "opening a third file evicts the oldest to stay under the cap");

	let resp = roundtrip(&mut client, read(b"first.txt"));
	assert_eq!(resp.status, Status::Failure, "the evicted file is gone");
}

#[test]
fn write_past_the_byte_cap_evicts_other_files_to_make_room() {
	let harness = Harness::start("0", 8, 100);
	let mut client = harness.connect();

	roundtrip(&mut client, open(b"a.bin", O_CREATE | O_LOCK));
	roundtrip(&mut client, write(b"a.bin", &vec![1u8; 80]));
	roundtrip(&mut client, unlock(b"a.bin"));
	roundtrip(&mut client, open(b"b.bin", O_CREATE | O_LOCK));

	let resp = roundtrip(&mut client, write(b"b.bin", &vec![2u8; 50]));
	assert_eq!(resp.status, Status::Success);
	assert_eq!(resp.evictees.len(), 1, "a.bin had to be evicted to fit b.bin under the byte cap");
	assert_eq!(resp.evictees[0].0, b"a.bin");
	assert_eq!(resp.evictees[0].1, vec![1u8; 80]);
}

#[test]
fn disconnect_releases_open_handles_and_locks() {
	let harness = Harness::start("0", 8, 4096);
	{
		let mut client = harness.connect();
		roundtrip(&mut client, open(b"ephemeral.txt", O_CREATE | O_LOCK));
		// Stream drops here without an explicit CLOSE/UNLOCK/TERMINATE.
	}

	thread::sleep(Duration::from_millis(100));

	let mut other = harness.connect();
	let resp = roundtrip(&mut other, open(b"ephemeral.txt", O_LOCK));
	assert_eq!(resp.status, Status::Success, "a dropped connection must release its lock");
}

#[test]
fn remove_requires_holding_the_lock() {
	let harness = Harness::start("0", 8, 4096);
	let mut owner = harness.connect();
	let mut rival = harness.connect();

	roundtrip(&mut owner, open(b"doomed.txt", O_CREATE | O_LOCK));
	roundtrip(&mut rival, open(b"doomed.txt", 0));

	let resp = roundtrip(&mut rival, remove(b"doomed.txt"));
	assert_eq!(resp.status, Status::Failure, "only the lock owner may remove a file");

	let resp = roundtrip(&mut owner, remove(b"doomed.txt"));
	assert_eq!(resp.status, Status::Success);

	let resp = roundtrip(&mut owner, read(b"doomed.txt"));
	assert_eq!(resp.status, Status::Failure, "removed files are gone for every client");
}

#[test]
fn closing_before_the_first_write_forfeits_first_writer_status() {
	let harness = Harness::start("0", 8, 4096);
	let mut client = harness.connect();

	roundtrip(&mut client, open(b"scratch.txt", O_CREATE | O_LOCK));
	roundtrip(&mut client, close(b"scratch.txt"));

	let resp = roundtrip(&mut client, write(b"scratch.txt", b"too late"));
	assert_eq!(resp.status, Status::Failure, "closing clears first_writer, forfeiting the initial write");
}

#[test]
fn a_waiting_client_that_disconnects_is_not_later_granted_the_lock() {
	let harness = Harness::start("0", 8, 4096);
	let mut owner = harness.connect();
	let mut waiter = harness.connect();

	roundtrip(&mut owner, open(b"contested.txt", O_CREATE | O_LOCK));
	roundtrip(&mut waiter, open(b"contested.txt", 0));

	// Send LOCK and let it queue behind the owner, then vanish before the
	// server ever gets to grant it.
	wire::write_request(&mut waiter, &lock(b"contested.txt")).unwrap();
	waiter.flush().unwrap();
	thread::sleep(Duration::from_millis(50));
	drop(waiter);

	// Give the server time to notice the disconnect and purge the waiter.
	thread::sleep(Duration::from_millis(500));

	roundtrip(&mut owner, unlock(b"contested.txt"));

	let mut third = harness.connect();
	let resp = roundtrip(&mut third, open(b"contested.txt", O_LOCK));
	assert_eq!(resp.status, Status::Success, "a purged waiter must not have been handed the lock");
}

#[test]
fn read_n_returns_every_open_file_when_n_is_nonpositive() {
	let harness = Harness::start("1", 8, 4096);
	let mut client = harness.connect();

	roundtrip(&mut client, open(b"one.txt", O_CREATE));
	roundtrip(&mut client, write(b"one.txt", b"1"));
	roundtrip(&mut client, open(b"two.txt", O_CREATE));
	roundtrip(&mut client, write(b"two.txt", b"2"));

	let req = Request { opcode: Opcode::ReadN, name: Vec::new(), flags: 0, n: 0, payload: Vec::new() };
	let resp = roundtrip(&mut client, req);
	assert_eq!(resp.status, Status::Success);
	let names: Vec<_> = resp.evictees.iter().map(|(n, _)| n.clone()).collect();
	assert!(names.contains(&b"one.txt".to_vec()));
	assert!(names.contains(&b"two.txt".to_vec()));
}
