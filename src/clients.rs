//! Registry of connected clients, keyed by their raw socket descriptor —
//! the integer the rest of the system uses as the client identity.

use std::collections::HashMap;
use std::io::{self, BufReader, BufWriter};
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;

use parking_lot::{Mutex, RwLock};

pub struct ClientConn {
	pub reader: BufReader<UnixStream>,
	pub writer: BufWriter<UnixStream>,
}

impl ClientConn {
	fn new(stream: UnixStream) -> io::Result<ClientConn> {
		let reader = BufReader::new(stream.try_clone()?);
		let writer = BufWriter::new(stream);
		Ok(ClientConn { reader, writer })
	}
}

/// Shared table of connections. The dispatcher inserts on accept and
/// removes on disconnect; workers borrow a connection just long enough to
/// read one request and write one response.
pub struct ClientRegistry {
	connections: RwLock<HashMap<RawFd, Mutex<ClientConn>>>,
}

impl ClientRegistry {
	pub fn new() -> ClientRegistry {
		ClientRegistry { connections: RwLock::new(HashMap::new()) }
	}

	pub fn insert(&self, stream: UnixStream) -> io::Result<RawFd> {
		let fd = stream.as_raw_fd();
		let conn = ClientConn::new(stream)?;
		self.connections.write().insert(fd, Mutex::new(conn));
		Ok(fd)
	}

	pub fn remove(&self, fd: RawFd) {
		self.connections.write().remove(&fd);
	}

	pub fn apply<T>(&self, fd: RawFd, op: impl FnOnce(&mut ClientConn) -> T) -> Option<T> {
		let table = self.connections.read();
		let conn = table.get(&fd)?;
		Some(op(&mut conn.lock()))
	}

	/// Shuts down and forgets every registered connection. Used on hard
	/// stop so no client connection outlives the process that accepted it.
	pub fn close_all(&self) {
		let mut table = self.connections.write();
		for (_, conn) in table.drain() {
			let conn = conn.into_inner();
			let _ = conn.reader.get_ref().shutdown(std::net::Shutdown::Both);
		}
	}
}

impl Default for ClientRegistry {
	fn default() -> ClientRegistry {
		ClientRegistry::new()
	}
}
