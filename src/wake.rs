//! The pipe workers use to tell the dispatcher a client is ready to be
//! re-armed, or that it has disconnected. Mirrors the worker→manager pipe
//! in the original design, but carries a fixed 4-byte binary frame instead
//! of a decimal string: `fd > 0` means "re-arm this descriptor", `fd == 0`
//! means "one fewer online client".

use std::io::{self, Read, Write};
use std::os::unix::io::RawFd;

pub struct WakeChannel {
	read_fd: RawFd,
	write_fd: RawFd,
}

impl WakeChannel {
	pub fn new() -> io::Result<WakeChannel> {
		let mut fds = [0i32; 2];
		if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
			return Err(io::Error::last_os_error());
		}
		set_nonblocking(fds[0])?;
		Ok(WakeChannel { read_fd: fds[0], write_fd: fds[1] })
	}

	pub fn read_fd(&self) -> RawFd {
		self.read_fd
	}

	/// Called by a worker once it has answered a client and the client is
	/// still connected: asks the dispatcher to re-arm `fd` for readability.
	pub fn post_ready(&self, fd: RawFd) -> io::Result<()> {
		self.write_frame(fd)
	}

	/// Called by a worker when the client disconnected or the operation
	/// severed the connection.
	pub fn post_gone(&self) -> io::Result<()> {
		self.write_frame(0)
	}

	fn write_frame(&self, value: i32) -> io::Result<()> {
		let mut write_end = FdHandle(self.write_fd);
		write_end.write_all(&value.to_ne_bytes())
	}

	/// Drains every complete frame currently buffered in the pipe.
	pub fn drain(&self) -> Vec<i32> {
		let mut read_end = FdHandle(self.read_fd);
		let mut out = Vec::new();
		let mut buf = [0u8; 4];
		loop {
			match read_end.read_exact(&mut buf) {
				Ok(()) => out.push(i32::from_ne_bytes(buf)),
				Err(_) => break,
			}
		}
		out
	}
}

impl Drop for WakeChannel {
	fn drop(&mut self) {
		unsafe {
			libc::close(self.read_fd);
			libc::close(self.write_fd);
		}
	}
}

unsafe impl Send for WakeChannel {}
unsafe impl Sync for WakeChannel {}

fn set_nonblocking(fd: RawFd) -> io::Result<()> {
	let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
	if flags < 0 {
		return Err(io::Error::last_os_error());
	}
	if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
		return Err(io::Error::last_os_error());
	}
	Ok(())
}

/// A raw fd wrapped just enough to reuse `Read`/`Write` without taking
/// ownership away from `WakeChannel`, which owns and closes the real fds.
struct FdHandle(RawFd);

impl Read for FdHandle {
	fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
		let n = unsafe { libc::read(self.0, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
		if n < 0 {
			return Err(io::Error::last_os_error());
		}
		Ok(n as usize)
	}
}

impl Write for FdHandle {
	fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
		let n = unsafe { libc::write(self.0, buf.as_ptr() as *const libc::c_void, buf.len()) };
		if n < 0 {
			return Err(io::Error::last_os_error());
		}
		Ok(n as usize)
	}

	fn flush(&mut self) -> io::Result<()> {
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn posts_round_trip_through_drain() {
		let chan = WakeChannel::new().unwrap();
		chan.post_ready(7).unwrap();
		chan.post_gone().unwrap();
		let frames = chan.drain();
		assert_eq!(frames, vec![7, 0]);
	}
}
