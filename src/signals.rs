//! Signal plumbing (component 9, SPEC_FULL.md §4.9).
//!
//! SIGINT/SIGQUIT set `hard_stop`; SIGHUP sets `draining`; both also write a
//! byte to a self-pipe so the dispatcher's `poll` loop observes the request
//! without racing the signal handler (the classic self-pipe trick, used here
//! via `signal_hook::low_level::pipe` instead of hand-rolling the handler,
//! since writing to a pipe from a signal handler is itself the part that
//! must stay async-signal-safe).

use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use signal_hook::consts::{SIGHUP, SIGINT, SIGPIPE, SIGQUIT};
use signal_hook::low_level::pipe as signal_pipe;

struct RawPipeEnd(RawFd);

impl AsRawFd for RawPipeEnd {
	fn as_raw_fd(&self) -> RawFd {
		self.0
	}
}

pub struct SignalState {
	pub hard_stop: Arc<AtomicBool>,
	pub draining: Arc<AtomicBool>,
	pub read_fd: RawFd,
}

impl SignalState {
	/// Installs handlers for SIGINT, SIGQUIT, SIGHUP and ignores SIGPIPE.
	/// Must be called once, before the dispatcher starts polling.
	pub fn install() -> io::Result<SignalState> {
		let mut fds = [0i32; 2];
		if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
			return Err(io::Error::last_os_error());
		}
		let (read_fd, write_fd) = (fds[0], fds[1]);
		set_nonblocking(read_fd)?;
		set_nonblocking(write_fd)?;

		let hard_stop = Arc::new(AtomicBool::new(false));
		let draining = Arc::new(AtomicBool::new(false));

		signal_hook::flag::register(SIGINT, hard_stop.clone())?;
		signal_hook::flag::register(SIGQUIT, hard_stop.clone())?;
		signal_hook::flag::register(SIGHUP, draining.clone())?;

		signal_pipe::register(SIGINT, RawPipeEnd(write_fd))?;
		signal_pipe::register(SIGQUIT, RawPipeEnd(write_fd))?;
		signal_pipe::register(SIGHUP, RawPipeEnd(write_fd))?;

		ignore_sigpipe();

		Ok(SignalState { hard_stop, draining, read_fd })
	}

	pub fn is_hard_stop(&self) -> bool {
		self.hard_stop.load(Ordering::SeqCst)
	}

	pub fn is_draining(&self) -> bool {
		self.draining.load(Ordering::SeqCst)
	}

	/// Drains whatever bytes the self-pipe has accumulated; the content is
	/// meaningless, only the wakeup matters.
	pub fn drain(&self) {
		let mut buf = [0u8; 64];
		loop {
			let n = unsafe { libc::read(self.read_fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
			if n <= 0 {
				break;
			}
		}
	}
}

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

fn ignore_sigpipe() {
	unsafe {
		libc::signal(SIGPIPE, libc::SIG_IGN);
	}
}
