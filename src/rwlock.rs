//! A writer-preferring reader/writer lock, generic over the guarded value.
//!
//! Unlike `parking_lot::RwLock`, a pending writer here blocks *new* readers
//! from starting, not only from completing: once `write_lock` is called,
//! readers that have not yet begun must wait behind it. This matters for the
//! store's per-file coordination, where a writer must not starve behind an
//! unbounded stream of readers.

use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};

use parking_lot::{Condvar, Mutex};

struct Counters {
	readers: u32,
	writer_pending: bool,
	writer_active: bool,
}

pub struct WriterPreferringLock<T> {
	counters: Mutex<Counters>,
	cond: Condvar,
	data: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for WriterPreferringLock<T> {}
unsafe impl<T: Send> Sync for WriterPreferringLock<T> {}

impl<T> WriterPreferringLock<T> {
	pub fn new(value: T) -> WriterPreferringLock<T> {
		WriterPreferringLock {
			counters: Mutex::new(Counters { readers: 0, writer_pending: false, writer_active: false }),
			cond: Condvar::new(),
			data: UnsafeCell::new(value),
		}
	}

	pub fn read_lock(&self) -> ReadGuard<'_, T> {
		let mut counters = self.counters.lock();
		while counters.writer_pending || counters.writer_active {
			self.cond.wait(&mut counters);
		}
		counters.readers += 1;
		ReadGuard { lock: self }
	}

	fn read_unlock(&self) {
		let mut counters = self.counters.lock();
		counters.readers -= 1;
		if counters.readers == 0 {
			self.cond.notify_all();
		}
	}

	pub fn write_lock(&self) -> WriteGuard<'_, T> {
		let mut counters = self.counters.lock();
		while counters.writer_pending {
			self.cond.wait(&mut counters);
		}
		counters.writer_pending = true;
		while counters.readers > 0 {
			self.cond.wait(&mut counters);
		}
		counters.writer_active = true;
		WriteGuard { lock: self }
	}

	fn write_unlock(&self) {
		let mut counters = self.counters.lock();
		counters.writer_pending = false;
		counters.writer_active = false;
		self.cond.notify_all();
	}
}

pub struct ReadGuard<'a, T> {
	lock: &'a WriterPreferringLock<T>,
}

impl<'a, T> Deref for ReadGuard<'a, T> {
	type Target = T;

	fn deref(&self) -> &T {
		unsafe { &*self.lock.data.get() }
	}
}

impl<'a, T> Drop for ReadGuard<'a, T> {
	fn drop(&mut self) {
		self.lock.read_unlock();
	}
}

pub struct WriteGuard<'a, T> {
	lock: &'a WriterPreferringLock<T>,
}

impl<'a, T> Deref for WriteGuard<'a, T> {
	type Target = T;

	fn deref(&self) -> &T {
		unsafe { &*self.lock.data.get() }
	}
}

impl<'a, T> DerefMut for WriteGuard<'a, T> {
	fn deref_mut(&mut self) -> &mut T {
		unsafe { &mut *self.lock.data.get() }
	}
}

impl<'a, T> Drop for WriteGuard<'a, T> {
	fn drop(&mut self) {
		self.lock.write_unlock();
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::{AtomicUsize, Ordering};
	use std::sync::Arc;
	use std::thread;
	use std::time::Duration;

	#[test]
	fn readers_run_concurrently() {
		let lock = Arc::new(WriterPreferringLock::new(0u32));
		let concurrent = Arc::new(AtomicUsize::new(0));
		let peak = Arc::new(AtomicUsize::new(0));

		let handles: Vec<_> = (0..4)
			.map(|_| {
				let lock = lock.clone();
				let concurrent = concurrent.clone();
				let peak = peak.clone();
				thread::spawn(move || {
					let _guard = lock.read_lock();
					let now = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
					peak.fetch_max(now, Ordering::SeqCst);
					thread::sleep(Duration::from_millis(20));
					concurrent.fetch_sub(1, Ordering::SeqCst);
				})
			})
			.collect();

		for h in handles {
			h.join().unwrap();
		}
		assert!(peak.load(Ordering::SeqCst) > 1);
	}

	#[test]
	fn writer_excludes_readers_and_sees_whole_writes() {
		let lock = Arc::new(WriterPreferringLock::new(Vec::<u8>::new()));

		let writer_lock = lock.clone();
		let writer = thread::spawn(move || {
			let mut guard = writer_lock.write_lock();
			guard.extend_from_slice(b"a");
			thread::sleep(Duration::from_millis(20));
			guard.extend_from_slice(b"b");
		});

		thread::sleep(Duration::from_millis(5));
		let observed = lock.read_lock().clone();
		writer.join().unwrap();

		assert_eq!(observed, b"ab");
	}

	#[test]
	fn pending_writer_blocks_new_readers() {
		let lock = Arc::new(WriterPreferringLock::new(0u32));
		let order = Arc::new(Mutex::new(Vec::new()));

		let first_reader = lock.read_lock();

		let writer_lock = lock.clone();
		let writer_order = order.clone();
		let writer = thread::spawn(move || {
			let mut guard = writer_lock.write_lock();
			*guard += 1;
			writer_order.lock().push("writer");
		});

		thread::sleep(Duration::from_millis(20));

		let reader_lock = lock.clone();
		let reader_order = order.clone();
		let second_reader = thread::spawn(move || {
			let _guard = reader_lock.read_lock();
			reader_order.lock().push("reader");
		});

		thread::sleep(Duration::from_millis(20));
		drop(first_reader);

		writer.join().unwrap();
		second_reader.join().unwrap();

		assert_eq!(*order.lock(), vec!["writer", "reader"]);
	}
}
