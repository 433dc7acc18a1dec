//! A bounded, blocking task queue shared by the dispatcher (producer) and
//! the worker pool (consumers).

use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex};

/// One unit of work handed from the dispatcher to a worker: a client
/// descriptor that has a request frame ready to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Task {
	Client(i32),
	/// Unblocks one worker without handing it real work; used to wake every
	/// worker at shutdown.
	Shutdown,
}

struct Inner {
	items: VecDeque<Task>,
	capacity: usize,
	closed: bool,
}

pub struct TaskQueue {
	inner: Mutex<Inner>,
	not_empty: Condvar,
	not_full: Condvar,
}

impl TaskQueue {
	pub fn new(capacity: usize) -> TaskQueue {
		TaskQueue {
			inner: Mutex::new(Inner { items: VecDeque::new(), capacity: capacity.max(1), closed: false }),
			not_empty: Condvar::new(),
			not_full: Condvar::new(),
		}
	}

	/// Blocks while the queue is full. Returns immediately once enqueued.
	pub fn enqueue(&self, task: Task) {
		let mut inner = self.inner.lock();
		while inner.items.len() >= inner.capacity && !inner.closed {
			self.not_full.wait(&mut inner);
		}
		inner.items.push_back(task);
		self.not_empty.notify_one();
	}

	/// Blocks until an item is available. Returns `None` only once the
	/// queue has been closed and drained.
	pub fn dequeue(&self) -> Option<Task> {
		let mut inner = self.inner.lock();
		loop {
			if let Some(task) = inner.items.pop_front() {
				self.not_full.notify_one();
				return Some(task);
			}
			if inner.closed {
				return None;
			}
			self.not_empty.wait(&mut inner);
		}
	}

	pub fn len(&self) -> usize {
		self.inner.lock().items.len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Wakes every blocked consumer by enqueueing one `Shutdown` sentinel
	/// per worker and marks the queue closed so no further blocking occurs
	/// once drained.
	pub fn shutdown(&self, worker_count: usize) {
		let mut inner = self.inner.lock();
		inner.closed = true;
		for _ in 0..worker_count {
			inner.items.push_back(Task::Shutdown);
		}
		self.not_empty.notify_all();
		self.not_full.notify_all();
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::Arc;
	use std::thread;

	#[test]
	fn enqueue_then_dequeue_preserves_order() {
		let q = TaskQueue::new(4);
		q.enqueue(Task::Client(1));
		q.enqueue(Task::Client(2));
		assert_eq!(q.dequeue(), Some(Task::Client(1)));
		assert_eq!(q.dequeue(), Some(Task::Client(2)));
	}

	#[test]
	fn shutdown_wakes_blocked_consumers() {
		let q = Arc::new(TaskQueue::new(2));
		let consumer_q = q.clone();
		let consumer = thread::spawn(move || consumer_q.dequeue());
		thread::sleep(std::time::Duration::from_millis(20));
		q.shutdown(1);
		assert_eq!(consumer.join().unwrap(), Some(Task::Shutdown));
	}

	#[test]
	fn producer_blocks_when_full_and_unblocks_on_consume() {
		let q = Arc::new(TaskQueue::new(1));
		q.enqueue(Task::Client(1));

		let producer_q = q.clone();
		let producer = thread::spawn(move || producer_q.enqueue(Task::Client(2)));

		thread::sleep(std::time::Duration::from_millis(20));
		assert_eq!(q.dequeue(), Some(Task::Client(1)));
		producer.join().unwrap();
		assert_eq!(q.dequeue(), Some(Task::Client(2)));
	}
}
