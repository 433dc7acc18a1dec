use std::collections::{HashSet, VecDeque};

use parking_lot::{Condvar, Mutex};

use crate::rwlock::WriterPreferringLock;

pub type ClientId = u64;

/// Bookkeeping protected by the record's own inner mutex: who has the file
/// open, who holds or awaits its lock, and whether it is currently in use by
/// a worker (and therefore ineligible for eviction). Kept separate from the
/// byte content so that lock/unlock/open/close never need to wait on `rw`.
pub struct FileMeta {
	pub openers: HashSet<ClientId>,
	pub lock_owner: Option<ClientId>,
	pub lock_waiters: VecDeque<ClientId>,
	pub first_writer: Option<ClientId>,
	pub in_use: bool,
	pub access_count: u64,
	/// Cached byte length, kept in step with `content` by every mutator.
	/// Lets the structural mutex account for a file's size without ever
	/// touching its `rw` primitive, so eviction and byte-cap bookkeeping
	/// never block on a file's readers or writers.
	pub len: u64,
	/// Set once the record has been unlinked from the store; lets a worker
	/// that was asleep in `lock_waiters` notice the file disappeared.
	pub removed: bool,
}

impl FileMeta {
	fn new() -> FileMeta {
		FileMeta {
			openers: HashSet::new(),
			lock_owner: None,
			lock_waiters: VecDeque::new(),
			first_writer: None,
			in_use: false,
			access_count: 0,
			len: 0,
			removed: false,
		}
	}

	pub fn is_locked_by_other(&self, client: ClientId) -> bool {
		matches!(self.lock_owner, Some(owner) if owner != client)
	}
}

pub struct FileRecord {
	pub name: Vec<u8>,
	pub meta: Mutex<FileMeta>,
	pub lock_cond: Condvar,
	pub content: WriterPreferringLock<Vec<u8>>,
}

impl FileRecord {
	pub fn new(name: Vec<u8>) -> FileRecord {
		FileRecord { name, meta: Mutex::new(FileMeta::new()), lock_cond: Condvar::new(), content: WriterPreferringLock::new(Vec::new()) }
	}
}
