//! The in-memory file store: the name-to-record mapping, the replacement
//! index, and the operation contract described by component 1 of the
//! server design. See `record` for the per-file state and `eviction` for
//! victim selection.

pub mod eviction;
pub mod record;

use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

pub use eviction::ReplacementPolicy;
use eviction::ReplacementIndex;
pub use record::ClientId;
use record::FileRecord;

/// A per-request outcome that is not success. Distinct from `ServerError`:
/// these are expected, caller-caused results, not exceptional conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpOutcome {
	Failure,
	Fatal,
}

pub type OpResult<T> = Result<T, OpOutcome>;

/// How often a blocked `lock()` wakes up to re-check the shutdown flag and
/// the caller's abandonment closure, absent an explicit `notify_all`.
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(200);

struct Inner {
	files: HashMap<Vec<u8>, Arc<FileRecord>>,
	index: ReplacementIndex,
	file_count: usize,
	total_bytes: u64,
}

pub struct Store {
	inner: Mutex<Inner>,
	policy: ReplacementPolicy,
	max_files: usize,
	max_bytes: u64,
}

/// Snapshot of aggregate counters, useful for tests and diagnostics.
pub struct StoreStats {
	pub file_count: usize,
	pub total_bytes: u64,
}

impl Store {
	pub fn new(max_files: usize, max_bytes: u64, policy: ReplacementPolicy) -> Store {
		Store {
			inner: Mutex::new(Inner {
				files: HashMap::new(),
				index: ReplacementIndex::new(),
				file_count: 0,
				total_bytes: 0,
			}),
			policy,
			max_files,
			max_bytes,
		}
	}

	pub fn stats(&self) -> StoreStats {
		let inner = self.inner.lock();
		StoreStats { file_count: inner.file_count, total_bytes: inner.total_bytes }
	}

	pub fn open(&self, name: &[u8], create: bool, lock: bool, client: ClientId) -> OpResult<()> {
		let mut inner = self.inner.lock();

		if create {
			if inner.files.contains_key(name) {
				return Err(OpOutcome::Failure);
			}
			if inner.file_count >= self.max_files {
				Self::evict_one(&mut inner, self.policy, name)?;
			}
			let record = Arc::new(FileRecord::new(name.to_vec()));
			{
				let mut meta = record.meta.lock();
				meta.openers.insert(client);
				if lock {
					meta.lock_owner = Some(client);
					meta.first_writer = Some(client);
				}
			}
			inner.files.insert(name.to_vec(), record);
			inner.index.insert(name.to_vec());
			inner.file_count += 1;
			Ok(())
		} else {
			let record = inner.files.get(name).cloned().ok_or(OpOutcome::Failure)?;
			drop(inner);

			let mut meta = record.meta.lock();
			if meta.openers.contains(&client) {
				return Err(OpOutcome::Failure);
			}
			if lock && meta.is_locked_by_other(client) {
				return Err(OpOutcome::Failure);
			}
			if lock {
				meta.lock_owner = Some(client);
			}
			meta.openers.insert(client);
			Ok(())
		}
	}

	pub fn close(&self, name: &[u8], client: ClientId) -> OpResult<()> {
		let record = self.lookup(name)?;
		let mut meta = record.meta.lock();
		if !meta.openers.remove(&client) {
			return Err(OpOutcome::Failure);
		}
		if meta.first_writer == Some(client) {
			meta.first_writer = None;
		}
		Ok(())
	}

	pub fn read(&self, name: &[u8], client: ClientId) -> OpResult<Vec<u8>> {
		let record = self.lookup(name)?;
		{
			let mut meta = record.meta.lock();
			if !meta.openers.contains(&client) || meta.is_locked_by_other(client) {
				return Err(OpOutcome::Failure);
			}
			meta.in_use = true;
		}
		let bytes = record.content.read_lock().clone();
		self.touch(name);
		let mut meta = record.meta.lock();
		meta.access_count += 1;
		meta.in_use = false;
		Ok(bytes)
	}

	/// Returns up to `n` files the client may currently read (`n <= 0` means
	/// "all of them"). Opener status is not required; a file locked by
	/// another client is simply skipped.
	pub fn read_n(&self, n: i64, client: ClientId) -> Vec<(Vec<u8>, Vec<u8>)> {
		let names: Vec<Vec<u8>> = {
			let inner = self.inner.lock();
			inner.files.keys().cloned().collect()
		};

		let limit = if n <= 0 { usize::MAX } else { n as usize };
		let mut out = Vec::new();
		for name in names {
			if out.len() >= limit {
				break;
			}
			let record = match self.lookup(&name) {
				Ok(r) => r,
				Err(_) => continue,
			};
			{
				let mut meta = record.meta.lock();
				if meta.is_locked_by_other(client) {
					continue;
				}
				meta.in_use = true;
			}
			let bytes = record.content.read_lock().clone();
			self.touch(&name);
			let mut meta = record.meta.lock();
			meta.access_count += 1;
			meta.in_use = false;
			out.push((name, bytes));
		}
		out
	}

	/// Writes `bytes` as the whole new content of `name`. The structural
	/// mutex is held only to validate permissions and reserve byte-cap room;
	/// it is dropped before the call into `content.write_lock()`, which may
	/// block draining concurrent readers, so a write to one file never stalls
	/// operations on every other file in the store.
	pub fn write(&self, name: &[u8], bytes: Vec<u8>, client: ClientId) -> OpResult<Vec<(Vec<u8>, Vec<u8>)>> {
		let new_len = bytes.len() as u64;
		if new_len > self.max_bytes {
			return Err(OpOutcome::Failure);
		}

		let (record, old_len, victims) = {
			let mut inner = self.inner.lock();
			let record = inner.files.get(name).cloned().ok_or(OpOutcome::Failure)?;
			{
				let meta = record.meta.lock();
				if meta.first_writer != Some(client) {
					return Err(OpOutcome::Failure);
				}
			}
			let old_len = record.meta.lock().len;
			let victims = self.reserve_room(&mut inner, self.policy, name, old_len, new_len)?;
			(record, old_len, victims)
		};

		let evicted = Self::drain_victims(victims);

		{
			let mut content = record.content.write_lock();
			*content = bytes;
		}
		{
			let mut meta = record.meta.lock();
			meta.len = new_len;
			meta.first_writer = None;
		}

		let mut inner = self.inner.lock();
		inner.total_bytes = inner.total_bytes - old_len + new_len;
		drop(inner);

		Ok(evicted)
	}

	/// Appends `suffix` to `name`'s content. See `write` for why the
	/// structural mutex is dropped before the blocking `content.write_lock()`.
	pub fn append(&self, name: &[u8], suffix: Vec<u8>, client: ClientId) -> OpResult<Vec<(Vec<u8>, Vec<u8>)>> {
		let (record, old_len, new_len, victims) = {
			let mut inner = self.inner.lock();
			let record = inner.files.get(name).cloned().ok_or(OpOutcome::Failure)?;
			{
				let meta = record.meta.lock();
				if !meta.openers.contains(&client) || meta.is_locked_by_other(client) {
					return Err(OpOutcome::Failure);
				}
			}
			let old_len = record.meta.lock().len;
			let new_len = old_len + suffix.len() as u64;
			if new_len > self.max_bytes {
				return Err(OpOutcome::Failure);
			}
			let victims = self.reserve_room(&mut inner, self.policy, name, old_len, new_len)?;
			(record, old_len, new_len, victims)
		};

		let evicted = Self::drain_victims(victims);

		{
			let mut content = record.content.write_lock();
			content.extend_from_slice(&suffix);
		}
		{
			let mut meta = record.meta.lock();
			meta.len = new_len;
			meta.access_count += 1;
		}

		let mut inner = self.inner.lock();
		inner.total_bytes = inner.total_bytes - old_len + new_len;
		drop(inner);

		Ok(evicted)
	}

	/// Blocks the calling thread until the lock is acquired, the file is
	/// removed, or the waiter gives up. A waiter gives up when `shutdown` is
	/// set or `abandon` reports the requesting client's connection is gone;
	/// either way it is purged via `purge_waiter` rather than ever being
	/// handed ownership after it can no longer be told about it.
	pub fn lock(
		&self,
		name: &[u8],
		client: ClientId,
		shutdown: &AtomicBool,
		mut abandon: impl FnMut() -> bool,
	) -> OpResult<()> {
		let record = self.lookup(name)?;

		let mut meta = record.meta.lock();
		if !meta.openers.contains(&client) {
			return Err(OpOutcome::Failure);
		}
		if meta.lock_owner.is_none() || meta.lock_owner == Some(client) {
			meta.lock_owner = Some(client);
			return Ok(());
		}

		meta.lock_waiters.push_back(client);
		loop {
			if meta.removed {
				return Err(OpOutcome::Failure);
			}
			if meta.lock_owner == Some(client) {
				return Ok(());
			}
			if !meta.lock_waiters.contains(&client) {
				// Purged by a disconnect notification.
				return Err(OpOutcome::Failure);
			}
			if shutdown.load(Ordering::SeqCst) || abandon() {
				drop(meta);
				self.purge_waiter(name, client);
				return Err(OpOutcome::Failure);
			}
			record.lock_cond.wait_for(&mut meta, LOCK_POLL_INTERVAL);
		}
	}

	pub fn unlock(&self, name: &[u8], client: ClientId) -> OpResult<()> {
		let record = self.lookup(name)?;
		let mut meta = record.meta.lock();
		if meta.lock_owner != Some(client) {
			return Err(OpOutcome::Failure);
		}
		meta.lock_owner = None;
		meta.first_writer = None;
		if let Some(next) = meta.lock_waiters.pop_front() {
			meta.lock_owner = Some(next);
		}
		record.lock_cond.notify_all();
		Ok(())
	}

	/// Unlinks `name` from the store. The record's `len` is tracked in its
	/// metadata, so this never has to touch `content` (and therefore never
	/// has to wait on its readers or writers) to account for the freed bytes.
	/// Any in-flight reader holding an `Arc` clone from before the unlink may
	/// keep reading the bytes to completion; it just can no longer be found
	/// by name.
	pub fn remove(&self, name: &[u8], client: ClientId) -> OpResult<()> {
		let mut inner = self.inner.lock();
		let record = inner.files.get(name).cloned().ok_or(OpOutcome::Failure)?;

		let removed_len = {
			let meta = record.meta.lock();
			if meta.lock_owner != Some(client) {
				return Err(OpOutcome::Failure);
			}
			meta.len
		};

		inner.files.remove(name);
		inner.index.remove(name);
		inner.file_count -= 1;
		inner.total_bytes -= removed_len;
		drop(inner);

		let mut meta = record.meta.lock();
		meta.removed = true;
		meta.lock_waiters.clear();
		record.lock_cond.notify_all();

		Ok(())
	}

	/// Removes `client` from `name`'s lock-waiter queue, if present, waking
	/// any other waiters so they re-check their own membership. Called when
	/// a worker discovers the client holding the wait has disconnected.
	pub fn purge_waiter(&self, name: &[u8], client: ClientId) {
		if let Ok(record) = self.lookup(name) {
			let mut meta = record.meta.lock();
			meta.lock_waiters.retain(|&c| c != client);
			record.lock_cond.notify_all();
		}
	}

	/// Releases every lock and open handle held by a disconnecting client,
	/// across every stored file. Workers call this once a connection drops.
	pub fn disconnect_client(&self, client: ClientId) {
		let records: Vec<Arc<FileRecord>> = {
			let inner = self.inner.lock();
			inner.files.values().cloned().collect()
		};
		for record in records {
			let mut meta = record.meta.lock();
			meta.openers.remove(&client);
			meta.lock_waiters.retain(|&c| c != client);
			if meta.first_writer == Some(client) {
				meta.first_writer = None;
			}
			if meta.lock_owner == Some(client) {
				meta.lock_owner = meta.lock_waiters.pop_front();
			}
			record.lock_cond.notify_all();
		}
	}

	fn lookup(&self, name: &[u8]) -> OpResult<Arc<FileRecord>> {
		self.inner.lock().files.get(name).cloned().ok_or(OpOutcome::Failure)
	}

	fn touch(&self, name: &[u8]) {
		self.inner.lock().index.touch(name, self.policy);
	}

	fn is_ineligible(inner: &Inner, exclude: &[u8], name: &[u8]) -> bool {
		if name == exclude {
			return true;
		}
		match inner.files.get(name) {
			Some(record) => {
				let meta = record.meta.lock();
				meta.lock_owner.is_some() || meta.in_use
			}
			None => true,
		}
	}

	fn access_count_of(inner: &Inner, name: &[u8]) -> u64 {
		inner.files.get(name).map(|r| r.meta.lock().access_count).unwrap_or(u64::MAX)
	}

	/// Evicts exactly one file to make room for a new file-count slot. Byte
	/// accounting comes entirely from the cached `meta.len`, so this never
	/// touches `content` and never blocks on a victim's readers or writers.
	fn evict_one(inner: &mut Inner, policy: ReplacementPolicy, exclude: &[u8]) -> OpResult<()> {
		let victim = inner
			.index
			.select_victim(
				policy,
				|name| Self::is_ineligible(inner, exclude, name),
				|name| Self::access_count_of(inner, name),
			)
			.ok_or(OpOutcome::Failure)?;
		let record = inner.files.remove(&victim).expect("victim must exist");
		inner.index.remove(&victim);
		inner.file_count -= 1;
		inner.total_bytes -= record.meta.lock().len;
		Ok(())
	}

	/// Selects and unlinks victims (excluding `exclude`) until the projected
	/// total stays within `max_bytes` after replacing `old_len` bytes with
	/// `new_len`, using only cached lengths in `meta`. Returns the unlinked
	/// records so the caller can read their actual bytes back outside the
	/// structural mutex (see `drain_victims`).
	fn reserve_room(
		&self,
		inner: &mut Inner,
		policy: ReplacementPolicy,
		exclude: &[u8],
		old_len: u64,
		new_len: u64,
	) -> OpResult<Vec<(Vec<u8>, Arc<FileRecord>)>> {
		let mut victims = Vec::new();
		loop {
			let projected = inner.total_bytes - old_len + new_len;
			if projected <= self.max_bytes {
				break;
			}
			let victim = inner
				.index
				.select_victim(
					policy,
					|name| Self::is_ineligible(inner, exclude, name),
					|name| Self::access_count_of(inner, name),
				)
				.ok_or(OpOutcome::Failure)?;
			let record = inner.files.remove(&victim).expect("victim must exist");
			inner.index.remove(&victim);
			inner.file_count -= 1;
			inner.total_bytes -= record.meta.lock().len;
			victims.push((victim, record));
		}
		Ok(victims)
	}

	/// Reads back the final bytes of each unlinked victim. Called after the
	/// structural mutex has been dropped: a victim's own `content.write_lock`
	/// may still block briefly behind an in-flight access that started before
	/// the unlink, but that wait no longer holds up every other file.
	fn drain_victims(victims: Vec<(Vec<u8>, Arc<FileRecord>)>) -> Vec<(Vec<u8>, Vec<u8>)> {
		victims.into_iter().map(|(name, record)| (name, record.content.write_lock().clone())).collect()
	}
}
