//! The append-only per-operation audit log (component 7). Distinct from the
//! ambient process log in `logging.rs`: this one exists even when the
//! process logger is configured silent, and records exactly one line per
//! served operation regardless of outcome.

use std::fs::OpenOptions;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

use crate::store::{ClientId, OpOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
	Success,
	Failure,
	Fatal,
}

impl From<OpOutcome> for Outcome {
	fn from(value: OpOutcome) -> Outcome {
		match value {
			OpOutcome::Failure => Outcome::Failure,
			OpOutcome::Fatal => Outcome::Fatal,
		}
	}
}

impl Outcome {
	fn as_str(self) -> &'static str {
		match self {
			Outcome::Success => "SUCCESS",
			Outcome::Failure => "FAILURE",
			Outcome::Fatal => "FATAL",
		}
	}
}

pub struct AuditRecord<'a> {
	pub worker_id: usize,
	pub client_id: ClientId,
	pub opcode: &'static str,
	pub target: Option<&'a [u8]>,
	pub outcome: Outcome,
	pub bytes_moved: u64,
}

pub struct LogSink {
	writer: Mutex<BufWriter<std::fs::File>>,
	sequence: AtomicU64,
}

impl LogSink {
	pub fn open(path: &Path) -> io::Result<LogSink> {
		let file = OpenOptions::new().create(true).append(true).open(path)?;
		Ok(LogSink { writer: Mutex::new(BufWriter::new(file)), sequence: AtomicU64::new(0) })
	}

	pub fn record(&self, entry: AuditRecord<'_>) {
		let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
		let ts = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis();
		let target = entry
			.target
			.map(|name| String::from_utf8_lossy(name).into_owned())
			.unwrap_or_else(|| "-".to_string());

		let mut writer = self.writer.lock();
		let _ = writeln!(
			writer,
			"{seq}\t{ts}\tworker={worker}\tclient={client}\top={op}\ttarget={target}\toutcome={outcome}\tbytes={bytes}",
			seq = seq,
			ts = ts,
			worker = entry.worker_id,
			client = entry.client_id,
			op = entry.opcode,
			target = target,
			outcome = entry.outcome.as_str(),
			bytes = entry.bytes_moved,
		);
		let _ = writer.flush();
	}
}
