//! Frame shapes for the local-socket protocol: opcodes, flags, status codes,
//! and the reader/writer that turns them into length-prefixed bytes.

use std::convert::TryFrom;
use std::io::{self, Read, Write};

use crate::error::ProtocolError;

/// Caps a single field so a malformed peer can't force an unbounded allocation.
pub const MAX_FIELD_LEN: u32 = 16 * 1024 * 1024;

pub const O_CREATE: u32 = 1;
pub const O_LOCK: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
	Open,
	Close,
	Read,
	Write,
	Append,
	ReadN,
	Lock,
	Unlock,
	Remove,
	Terminate,
}

impl Opcode {
	fn to_u32(self) -> u32 {
		match self {
			Opcode::Open => 0,
			Opcode::Close => 1,
			Opcode::Read => 2,
			Opcode::Write => 3,
			Opcode::Append => 4,
			Opcode::ReadN => 5,
			Opcode::Lock => 6,
			Opcode::Unlock => 7,
			Opcode::Remove => 8,
			Opcode::Terminate => 9,
		}
	}
}

impl TryFrom<u32> for Opcode {
	type Error = ProtocolError;

	fn try_from(value: u32) -> Result<Self, Self::Error> {
		Ok(match value {
			0 => Opcode::Open,
			1 => Opcode::Close,
			2 => Opcode::Read,
			3 => Opcode::Write,
			4 => Opcode::Append,
			5 => Opcode::ReadN,
			6 => Opcode::Lock,
			7 => Opcode::Unlock,
			8 => Opcode::Remove,
			9 => Opcode::Terminate,
			other => return Err(ProtocolError::UnknownOpcode(other)),
		})
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
	Success,
	Failure,
	Fatal,
}

impl Status {
	fn to_u32(self) -> u32 {
		match self {
			Status::Success => 0,
			Status::Failure => 1,
			Status::Fatal => 2,
		}
	}
}

impl TryFrom<u32> for Status {
	type Error = ProtocolError;

	fn try_from(value: u32) -> Result<Self, Self::Error> {
		Ok(match value {
			0 => Status::Success,
			1 => Status::Failure,
			2 => Status::Fatal,
			other => return Err(ProtocolError::UnknownStatus(other)),
		})
	}
}

/// A parsed client request. `flags` is only meaningful for `Open`; `n` only
/// for `ReadN`; `payload` only for `Write`/`Append`.
#[derive(Debug, Clone)]
pub struct Request {
	pub opcode: Opcode,
	pub name: Vec<u8>,
	pub flags: u32,
	pub n: i64,
	pub payload: Vec<u8>,
}

/// A response frame. `evictees` is populated only when a write-style
/// operation evicted files to make room and the caller asked for them back.
#[derive(Debug, Clone)]
pub struct Response {
	pub status: Status,
	pub payload: Option<Vec<u8>>,
	pub evictees: Vec<(Vec<u8>, Vec<u8>)>,
}

impl Response {
	pub fn success() -> Response {
		Response { status: Status::Success, payload: None, evictees: Vec::new() }
	}

	pub fn success_with(payload: Vec<u8>) -> Response {
		Response { status: Status::Success, payload: Some(payload), evictees: Vec::new() }
	}

	pub fn failure() -> Response {
		Response { status: Status::Failure, payload: None, evictees: Vec::new() }
	}

	pub fn fatal() -> Response {
		Response { status: Status::Fatal, payload: None, evictees: Vec::new() }
	}

	pub fn with_evictees(mut self, evictees: Vec<(Vec<u8>, Vec<u8>)>) -> Response {
		self.evictees = evictees;
		self
	}
}

fn read_u32<R: Read>(r: &mut R) -> io::Result<u32> {
	let mut buf = [0u8; 4];
	r.read_exact(&mut buf)?;
	Ok(u32::from_be_bytes(buf))
}

fn read_i64<R: Read>(r: &mut R) -> io::Result<i64> {
	let mut buf = [0u8; 8];
	r.read_exact(&mut buf)?;
	Ok(i64::from_be_bytes(buf))
}

fn read_field<R: Read>(r: &mut R) -> Result<Vec<u8>, ProtocolError> {
	let len = read_u32(r).map_err(|_| ProtocolError::Truncated)?;
	if len > MAX_FIELD_LEN {
		return Err(ProtocolError::FieldTooLong(len));
	}
	let mut buf = vec![0u8; len as usize];
	r.read_exact(&mut buf).map_err(|_| ProtocolError::Truncated)?;
	Ok(buf)
}

fn write_u32<W: Write>(w: &mut W, value: u32) -> io::Result<()> {
	w.write_all(&value.to_be_bytes())
}

fn write_i64<W: Write>(w: &mut W, value: i64) -> io::Result<()> {
	w.write_all(&value.to_be_bytes())
}

fn write_field<W: Write>(w: &mut W, field: &[u8]) -> io::Result<()> {
	write_u32(w, field.len() as u32)?;
	w.write_all(field)
}

/// Reads one request frame: `opcode, name_len, name, flags, n, payload_len, payload`.
/// Fields not relevant to an opcode are still present on the wire (zeroed by
/// the client) to keep framing fixed-shape and simple to parse.
pub fn read_request<R: Read>(r: &mut R) -> Result<Request, ProtocolError> {
	let opcode = Opcode::try_from(read_u32(r).map_err(|_| ProtocolError::Truncated)?)?;
	let name = read_field(r)?;
	let flags = read_u32(r).map_err(|_| ProtocolError::Truncated)?;
	let n = read_i64(r).map_err(|_| ProtocolError::Truncated)?;
	let payload = read_field(r)?;
	Ok(Request { opcode, name, flags, n, payload })
}

pub fn write_request<W: Write>(w: &mut W, req: &Request) -> io::Result<()> {
	write_u32(w, req.opcode.to_u32())?;
	write_field(w, &req.name)?;
	write_u32(w, req.flags)?;
	write_i64(w, req.n)?;
	write_field(w, &req.payload)
}

/// Reads one response frame: `status, has_payload, [payload_len, payload],
/// (name_len, name, bytes_len, bytes)*, 0`. The evictee sequence is always
/// present, terminated by a zero name length, even when empty.
pub fn read_response<R: Read>(r: &mut R) -> Result<Response, ProtocolError> {
	let status = Status::try_from(read_u32(r).map_err(|_| ProtocolError::Truncated)?)?;
	let has_payload = read_u32(r).map_err(|_| ProtocolError::Truncated)?;
	let payload = if has_payload != 0 { Some(read_field(r)?) } else { None };

	let mut evictees = Vec::new();
	loop {
		let name_len = read_u32(r).map_err(|_| ProtocolError::Truncated)?;
		if name_len == 0 {
			break;
		}
		if name_len > MAX_FIELD_LEN {
			return Err(ProtocolError::FieldTooLong(name_len));
		}
		let mut name = vec![0u8; name_len as usize];
		r.read_exact(&mut name).map_err(|_| ProtocolError::Truncated)?;
		let bytes = read_field(r)?;
		evictees.push((name, bytes));
	}

	Ok(Response { status, payload, evictees })
}

pub fn write_response<W: Write>(w: &mut W, resp: &Response) -> io::Result<()> {
	write_u32(w, resp.status.to_u32())?;
	match &resp.payload {
		Some(payload) => {
			write_u32(w, 1)?;
			write_field(w, payload)?;
		}
		None => write_u32(w, 0)?,
	}
	for (name, bytes) in &resp.evictees {
		write_u32(w, name.len() as u32)?;
		w.write_all(name)?;
		write_field(w, bytes)?;
	}
	write_u32(w, 0)
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::io::Cursor;

	#[test]
	fn request_round_trips() {
		let req = Request {
			opcode: Opcode::Write,
			name: b"foo.txt".to_vec(),
			flags: O_CREATE | O_LOCK,
			n: -1,
			payload: b"hello world".to_vec(),
		};
		let mut buf = Vec::new();
		write_request(&mut buf, &req).unwrap();
		let parsed = read_request(&mut Cursor::new(buf)).unwrap();
		assert_eq!(parsed.opcode, Opcode::Write);
		assert_eq!(parsed.name, b"foo.txt");
		assert_eq!(parsed.flags, O_CREATE | O_LOCK);
		assert_eq!(parsed.n, -1);
		assert_eq!(parsed.payload, b"hello world");
	}

	#[test]
	fn response_round_trips_with_evictees() {
		let resp = Response::success_with(b"payload".to_vec())
			.with_evictees(vec![(b"a".to_vec(), b"aaa".to_vec()), (b"b".to_vec(), Vec::new())]);
		let mut buf = Vec::new();
		write_response(&mut buf, &resp).unwrap();
		let parsed = read_response(&mut Cursor::new(buf)).unwrap();
		assert_eq!(parsed.status, Status::Success);
		assert_eq!(parsed.payload, Some(b"payload".to_vec()));
		assert_eq!(parsed.evictees.len(), 2);
		assert_eq!(parsed.evictees[0].0, b"a");
		assert_eq!(parsed.evictees[1].1, Vec::<u8>::new());
	}

	#[test]
	fn response_without_payload_or_evictees() {
		let resp = Response::failure();
		let mut buf = Vec::new();
		write_response(&mut buf, &resp).unwrap();
		let parsed = read_response(&mut Cursor::new(buf)).unwrap();
		assert_eq!(parsed.status, Status::Failure);
		assert_eq!(parsed.payload, None);
		assert!(parsed.evictees.is_empty());
	}

	#[test]
	fn oversized_field_is_rejected() {
		let mut buf = Vec::new();
		write_u32(&mut buf, Opcode::Read.to_u32()).unwrap();
		write_u32(&mut buf, MAX_FIELD_LEN + 1).unwrap();
		let err = read_request(&mut Cursor::new(buf)).unwrap_err();
		assert!(matches!(err, ProtocolError::FieldTooLong(_)));
	}
}
