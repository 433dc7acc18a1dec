use std::io;

use thiserror::Error;

/// Errors that can terminate startup or a connection, as opposed to the
/// per-request outcomes produced by store operations (see `wire::Status`).
#[derive(Debug, Error)]
pub enum ServerError {
	#[error("config error: {0}")]
	Config(#[from] ConfigError),

	#[error("protocol error: {0}")]
	Protocol(#[from] ProtocolError),

	#[error("io error: {0}")]
	Io(#[from] io::Error),
}

/// Failure to parse or validate the `KEY = VALUE` configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("missing required key: {0}")]
	MissingKey(&'static str),

	#[error("duplicate key: {0}")]
	DuplicateKey(&'static str),

	#[error("unparseable numeric value for {key}: {value}")]
	BadNumber { key: &'static str, value: String },

	#[error("numeric value for {key} must be greater than zero")]
	ZeroValue { key: &'static str },

	#[error("replacement policy out of range: {0}")]
	BadPolicy(String),

	#[error("socket path exceeds {limit} bytes: {path}")]
	SocketPathTooLong { path: String, limit: usize },

	#[error("empty value for {0}")]
	EmptyValue(&'static str),

	#[error("failed to read config file: {0}")]
	Read(#[from] io::Error),
}

/// Malformed frames on the wire: short reads, bad opcodes, oversized fields.
#[derive(Debug, Error)]
pub enum ProtocolError {
	#[error("connection closed before a full frame was read")]
	Truncated,

	#[error("unknown opcode: {0}")]
	UnknownOpcode(u32),

	#[error("unknown status code: {0}")]
	UnknownStatus(u32),

	#[error("field length {0} exceeds the protocol maximum")]
	FieldTooLong(u32),
}
