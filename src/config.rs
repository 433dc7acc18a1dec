//! Loader for the server's `KEY = VALUE` configuration file.
//!
//! The six keys below are required, in any order, exactly once each. A
//! missing key, a duplicate key, an unparseable or zero numeric value, or a
//! replacement policy outside `{0, 1, 2}` fails the whole load — the server
//! refuses to start rather than run with a partially-valid configuration.

use std::fs;
use std::path::Path;

use crate::error::ConfigError;
use crate::store::ReplacementPolicy;

/// `sockaddr_un.sun_path` capacity minus the NUL terminator.
pub const MAX_SOCKET_PATH_LEN: usize = 107;

const KEY_WORKERS: &str = "NUMBER OF THREAD WORKERS";
const KEY_MAX_FILES: &str = "MAXIMUM NUMBER OF STORABLE FILES";
const KEY_STORAGE_SIZE: &str = "MAXIMUM STORAGE SIZE";
const KEY_SOCKET_PATH: &str = "SOCKET FILE PATH";
const KEY_LOG_PATH: &str = "LOG FILE PATH";
const KEY_POLICY: &str = "REPLACEMENT POLICY";

#[derive(Debug, Clone)]
pub struct ServerConfig {
	pub workers_no: u32,
	pub max_files_no: u32,
	pub storage_size: u64,
	pub socket_path: String,
	pub log_path: String,
	pub policy: ReplacementPolicy,
	/// Not a config-file key: capacity of the task queue. Defaults to
	/// `workers_no` when the loader is asked to derive it.
	pub task_queue_capacity: usize,
}

impl ServerConfig {
	/// Reads and validates the config file at `path`, returning a fully
	/// populated, immutable snapshot.
	pub fn load(path: &Path) -> Result<ServerConfig, ConfigError> {
		let contents = fs::read_to_string(path).map_err(ConfigError::Read)?;
		Self::parse(&contents)
	}

	fn parse(contents: &str) -> Result<ServerConfig, ConfigError> {
		let mut workers_no: Option<u32> = None;
		let mut max_files_no: Option<u32> = None;
		let mut storage_size: Option<u64> = None;
		let mut socket_path: Option<String> = None;
		let mut log_path: Option<String> = None;
		let mut policy: Option<ReplacementPolicy> = None;

		for line in contents.lines() {
			let line = line.trim_end_matches(['\r', '\n']);
			if line.trim().is_empty() {
				continue;
			}
			let (key, value) = split_key_value(line)?;

			match key {
				KEY_WORKERS => {
					reject_duplicate(workers_no.is_some(), KEY_WORKERS)?;
					workers_no = Some(parse_nonzero_u32(KEY_WORKERS, value)?);
				}
				KEY_MAX_FILES => {
					reject_duplicate(max_files_no.is_some(), KEY_MAX_FILES)?;
					max_files_no = Some(parse_nonzero_u32(KEY_MAX_FILES, value)?);
				}
				KEY_STORAGE_SIZE => {
					reject_duplicate(storage_size.is_some(), KEY_STORAGE_SIZE)?;
					storage_size = Some(parse_nonzero_u64(KEY_STORAGE_SIZE, value)?);
				}
				KEY_SOCKET_PATH => {
					reject_duplicate(socket_path.is_some(), KEY_SOCKET_PATH)?;
					socket_path = Some(parse_path(KEY_SOCKET_PATH, value, Some(MAX_SOCKET_PATH_LEN))?);
				}
				KEY_LOG_PATH => {
					reject_duplicate(log_path.is_some(), KEY_LOG_PATH)?;
					log_path = Some(parse_path(KEY_LOG_PATH, value, None)?);
				}
				KEY_POLICY => {
					reject_duplicate(policy.is_some(), KEY_POLICY)?;
					policy = Some(parse_policy(value)?);
				}
				_ => continue,
			}
		}

		let workers_no = workers_no.ok_or(ConfigError::MissingKey(KEY_WORKERS))?;
		let max_files_no = max_files_no.ok_or(ConfigError::MissingKey(KEY_MAX_FILES))?;
		let storage_size = storage_size.ok_or(ConfigError::MissingKey(KEY_STORAGE_SIZE))?;
		let socket_path = socket_path.ok_or(ConfigError::MissingKey(KEY_SOCKET_PATH))?;
		let log_path = log_path.ok_or(ConfigError::MissingKey(KEY_LOG_PATH))?;
		let policy = policy.ok_or(ConfigError::MissingKey(KEY_POLICY))?;

		Ok(ServerConfig {
			workers_no,
			max_files_no,
			storage_size,
			socket_path,
			log_path,
			policy,
			task_queue_capacity: workers_no.max(1) as usize,
		})
	}
}

fn reject_duplicate(already_set: bool, key: &'static str) -> Result<(), ConfigError> {
	if already_set {
		Err(ConfigError::DuplicateKey(key))
	} else {
		Ok(())
	}
}

fn split_key_value(line: &str) -> Result<(&str, &str), ConfigError> {
	match line.split_once('=') {
		Some((key, value)) => Ok((key.trim(), value.trim())),
		None => Ok((line.trim(), "")),
	}
}

fn parse_nonzero_u32(key: &'static str, value: &str) -> Result<u32, ConfigError> {
	let parsed: u64 = value
		.parse()
		.map_err(|_| ConfigError::BadNumber { key, value: value.to_string() })?;
	if parsed == 0 || parsed > u32::MAX as u64 {
		return Err(ConfigError::ZeroValue { key });
	}
	Ok(parsed as u32)
}

fn parse_nonzero_u64(key: &'static str, value: &str) -> Result<u64, ConfigError> {
	let parsed: u64 = value
		.parse()
		.map_err(|_| ConfigError::BadNumber { key, value: value.to_string() })?;
	if parsed == 0 {
		return Err(ConfigError::ZeroValue { key });
	}
	Ok(parsed)
}

fn parse_path(key: &'static str, value: &str, max_len: Option<usize>) -> Result<String, ConfigError> {
	if value.is_empty() {
		return Err(ConfigError::EmptyValue(key));
	}
	if let Some(limit) = max_len {
		if value.len() > limit {
			return Err(ConfigError::SocketPathTooLong { path: value.to_string(), limit });
		}
	}
	Ok(value.to_string())
}

fn parse_policy(value: &str) -> Result<ReplacementPolicy, ConfigError> {
	match value {
		"0" => Ok(ReplacementPolicy::Fifo),
		"1" => Ok(ReplacementPolicy::Lru),
		"2" => Ok(ReplacementPolicy::Lfu),
		other => Err(ConfigError::BadPolicy(other.to_string())),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn sample(policy: &str) -> String {
		format!(
			"NUMBER OF THREAD WORKERS = 4\n\
			 MAXIMUM NUMBER OF STORABLE FILES = 100\n\
			 MAXIMUM STORAGE SIZE = 1048576\n\
			 SOCKET FILE PATH = /tmp/store.sock\n\
			 LOG FILE PATH = /tmp/store.log\n\
			 REPLACEMENT POLICY = {}\n",
			policy
		)
	}

	#[test]
	fn parses_a_well_formed_file() {
		let cfg = ServerConfig::parse(&sample("1")).unwrap();
		assert_eq!(cfg.workers_no, 4);
		assert_eq!(cfg.max_files_no, 100);
		assert_eq!(cfg.storage_size, 1_048_576);
		assert_eq!(cfg.socket_path, "/tmp/store.sock");
		assert_eq!(cfg.log_path, "/tmp/store.log");
		assert_eq!(cfg.policy, ReplacementPolicy::Lru);
		assert_eq!(cfg.task_queue_capacity, 4);
	}

	#[test]
	fn rejects_missing_key() {
		let mut text = sample("0");
		text = text.replace("NUMBER OF THREAD WORKERS = 4\n", "");
		let err = ServerConfig::parse(&text).unwrap_err();
		assert!(matches!(err, ConfigError::MissingKey(k) if k == KEY_WORKERS));
	}

	#[test]
	fn rejects_duplicate_key() {
		let mut text = sample("0");
		text.push_str("NUMBER OF THREAD WORKERS = 8\n");
		let err = ServerConfig::parse(&text).unwrap_err();
		assert!(matches!(err, ConfigError::DuplicateKey(k) if k == KEY_WORKERS));
	}

	#[test]
	fn rejects_out_of_range_policy() {
		let err = ServerConfig::parse(&sample("3")).unwrap_err();
		assert!(matches!(err, ConfigError::BadPolicy(_)));
	}

	#[test]
	fn rejects_zero_numeric_value() {
		let text = sample("0").replace("= 4\n", "= 0\n");
		let err = ServerConfig::parse(&text).unwrap_err();
		assert!(matches!(err, ConfigError::ZeroValue { key } if key == KEY_WORKERS));
	}

	#[test]
	fn rejects_socket_path_over_limit() {
		let long_path = "/".to_string() + &"a".repeat(MAX_SOCKET_PATH_LEN);
		let text = sample("0").replace("/tmp/store.sock", &long_path);
		let err = ServerConfig::parse(&text).unwrap_err();
		assert!(matches!(err, ConfigError::SocketPathTooLong { .. }));
	}
}
