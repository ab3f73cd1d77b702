// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Test doubles shared by the crates of this workspace.

use crate::util::logger::{Level, Logger, Record};
use crate::util::persist::KVStore;

use std::collections::HashMap;
use std::io;
use std::sync::Mutex;

pub struct TestLogger {
	level: Level,
	id: String,
	pub lines: Mutex<HashMap<(String, String), usize>>,
	levels: Mutex<HashMap<Level, usize>>,
}

impl TestLogger {
	pub fn new() -> TestLogger {
		Self::with_id("".to_owned())
	}
	pub fn with_id(id: String) -> TestLogger {
		TestLogger {
			level: Level::Gossip,
			id,
			lines: Mutex::new(HashMap::new()),
			levels: Mutex::new(HashMap::new()),
		}
	}
	pub fn with_level(level: Level) -> TestLogger {
		let mut logger = Self::new();
		logger.enable(level);
		logger
	}
	pub fn enable(&mut self, level: Level) {
		self.level = level;
	}
	pub fn assert_log(&self, module: String, line: String, count: usize) {
		let log_entries = self.lines.lock().unwrap();
		assert_eq!(log_entries.get(&(module, line)), Some(&count));
	}

	/// Search for the number of occurrence of the logged lines which
	/// 1. belongs to the specified module and
	/// 2. contains `line` in it.
	/// And asserts if the number of occurrences is the same with the given `count`
	pub fn assert_log_contains(&self, module: &str, line: &str, count: usize) {
		let log_entries = self.lines.lock().unwrap();
		let l: usize = log_entries
			.iter()
			.filter(|&(&(ref m, ref l), _c)| m == module && l.contains(line))
			.map(|(_, c)| c)
			.sum();
		assert_eq!(l, count)
	}

	/// Number of lines logged anywhere that contain `line`.
	pub fn count_contains(&self, line: &str) -> usize {
		let log_entries = self.lines.lock().unwrap();
		log_entries.iter().filter(|&(&(_, ref l), _c)| l.contains(line)).map(|(_, c)| c).sum()
	}

	pub fn count_level(&self, level: Level) -> usize {
		*self.levels.lock().unwrap().get(&level).unwrap_or(&0)
	}
}

impl Logger for TestLogger {
	fn log(&self, record: Record) {
		if record.level < self.level {
			return;
		}
		*self
			.lines
			.lock()
			.unwrap()
			.entry((record.module_path.to_string(), format!("{}", record.args)))
			.or_insert(0) += 1;
		*self.levels.lock().unwrap().entry(record.level).or_insert(0) += 1;
		println!(
			"{:<5} {} [{} : {}, {}] {}",
			record.level.to_string(),
			self.id,
			record.module_path,
			record.file,
			record.line,
			record.args
		);
	}
}

/// An in-memory [`KVStore`].
pub struct TestStore {
	persisted_bytes: Mutex<HashMap<String, HashMap<String, Vec<u8>>>>,
	read_only: bool,
}

impl TestStore {
	pub fn new() -> Self {
		Self { persisted_bytes: Mutex::new(HashMap::new()), read_only: false }
	}

	pub fn read_only() -> Self {
		Self { persisted_bytes: Mutex::new(HashMap::new()), read_only: true }
	}

	fn prefixed(primary_namespace: &str, secondary_namespace: &str) -> String {
		if secondary_namespace.is_empty() {
			primary_namespace.to_string()
		} else {
			format!("{}/{}", primary_namespace, secondary_namespace)
		}
	}
}

impl KVStore for TestStore {
	fn read(&self, primary_namespace: &str, secondary_namespace: &str, key: &str) -> io::Result<Vec<u8>> {
		let persisted_lock = self.persisted_bytes.lock().unwrap();
		let prefixed = Self::prefixed(primary_namespace, secondary_namespace);
		match persisted_lock.get(&prefixed).and_then(|outer| outer.get(key)) {
			Some(bytes) => Ok(bytes.clone()),
			None => Err(io::Error::new(io::ErrorKind::NotFound, "Key not found")),
		}
	}

	fn write(&self, primary_namespace: &str, secondary_namespace: &str, key: &str, buf: &[u8]) -> io::Result<()> {
		if self.read_only {
			return Err(io::Error::new(io::ErrorKind::PermissionDenied, "Cannot modify read-only store"));
		}
		let mut persisted_lock = self.persisted_bytes.lock().unwrap();
		let prefixed = Self::prefixed(primary_namespace, secondary_namespace);
		persisted_lock.entry(prefixed).or_default().insert(key.to_string(), buf.to_vec());
		Ok(())
	}

	fn remove(&self, primary_namespace: &str, secondary_namespace: &str, key: &str, _lazy: bool) -> io::Result<()> {
		if self.read_only {
			return Err(io::Error::new(io::ErrorKind::PermissionDenied, "Cannot modify read-only store"));
		}
		let mut persisted_lock = self.persisted_bytes.lock().unwrap();
		let prefixed = Self::prefixed(primary_namespace, secondary_namespace);
		if let Some(outer_ref) = persisted_lock.get_mut(&prefixed) {
			outer_ref.remove(key);
		}
		Ok(())
	}

	fn list(&self, primary_namespace: &str, secondary_namespace: &str) -> io::Result<Vec<String>> {
		let persisted_lock = self.persisted_bytes.lock().unwrap();
		let prefixed = Self::prefixed(primary_namespace, secondary_namespace);
		match persisted_lock.get(&prefixed) {
			Some(entries) => Ok(entries.keys().cloned().collect()),
			None => Ok(Vec::new()),
		}
	}
}
