// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! A [`Logger`] writing to a file in the node's storage directory.

use portal::util::logger::{Level, Logger, Record};

use chrono::{SecondsFormat, Utc};

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Appends every record at or above a minimum [`Level`] to `<log_dir>/portal.log`, one line per
/// record.
pub struct FilesystemLogger {
	file_path: PathBuf,
	level: Level,
}

impl FilesystemLogger {
	/// Creates `log_dir` if needed and logs to `portal.log` within it.
	pub fn new<P: AsRef<Path>>(log_dir: P, level: Level) -> std::io::Result<Self> {
		fs::create_dir_all(log_dir.as_ref())?;
		let file_path = log_dir.as_ref().join("portal.log");
		Ok(Self { file_path, level })
	}

	/// The file this logger appends to.
	pub fn file_path(&self) -> &Path {
		&self.file_path
	}
}

impl Logger for FilesystemLogger {
	fn log(&self, record: Record) {
		if record.level < self.level {
			return;
		}
		let log = format!(
			"{} {:<5} [{}:{}] {}\n",
			Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
			record.level.to_string(),
			record.module_path,
			record.line,
			record.args
		);
		let res = fs::OpenOptions::new()
			.create(true)
			.append(true)
			.open(&self.file_path)
			.and_then(|mut file| file.write_all(log.as_bytes()));
		if let Err(e) = res {
			eprintln!("Failed to write to log file {}: {}", self.file_path.display(), e);
		}
	}
}
