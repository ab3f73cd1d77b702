// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Objects related to [`FilesystemStore`] live here.

use crate::utils::{check_namespace_key_validity, is_valid_kvstore_str};

use portal::util::persist::KVStore;

use std::collections::HashMap;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

/// Number of times `list` re-reads a directory whose entries vanish while it is being read.
const LIST_DIR_CONSISTENCY_RETRIES: usize = 10;

/// A [`KVStore`] writing one file per key under `data_dir/primary_namespace/secondary_namespace`.
///
/// Writes go to a temporary file which is synced and renamed over the destination, followed by
/// a sync of the parent directory, so a key always holds either its old or its new value.
pub struct FilesystemStore {
	data_dir: PathBuf,
	tmp_file_counter: AtomicUsize,
	// Serializes access to each file. Entries are dropped again once unused.
	locks: Mutex<HashMap<PathBuf, Arc<RwLock<()>>>>,
}

impl FilesystemStore {
	/// Constructs a new [`FilesystemStore`].
	pub fn new(data_dir: PathBuf) -> Self {
		let locks = Mutex::new(HashMap::new());
		let tmp_file_counter = AtomicUsize::new(0);
		Self { data_dir, tmp_file_counter, locks }
	}

	/// Returns the data directory.
	pub fn get_data_dir(&self) -> PathBuf {
		self.data_dir.clone()
	}

	fn get_dest_dir_path(&self, primary_namespace: &str, secondary_namespace: &str) -> PathBuf {
		let mut dest_dir_path = self.data_dir.clone();
		dest_dir_path.push(primary_namespace);
		if !secondary_namespace.is_empty() {
			dest_dir_path.push(secondary_namespace);
		}
		dest_dir_path
	}

	fn get_checked_dest_file_path(
		&self, primary_namespace: &str, secondary_namespace: &str, key: Option<&str>, operation: &str,
	) -> std::io::Result<PathBuf> {
		check_namespace_key_validity(primary_namespace, secondary_namespace, key, operation)?;
		let mut dest_file_path = self.get_dest_dir_path(primary_namespace, secondary_namespace);
		if let Some(key) = key {
			dest_file_path.push(key);
		}
		Ok(dest_file_path)
	}

	fn lock_for(&self, path: &Path) -> Arc<RwLock<()>> {
		let mut outer_lock = self.locks.lock().unwrap();
		Arc::clone(outer_lock.entry(path.to_path_buf()).or_default())
	}

	fn release_lock(&self, inner_lock_ref: Arc<RwLock<()>>, path: &Path) {
		let mut outer_lock = self.locks.lock().unwrap();
		// One reference lives in the map and one is ours; anything more is still in flight.
		if Arc::strong_count(&inner_lock_ref) == 2 {
			outer_lock.remove(path);
		}
	}

	fn write_atomically(&self, dest_file_path: &Path, buf: &[u8]) -> std::io::Result<()> {
		let parent_directory = dest_file_path.parent().ok_or_else(|| {
			let msg = format!("Could not retrieve parent directory of {}.", dest_file_path.display());
			std::io::Error::new(std::io::ErrorKind::InvalidInput, msg)
		})?;
		fs::create_dir_all(parent_directory)?;

		// open(tmp), write(tmp), fsync(tmp), close(tmp), rename(tmp, dest), fsync(dir)
		let mut tmp_file_path = dest_file_path.to_path_buf();
		let tmp_file_ext = format!("{}.tmp", self.tmp_file_counter.fetch_add(1, Ordering::AcqRel));
		tmp_file_path.set_extension(tmp_file_ext);
		{
			let mut tmp_file = fs::File::create(&tmp_file_path)?;
			tmp_file.write_all(buf)?;
			tmp_file.sync_all()?;
		}

		let inner_lock_ref = self.lock_for(dest_file_path);
		let res = {
			let _guard = inner_lock_ref.write().unwrap();
			fs::rename(&tmp_file_path, dest_file_path).and_then(|()| sync_dir(parent_directory))
		};
		self.release_lock(inner_lock_ref, dest_file_path);
		if res.is_err() {
			fs::remove_file(&tmp_file_path).ok();
		}
		res
	}
}

#[cfg(not(target_os = "windows"))]
fn sync_dir(dir: &Path) -> std::io::Result<()> {
	fs::OpenOptions::new().read(true).open(dir)?.sync_all()
}

// Directories cannot be opened for syncing on Windows; `rename` replaces the file in place.
#[cfg(target_os = "windows")]
fn sync_dir(_dir: &Path) -> std::io::Result<()> {
	Ok(())
}

impl KVStore for FilesystemStore {
	fn read(&self, primary_namespace: &str, secondary_namespace: &str, key: &str) -> std::io::Result<Vec<u8>> {
		let path = self.get_checked_dest_file_path(primary_namespace, secondary_namespace, Some(key), "read")?;

		let inner_lock_ref = self.lock_for(&path);
		let res = {
			let _guard = inner_lock_ref.read().unwrap();
			let mut buf = Vec::new();
			fs::File::open(&path).and_then(|mut f| f.read_to_end(&mut buf)).map(|_| buf)
		};
		self.release_lock(inner_lock_ref, &path);
		res
	}

	fn write(&self, primary_namespace: &str, secondary_namespace: &str, key: &str, buf: &[u8]) -> std::io::Result<()> {
		let path = self.get_checked_dest_file_path(primary_namespace, secondary_namespace, Some(key), "write")?;
		self.write_atomically(&path, buf)
	}

	fn remove(&self, primary_namespace: &str, secondary_namespace: &str, key: &str, lazy: bool) -> std::io::Result<()> {
		let path = self.get_checked_dest_file_path(primary_namespace, secondary_namespace, Some(key), "remove")?;

		let inner_lock_ref = self.lock_for(&path);
		let res = {
			let _guard = inner_lock_ref.write().unwrap();
			if !path.is_file() {
				Ok(())
			} else if lazy {
				fs::remove_file(&path)
			} else {
				// `remove_file` is an unlink, which may sit in the page cache until the directory
				// itself is synced.
				fs::remove_file(&path).and_then(|()| match path.parent() {
					Some(parent_directory) => sync_dir(parent_directory),
					None => Ok(()),
				})
			}
		};
		self.release_lock(inner_lock_ref, &path);
		res
	}

	fn list(&self, primary_namespace: &str, secondary_namespace: &str) -> std::io::Result<Vec<String>> {
		let prefixed_dest = self.get_checked_dest_file_path(primary_namespace, secondary_namespace, None, "list")?;
		if !prefixed_dest.exists() {
			return Ok(Vec::new());
		}

		let mut retries = LIST_DIR_CONSISTENCY_RETRIES;
		'retry_list: loop {
			let mut keys = Vec::new();
			for entry in fs::read_dir(&prefixed_dest)? {
				let entry = entry?;
				match dir_entry_is_key(&entry) {
					Ok(true) => keys.push(get_key_from_dir_entry_path(&entry.path(), &prefixed_dest)?),
					Ok(false) => {},
					Err(e) if e.kind() == std::io::ErrorKind::NotFound && retries > 0 => {
						// The entry was removed after `read_dir` saw it.
						retries -= 1;
						continue 'retry_list;
					},
					Err(e) => return Err(e),
				}
			}
			return Ok(keys);
		}
	}
}

fn dir_entry_is_key(dir_entry: &fs::DirEntry) -> std::io::Result<bool> {
	let p = dir_entry.path();
	if let Some(ext) = p.extension() {
		if ext == "tmp" {
			return Ok(false);
		}
	}

	let metadata = dir_entry.metadata()?;
	// The empty primary namespace shares its directory with every other namespace.
	if metadata.is_dir() {
		return Ok(false);
	}
	if !metadata.is_file() {
		let msg = format!("Failed to list keys at path {}: file couldn't be accessed.", p.display());
		return Err(std::io::Error::new(std::io::ErrorKind::Other, msg));
	}
	Ok(true)
}

fn get_key_from_dir_entry_path(p: &Path, base_path: &Path) -> std::io::Result<String> {
	let invalid = |reason: &str| {
		let msg = format!("Failed to list keys of path {}: {}", p.display(), reason);
		std::io::Error::new(std::io::ErrorKind::Other, msg)
	};
	let relative_path = p.strip_prefix(base_path).map_err(|e| invalid(&e.to_string()))?;
	match relative_path.to_str() {
		Some(key) if is_valid_kvstore_str(key) => Ok(key.to_string()),
		Some(_) => Err(invalid("file path is not valid key")),
		None => Err(invalid("file path is not valid UTF-8")),
	}
}
