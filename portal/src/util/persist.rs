// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! This module contains a simple key-value store trait [`KVStore`] that allows one to implement
//! the persistence for the channel manager, the network graph and the channel monitors all in
//! one place, plus the layout those blobs are stored under.

use crate::ln::types::ChannelId;
use crate::util::errors::DecodeError;

use std::io;

/// The alphabet of characters allowed for namespaces and keys.
pub const KVSTORE_NAMESPACE_KEY_ALPHABET: &str =
	"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789_-";

/// The maximum number of characters namespaces and keys may have.
pub const KVSTORE_NAMESPACE_KEY_MAX_LEN: usize = 120;

/// The primary namespace under which the channel manager will be persisted.
pub const CHANNEL_MANAGER_PERSISTENCE_PRIMARY_NAMESPACE: &str = "";
/// The secondary namespace under which the channel manager will be persisted.
pub const CHANNEL_MANAGER_PERSISTENCE_SECONDARY_NAMESPACE: &str = "";
/// The key under which the channel manager will be persisted.
pub const CHANNEL_MANAGER_PERSISTENCE_KEY: &str = "manager";

/// The primary namespace under which channel monitors will be persisted.
pub const CHANNEL_MONITOR_PERSISTENCE_PRIMARY_NAMESPACE: &str = "monitors";
/// The secondary namespace under which channel monitors will be persisted.
pub const CHANNEL_MONITOR_PERSISTENCE_SECONDARY_NAMESPACE: &str = "";

/// The primary namespace under which the network graph will be persisted.
pub const NETWORK_GRAPH_PERSISTENCE_PRIMARY_NAMESPACE: &str = "";
/// The secondary namespace under which the network graph will be persisted.
pub const NETWORK_GRAPH_PERSISTENCE_SECONDARY_NAMESPACE: &str = "";
/// The key under which the network graph will be persisted.
pub const NETWORK_GRAPH_PERSISTENCE_KEY: &str = "network_graph";

/// Provides an interface that allows storage and retrieval of persisted values that are
/// associated with given keys.
///
/// In order to avoid collisions the key space is segmented based on the given
/// `primary_namespace`s and `secondary_namespace`s. Implementations of this trait are free to
/// handle them in different ways, as long as per-namespace key uniqueness is asserted.
///
/// Keys and namespaces are required to be valid ASCII strings in the range of
/// [`KVSTORE_NAMESPACE_KEY_ALPHABET`] and no longer than [`KVSTORE_NAMESPACE_KEY_MAX_LEN`].
/// Empty primary namespaces and secondary namespaces (`""`) are assumed to be a valid, however,
/// if `primary_namespace` is empty, `secondary_namespace` is required to be empty, too.
pub trait KVStore: Send + Sync {
	/// Returns the data stored for the given `primary_namespace`, `secondary_namespace`, and
	/// `key`.
	///
	/// Returns an [`ErrorKind::NotFound`] if the given `key` could not be found in the given
	/// `primary_namespace` and `secondary_namespace`.
	///
	/// [`ErrorKind::NotFound`]: io::ErrorKind::NotFound
	fn read(&self, primary_namespace: &str, secondary_namespace: &str, key: &str) -> io::Result<Vec<u8>>;
	/// Persists the given data under the given `key`.
	///
	/// Will create the given `primary_namespace` and `secondary_namespace` if not already present
	/// in the store.
	fn write(&self, primary_namespace: &str, secondary_namespace: &str, key: &str, buf: &[u8]) -> io::Result<()>;
	/// Removes any data that had previously been persisted under the given `key`.
	///
	/// If the `lazy` flag is set to `true`, the backend implementation might choose to lazily
	/// remove the given `key` at some point in time after the method returns.
	///
	/// Returns successfully if no data will be stored for the given `primary_namespace`,
	/// `secondary_namespace`, and `key`, independently of whether it was present before its
	/// invokation or not.
	fn remove(&self, primary_namespace: &str, secondary_namespace: &str, key: &str, lazy: bool) -> io::Result<()>;
	/// Returns a list of keys that are stored under the given `secondary_namespace` in
	/// `primary_namespace`.
	///
	/// Returns the keys in arbitrary order, so users requiring a particular order need to sort
	/// the returned list themselves. Returns an empty list if `primary_namespace` is unknown.
	fn list(&self, primary_namespace: &str, secondary_namespace: &str) -> io::Result<Vec<String>>;
}

/// Encodes a channel monitor as stored on disk: the channel id prefixed with its length as a
/// big-endian `u16`, followed by the opaque monitor bytes.
pub fn encode_monitor_blob(channel_id: &ChannelId, monitor: &[u8]) -> Vec<u8> {
	let id = channel_id.as_bytes();
	let mut blob = Vec::with_capacity(2 + id.len() + monitor.len());
	blob.extend_from_slice(&(id.len() as u16).to_be_bytes());
	blob.extend_from_slice(id);
	blob.extend_from_slice(monitor);
	blob
}

/// Decodes a blob written by [`encode_monitor_blob`].
pub fn decode_monitor_blob(blob: &[u8]) -> Result<(ChannelId, Vec<u8>), DecodeError> {
	if blob.len() < 2 {
		return Err(DecodeError::ShortRead);
	}
	let id_len = u16::from_be_bytes([blob[0], blob[1]]) as usize;
	if id_len != ChannelId::LEN {
		return Err(DecodeError::InvalidValue);
	}
	let payload_start = 2 + id_len;
	if blob.len() < payload_start {
		return Err(DecodeError::ShortRead);
	}
	let mut id = [0u8; 32];
	id.copy_from_slice(&blob[2..payload_start]);
	Ok((ChannelId(id), blob[payload_start..].to_vec()))
}

/// Trait that handles persisting the engine's channel manager, network graph and channel
/// monitors.
///
/// Every [`KVStore`] is an `EnginePersister`, storing under the `*_PERSISTENCE_*` layout of
/// this module.
pub trait EnginePersister: Send + Sync {
	/// Persist the given serialized channel manager.
	fn persist_manager(&self, channel_manager: &[u8]) -> io::Result<()>;

	/// Persist the given serialized network graph.
	fn persist_graph(&self, network_graph: &[u8]) -> io::Result<()>;

	/// Persist the given serialized channel monitor under its channel id.
	fn persist_monitor(&self, channel_id: &ChannelId, monitor: &[u8]) -> io::Result<()>;
}

impl<K: KVStore + ?Sized> EnginePersister for K {
	fn persist_manager(&self, channel_manager: &[u8]) -> io::Result<()> {
		self.write(
			CHANNEL_MANAGER_PERSISTENCE_PRIMARY_NAMESPACE,
			CHANNEL_MANAGER_PERSISTENCE_SECONDARY_NAMESPACE,
			CHANNEL_MANAGER_PERSISTENCE_KEY,
			channel_manager,
		)
	}

	fn persist_graph(&self, network_graph: &[u8]) -> io::Result<()> {
		self.write(
			NETWORK_GRAPH_PERSISTENCE_PRIMARY_NAMESPACE,
			NETWORK_GRAPH_PERSISTENCE_SECONDARY_NAMESPACE,
			NETWORK_GRAPH_PERSISTENCE_KEY,
			network_graph,
		)
	}

	fn persist_monitor(&self, channel_id: &ChannelId, monitor: &[u8]) -> io::Result<()> {
		self.write(
			CHANNEL_MONITOR_PERSISTENCE_PRIMARY_NAMESPACE,
			CHANNEL_MONITOR_PERSISTENCE_SECONDARY_NAMESPACE,
			&channel_id.to_string(),
			&encode_monitor_blob(channel_id, monitor),
		)
	}
}

fn read_optional<K: KVStore + ?Sized>(
	kv_store: &K, primary_namespace: &str, secondary_namespace: &str, key: &str,
) -> io::Result<Option<Vec<u8>>> {
	match kv_store.read(primary_namespace, secondary_namespace, key) {
		Ok(bytes) => Ok(Some(bytes)),
		Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
		Err(e) => Err(e),
	}
}

/// Reads the serialized channel manager, if one was persisted.
pub fn read_manager<K: KVStore + ?Sized>(kv_store: &K) -> io::Result<Option<Vec<u8>>> {
	read_optional(
		kv_store,
		CHANNEL_MANAGER_PERSISTENCE_PRIMARY_NAMESPACE,
		CHANNEL_MANAGER_PERSISTENCE_SECONDARY_NAMESPACE,
		CHANNEL_MANAGER_PERSISTENCE_KEY,
	)
}

/// Reads the serialized network graph, if one was persisted.
pub fn read_network_graph<K: KVStore + ?Sized>(kv_store: &K) -> io::Result<Option<Vec<u8>>> {
	read_optional(
		kv_store,
		NETWORK_GRAPH_PERSISTENCE_PRIMARY_NAMESPACE,
		NETWORK_GRAPH_PERSISTENCE_SECONDARY_NAMESPACE,
		NETWORK_GRAPH_PERSISTENCE_KEY,
	)
}

/// Reads all stored channel monitors.
///
/// Fails if any stored key is not a channel id or does not match the id inside its blob.
pub fn read_channel_monitors<K: KVStore + ?Sized>(
	kv_store: &K,
) -> io::Result<Vec<(ChannelId, Vec<u8>)>> {
	let mut res = Vec::new();

	for stored_key in kv_store.list(
		CHANNEL_MONITOR_PERSISTENCE_PRIMARY_NAMESPACE,
		CHANNEL_MONITOR_PERSISTENCE_SECONDARY_NAMESPACE,
	)? {
		let key_id = ChannelId::from_hex(&stored_key).ok_or_else(|| {
			io::Error::new(io::ErrorKind::InvalidData, "Stored key has invalid channel id format")
		})?;
		let blob = kv_store.read(
			CHANNEL_MONITOR_PERSISTENCE_PRIMARY_NAMESPACE,
			CHANNEL_MONITOR_PERSISTENCE_SECONDARY_NAMESPACE,
			&stored_key,
		)?;
		let (channel_id, monitor) = decode_monitor_blob(&blob)?;
		if channel_id != key_id {
			return Err(io::Error::new(
				io::ErrorKind::InvalidData,
				"ChannelMonitor was stored under the wrong key",
			));
		}
		res.push((channel_id, monitor));
	}
	Ok(res)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::util::test_utils::TestStore;

	#[test]
	fn monitor_blob_layout() {
		let channel_id = ChannelId([7; 32]);
		let blob = encode_monitor_blob(&channel_id, b"monitor");
		assert_eq!(&blob[..2], &[0, 32]);
		assert_eq!(&blob[2..34], &[7; 32]);
		assert_eq!(&blob[34..], b"monitor");
		assert_eq!(decode_monitor_blob(&blob), Ok((channel_id, b"monitor".to_vec())));
	}

	#[test]
	fn monitor_blob_rejects_truncated_and_bad_lengths() {
		assert_eq!(decode_monitor_blob(&[]), Err(DecodeError::ShortRead));
		assert_eq!(decode_monitor_blob(&[0]), Err(DecodeError::ShortRead));
		assert_eq!(decode_monitor_blob(&[0, 32, 1, 2, 3]), Err(DecodeError::ShortRead));
		assert_eq!(decode_monitor_blob(&[0, 31]), Err(DecodeError::InvalidValue));

		let empty_payload = encode_monitor_blob(&ChannelId([1; 32]), &[]);
		assert_eq!(decode_monitor_blob(&empty_payload), Ok((ChannelId([1; 32]), Vec::new())));
	}

	#[test]
	fn persisted_state_reads_back() {
		let store = TestStore::new();
		assert_eq!(read_manager(&store).unwrap(), None);
		assert_eq!(read_network_graph(&store).unwrap(), None);
		assert!(read_channel_monitors(&store).unwrap().is_empty());

		store.persist_manager(b"manager").unwrap();
		store.persist_graph(b"graph").unwrap();
		store.persist_monitor(&ChannelId([1; 32]), b"one").unwrap();
		store.persist_monitor(&ChannelId([2; 32]), b"two").unwrap();

		assert_eq!(read_manager(&store).unwrap(), Some(b"manager".to_vec()));
		assert_eq!(read_network_graph(&store).unwrap(), Some(b"graph".to_vec()));
		let mut monitors = read_channel_monitors(&store).unwrap();
		monitors.sort();
		assert_eq!(
			monitors,
			vec![(ChannelId([1; 32]), b"one".to_vec()), (ChannelId([2; 32]), b"two".to_vec())]
		);
	}

	#[test]
	fn monitor_under_wrong_key_is_rejected() {
		let store = TestStore::new();
		let blob = encode_monitor_blob(&ChannelId([1; 32]), b"one");
		store
			.write(
				CHANNEL_MONITOR_PERSISTENCE_PRIMARY_NAMESPACE,
				CHANNEL_MONITOR_PERSISTENCE_SECONDARY_NAMESPACE,
				&ChannelId([2; 32]).to_string(),
				&blob,
			)
			.unwrap();
		let err = read_channel_monitors(&store).unwrap_err();
		assert_eq!(err.kind(), io::ErrorKind::InvalidData);

		store
			.write(CHANNEL_MONITOR_PERSISTENCE_PRIMARY_NAMESPACE, "", "not_an_id", &blob)
			.unwrap();
		assert!(read_channel_monitors(&store).is_err());
	}
}
