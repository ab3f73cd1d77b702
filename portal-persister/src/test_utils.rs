// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

use portal::ln::types::ChannelId;
use portal::util::persist::{
	read_channel_monitors, read_manager, read_network_graph, EnginePersister, KVStore,
	KVSTORE_NAMESPACE_KEY_MAX_LEN,
};

pub(crate) fn do_read_write_remove_list_persist<K: KVStore>(kv_store: &K) {
	let data = [42u8; 32];

	let primary_namespace = "testspace";
	let secondary_namespace = "testsubspace";
	let key = "testkey";

	// Test the basic KVStore operations.
	kv_store.write(primary_namespace, secondary_namespace, key, &data).unwrap();

	// Empty namespaces are allowed, but not an empty primary namespace with a non-empty
	// secondary one, and never an empty key.
	kv_store.write("", "", key, &data).unwrap();
	assert!(kv_store.write("", secondary_namespace, key, &data).is_err());
	assert!(kv_store.write(primary_namespace, secondary_namespace, "", &data).is_err());

	let listed_keys = kv_store.list(primary_namespace, secondary_namespace).unwrap();
	assert_eq!(listed_keys.len(), 1);
	assert_eq!(listed_keys[0], key);

	let read_data = kv_store.read(primary_namespace, secondary_namespace, key).unwrap();
	assert_eq!(data, &*read_data);

	kv_store.remove(primary_namespace, secondary_namespace, key, false).unwrap();

	let listed_keys = kv_store.list(primary_namespace, secondary_namespace).unwrap();
	assert_eq!(listed_keys.len(), 0);

	// Removing a missing key succeeds.
	kv_store.remove(primary_namespace, secondary_namespace, key, true).unwrap();

	// Ensure we have no issue operating with namespaces and keys of the maximum length.
	let max_chars: String = std::iter::repeat('A').take(KVSTORE_NAMESPACE_KEY_MAX_LEN).collect();
	kv_store.write(&max_chars, &max_chars, &max_chars, &data).unwrap();

	let listed_keys = kv_store.list(&max_chars, &max_chars).unwrap();
	assert_eq!(listed_keys.len(), 1);
	assert_eq!(listed_keys[0], max_chars);

	let read_data = kv_store.read(&max_chars, &max_chars, &max_chars).unwrap();
	assert_eq!(data, &*read_data);

	kv_store.remove(&max_chars, &max_chars, &max_chars, false).unwrap();

	let listed_keys = kv_store.list(&max_chars, &max_chars).unwrap();
	assert_eq!(listed_keys.len(), 0);
}

/// Persists a manager, a graph and two monitors through the engine layout, overwrites one
/// monitor and reads everything back.
pub(crate) fn do_test_engine_persistence<K: KVStore>(kv_store: &K) {
	assert_eq!(read_manager(kv_store).unwrap(), None);
	assert_eq!(read_network_graph(kv_store).unwrap(), None);
	assert!(read_channel_monitors(kv_store).unwrap().is_empty());

	let first = ChannelId([1; 32]);
	let second = ChannelId([2; 32]);
	kv_store.persist_manager(b"manager v1").unwrap();
	kv_store.persist_graph(b"graph").unwrap();
	kv_store.persist_monitor(&first, b"first v1").unwrap();
	kv_store.persist_monitor(&second, b"second v1").unwrap();
	kv_store.persist_monitor(&first, b"first v2").unwrap();
	kv_store.persist_manager(b"manager v2").unwrap();

	assert_eq!(read_manager(kv_store).unwrap(), Some(b"manager v2".to_vec()));
	assert_eq!(read_network_graph(kv_store).unwrap(), Some(b"graph".to_vec()));

	let mut monitors = read_channel_monitors(kv_store).unwrap();
	monitors.sort();
	assert_eq!(monitors, vec![(first, b"first v2".to_vec()), (second, b"second v1".to_vec())]);

	// A monitor filed under another channel's key is rejected rather than loaded.
	let misfiled = kv_store.read("monitors", "", &second.to_string()).unwrap();
	kv_store.write("monitors", "", &first.to_string(), &misfiled).unwrap();
	assert!(read_channel_monitors(kv_store).is_err());
}
