// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

use portal::util::persist::{KVSTORE_NAMESPACE_KEY_ALPHABET, KVSTORE_NAMESPACE_KEY_MAX_LEN};

pub(crate) fn is_valid_kvstore_str(key: &str) -> bool {
	key.len() <= KVSTORE_NAMESPACE_KEY_MAX_LEN
		&& key.chars().all(|c| KVSTORE_NAMESPACE_KEY_ALPHABET.contains(c))
}

pub(crate) fn check_namespace_key_validity(
	primary_namespace: &str, secondary_namespace: &str, key: Option<&str>, operation: &str,
) -> Result<(), std::io::Error> {
	let location = match key {
		Some(key) => format!("{}/{}/{}", primary_namespace, secondary_namespace, key),
		None => format!("{}/{}", primary_namespace, secondary_namespace),
	};
	let invalid = |reason: &str| {
		let msg = format!("Failed to {} {}: {}", operation, location, reason);
		Err(std::io::Error::new(std::io::ErrorKind::InvalidInput, msg))
	};

	if key == Some("") {
		return invalid("key may not be empty.");
	}
	if primary_namespace.is_empty() && !secondary_namespace.is_empty() {
		return invalid("primary namespace may not be empty if a non-empty secondary namespace is given.");
	}
	if !is_valid_kvstore_str(primary_namespace) || !is_valid_kvstore_str(secondary_namespace) {
		return invalid("namespaces must be valid.");
	}
	if let Some(key) = key {
		if !is_valid_kvstore_str(key) {
			return invalid("key must be valid.");
		}
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn accepts_layout_namespaces() {
		assert!(check_namespace_key_validity("", "", Some("manager"), "write").is_ok());
		assert!(check_namespace_key_validity("monitors", "", Some(&"ab".repeat(32)), "write").is_ok());
		assert!(check_namespace_key_validity("monitors", "", None, "list").is_ok());
	}

	#[test]
	fn rejects_invalid_namespaces_and_keys() {
		let err = check_namespace_key_validity("", "sub", Some("key"), "write").unwrap_err();
		assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput);
		assert!(check_namespace_key_validity("ns", "", Some(""), "read").is_err());
		assert!(check_namespace_key_validity("ns/..", "", Some("key"), "read").is_err());
		assert!(check_namespace_key_validity("ns", "", Some("key.tmp"), "read").is_err());
		assert!(check_namespace_key_validity(&"a".repeat(KVSTORE_NAMESPACE_KEY_MAX_LEN + 1), "", None, "list").is_err());
	}
}
