// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Provides keys to the node and the engine.
//!
//! The node's identity and every secret the engine derives descend from a single 32-byte seed.

use bitcoin::bip32::{ChildNumber, Xpriv};
use bitcoin::hashes::{sha256, Hash, HashEngine};
use bitcoin::secp256k1::{PublicKey, Secp256k1, SecretKey};
use bitcoin::Network;

use core::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Failure to derive key material from a seed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyDerivationError(String);

impl fmt::Display for KeyDerivationError {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "key derivation failed: {}", self.0)
	}
}

impl std::error::Error for KeyDerivationError {}

/// Simple implementation of a key provider keyed off a 32-byte seed.
///
/// The node secret lives at `m/0'`; `m/1'` is the root the engine derives channel keys from.
pub struct KeysManager {
	seed: [u8; 32],
	node_secret: SecretKey,
	node_id: PublicKey,
	channel_master_key: Xpriv,
	rand_bytes_unique_start: [u8; 32],
	rand_bytes_index: AtomicUsize,
}

impl KeysManager {
	/// Constructs a `KeysManager` from a 32-byte seed.
	///
	/// `starting_time_nanos` is mixed into random byte generation so that restarts with the same
	/// seed do not repeat ids; pass a value that differs between restarts.
	pub fn new(
		seed: &[u8; 32], network: Network, starting_time_nanos: u64,
	) -> Result<Self, KeyDerivationError> {
		let secp_ctx = Secp256k1::new();
		let master_key = Xpriv::new_master(network, seed)
			.map_err(|e| KeyDerivationError(e.to_string()))?;
		let node_secret = master_key
			.derive_priv(&secp_ctx, &[hardened(0)?])
			.map_err(|e| KeyDerivationError(e.to_string()))?
			.private_key;
		let channel_master_key = master_key
			.derive_priv(&secp_ctx, &[hardened(1)?])
			.map_err(|e| KeyDerivationError(e.to_string()))?;
		let node_id = PublicKey::from_secret_key(&secp_ctx, &node_secret);

		let mut unique_start = sha256::Hash::engine();
		unique_start.input(&starting_time_nanos.to_be_bytes());
		unique_start.input(seed);

		Ok(KeysManager {
			seed: *seed,
			node_secret,
			node_id,
			channel_master_key,
			rand_bytes_unique_start: sha256::Hash::from_engine(unique_start).to_byte_array(),
			rand_bytes_index: AtomicUsize::new(0),
		})
	}

	/// Constructs a `KeysManager` seeded with the current time.
	pub fn from_seed(seed: &[u8; 32], network: Network) -> Result<Self, KeyDerivationError> {
		let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
		Self::new(seed, network, now.as_nanos() as u64)
	}

	/// Gets the node id of this node.
	pub fn node_id(&self) -> PublicKey {
		self.node_id
	}

	/// Gets the node secret key.
	pub fn node_secret(&self) -> SecretKey {
		self.node_secret
	}

	/// The extended key the engine derives per-channel keys from.
	pub fn channel_master_key(&self) -> &Xpriv {
		&self.channel_master_key
	}

	/// Gets the seed this manager was constructed from.
	pub fn seed(&self) -> &[u8; 32] {
		&self.seed
	}

	/// Gets a unique, cryptographically-secure, random 32-byte value.
	pub fn get_secure_random_bytes(&self) -> [u8; 32] {
		let index = self.rand_bytes_index.fetch_add(1, Ordering::AcqRel);
		let mut engine = sha256::Hash::engine();
		engine.input(&self.rand_bytes_unique_start);
		engine.input(&(index as u64).to_be_bytes());
		sha256::Hash::from_engine(engine).to_byte_array()
	}

	/// Returns a fresh `user_channel_id` for a channel open request.
	pub fn get_user_channel_id(&self) -> u128 {
		let bytes = self.get_secure_random_bytes();
		let mut id = [0u8; 16];
		id.copy_from_slice(&bytes[..16]);
		u128::from_be_bytes(id)
	}
}

fn hardened(index: u32) -> Result<ChildNumber, KeyDerivationError> {
	ChildNumber::from_hardened_idx(index).map_err(|e| KeyDerivationError(e.to_string()))
}
