// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Various identifiers used by the channel engine.

use bitcoin::hashes::{sha256, Hash};
use bitcoin::hex::{DisplayHex, FromHex};

use core::fmt;

/// A unique 32-byte identifier for a channel.
///
/// Before the funding transaction is known this is a temporary id picked by the opener; once
/// funded it is derived from the funding outpoint.
#[derive(Hash, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ChannelId(pub [u8; 32]);

impl ChannelId {
	/// Length of a channel id in bytes.
	pub const LEN: usize = 32;

	/// Parses a channel id from its lowercase hex rendering, as used for persisted monitor keys.
	pub fn from_hex(s: &str) -> Option<Self> {
		<[u8; 32]>::from_hex(s).ok().map(ChannelId)
	}

	/// Returns the id as a byte slice.
	pub fn as_bytes(&self) -> &[u8] {
		&self.0
	}
}

impl fmt::Display for ChannelId {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "{}", self.0.as_hex())
	}
}

impl fmt::Debug for ChannelId {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "ChannelId({})", self.0.as_hex())
	}
}

/// The payment hash is the hash of the [`PaymentPreimage`] which is the value used to lock
/// funds in HTLCs.
#[derive(Hash, Copy, Clone, PartialEq, Eq, Debug, PartialOrd, Ord)]
pub struct PaymentHash(pub [u8; 32]);

impl fmt::Display for PaymentHash {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "{}", self.0.as_hex())
	}
}

/// The payment preimage is the "secret key" which is used to claim the funds of an HTLC
/// on-chain or off-chain.
#[derive(Hash, Copy, Clone, PartialEq, Eq, Debug)]
pub struct PaymentPreimage(pub [u8; 32]);

impl PaymentPreimage {
	/// Returns the [`PaymentHash`] committing to this preimage.
	pub fn payment_hash(&self) -> PaymentHash {
		PaymentHash(sha256::Hash::hash(&self.0).to_byte_array())
	}
}
