// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Structs and traits which allow the channel engine to follow the chain.

use bitcoin::block::{Block, Header};
use bitcoin::{BlockHash, Transaction};

/// The best known block as identified by its hash and height.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BestBlock {
	/// The block's hash
	pub block_hash: BlockHash,
	/// The height at which the block was confirmed.
	pub height: u32,
}

impl BestBlock {
	/// Returns a `BestBlock` for the given hash and height.
	pub fn new(block_hash: BlockHash, height: u32) -> Self {
		BestBlock { block_hash, height }
	}
}

/// Where chain tracking starts. Consumed once, when the tracker is preloaded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MonitorAnchor {
	/// Start from the genesis block.
	Genesis,
	/// Start from the block at the given height.
	Block(u32),
	/// Start from whatever the remote chain tip is at preload time.
	ChainTip,
}

impl Default for MonitorAnchor {
	fn default() -> Self {
		MonitorAnchor::ChainTip
	}
}

/// A consumer of block connections and disconnections, kept in lockstep with the local view of
/// the chain.
///
/// Notifications for a block are delivered before the tracker records that block as connected
/// or disconnected, so a listener may assume the tracker agrees with what it was just told.
pub trait ChainListener: Send + Sync {
	/// Notifies the listener that a block was added at the given height.
	fn block_connected(&self, block: &Block, height: u32);

	/// Notifies the listener that a block was removed at the given height.
	fn block_disconnected(&self, header: &Header, height: u32);
}

/// An interface to send a transaction to the Bitcoin network.
pub trait BroadcasterInterface: Send + Sync {
	/// Sends a list of transactions out to (hopefully) be mined.
	///
	/// Implementations must not block; broadcast is fire-and-forget from the engine's
	/// perspective.
	fn broadcast_transactions(&self, txs: &[&Transaction]);
}
