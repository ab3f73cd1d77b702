// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! The locally-known chain and its reconciliation against a [`ChainSource`].

use crate::{BlockHeaderData, ChainError, ChainSource, ChainSourceError, ChainSourceResult};

use portal::chain::{BestBlock, ChainListener, MonitorAnchor};
use portal::util::event_tracker::PendingEventTracker;
use portal::util::logger::Logger;

use bitcoin::block::{Block, Header};
use bitcoin::consensus::encode;

use tokio::sync::Mutex;

use std::collections::VecDeque;
use std::sync::{Arc, RwLock};

/// The tracked chain: a contiguous run of blocks starting at the anchor, each linked to its
/// predecessor by height and hash.
struct ChainState {
	blocks: Vec<BlockHeaderData>,
}

impl ChainState {
	fn tip(&self) -> Option<BlockHeaderData> {
		self.blocks.last().copied()
	}
}

/// Follows a remote chain from an anchor block and keeps registered [`ChainListener`]s in
/// lockstep with it.
///
/// Every operation holds an internal lock for its whole duration, so preloading, connecting,
/// disconnecting and reconciling never interleave. Listeners are told about a block before the
/// tracker records it, and the anchor is never disconnected.
pub struct ChainTracker {
	source: Arc<dyn ChainSource>,
	state: Mutex<ChainState>,
	// Only the one-shot preloaded flag is used; it flips once the anchor is in place.
	preload_guard: PendingEventTracker<()>,
	listeners: RwLock<Vec<Arc<dyn ChainListener>>>,
	logger: Arc<dyn Logger>,
}

impl ChainTracker {
	/// Creates a tracker with an empty chain. Call [`ChainTracker::preload`] to anchor it.
	pub fn new(source: Arc<dyn ChainSource>, logger: Arc<dyn Logger>) -> Self {
		Self {
			source,
			state: Mutex::new(ChainState { blocks: Vec::new() }),
			preload_guard: PendingEventTracker::new(),
			listeners: RwLock::new(Vec::new()),
			logger,
		}
	}

	/// The chain source this tracker reads from.
	pub fn source(&self) -> &Arc<dyn ChainSource> {
		&self.source
	}

	/// Adds a listener for all subsequent connections and disconnections.
	pub fn register_listener(&self, listener: Arc<dyn ChainListener>) {
		self.listeners.write().unwrap().push(listener);
	}

	/// Anchors the chain at `anchor` and connects every block up to the remote tip.
	///
	/// Only the first successful anchoring does any work; later calls return `Ok(())` without
	/// touching the chain source. If a block after the anchor cannot be connected, the blocks
	/// connected so far are kept and `UnableToConnectBlock` names the failing height.
	pub async fn preload(&self, anchor: MonitorAnchor) -> Result<(), ChainError> {
		let mut state = self.state.lock().await;
		if self.preload_guard.is_preloaded() {
			return Ok(());
		}

		let (anchor_height, tip_height) = match anchor {
			MonitorAnchor::Genesis => (0, None),
			MonitorAnchor::Block(height) => (height, None),
			MonitorAnchor::ChainTip => {
				let height = self.source.get_chaintip_height().await.map_err(|e| {
					log_error!(self.logger, "Failed to fetch chain tip height for anchor: {}", e);
					ChainError::UnknownAnchorBlock
				})?;
				(height, Some(height))
			},
		};

		let anchor_block = self.fetch_block_at(anchor_height).await.map_err(|e| {
			log_error!(self.logger, "Failed to fetch anchor block at height {}: {}", anchor_height, e);
			ChainError::UnknownAnchorBlock
		})?;
		log_info!(self.logger, "Anchored chain at block {}", log_block!(anchor_block.block_hash, anchor_block.height));
		state.blocks = vec![anchor_block];
		self.preload_guard.preload();

		let tip_height = match tip_height {
			Some(height) => height,
			None => self.source.get_chaintip_height().await?,
		};
		if anchor_height < tip_height {
			self.connect_range_locked(&mut state, anchor_height + 1, tip_height).await?;
		}
		Ok(())
	}

	/// Fetches and connects every block in `from..=to`, stopping at the first failure.
	pub async fn connect_range(&self, from: u32, to: u32) -> Result<(), ChainError> {
		let mut state = self.state.lock().await;
		self.connect_range_locked(&mut state, from, to).await
	}

	/// Connects `block` on top of the local tip, notifying listeners first.
	///
	/// Fails with `NonSequentialBlockConnection` or `UnhandledReorganization` if `block` does not
	/// extend the tip; reconcile first in that case. Fails with `UnknownAnchorBlock` before
	/// [`ChainTracker::preload`] anchored the chain.
	pub async fn connect_block(&self, block: BlockHeaderData) -> Result<(), ChainError> {
		let mut state = self.state.lock().await;
		self.connect_block_locked(&mut state, block).await
	}

	/// Removes the local tip, notifying listeners first, and returns it.
	///
	/// Fails with `ExcessiveReorganization`, leaving the chain unchanged, if only the anchor
	/// remains.
	pub async fn disconnect_block(&self) -> Result<BlockHeaderData, ChainError> {
		let mut state = self.state.lock().await;
		self.disconnect_block_locked(&mut state).await
	}

	/// Brings the local chain in line with the remote best chain.
	///
	/// New blocks are staged first. Then, walking back from the local tip, any block the remote
	/// chain no longer contains is disconnected and its replacement staged, until the first
	/// staged block builds on the local tip or the two chains agree. Finally the staged blocks
	/// are connected in ascending order.
	pub async fn reconcile_chaintips(&self) -> Result<(), ChainError> {
		let mut state = self.state.lock().await;
		let local_tip = state.tip().ok_or(ChainError::UnknownAnchorBlock)?;

		let remote_height = self.source.get_chaintip_height().await?;
		let remote_hash = self.source.get_chaintip_hash().await?;
		if remote_height == local_tip.height && remote_hash == local_tip.block_hash {
			return Ok(());
		}

		let mut staged = VecDeque::new();
		for height in local_tip.height.saturating_add(1)..=remote_height {
			let block = self.fetch_block_at(height).await.map_err(|e| {
				log_error!(self.logger, "Failed to fetch block at height {}: {}", height, e);
				ChainError::UnableToConnectBlock(height)
			})?;
			staged.push_back(block);
		}

		loop {
			let tip = state.tip().ok_or(ChainError::UnknownAnchorBlock)?;
			if let Some(first) = staged.front() {
				if first.previous_hash() == Some(tip.block_hash) {
					break;
				}
			}

			if tip.height > remote_height {
				self.disconnect_block_locked(&mut state).await?;
				continue;
			}

			if self.source.get_block_hash(tip.height).await? == tip.block_hash {
				break;
			}

			log_info!(self.logger, "Block {} was reorganized out", log_block!(tip.block_hash, tip.height));
			self.disconnect_block_locked(&mut state).await?;
			let replacement = self.fetch_block_at(tip.height).await.map_err(|e| {
				log_error!(self.logger, "Failed to fetch replacement block at height {}: {}", tip.height, e);
				ChainError::UnableToConnectBlock(tip.height)
			})?;
			staged.push_front(replacement);
		}

		for block in staged {
			self.connect_block_locked(&mut state, block).await?;
		}
		Ok(())
	}

	/// Whether the chain has been anchored by [`ChainTracker::preload`].
	pub async fn is_monitoring(&self) -> bool {
		let _state = self.state.lock().await;
		self.preload_guard.is_preloaded()
	}

	/// The local tip, if the chain has any blocks.
	pub async fn tip(&self) -> Option<BestBlock> {
		self.state.lock().await.tip().map(|tip| BestBlock::new(tip.block_hash, tip.height))
	}

	/// A copy of the local chain, anchor first.
	pub async fn blocks(&self) -> Vec<BlockHeaderData> {
		self.state.lock().await.blocks.clone()
	}

	async fn fetch_block_at(&self, height: u32) -> ChainSourceResult<BlockHeaderData> {
		let block_hash = self.source.get_block_hash(height).await?;
		let block = self.source.get_block(&block_hash).await?;
		if block.block_hash != block_hash || block.height != height {
			return Err(ChainSourceError::persistent("block does not match requested height"));
		}
		Ok(block)
	}

	async fn connect_range_locked(&self, state: &mut ChainState, from: u32, to: u32) -> Result<(), ChainError> {
		for height in from..=to {
			let block = self.fetch_block_at(height).await.map_err(|e| {
				log_error!(self.logger, "Failed to fetch block at height {}: {}", height, e);
				ChainError::UnableToConnectBlock(height)
			})?;
			self.connect_block_locked(state, block).await?;
		}
		Ok(())
	}

	async fn connect_block_locked(&self, state: &mut ChainState, block: BlockHeaderData) -> Result<(), ChainError> {
		let tip = state.tip().ok_or(ChainError::UnknownAnchorBlock)?;
		if block.height != tip.height + 1 {
			return Err(ChainError::NonSequentialBlockConnection);
		}
		if block.previous_hash() != Some(tip.block_hash) {
			return Err(ChainError::UnhandledReorganization);
		}

		let listeners = self.listeners.read().unwrap().clone();
		if !listeners.is_empty() {
			let full_block = self.fetch_full_block(&block).await.map_err(|e| {
				log_error!(self.logger, "Failed to fetch block {}: {}", log_block!(block.block_hash, block.height), e);
				ChainError::UnableToConnectBlock(block.height)
			})?;
			for listener in listeners.iter() {
				listener.block_connected(&full_block, block.height);
			}
		}

		log_debug!(self.logger, "Connected block {}", log_block!(block.block_hash, block.height));
		state.blocks.push(block);
		Ok(())
	}

	async fn disconnect_block_locked(&self, state: &mut ChainState) -> Result<BlockHeaderData, ChainError> {
		let tip = match state.tip() {
			Some(tip) if state.blocks.len() > 1 => tip,
			_ => return Err(ChainError::ExcessiveReorganization),
		};

		let listeners = self.listeners.read().unwrap().clone();
		if !listeners.is_empty() {
			let raw_header = self.source.get_block_header(&tip.block_hash).await?;
			let header: Header = encode::deserialize(&raw_header)
				.map_err(|_| ChainSourceError::persistent("invalid block header"))?;
			for listener in listeners.iter() {
				listener.block_disconnected(&header, tip.height);
			}
		}

		log_debug!(self.logger, "Disconnected block {}", log_block!(tip.block_hash, tip.height));
		state.blocks.pop();
		Ok(tip)
	}

	async fn fetch_full_block(&self, block: &BlockHeaderData) -> ChainSourceResult<Block> {
		let raw_block = self.source.get_block_binary(&block.block_hash).await?;
		let full_block: Block = encode::deserialize(&raw_block)
			.map_err(|_| ChainSourceError::persistent("invalid block data"))?;
		if full_block.block_hash() != block.block_hash {
			return Err(ChainSourceError::persistent("block does not match requested hash"));
		}
		Ok(full_block)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::test_utils::{Blockchain, ChainNotification, MockChainListener};

	use portal::util::test_utils::TestLogger;

	fn tracker_for(chain: &Arc<Blockchain>) -> (ChainTracker, Arc<MockChainListener>) {
		let tracker = ChainTracker::new(chain.clone(), Arc::new(TestLogger::new()));
		let listener = Arc::new(MockChainListener::new());
		tracker.register_listener(listener.clone());
		(tracker, listener)
	}

	fn assert_linked(blocks: &[BlockHeaderData]) {
		for pair in blocks.windows(2) {
			assert_eq!(pair[1].height, pair[0].height + 1);
			assert_eq!(pair[1].previous_hash(), Some(pair[0].block_hash));
		}
	}

	#[tokio::test]
	async fn preload_at_chain_tip_connects_nothing() {
		let chain = Arc::new(Blockchain::default().with_height(10));
		let (tracker, listener) = tracker_for(&chain);

		assert!(!tracker.is_monitoring().await);
		tracker.preload(MonitorAnchor::ChainTip).await.unwrap();
		assert!(tracker.is_monitoring().await);
		assert_eq!(tracker.tip().await, Some(BestBlock::new(chain.hash_at(10), 10)));
		assert_eq!(tracker.blocks().await.len(), 1);
		assert!(listener.notifications().is_empty());
	}

	#[tokio::test]
	async fn preload_connects_up_to_tip() {
		let chain = Arc::new(Blockchain::default().with_height(5));
		let (tracker, listener) = tracker_for(&chain);

		tracker.preload(MonitorAnchor::Genesis).await.unwrap();
		let blocks = tracker.blocks().await;
		assert_eq!(blocks.len(), 6);
		assert_eq!(blocks[0].height, 0);
		assert_linked(&blocks);
		assert_eq!(listener.notifications(), (1..=5)
			.map(|height| ChainNotification::Connected(chain.hash_at(height), height))
			.collect::<Vec<_>>());
	}

	#[tokio::test]
	async fn preload_twice_fetches_nothing() {
		let chain = Arc::new(Blockchain::default().with_height(3));
		let (tracker, _listener) = tracker_for(&chain);

		tracker.preload(MonitorAnchor::Block(1)).await.unwrap();
		let fetches = chain.fetch_count();
		chain.mine(2);
		tracker.preload(MonitorAnchor::Block(1)).await.unwrap();
		assert_eq!(chain.fetch_count(), fetches);
		assert_eq!(tracker.tip().await.unwrap().height, 3);
	}

	#[tokio::test]
	async fn concurrent_preloads_anchor_once() {
		let chain = Arc::new(Blockchain::default().with_height(4));
		let (tracker, listener) = tracker_for(&chain);

		let (first, second) = tokio::join!(
			tracker.preload(MonitorAnchor::Genesis),
			tracker.preload(MonitorAnchor::Block(2)),
		);
		first.unwrap();
		second.unwrap();
		let blocks = tracker.blocks().await;
		assert_eq!(blocks.len(), 5);
		assert_eq!(blocks[0].height, 0);
		assert_eq!(listener.notifications().len(), 4);
	}

	#[tokio::test]
	async fn preload_with_unknown_anchor() {
		let chain = Arc::new(Blockchain::default().with_height(3));
		let (tracker, _listener) = tracker_for(&chain);

		match tracker.preload(MonitorAnchor::Block(10)).await {
			Err(ChainError::UnknownAnchorBlock) => {},
			other => panic!("Expected UnknownAnchorBlock, got {:?}", other),
		}
		assert!(!tracker.is_monitoring().await);
		assert!(tracker.blocks().await.is_empty());
	}

	#[tokio::test]
	async fn preload_stops_at_failing_height() {
		let chain = Arc::new(Blockchain::default().with_height(105));
		let (tracker, listener) = tracker_for(&chain);
		chain.fail_at_height(103);

		match tracker.preload(MonitorAnchor::Block(100)).await {
			Err(ChainError::UnableToConnectBlock(height)) => assert_eq!(height, 103),
			other => panic!("Expected UnableToConnectBlock, got {:?}", other),
		}

		let blocks = tracker.blocks().await;
		assert_eq!(blocks.iter().map(|block| block.height).collect::<Vec<_>>(), vec![100, 101, 102]);
		assert_linked(&blocks);
		assert!(tracker.is_monitoring().await);
		assert_eq!(listener.notifications().len(), 2);
		assert_eq!(chain.binary_fetch_count(), 2);
	}

	#[tokio::test]
	async fn connect_block_before_preload() {
		let chain = Arc::new(Blockchain::default().with_height(2));
		let (tracker, listener) = tracker_for(&chain);

		match tracker.connect_block(chain.header_data_at(1)).await {
			Err(ChainError::UnknownAnchorBlock) => {},
			other => panic!("Expected UnknownAnchorBlock, got {:?}", other),
		}
		match tracker.connect_range(1, 2).await {
			Err(ChainError::UnknownAnchorBlock) => {},
			other => panic!("Expected UnknownAnchorBlock, got {:?}", other),
		}
		assert!(listener.notifications().is_empty());
		assert!(tracker.blocks().await.is_empty());

		tracker.preload(MonitorAnchor::Genesis).await.unwrap();
		assert_eq!(listener.notifications().len(), 2);
		assert_eq!(tracker.blocks().await.len(), 3);
	}

	#[tokio::test]
	async fn connect_block_out_of_sequence() {
		let chain = Arc::new(Blockchain::default().with_height(1));
		let (tracker, listener) = tracker_for(&chain);
		tracker.preload(MonitorAnchor::Genesis).await.unwrap();
		chain.mine(3);

		match tracker.connect_block(chain.header_data_at(3)).await {
			Err(ChainError::NonSequentialBlockConnection) => {},
			other => panic!("Expected NonSequentialBlockConnection, got {:?}", other),
		}

		chain.fork_at_height(2, 2);
		let mut stale = chain.header_data_at(2);
		stale.header.prev_blockhash = chain.hash_at(0);
		match tracker.connect_block(stale).await {
			Err(ChainError::UnhandledReorganization) => {},
			other => panic!("Expected UnhandledReorganization, got {:?}", other),
		}

		assert_eq!(tracker.blocks().await.len(), 2);
		assert_eq!(listener.notifications().len(), 1);
	}

	#[tokio::test]
	async fn disconnect_never_removes_anchor() {
		let chain = Arc::new(Blockchain::default().with_height(2));
		let (tracker, listener) = tracker_for(&chain);
		tracker.preload(MonitorAnchor::Block(1)).await.unwrap();

		let disconnected = tracker.disconnect_block().await.unwrap();
		assert_eq!(disconnected.height, 2);
		assert_eq!(listener.notifications().last(), Some(&ChainNotification::Disconnected(chain.hash_at(2), 2)));

		let before = tracker.blocks().await;
		match tracker.disconnect_block().await {
			Err(ChainError::ExcessiveReorganization) => {},
			other => panic!("Expected ExcessiveReorganization, got {:?}", other),
		}
		assert_eq!(tracker.blocks().await, before);
		assert_eq!(before.len(), 1);
	}

	#[tokio::test]
	async fn reconcile_before_preload() {
		let chain = Arc::new(Blockchain::default().with_height(2));
		let (tracker, _listener) = tracker_for(&chain);

		match tracker.reconcile_chaintips().await {
			Err(ChainError::UnknownAnchorBlock) => {},
			other => panic!("Expected UnknownAnchorBlock, got {:?}", other),
		}
	}

	#[tokio::test]
	async fn reconcile_at_same_tip_is_noop() {
		let chain = Arc::new(Blockchain::default().with_height(3));
		let (tracker, listener) = tracker_for(&chain);
		tracker.preload(MonitorAnchor::Genesis).await.unwrap();
		let notified = listener.notifications().len();

		tracker.reconcile_chaintips().await.unwrap();
		assert_eq!(listener.notifications().len(), notified);
	}

	#[tokio::test]
	async fn reconcile_extends_chain() {
		let chain = Arc::new(Blockchain::default().with_height(3));
		let (tracker, listener) = tracker_for(&chain);
		tracker.preload(MonitorAnchor::ChainTip).await.unwrap();

		chain.mine(3);
		tracker.reconcile_chaintips().await.unwrap();
		assert_eq!(tracker.tip().await, Some(BestBlock::new(chain.hash_at(6), 6)));
		assert_eq!(listener.notifications(), vec![
			ChainNotification::Connected(chain.hash_at(4), 4),
			ChainNotification::Connected(chain.hash_at(5), 5),
			ChainNotification::Connected(chain.hash_at(6), 6),
		]);
	}

	#[tokio::test]
	async fn reconcile_replaced_tip_and_extension() {
		let chain = Arc::new(Blockchain::default().with_height(101));
		let (tracker, listener) = tracker_for(&chain);
		tracker.preload(MonitorAnchor::Block(100)).await.unwrap();
		let a = chain.hash_at(100);
		let b = chain.hash_at(101);
		assert_eq!(listener.notifications(), vec![ChainNotification::Connected(b, 101)]);

		chain.fork_at_height(101, 102);
		let b_prime = chain.hash_at(101);
		let c = chain.hash_at(102);
		assert_ne!(b, b_prime);

		tracker.reconcile_chaintips().await.unwrap();
		assert_eq!(listener.notifications()[1..].to_vec(), vec![
			ChainNotification::Disconnected(b, 101),
			ChainNotification::Connected(b_prime, 101),
			ChainNotification::Connected(c, 102),
		]);

		let blocks = tracker.blocks().await;
		assert_eq!(blocks.iter().map(|block| block.block_hash).collect::<Vec<_>>(), vec![a, b_prime, c]);
		assert_linked(&blocks);
	}

	#[tokio::test]
	async fn reconcile_deep_reorg_at_equal_height() {
		let chain = Arc::new(Blockchain::default().with_height(10));
		let (tracker, listener) = tracker_for(&chain);
		tracker.preload(MonitorAnchor::Block(5)).await.unwrap();
		let old: Vec<_> = (6..=10).map(|height| chain.hash_at(height)).collect();

		chain.fork_at_height(8, 10);
		tracker.reconcile_chaintips().await.unwrap();

		let notifications = listener.notifications();
		assert_eq!(notifications[5..].to_vec(), vec![
			ChainNotification::Disconnected(old[4], 10),
			ChainNotification::Disconnected(old[3], 9),
			ChainNotification::Disconnected(old[2], 8),
			ChainNotification::Connected(chain.hash_at(8), 8),
			ChainNotification::Connected(chain.hash_at(9), 9),
			ChainNotification::Connected(chain.hash_at(10), 10),
		]);
		assert_linked(&tracker.blocks().await);
	}

	#[tokio::test]
	async fn reconcile_shorter_remote_chain() {
		let chain = Arc::new(Blockchain::default().with_height(6));
		let (tracker, listener) = tracker_for(&chain);
		tracker.preload(MonitorAnchor::Block(3)).await.unwrap();
		let old_tip = chain.hash_at(6);

		chain.disconnect_tip();
		tracker.reconcile_chaintips().await.unwrap();
		assert_eq!(listener.notifications().last(), Some(&ChainNotification::Disconnected(old_tip, 6)));
		assert_eq!(tracker.tip().await, Some(BestBlock::new(chain.hash_at(5), 5)));
	}

	#[tokio::test]
	async fn reconcile_reorg_past_anchor() {
		let chain = Arc::new(Blockchain::default().with_height(4));
		let (tracker, _listener) = tracker_for(&chain);
		tracker.preload(MonitorAnchor::Block(3)).await.unwrap();

		chain.fork_at_height(2, 5);
		match tracker.reconcile_chaintips().await {
			Err(ChainError::ExcessiveReorganization) => {},
			other => panic!("Expected ExcessiveReorganization, got {:?}", other),
		}
		let blocks = tracker.blocks().await;
		assert_eq!(blocks.len(), 1);
		assert_eq!(blocks[0].height, 3);
	}

	#[tokio::test]
	async fn reconcile_without_listeners_skips_block_downloads() {
		let chain = Arc::new(Blockchain::default().with_height(2));
		let tracker = ChainTracker::new(chain.clone(), Arc::new(TestLogger::new()));
		tracker.preload(MonitorAnchor::Genesis).await.unwrap();
		chain.mine(2);
		tracker.reconcile_chaintips().await.unwrap();
		assert_eq!(chain.binary_fetch_count(), 0);
		assert_linked(&tracker.blocks().await);
	}
}
