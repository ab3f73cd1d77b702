// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

use crate::{AsyncChainSourceResult, BlockHeaderData, ChainSource, ChainSourceError};

use portal::chain::ChainListener;

use bitcoin::block::{Block, Header, Version};
use bitcoin::blockdata::constants::genesis_block;
use bitcoin::consensus::encode;
use bitcoin::hashes::Hash;
use bitcoin::pow::CompactTarget;
use bitcoin::{BlockHash, Network, Transaction, TxMerkleNode, Txid};

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// An in-memory chain served as a [`ChainSource`].
///
/// Blocks that were reorganized out stay retrievable by hash, as they are from a real node.
pub struct Blockchain {
	active: Mutex<Vec<BlockHash>>,
	blocks: Mutex<HashMap<BlockHash, (Block, u32)>>,
	failing_heights: Mutex<HashSet<u32>>,
	submitted: Mutex<Vec<Transaction>>,
	forks: AtomicUsize,
	fetches: AtomicUsize,
	binary_fetches: AtomicUsize,
}

impl Blockchain {
	pub fn default() -> Self {
		Blockchain::with_network(Network::Regtest)
	}

	pub fn with_network(network: Network) -> Self {
		let genesis = genesis_block(network);
		let hash = genesis.block_hash();
		Self {
			active: Mutex::new(vec![hash]),
			blocks: Mutex::new(HashMap::from([(hash, (genesis, 0))])),
			failing_heights: Mutex::new(HashSet::new()),
			submitted: Mutex::new(Vec::new()),
			forks: AtomicUsize::new(0),
			fetches: AtomicUsize::new(0),
			binary_fetches: AtomicUsize::new(0),
		}
	}

	pub fn with_height(self, height: u32) -> Self {
		self.mine(height - self.tip_height());
		self
	}

	/// Extends the active chain by `count` blocks.
	pub fn mine(&self, count: u32) {
		let salt = self.forks.load(Ordering::SeqCst) as u32;
		let mut active = self.active.lock().unwrap();
		let mut blocks = self.blocks.lock().unwrap();
		for _ in 0..count {
			let prev_blockhash = *active.last().unwrap();
			let (prev_block, prev_height) = &blocks[&prev_blockhash];
			let block = Block {
				header: Header {
					version: Version::from_consensus(0x20000000),
					prev_blockhash,
					merkle_root: TxMerkleNode::all_zeros(),
					time: prev_block.header.time + 600,
					bits: CompactTarget::from_consensus(0x207fffff),
					nonce: salt,
				},
				txdata: vec![],
			};
			let height = prev_height + 1;
			active.push(block.block_hash());
			blocks.insert(block.block_hash(), (block, height));
		}
	}

	/// Replaces every block at `height` and above with new blocks, leaving the tip at
	/// `new_tip_height`.
	pub fn fork_at_height(&self, height: u32, new_tip_height: u32) {
		assert!(height > 0 && new_tip_height >= height - 1);
		self.forks.fetch_add(1, Ordering::SeqCst);
		self.active.lock().unwrap().truncate(height as usize);
		self.mine(new_tip_height + 1 - height);
	}

	pub fn disconnect_tip(&self) -> Option<BlockHash> {
		self.active.lock().unwrap().pop()
	}

	/// Makes `get_block_hash` fail for `height` until cleared.
	pub fn fail_at_height(&self, height: u32) {
		self.failing_heights.lock().unwrap().insert(height);
	}

	pub fn clear_failures(&self) {
		self.failing_heights.lock().unwrap().clear();
	}

	pub fn tip_height(&self) -> u32 {
		self.active.lock().unwrap().len() as u32 - 1
	}

	pub fn hash_at(&self, height: u32) -> BlockHash {
		self.active.lock().unwrap()[height as usize]
	}

	pub fn block_at(&self, height: u32) -> Block {
		self.blocks.lock().unwrap()[&self.hash_at(height)].0.clone()
	}

	pub fn header_data_at(&self, height: u32) -> BlockHeaderData {
		self.header_data(&self.hash_at(height)).unwrap()
	}

	/// Number of requests served, of any kind.
	pub fn fetch_count(&self) -> usize {
		self.fetches.load(Ordering::SeqCst)
	}

	pub fn binary_fetch_count(&self) -> usize {
		self.binary_fetches.load(Ordering::SeqCst)
	}

	pub fn submitted_transactions(&self) -> Vec<Transaction> {
		self.submitted.lock().unwrap().clone()
	}

	fn header_data(&self, block_hash: &BlockHash) -> Option<BlockHeaderData> {
		let blocks = self.blocks.lock().unwrap();
		let (block, height) = blocks.get(block_hash)?;
		Some(BlockHeaderData {
			block_hash: *block_hash,
			height: *height,
			header: block.header,
			tx_count: block.txdata.len() as u32,
			size: block.total_size() as u32,
			weight: block.weight().to_wu() as u32,
			difficulty: 4.656542373906925e-10,
		})
	}

	fn record_fetch(&self) {
		self.fetches.fetch_add(1, Ordering::SeqCst);
	}
}

impl ChainSource for Blockchain {
	fn get_chaintip_height<'a>(&'a self) -> AsyncChainSourceResult<'a, u32> {
		Box::pin(async move {
			self.record_fetch();
			Ok(self.tip_height())
		})
	}

	fn get_chaintip_hash<'a>(&'a self) -> AsyncChainSourceResult<'a, BlockHash> {
		Box::pin(async move {
			self.record_fetch();
			let active = self.active.lock().unwrap();
			active.last().copied().ok_or_else(|| ChainSourceError::transient("empty chain"))
		})
	}

	fn get_block_hash<'a>(&'a self, height: u32) -> AsyncChainSourceResult<'a, BlockHash> {
		Box::pin(async move {
			self.record_fetch();
			if self.failing_heights.lock().unwrap().contains(&height) {
				return Err(ChainSourceError::transient("connection reset"));
			}
			let active = self.active.lock().unwrap();
			active.get(height as usize).copied().ok_or_else(|| ChainSourceError::transient("height out of range"))
		})
	}

	fn get_block<'a>(&'a self, block_hash: &'a BlockHash) -> AsyncChainSourceResult<'a, BlockHeaderData> {
		Box::pin(async move {
			self.record_fetch();
			self.header_data(block_hash).ok_or_else(|| ChainSourceError::transient("block not found"))
		})
	}

	fn get_block_binary<'a>(&'a self, block_hash: &'a BlockHash) -> AsyncChainSourceResult<'a, Vec<u8>> {
		Box::pin(async move {
			self.record_fetch();
			self.binary_fetches.fetch_add(1, Ordering::SeqCst);
			let blocks = self.blocks.lock().unwrap();
			match blocks.get(block_hash) {
				Some((block, _)) => Ok(encode::serialize(block)),
				None => Err(ChainSourceError::transient("block not found")),
			}
		})
	}

	fn get_block_header<'a>(&'a self, block_hash: &'a BlockHash) -> AsyncChainSourceResult<'a, Vec<u8>> {
		Box::pin(async move {
			self.record_fetch();
			let blocks = self.blocks.lock().unwrap();
			match blocks.get(block_hash) {
				Some((block, _)) => Ok(encode::serialize(&block.header)),
				None => Err(ChainSourceError::transient("block not found")),
			}
		})
	}

	fn get_transaction_hex<'a>(&'a self, txid: &'a Txid) -> AsyncChainSourceResult<'a, String> {
		Box::pin(async move {
			use bitcoin::hex::DisplayHex;
			let raw = self.get_raw_transaction(txid).await?;
			Ok(raw.to_lower_hex_string())
		})
	}

	fn get_raw_transaction<'a>(&'a self, txid: &'a Txid) -> AsyncChainSourceResult<'a, Vec<u8>> {
		Box::pin(async move {
			self.record_fetch();
			let submitted = self.submitted.lock().unwrap();
			match submitted.iter().find(|tx| tx.compute_txid() == *txid) {
				Some(tx) => Ok(encode::serialize(tx)),
				None => Err(ChainSourceError::transient("transaction not found")),
			}
		})
	}

	fn submit_transaction<'a>(&'a self, raw_transaction: &'a [u8]) -> AsyncChainSourceResult<'a, Txid> {
		Box::pin(async move {
			self.record_fetch();
			let tx: Transaction = encode::deserialize(raw_transaction)
				.map_err(|_| ChainSourceError::persistent("invalid transaction"))?;
			let txid = tx.compute_txid();
			self.submitted.lock().unwrap().push(tx);
			Ok(txid)
		})
	}
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChainNotification {
	Connected(BlockHash, u32),
	Disconnected(BlockHash, u32),
}

/// Records every notification in the order it was delivered.
pub struct MockChainListener {
	notifications: Mutex<Vec<ChainNotification>>,
}

impl MockChainListener {
	pub fn new() -> Self {
		Self { notifications: Mutex::new(Vec::new()) }
	}

	pub fn notifications(&self) -> Vec<ChainNotification> {
		self.notifications.lock().unwrap().clone()
	}
}

impl ChainListener for MockChainListener {
	fn block_connected(&self, block: &Block, height: u32) {
		self.notifications.lock().unwrap().push(ChainNotification::Connected(block.block_hash(), height));
	}

	fn block_disconnected(&self, header: &Header, height: u32) {
		self.notifications.lock().unwrap().push(ChainNotification::Disconnected(header.block_hash(), height));
	}
}
