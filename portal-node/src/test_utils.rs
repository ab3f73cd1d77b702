// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

use crate::wallet::{OnchainWallet, WalletError};

use portal::chain::{BestBlock, ChainListener};
use portal::events::Event;
use portal::ln::engine::{
	ChannelDetails, ChannelEngine, ChannelEngineFactory, EngineContext, ScoringParameters,
};
use portal::ln::{ChannelId, PaymentHash, PaymentPreimage};
use portal::util::errors::{APIError, DecodeError};
use portal::util::persist::EnginePersister;

use bitcoin::absolute::LockTime;
use bitcoin::blockdata::constants::genesis_block;
use bitcoin::block::{Block, Header};
use bitcoin::secp256k1::{PublicKey, Secp256k1, SecretKey};
use bitcoin::transaction::Version;
use bitcoin::{
	Amount, BlockHash, Network, OutPoint, Script, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Witness,
};

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub(crate) fn pubkey(byte: u8) -> PublicKey {
	let secp_ctx = Secp256k1::new();
	PublicKey::from_secret_key(&secp_ctx, &SecretKey::from_slice(&[byte; 32]).unwrap())
}

pub(crate) fn funding_transaction(output_script: &Script, amount_sats: u64) -> Transaction {
	Transaction {
		version: Version::TWO,
		lock_time: LockTime::ZERO,
		input: vec![TxIn {
			previous_output: OutPoint::null(),
			script_sig: ScriptBuf::new(),
			sequence: Sequence::MAX,
			witness: Witness::new(),
		}],
		output: vec![TxOut {
			value: Amount::from_sat(amount_sats),
			script_pubkey: output_script.to_owned(),
		}],
	}
}

/// Polls `condition` until it holds, failing the test after a few seconds.
pub(crate) async fn wait_until<F: Fn() -> bool>(condition: F) {
	for _ in 0..500 {
		if condition() {
			return;
		}
		tokio::time::sleep(Duration::from_millis(10)).await;
	}
	panic!("Condition not met in time");
}

/// A scriptable [`ChannelEngine`] recording every call it receives.
///
/// Unless told otherwise, every channel it is asked to open is accepted by the counterparty right
/// away, queueing a `FundingGenerationReady` event.
pub(crate) struct TestEngine {
	node_id: PublicKey,
	best_block: Mutex<BestBlock>,
	pending_events: Mutex<Vec<Event>>,
	accepts_channels: AtomicBool,
	create_channel_error: Mutex<Option<APIError>>,
	funding_error: Mutex<Option<APIError>>,
	created: Mutex<Vec<(PublicKey, u64, u64, u128)>>,
	funding_attempts: AtomicUsize,
	funded: Mutex<Vec<(ChannelId, PublicKey, Transaction)>>,
	connected_blocks: Mutex<Vec<(BlockHash, u32)>>,
	disconnected_blocks: Mutex<Vec<(BlockHash, u32)>>,
	peers: Mutex<Vec<PublicKey>>,
	claimed: Mutex<Vec<PaymentPreimage>>,
	failed_back: Mutex<Vec<PaymentHash>>,
	forwards_processed: AtomicUsize,
	sync_completions: AtomicUsize,
	monitors: Mutex<Vec<(ChannelId, Vec<u8>)>>,
}

impl TestEngine {
	pub(crate) fn new() -> Self {
		Self {
			node_id: pubkey(1),
			best_block: Mutex::new(BestBlock::new(genesis_block(Network::Regtest).block_hash(), 0)),
			pending_events: Mutex::new(Vec::new()),
			accepts_channels: AtomicBool::new(true),
			create_channel_error: Mutex::new(None),
			funding_error: Mutex::new(None),
			created: Mutex::new(Vec::new()),
			funding_attempts: AtomicUsize::new(0),
			funded: Mutex::new(Vec::new()),
			connected_blocks: Mutex::new(Vec::new()),
			disconnected_blocks: Mutex::new(Vec::new()),
			peers: Mutex::new(Vec::new()),
			claimed: Mutex::new(Vec::new()),
			failed_back: Mutex::new(Vec::new()),
			forwards_processed: AtomicUsize::new(0),
			sync_completions: AtomicUsize::new(0),
			monitors: Mutex::new(Vec::new()),
		}
	}

	pub(crate) fn funding_script(&self) -> ScriptBuf {
		ScriptBuf::from_bytes([0x00, 0x20].into_iter().chain([0xab; 32]).collect())
	}

	pub(crate) fn set_accepts_channels(&self, accepts: bool) {
		self.accepts_channels.store(accepts, Ordering::SeqCst);
	}

	pub(crate) fn fail_create_channel_with(&self, err: APIError) {
		*self.create_channel_error.lock().unwrap() = Some(err);
	}

	pub(crate) fn fail_funding_with(&self, err: APIError) {
		*self.funding_error.lock().unwrap() = Some(err);
	}

	pub(crate) fn push_event(&self, event: Event) {
		self.pending_events.lock().unwrap().push(event);
	}

	pub(crate) fn add_monitor(&self, channel_id: ChannelId, monitor: Vec<u8>) {
		self.monitors.lock().unwrap().push((channel_id, monitor));
	}

	pub(crate) fn created_channels(&self) -> Vec<(PublicKey, u64, u64, u128)> {
		self.created.lock().unwrap().clone()
	}

	pub(crate) fn funding_attempts(&self) -> usize {
		self.funding_attempts.load(Ordering::SeqCst)
	}

	pub(crate) fn funded_channels(&self) -> Vec<(ChannelId, PublicKey, Transaction)> {
		self.funded.lock().unwrap().clone()
	}

	pub(crate) fn connected_blocks(&self) -> Vec<(BlockHash, u32)> {
		self.connected_blocks.lock().unwrap().clone()
	}

	pub(crate) fn disconnected_blocks(&self) -> Vec<(BlockHash, u32)> {
		self.disconnected_blocks.lock().unwrap().clone()
	}

	pub(crate) fn peers(&self) -> Vec<PublicKey> {
		self.peers.lock().unwrap().clone()
	}

	pub(crate) fn claimed(&self) -> Vec<PaymentPreimage> {
		self.claimed.lock().unwrap().clone()
	}

	pub(crate) fn failed_back(&self) -> Vec<PaymentHash> {
		self.failed_back.lock().unwrap().clone()
	}

	pub(crate) fn forwards_processed(&self) -> usize {
		self.forwards_processed.load(Ordering::SeqCst)
	}

	pub(crate) fn sync_completions(&self) -> usize {
		self.sync_completions.load(Ordering::SeqCst)
	}
}

impl ChainListener for TestEngine {
	fn block_connected(&self, block: &Block, height: u32) {
		self.connected_blocks.lock().unwrap().push((block.block_hash(), height));
		*self.best_block.lock().unwrap() = BestBlock::new(block.block_hash(), height);
	}

	fn block_disconnected(&self, header: &Header, height: u32) {
		self.disconnected_blocks.lock().unwrap().push((header.block_hash(), height));
		*self.best_block.lock().unwrap() = BestBlock::new(header.prev_blockhash, height - 1);
	}
}

impl ChannelEngine for TestEngine {
	fn node_id(&self) -> PublicKey {
		self.node_id
	}

	fn best_block(&self) -> BestBlock {
		*self.best_block.lock().unwrap()
	}

	fn create_channel(
		&self, their_network_key: PublicKey, channel_value_satoshis: u64, reserve_satoshis: u64,
		user_channel_id: u128,
	) -> Result<ChannelId, APIError> {
		if let Some(err) = self.create_channel_error.lock().unwrap().clone() {
			return Err(err);
		}
		self.created.lock().unwrap().push((
			their_network_key,
			channel_value_satoshis,
			reserve_satoshis,
			user_channel_id,
		));
		let mut id = [0; 32];
		id[..16].copy_from_slice(&user_channel_id.to_be_bytes());
		let temporary_channel_id = ChannelId(id);
		if self.accepts_channels.load(Ordering::SeqCst) {
			self.push_event(Event::FundingGenerationReady {
				temporary_channel_id,
				counterparty_node_id: their_network_key,
				channel_value_satoshis,
				output_script: self.funding_script(),
				user_channel_id,
			});
		}
		Ok(temporary_channel_id)
	}

	fn funding_transaction_generated(
		&self, temporary_channel_id: &ChannelId, counterparty_node_id: &PublicKey,
		funding_transaction: Transaction,
	) -> Result<(), APIError> {
		self.funding_attempts.fetch_add(1, Ordering::SeqCst);
		if let Some(err) = self.funding_error.lock().unwrap().clone() {
			return Err(err);
		}
		self.funded.lock().unwrap().push((
			*temporary_channel_id,
			*counterparty_node_id,
			funding_transaction,
		));
		Ok(())
	}

	fn process_pending_htlc_forwards(&self) {
		self.forwards_processed.fetch_add(1, Ordering::SeqCst);
	}

	fn claim_funds(&self, payment_preimage: PaymentPreimage) {
		self.claimed.lock().unwrap().push(payment_preimage);
	}

	fn fail_htlc_backwards(&self, payment_hash: &PaymentHash) {
		self.failed_back.lock().unwrap().push(*payment_hash);
	}

	fn get_and_clear_pending_events(&self) -> Vec<Event> {
		std::mem::take(&mut *self.pending_events.lock().unwrap())
	}

	fn list_channels(&self) -> Vec<ChannelDetails> {
		self.created
			.lock()
			.unwrap()
			.iter()
			.map(|(node_id, value, _, user_channel_id)| {
				let mut id = [0; 32];
				id[..16].copy_from_slice(&user_channel_id.to_be_bytes());
				ChannelDetails {
					channel_id: ChannelId(id),
					counterparty_node_id: *node_id,
					funding_txo: None,
					channel_value_satoshis: *value,
					user_channel_id: *user_channel_id,
					outbound_capacity_msat: value * 1000,
					inbound_capacity_msat: 0,
					is_channel_ready: false,
					is_usable: false,
				}
			})
			.collect()
	}

	fn new_outbound_connection(
		&self, their_node_id: PublicKey, _stream: std::net::TcpStream,
	) -> Result<(), APIError> {
		self.peers.lock().unwrap().push(their_node_id);
		Ok(())
	}

	fn chain_sync_completed(&self, _persister: Arc<dyn EnginePersister>, _scoring: ScoringParameters) {
		self.sync_completions.fetch_add(1, Ordering::SeqCst);
	}

	fn encode(&self) -> Vec<u8> {
		format!("manager with {} channels", self.created.lock().unwrap().len()).into_bytes()
	}

	fn encode_monitors(&self) -> Vec<(ChannelId, Vec<u8>)> {
		self.monitors.lock().unwrap().clone()
	}

	fn encode_network_graph(&self) -> Vec<u8> {
		b"network graph".to_vec()
	}
}

/// Hands out a shared [`TestEngine`], recording how it was asked to build it.
///
/// A restored engine resumes from the best block the shared engine last saw, as a restarted
/// engine would.
pub(crate) struct TestEngineFactory {
	pub(crate) engine: Arc<TestEngine>,
	fail: AtomicBool,
	fresh_calls: Mutex<Vec<(BestBlock, BlockHash)>>,
	restore_calls: Mutex<Vec<(Vec<u8>, Vec<(ChannelId, Vec<u8>)>, Option<Vec<u8>>)>>,
}

impl TestEngineFactory {
	pub(crate) fn new() -> Self {
		Self {
			engine: Arc::new(TestEngine::new()),
			fail: AtomicBool::new(false),
			fresh_calls: Mutex::new(Vec::new()),
			restore_calls: Mutex::new(Vec::new()),
		}
	}

	pub(crate) fn fail_construction(&self) {
		self.fail.store(true, Ordering::SeqCst);
	}

	pub(crate) fn fresh_calls(&self) -> Vec<(BestBlock, BlockHash)> {
		self.fresh_calls.lock().unwrap().clone()
	}

	pub(crate) fn restore_calls(&self) -> Vec<(Vec<u8>, Vec<(ChannelId, Vec<u8>)>, Option<Vec<u8>>)> {
		self.restore_calls.lock().unwrap().clone()
	}
}

impl ChannelEngineFactory for TestEngineFactory {
	fn restore(
		&self, _context: EngineContext, serialized_manager: Vec<u8>,
		monitors: Vec<(ChannelId, Vec<u8>)>, network_graph: Option<Vec<u8>>,
	) -> Result<Arc<dyn ChannelEngine>, DecodeError> {
		self.restore_calls.lock().unwrap().push((serialized_manager, monitors, network_graph));
		if self.fail.load(Ordering::SeqCst) {
			return Err(DecodeError::InvalidValue);
		}
		Ok(self.engine.clone())
	}

	fn fresh(
		&self, _context: EngineContext, best_block: BestBlock, genesis_hash: BlockHash,
	) -> Result<Arc<dyn ChannelEngine>, APIError> {
		self.fresh_calls.lock().unwrap().push((best_block, genesis_hash));
		if self.fail.load(Ordering::SeqCst) {
			return Err(APIError::APIMisuseError { err: "engine unavailable".to_string() });
		}
		*self.engine.best_block.lock().unwrap() = best_block;
		Ok(self.engine.clone())
	}
}

/// Pays the requested output from a made-up input.
pub(crate) struct TestWallet {
	error: Mutex<Option<String>>,
}

impl TestWallet {
	pub(crate) fn new() -> Self {
		Self { error: Mutex::new(None) }
	}

	pub(crate) fn fail_with(&self, err: &str) {
		*self.error.lock().unwrap() = Some(err.to_string());
	}
}

impl OnchainWallet for TestWallet {
	fn build_funding_transaction(
		&self, output_script: &Script, amount_sats: u64,
	) -> Result<Transaction, WalletError> {
		if let Some(err) = self.error.lock().unwrap().clone() {
			return Err(WalletError(err));
		}
		Ok(funding_transaction(output_script, amount_sats))
	}
}
