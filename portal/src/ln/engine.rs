// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! The narrow contract through which the node drives the payment-channel engine.
//!
//! The engine owns all channel state, HTLC processing and signing. The node only sequences its
//! construction, feeds it chain data through [`ChainListener`], answers its [`Event`]s and
//! persists what it hands back.

use crate::chain::{BestBlock, BroadcasterInterface, ChainListener};
use crate::events::Event;
use crate::ln::types::{ChannelId, PaymentHash, PaymentPreimage};
use crate::sign::KeysManager;
use crate::util::errors::{APIError, DecodeError};
use crate::util::logger::Logger;
use crate::util::persist::EnginePersister;

use bitcoin::secp256k1::PublicKey;
use bitcoin::{BlockHash, Network, OutPoint, Transaction};

use std::sync::Arc;

/// Parameters for the engine's probabilistic channel scorer, handed over once chain sync has
/// completed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScoringParameters {
	/// A fixed penalty in msats to apply to each channel.
	pub base_penalty_msat: u64,
	/// A multiplier used with the payment amount to calculate a fixed penalty applied to each
	/// channel, in excess of the [`base_penalty_msat`].
	///
	/// [`base_penalty_msat`]: Self::base_penalty_msat
	pub base_penalty_amount_multiplier_msat: u64,
	/// A multiplier used in conjunction with the negative `log10` of the channel's success
	/// probability for a payment.
	pub liquidity_penalty_multiplier_msat: u64,
}

impl Default for ScoringParameters {
	fn default() -> Self {
		Self {
			base_penalty_msat: 1000,
			base_penalty_amount_multiplier_msat: 8192,
			liquidity_penalty_multiplier_msat: 30_000,
		}
	}
}

/// Details of a channel, as returned by [`ChannelEngine::list_channels`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelDetails {
	/// The channel's ID (prior to funding transaction generation, this is a random 32 bytes).
	pub channel_id: ChannelId,
	/// The node_id of our counterparty.
	pub counterparty_node_id: PublicKey,
	/// The Channel's funding transaction output, if we've negotiated the funding transaction with
	/// our counterparty already.
	pub funding_txo: Option<OutPoint>,
	/// The value, in satoshis, of this channel as appears in the funding output.
	pub channel_value_satoshis: u64,
	/// The `user_channel_id` value passed in when the channel was created.
	pub user_channel_id: u128,
	/// Our total balance available for sending, in msats.
	pub outbound_capacity_msat: u64,
	/// Our total balance available for receiving, in msats.
	pub inbound_capacity_msat: u64,
	/// True if the channel is confirmed and both sides exchanged `channel_ready`.
	pub is_channel_ready: bool,
	/// True if the channel is ready and the peer is connected.
	pub is_usable: bool,
}

/// The payment-channel engine, as seen from the node.
///
/// Chain data reaches the engine through its [`ChainListener`] supertrait.
pub trait ChannelEngine: ChainListener {
	/// Our node id.
	fn node_id(&self) -> PublicKey;

	/// The last block the engine was told about. Chain tracking resumes from here, so blocks
	/// mined while the node was down still reach the engine.
	fn best_block(&self) -> BestBlock;

	/// Starts opening an outbound channel to `their_network_key`. The engine will emit
	/// [`Event::FundingGenerationReady`] carrying `user_channel_id` once the counterparty
	/// accepted. Returns the temporary channel id.
	fn create_channel(
		&self, their_network_key: PublicKey, channel_value_satoshis: u64, reserve_satoshis: u64,
		user_channel_id: u128,
	) -> Result<ChannelId, APIError>;

	/// Hands the signed funding transaction for a channel in [`Event::FundingGenerationReady`]
	/// back to the engine, which will broadcast it once the counterparty signed.
	fn funding_transaction_generated(
		&self, temporary_channel_id: &ChannelId, counterparty_node_id: &PublicKey,
		funding_transaction: Transaction,
	) -> Result<(), APIError>;

	/// Processes HTLCs which are pending waiting on random forward delay.
	fn process_pending_htlc_forwards(&self);

	/// Provides a payment preimage in response to [`Event::PaymentClaimable`].
	fn claim_funds(&self, payment_preimage: PaymentPreimage);

	/// Fails back a claimable payment we cannot or will not claim.
	fn fail_htlc_backwards(&self, payment_hash: &PaymentHash);

	/// Returns every pending event, leaving none behind.
	fn get_and_clear_pending_events(&self) -> Vec<Event>;

	/// Returns the current set of channels.
	fn list_channels(&self) -> Vec<ChannelDetails>;

	/// Hands an established outbound TCP connection to the engine's peer handling.
	fn new_outbound_connection(
		&self, their_node_id: PublicKey, stream: std::net::TcpStream,
	) -> Result<(), APIError>;

	/// Called once the local chain view caught up with the chain source. From here on the engine
	/// persists through `persister` and routes with the given scoring parameters.
	fn chain_sync_completed(&self, persister: Arc<dyn EnginePersister>, scoring: ScoringParameters);

	/// Serializes the channel manager state.
	fn encode(&self) -> Vec<u8>;

	/// Serializes every channel monitor, keyed by channel id.
	fn encode_monitors(&self) -> Vec<(ChannelId, Vec<u8>)>;

	/// Serializes the network graph.
	fn encode_network_graph(&self) -> Vec<u8>;
}

/// Everything an engine needs from the node at construction time.
#[derive(Clone)]
pub struct EngineContext {
	/// The network the node runs on.
	pub network: Network,
	/// Key material derived from the node's seed.
	pub keys_manager: Arc<KeysManager>,
	/// Where the engine sends transactions (funding, closing, sweeps).
	pub broadcaster: Arc<dyn BroadcasterInterface>,
	/// The node's logger.
	pub logger: Arc<dyn Logger>,
}

/// Builds a [`ChannelEngine`], either from scratch or from persisted state.
pub trait ChannelEngineFactory: Send + Sync {
	/// Reconstructs an engine from a serialized channel manager, its channel monitors and the
	/// network graph. Partial restores are never attempted: any inconsistency is an error.
	fn restore(
		&self, context: EngineContext, serialized_manager: Vec<u8>,
		monitors: Vec<(ChannelId, Vec<u8>)>, network_graph: Option<Vec<u8>>,
	) -> Result<Arc<dyn ChannelEngine>, DecodeError>;

	/// Constructs a fresh engine synced to `best_block`, with an empty network graph anchored
	/// at `genesis_hash`.
	fn fresh(
		&self, context: EngineContext, best_block: BestBlock, genesis_hash: BlockHash,
	) -> Result<Arc<dyn ChannelEngine>, APIError>;
}
