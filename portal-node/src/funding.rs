// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Opening outbound channels and answering the engine's requests for funding transactions.

use crate::error::FundingError;
use crate::wallet::OnchainWallet;

use portal::events::Event;
use portal::ln::engine::ChannelEngine;
use portal::ln::ChannelId;
use portal::sign::KeysManager;
use portal::util::event_tracker::PendingEventTracker;
use portal::util::logger::Logger;

use bitcoin::secp256k1::PublicKey;
use bitcoin::{ScriptBuf, Transaction};

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// What the caller needs to fund a channel the counterparty accepted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelOpenInfo {
	/// The script the funding output must pay to.
	pub funding_output_script: ScriptBuf,
	/// The id the channel is known by until it is funded.
	pub temporary_channel_id: ChannelId,
	/// The counterparty's node id.
	pub counterparty_node_id: PublicKey,
	/// The value the funding output must have.
	pub channel_value_satoshis: u64,
	/// The id we assigned to the channel when opening it.
	pub user_channel_id: u128,
}

/// Drives channel opens from the `create_channel` call through to handing the engine its funding
/// transaction.
///
/// Channel opens are serialized: the next one only asks the engine for a channel once the
/// previous one received its `FundingGenerationReady` event or gave up waiting. A channel whose
/// open was given up on is never funded, even if the counterparty accepts it later.
pub(crate) struct FundingWorkflow {
	engine: Arc<dyn ChannelEngine>,
	keys_manager: Arc<KeysManager>,
	wallet: Arc<dyn OnchainWallet>,
	pending_events: PendingEventTracker<Event>,
	awaiting: Mutex<HashSet<u128>>,
	abandoned: Mutex<HashSet<u128>>,
	in_flight: Mutex<HashMap<ChannelId, ChannelOpenInfo>>,
	open_lock: tokio::sync::Mutex<()>,
	timeout: Duration,
	logger: Arc<dyn Logger>,
}

impl FundingWorkflow {
	pub(crate) fn new(
		engine: Arc<dyn ChannelEngine>, keys_manager: Arc<KeysManager>,
		wallet: Arc<dyn OnchainWallet>, timeout: Duration, logger: Arc<dyn Logger>,
	) -> Self {
		Self {
			engine,
			keys_manager,
			wallet,
			pending_events: PendingEventTracker::new(),
			awaiting: Mutex::new(HashSet::new()),
			abandoned: Mutex::new(HashSet::new()),
			in_flight: Mutex::new(HashMap::new()),
			open_lock: tokio::sync::Mutex::new(()),
			timeout,
			logger,
		}
	}

	/// Asks the engine to open a channel and waits for the counterparty to accept it.
	pub(crate) async fn request_channel_open(
		&self, counterparty_node_id: PublicKey, channel_value_satoshis: u64, reserve_satoshis: u64,
	) -> Result<ChannelOpenInfo, FundingError> {
		let _open_guard = self.open_lock.lock().await;

		let user_channel_id = self.keys_manager.get_user_channel_id();
		self.awaiting.lock().unwrap().insert(user_channel_id);
		let expected = self.pending_events.get_count() + 1;

		let res = self
			.await_funding_generation(
				counterparty_node_id,
				channel_value_satoshis,
				reserve_satoshis,
				user_channel_id,
				expected,
			)
			.await;
		self.awaiting.lock().unwrap().remove(&user_channel_id);
		let info = res?;

		log_info!(
			self.logger,
			"Counterparty {} accepted channel {} of {} sats",
			info.counterparty_node_id,
			info.temporary_channel_id,
			info.channel_value_satoshis
		);
		self.in_flight.lock().unwrap().insert(info.temporary_channel_id, info.clone());
		Ok(info)
	}

	async fn await_funding_generation(
		&self, counterparty_node_id: PublicKey, channel_value_satoshis: u64, reserve_satoshis: u64,
		user_channel_id: u128, expected: usize,
	) -> Result<ChannelOpenInfo, FundingError> {
		let temporary_channel_id = self
			.engine
			.create_channel(counterparty_node_id, channel_value_satoshis, reserve_satoshis, user_channel_id)
			.map_err(|e| {
				log_error!(self.logger, "Failed to open channel to {}: {}", counterparty_node_id, e);
				FundingError::from(e)
			})?;
		log_debug!(
			self.logger,
			"Opening channel {} to {}, waiting for the counterparty",
			temporary_channel_id,
			counterparty_node_id
		);

		let events =
			match tokio::time::timeout(self.timeout, self.pending_events.await_events(expected)).await {
				Ok(events) => events,
				Err(_) => {
					log_error!(
						self.logger,
						"Counterparty {} did not accept channel {} within {}s",
						counterparty_node_id,
						temporary_channel_id,
						self.timeout.as_secs()
					);
					self.abandon(user_channel_id);
					return Err(FundingError::FundingFailure(
						"the counterparty did not accept the channel in time".to_string(),
					));
				},
			};

		for event in events {
			if let Event::FundingGenerationReady {
				temporary_channel_id,
				counterparty_node_id,
				channel_value_satoshis,
				output_script,
				user_channel_id: event_user_channel_id,
			} = event
			{
				if event_user_channel_id == user_channel_id {
					return Ok(ChannelOpenInfo {
						funding_output_script: output_script,
						temporary_channel_id,
						counterparty_node_id,
						channel_value_satoshis,
						user_channel_id,
					});
				}
			}
		}
		self.abandon(user_channel_id);
		Err(FundingError::FundingFailure("the engine did not ask for a funding transaction".to_string()))
	}

	// Must run before the id leaves `awaiting` so a late event always matches one of the sets.
	fn abandon(&self, user_channel_id: u128) {
		self.abandoned.lock().unwrap().insert(user_channel_id);
	}

	/// Takes `event` if a pending [`request_channel_open`] is waiting for it, otherwise hands it
	/// back.
	///
	/// A `FundingGenerationReady` for an open that already failed is taken and dropped, leaving
	/// the channel unfunded.
	///
	/// [`request_channel_open`]: Self::request_channel_open
	pub(crate) fn claim_event(&self, event: Event) -> Option<Event> {
		let (temporary_channel_id, user_channel_id) = match &event {
			Event::FundingGenerationReady { temporary_channel_id, user_channel_id, .. } => {
				(*temporary_channel_id, *user_channel_id)
			},
			_ => return Some(event),
		};
		if self.awaiting.lock().unwrap().contains(&user_channel_id) {
			self.pending_events.add_events(vec![event]);
			return None;
		}
		if self.abandoned.lock().unwrap().remove(&user_channel_id) {
			log_warn!(
				self.logger,
				"Not funding channel {}: its open was already reported as failed",
				temporary_channel_id
			);
			return None;
		}
		Some(event)
	}

	/// Returns the channel open started by [`request_channel_open`] for `temporary_channel_id`.
	///
	/// [`request_channel_open`]: Self::request_channel_open
	pub(crate) fn in_flight(&self, temporary_channel_id: &ChannelId) -> Option<ChannelOpenInfo> {
		self.in_flight.lock().unwrap().get(temporary_channel_id).cloned()
	}

	/// Drops any in-flight record for a channel that closed or whose funding was discarded.
	pub(crate) fn forget(&self, temporary_channel_id: &ChannelId) {
		self.in_flight.lock().unwrap().remove(temporary_channel_id);
	}

	/// Hands a caller-built funding transaction to the engine.
	pub(crate) fn open_channel(
		&self, info: &ChannelOpenInfo, funding_transaction: Transaction,
	) -> Result<(), FundingError> {
		self.submit_funding(
			&info.temporary_channel_id,
			&info.counterparty_node_id,
			funding_transaction,
		)?;
		self.forget(&info.temporary_channel_id);
		Ok(())
	}

	/// Builds a transaction paying `channel_value_satoshis` to `output_script` and hands it to
	/// the engine. Nothing is retried: a failure leaves the engine without a funding transaction
	/// for the channel.
	pub(crate) fn fund_channel(
		&self, output_script: &ScriptBuf, channel_value_satoshis: u64,
		temporary_channel_id: &ChannelId, counterparty_node_id: &PublicKey,
	) -> Result<(), FundingError> {
		let funding_transaction =
			match self.wallet.build_funding_transaction(output_script, channel_value_satoshis) {
				Ok(tx) => tx,
				Err(e) => {
					log_error!(
						self.logger,
						"Failed to build funding transaction for channel {}: {}",
						temporary_channel_id,
						e
					);
					return Err(FundingError::FundingFailure(e.to_string()));
				},
			};
		self.submit_funding(temporary_channel_id, counterparty_node_id, funding_transaction)?;
		self.forget(temporary_channel_id);
		Ok(())
	}

	fn submit_funding(
		&self, temporary_channel_id: &ChannelId, counterparty_node_id: &PublicKey,
		funding_transaction: Transaction,
	) -> Result<(), FundingError> {
		let txid = funding_transaction.compute_txid();
		match self.engine.funding_transaction_generated(
			temporary_channel_id,
			counterparty_node_id,
			funding_transaction,
		) {
			Ok(()) => {
				log_info!(
					self.logger,
					"Funding transaction {} for channel {} handed to the engine, awaiting confirmation",
					txid,
					temporary_channel_id
				);
				Ok(())
			},
			Err(e) => {
				log_error!(
					self.logger,
					"Engine rejected funding transaction {} for channel {}: {}",
					txid,
					temporary_channel_id,
					e
				);
				Err(e.into())
			},
		}
	}
}
