// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Turns engine events into engine calls, funding steps and [`NodeNotification`]s.

use crate::funding::FundingWorkflow;

use portal::events::Event;
use portal::ln::engine::ChannelEngine;
use portal::ln::{ChannelId, PaymentHash};
use portal::util::logger::Logger;

use bitcoin::secp256k1::PublicKey;
use bitcoin::OutPoint;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use std::sync::{Arc, Mutex};

/// Something the user should hear about, published by a running [`Node`].
///
/// [`Node`]: crate::Node
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NodeNotification {
	/// A funded channel is waiting for its funding transaction to confirm.
	ChannelPending {
		/// The channel's id.
		channel_id: ChannelId,
		/// The counterparty's node id.
		counterparty_node_id: PublicKey,
		/// The funding output.
		funding_txo: OutPoint,
	},
	/// A channel is ready to be used.
	ChannelReady {
		/// The channel's id.
		channel_id: ChannelId,
		/// The counterparty's node id.
		counterparty_node_id: PublicKey,
	},
	/// A channel was closed.
	ChannelClosed {
		/// The channel's id.
		channel_id: ChannelId,
		/// Why it closed.
		description: String,
	},
	/// An outbound payment succeeded.
	PaymentSent {
		/// The payment hash.
		payment_hash: PaymentHash,
		/// Routing fees paid, if known.
		fee_paid_msat: Option<u64>,
	},
	/// An outbound payment failed.
	PaymentFailed {
		/// The payment hash.
		payment_hash: PaymentHash,
		/// Why it failed.
		description: String,
	},
	/// An inbound payment was claimed.
	PaymentReceived {
		/// The payment hash.
		payment_hash: PaymentHash,
		/// The amount received.
		amount_msat: u64,
	},
	/// A channel the counterparty accepted could not be funded.
	FundingFailed {
		/// The channel's temporary id.
		temporary_channel_id: ChannelId,
		/// Why funding failed.
		description: String,
	},
}

/// Handles every engine event not claimed by a pending channel open, in the order received.
///
/// Delayed HTLC forwarding runs on tasks owned by the dispatcher, which [`EventDispatcher::stop`]
/// cancels so the engine is never driven after the node stopped.
pub(crate) struct EventDispatcher {
	engine: Arc<dyn ChannelEngine>,
	funding: Arc<FundingWorkflow>,
	notifier: broadcast::Sender<NodeNotification>,
	forwards: Mutex<Vec<JoinHandle<()>>>,
	logger: Arc<dyn Logger>,
}

impl EventDispatcher {
	pub(crate) fn new(
		engine: Arc<dyn ChannelEngine>, funding: Arc<FundingWorkflow>,
		notifier: broadcast::Sender<NodeNotification>, logger: Arc<dyn Logger>,
	) -> Self {
		Self { engine, funding, notifier, forwards: Mutex::new(Vec::new()), logger }
	}

	/// Cancels every pending HTLC forward and waits until none is running. Must only be called
	/// once no more events are handled.
	pub(crate) async fn stop(&self) {
		let forwards = core::mem::take(&mut *self.forwards.lock().unwrap());
		for forward in forwards.iter() {
			forward.abort();
		}
		for forward in forwards {
			if let Err(e) = forward.await {
				if !e.is_cancelled() {
					log_error!(self.logger, "HTLC forwarding task failed: {}", e);
				}
			}
		}
	}

	fn notify(&self, notification: NodeNotification) {
		// Nobody listening is fine.
		let _ = self.notifier.send(notification);
	}

	pub(crate) fn handle_event(&self, event: Event) {
		match event {
			Event::FundingGenerationReady {
				temporary_channel_id,
				counterparty_node_id,
				channel_value_satoshis,
				output_script,
				..
			} => {
				log_info!(
					self.logger,
					"Funding channel {} with {}: {} sats",
					temporary_channel_id,
					counterparty_node_id,
					channel_value_satoshis
				);
				if let Err(e) = self.funding.fund_channel(
					&output_script,
					channel_value_satoshis,
					&temporary_channel_id,
					&counterparty_node_id,
				) {
					self.notify(NodeNotification::FundingFailed {
						temporary_channel_id,
						description: e.user_message(),
					});
				}
			},
			Event::ChannelPending {
				channel_id,
				former_temporary_channel_id,
				counterparty_node_id,
				funding_txo,
				..
			} => {
				log_info!(
					self.logger,
					"Channel {} with {} pending confirmation of {}",
					channel_id,
					counterparty_node_id,
					funding_txo
				);
				if let Some(temporary_channel_id) = former_temporary_channel_id {
					self.funding.forget(&temporary_channel_id);
				}
				self.notify(NodeNotification::ChannelPending {
					channel_id,
					counterparty_node_id,
					funding_txo,
				});
			},
			Event::ChannelReady { channel_id, counterparty_node_id, .. } => {
				log_info!(self.logger, "Channel {} with {} ready to be used", channel_id, counterparty_node_id);
				self.notify(NodeNotification::ChannelReady { channel_id, counterparty_node_id });
			},
			Event::ChannelClosed { channel_id, reason, .. } => {
				log_info!(self.logger, "Channel {} closed: {}", channel_id, reason);
				self.funding.forget(&channel_id);
				self.notify(NodeNotification::ChannelClosed {
					channel_id,
					description: reason.to_string(),
				});
			},
			Event::DiscardFunding { channel_id, transaction } => {
				log_info!(
					self.logger,
					"Discarding funding transaction {} of channel {}",
					transaction.compute_txid(),
					channel_id
				);
				self.funding.forget(&channel_id);
			},
			Event::PaymentSent { payment_hash, fee_paid_msat, .. } => {
				log_info!(self.logger, "Successfully sent payment {}", payment_hash);
				self.notify(NodeNotification::PaymentSent { payment_hash, fee_paid_msat });
			},
			Event::PaymentFailed { payment_hash, reason } => {
				let description = match reason {
					Some(reason) => reason.to_string(),
					None => "the payment failed for an unknown reason".to_string(),
				};
				log_info!(self.logger, "Failed to send payment {}: {}", payment_hash, description);
				self.notify(NodeNotification::PaymentFailed { payment_hash, description });
			},
			Event::PaymentClaimable { payment_hash, amount_msat, payment_preimage } => {
				match payment_preimage {
					Some(preimage) => {
						log_info!(
							self.logger,
							"Claiming payment {} of {} msat",
							payment_hash,
							amount_msat
						);
						self.engine.claim_funds(preimage);
					},
					None => {
						log_info!(
							self.logger,
							"Failing back payment {}: preimage unknown",
							payment_hash
						);
						self.engine.fail_htlc_backwards(&payment_hash);
					},
				}
			},
			Event::PaymentClaimed { payment_hash, amount_msat } => {
				log_info!(self.logger, "Received payment {} of {} msat", payment_hash, amount_msat);
				self.notify(NodeNotification::PaymentReceived { payment_hash, amount_msat });
			},
			Event::PendingHTLCsForwardable { time_forwardable } => {
				let engine = Arc::clone(&self.engine);
				let mut forwards = self.forwards.lock().unwrap();
				forwards.retain(|forward| !forward.is_finished());
				forwards.push(tokio::spawn(async move {
					tokio::time::sleep(time_forwardable).await;
					engine.process_pending_htlc_forwards();
				}));
			},
			Event::PaymentForwarded { prev_channel_id, next_channel_id, fee_earned_msat } => {
				let fmt_channel = |id: Option<ChannelId>| match id {
					Some(id) => id.to_string(),
					None => "unknown channel".to_string(),
				};
				log_info!(
					self.logger,
					"Forwarded payment from {} to {}, earning {} msat",
					fmt_channel(prev_channel_id),
					fmt_channel(next_channel_id),
					fee_earned_msat.unwrap_or(0)
				);
			},
			event => {
				log_warn!(self.logger, "Dropping unhandled event {:?}", event);
			},
		}
	}
}
