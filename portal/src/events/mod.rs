// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Events are returned from the channel engine to inform the node of activity it needs to act on
//! or surface, such as building a funding transaction or a payment completing.
//!
//! Events are drained with [`ChannelEngine::get_and_clear_pending_events`] and must be handled
//! in the order they were returned.
//!
//! [`ChannelEngine::get_and_clear_pending_events`]: crate::ln::engine::ChannelEngine::get_and_clear_pending_events

use crate::ln::types::{ChannelId, PaymentHash, PaymentPreimage};

use bitcoin::secp256k1::PublicKey;
use bitcoin::{OutPoint, ScriptBuf, Transaction};

use core::fmt;
use core::time::Duration;

/// The reason the channel was closed. See individual variants for more details.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClosureReason {
	/// Closure generated from receiving a peer error message, which the counterparty sent while
	/// force-closing.
	CounterpartyForceClosed {
		/// The error which the peer sent us.
		peer_msg: String,
	},
	/// Closure generated from a local request to force-close.
	HolderForceClosed,
	/// The channel was closed after negotiating a cooperative close and we've now broadcasted
	/// the cooperative close transaction.
	CooperativeClosure,
	/// A commitment transaction was confirmed on chain, closing the channel.
	CommitmentTxConfirmed,
	/// The funding transaction failed to confirm in a timely manner on an inbound channel.
	FundingTimedOut,
	/// Closure generated from processing an event, likely a HTLC forward/relay/reception.
	ProcessingError {
		/// A developer-readable error message which we generated.
		err: String,
	},
	/// The peer disconnected prior to funding completing.
	DisconnectedPeer,
	/// Closure generated from the node being restarted with a persisted manager older than the
	/// channel monitors.
	OutdatedChannelManager,
}

impl fmt::Display for ClosureReason {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		f.write_str("Channel closed because ")?;
		match self {
			ClosureReason::CounterpartyForceClosed { peer_msg } => {
				write!(f, "counterparty force-closed with message: {}", peer_msg)
			},
			ClosureReason::HolderForceClosed => f.write_str("user force-closed it"),
			ClosureReason::CooperativeClosure => f.write_str("the channel was cooperatively closed"),
			ClosureReason::CommitmentTxConfirmed => f.write_str("commitment or closing transaction was confirmed on chain."),
			ClosureReason::FundingTimedOut => write!(f, "funding transaction failed to confirm within the timeout"),
			ClosureReason::ProcessingError { err } => {
				f.write_str("of an exception: ")?;
				f.write_str(&err)
			},
			ClosureReason::DisconnectedPeer => f.write_str("the peer disconnected prior to the channel being funded"),
			ClosureReason::OutdatedChannelManager => f.write_str("the channel manager read from disk was stale compared to a channel monitor"),
		}
	}
}

/// The reason a payment failed to be sent.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PaymentFailureReason {
	/// The intended recipient rejected our payment.
	RecipientRejected,
	/// The user chose to abandon this payment.
	UserAbandoned,
	/// We exhausted all of our retry attempts while trying to send the payment.
	RetriesExhausted,
	/// The payment expired while retrying.
	PaymentExpired,
	/// We failed to find a route while retrying the payment.
	RouteNotFound,
	/// This error should generally never happen. This likely means that there is a problem with
	/// the engine.
	UnexpectedError,
}

impl fmt::Display for PaymentFailureReason {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		let description = match self {
			PaymentFailureReason::RecipientRejected => "the recipient rejected the payment",
			PaymentFailureReason::UserAbandoned => "the payment was abandoned",
			PaymentFailureReason::RetriesExhausted => "all retry attempts were exhausted",
			PaymentFailureReason::PaymentExpired => "the payment expired",
			PaymentFailureReason::RouteNotFound => "no route to the recipient could be found",
			PaymentFailureReason::UnexpectedError => "an unexpected error occurred",
		};
		f.write_str(description)
	}
}

/// An Event which you should probably take some action in response to.
///
/// New variants may be added over time; consumers must handle unknown variants gracefully.
#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum Event {
	/// Used to indicate that the client should generate a funding transaction with the given
	/// parameters and then call [`ChannelEngine::funding_transaction_generated`].
	///
	/// [`ChannelEngine::funding_transaction_generated`]: crate::ln::engine::ChannelEngine::funding_transaction_generated
	FundingGenerationReady {
		/// The random channel_id we picked which you'll need to pass into
		/// [`ChannelEngine::funding_transaction_generated`].
		///
		/// [`ChannelEngine::funding_transaction_generated`]: crate::ln::engine::ChannelEngine::funding_transaction_generated
		temporary_channel_id: ChannelId,
		/// The counterparty's node_id, which you'll need to pass back into
		/// [`ChannelEngine::funding_transaction_generated`].
		///
		/// [`ChannelEngine::funding_transaction_generated`]: crate::ln::engine::ChannelEngine::funding_transaction_generated
		counterparty_node_id: PublicKey,
		/// The value, in satoshis, that the output should have.
		channel_value_satoshis: u64,
		/// The script which should be used in the transaction output.
		output_script: ScriptBuf,
		/// The `user_channel_id` value passed in to [`ChannelEngine::create_channel`].
		///
		/// [`ChannelEngine::create_channel`]: crate::ln::engine::ChannelEngine::create_channel
		user_channel_id: u128,
	},
	/// Used to indicate that a channel with the given `channel_id` is being opened and pending
	/// confirmation on-chain.
	ChannelPending {
		/// The `channel_id` of the channel that is pending confirmation.
		channel_id: ChannelId,
		/// The `user_channel_id` value passed in when the channel was created.
		user_channel_id: u128,
		/// The `temporary_channel_id` this channel used to be known by during channel
		/// establishment.
		former_temporary_channel_id: Option<ChannelId>,
		/// The `node_id` of the channel counterparty.
		counterparty_node_id: PublicKey,
		/// The outpoint of the channel's funding transaction.
		funding_txo: OutPoint,
	},
	/// Used to indicate that a channel with the given `channel_id` is ready to be used.
	ChannelReady {
		/// The `channel_id` of the channel that is ready.
		channel_id: ChannelId,
		/// The `user_channel_id` value passed in when the channel was created.
		user_channel_id: u128,
		/// The `node_id` of the channel counterparty.
		counterparty_node_id: PublicKey,
	},
	/// Used to indicate that a previously opened channel with the given `channel_id` is in the
	/// process of closure.
	ChannelClosed {
		/// The `channel_id` of the channel which has been closed.
		channel_id: ChannelId,
		/// The `user_channel_id` value passed in when the channel was created.
		user_channel_id: u128,
		/// The reason the channel was closed.
		reason: ClosureReason,
		/// Counterparty in the closed channel, if known.
		counterparty_node_id: Option<PublicKey>,
	},
	/// Used to indicate to the user that they can abandon the funding transaction and recycle
	/// the inputs for another purpose.
	DiscardFunding {
		/// The channel_id of the channel which has been closed.
		channel_id: ChannelId,
		/// The full transaction received from the user.
		transaction: Transaction,
	},
	/// Indicates an outbound payment we made succeeded (i.e. it made it all the way to its
	/// target and we got back the payment preimage for it).
	PaymentSent {
		/// The preimage to the hash given to the engine when sending the payment.
		payment_preimage: PaymentPreimage,
		/// The hash that was given when sending the payment.
		payment_hash: PaymentHash,
		/// The total fee which was spent at intermediate hops in this payment, if known.
		fee_paid_msat: Option<u64>,
	},
	/// Indicates an outbound payment failed. Individual path failures are not surfaced here.
	PaymentFailed {
		/// The hash that was given when sending the payment.
		payment_hash: PaymentHash,
		/// The reason the payment failed, if known.
		reason: Option<PaymentFailureReason>,
	},
	/// Indicates we've received (an offer of) money! Just gotta dig out that payment preimage and
	/// feed it to [`ChannelEngine::claim_funds`] to get it....
	///
	/// [`ChannelEngine::claim_funds`]: crate::ln::engine::ChannelEngine::claim_funds
	PaymentClaimable {
		/// The hash for which the preimage should be handed to the engine.
		payment_hash: PaymentHash,
		/// The value, in thousandths of a satoshi, that this payment is claimable for.
		amount_msat: u64,
		/// The preimage, if the payment was for an invoice we generated and thus know it.
		payment_preimage: Option<PaymentPreimage>,
	},
	/// Indicates a payment has been claimed and we've received money!
	PaymentClaimed {
		/// The payment hash of the claimed payment.
		payment_hash: PaymentHash,
		/// The value, in thousandths of a satoshi, that this payment is for.
		amount_msat: u64,
	},
	/// Used to indicate that [`ChannelEngine::process_pending_htlc_forwards`] should be called at
	/// a time in the future.
	///
	/// [`ChannelEngine::process_pending_htlc_forwards`]: crate::ln::engine::ChannelEngine::process_pending_htlc_forwards
	PendingHTLCsForwardable {
		/// The minimum amount of time that should be waited prior to calling
		/// process_pending_htlc_forwards.
		time_forwardable: Duration,
	},
	/// This event is generated when a payment has been successfully forwarded through us and a
	/// forwarding fee earned.
	PaymentForwarded {
		/// The channel id of the incoming channel between the previous node and us.
		prev_channel_id: Option<ChannelId>,
		/// The channel id of the outgoing channel between the next node and us.
		next_channel_id: Option<ChannelId>,
		/// The fee, in milli-satoshis, which was earned as a result of the payment.
		fee_earned_msat: Option<u64>,
	},
	/// Used to indicate that an output which you should know how to spend was confirmed on chain
	/// and is now spendable.
	SpendableOutputs {
		/// The outputs which you should store as spendable by you.
		outputs: Vec<(OutPoint, u64)>,
		/// The `channel_id` indicating which channel the spendable outputs belong to.
		channel_id: Option<ChannelId>,
	},
}
