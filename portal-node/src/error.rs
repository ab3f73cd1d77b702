// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

use portal::util::errors::APIError;
use portal_block_sync::ChainError;

use bitcoin::ScriptBuf;

use std::fmt;
use std::io;

/// An error that prevented the node from starting, or a node-level operation from completing.
#[derive(Debug)]
pub enum NodeError {
	/// No 32-byte seed was supplied and none is stored in the storage directory.
	KeySeedNotFound,
	/// The seed could not be read or key material could not be derived from it.
	KeyInterfaceFailure,
	/// No usable chain source is configured.
	NoChainManager,
	/// No in-flight channel open matches the given temporary channel id.
	ChannelMaterialNotFound,
	/// The channel engine could not be restored or initialized.
	NoChannelManager,
	/// Connecting to the peer failed or timed out.
	ConnectPeerFailed,
	/// The node is already running.
	AlreadyRunning,
	/// The node is not running.
	NotRunning,
	/// The configuration is unusable.
	InvalidConfig(String),
	/// Reading or writing persisted state failed.
	Persistence(io::Error),
	/// Fetching the chain tip or parsing the chain source address failed.
	ChainSync(ChainError),
	/// Opening or funding a channel failed.
	Funding(FundingError),
}

impl fmt::Display for NodeError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::KeySeedNotFound => write!(f, "No key seed was found."),
			Self::KeyInterfaceFailure => write!(f, "Failed to derive keys from the seed."),
			Self::NoChainManager => write!(f, "No chain source is available."),
			Self::ChannelMaterialNotFound => write!(f, "No pending channel open matches the given channel id."),
			Self::NoChannelManager => write!(f, "Failed to set up the channel engine."),
			Self::ConnectPeerFailed => write!(f, "Failed to connect to the peer."),
			Self::AlreadyRunning => write!(f, "Node is already running."),
			Self::NotRunning => write!(f, "Node is not running."),
			Self::InvalidConfig(msg) => write!(f, "Invalid configuration: {}", msg),
			Self::Persistence(e) => write!(f, "Failed to access persisted state: {}", e),
			Self::ChainSync(e) => write!(f, "Chain sync failed: {}", e),
			Self::Funding(e) => write!(f, "{}", e),
		}
	}
}

impl std::error::Error for NodeError {
	fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
		match self {
			Self::Persistence(e) => Some(e),
			Self::ChainSync(e) => Some(e),
			Self::Funding(e) => Some(e),
			_ => None,
		}
	}
}

impl From<io::Error> for NodeError {
	fn from(e: io::Error) -> Self {
		Self::Persistence(e)
	}
}

impl From<ChainError> for NodeError {
	fn from(e: ChainError) -> Self {
		Self::ChainSync(e)
	}
}

impl From<FundingError> for NodeError {
	fn from(e: FundingError) -> Self {
		Self::Funding(e)
	}
}

/// An error raised while opening or funding a channel.
///
/// These never take the node down; they are reported to the caller, who may describe them to
/// the user with [`FundingError::user_message`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FundingError {
	/// The node has no channel engine, because it is not running.
	ChannelManagerNotFound,
	/// The funding transaction could not be built, or the counterparty never asked for one.
	FundingFailure(String),
	/// The channel is gone or not in a state to accept the request.
	ChannelUnavailable(String),
	/// The fee rate was rejected as too high.
	FeeRateTooHigh {
		/// The engine's description.
		err: String,
		/// The offending fee rate, in sat/kw.
		feerate: u32,
	},
	/// A route was rejected by the engine.
	InvalidRoute(String),
	/// A channel monitor update is still being persisted.
	MonitorUpdateInProgress,
	/// The counterparty does not accept our shutdown script.
	IncompatibleShutdownScript(ScriptBuf),
	/// The engine was called in a way it does not support.
	ApiMisuse(String),
}

impl FundingError {
	/// A description suitable for showing to the user.
	pub fn user_message(&self) -> String {
		match self {
			Self::ChannelManagerNotFound => "The node is not running.".to_string(),
			Self::FundingFailure(err) => format!("The channel could not be funded: {}", err),
			Self::ChannelUnavailable(err) => format!("The channel is not available: {}", err),
			Self::FeeRateTooHigh { feerate, .. } => {
				format!("The fee rate of {} sat/kw is too high.", feerate)
			},
			Self::InvalidRoute(err) => format!("No valid route was found: {}", err),
			Self::MonitorUpdateInProgress => {
				"The channel is busy saving its state. Please try again shortly.".to_string()
			},
			Self::IncompatibleShutdownScript(_) => {
				"The peer does not accept our closing address.".to_string()
			},
			Self::ApiMisuse(err) => format!("The request was rejected: {}", err),
		}
	}
}

impl fmt::Display for FundingError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::ChannelManagerNotFound => write!(f, "Channel manager not found"),
			Self::FundingFailure(err) => write!(f, "Funding failed: {}", err),
			Self::ChannelUnavailable(err) => write!(f, "Channel unavailable: {}", err),
			Self::FeeRateTooHigh { err, feerate } => write!(f, "{} feerate: {}", err, feerate),
			Self::InvalidRoute(err) => write!(f, "Invalid route: {}", err),
			Self::MonitorUpdateInProgress => write!(f, "Monitor update in progress"),
			Self::IncompatibleShutdownScript(script) => {
				write!(f, "Incompatible shutdown script: {}", script)
			},
			Self::ApiMisuse(err) => write!(f, "API misuse: {}", err),
		}
	}
}

impl std::error::Error for FundingError {}

impl From<APIError> for FundingError {
	fn from(e: APIError) -> Self {
		match e {
			APIError::APIMisuseError { err } => Self::ApiMisuse(err),
			APIError::FeeRateTooHigh { err, feerate } => Self::FeeRateTooHigh { err, feerate },
			APIError::InvalidRoute { err } => Self::InvalidRoute(err),
			APIError::ChannelUnavailable { err } => Self::ChannelUnavailable(err),
			APIError::MonitorUpdateInProgress => Self::MonitorUpdateInProgress,
			APIError::IncompatibleShutdownScript { script } => {
				Self::IncompatibleShutdownScript(script)
			},
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn engine_errors_map_to_funding_errors() {
		let err: FundingError = APIError::ChannelUnavailable { err: "peer gone".to_string() }.into();
		assert_eq!(err, FundingError::ChannelUnavailable("peer gone".to_string()));
		assert_eq!(err.user_message(), "The channel is not available: peer gone");

		let err: FundingError =
			APIError::FeeRateTooHigh { err: "too high".to_string(), feerate: 5000 }.into();
		assert_eq!(err.user_message(), "The fee rate of 5000 sat/kw is too high.");

		let err: FundingError = APIError::MonitorUpdateInProgress.into();
		assert_eq!(err, FundingError::MonitorUpdateInProgress);

		let err: FundingError = APIError::APIMisuseError { err: "no".to_string() }.into();
		assert_eq!(err, FundingError::ApiMisuse("no".to_string()));

		let err: FundingError =
			APIError::IncompatibleShutdownScript { script: ScriptBuf::new() }.into();
		assert_eq!(err, FundingError::IncompatibleShutdownScript(ScriptBuf::new()));

		let err: FundingError = APIError::InvalidRoute { err: "loop".to_string() }.into();
		assert_eq!(err.to_string(), "Invalid route: loop");
	}

	#[test]
	fn node_error_wraps_sources() {
		let err: NodeError = ChainError::InvalidUrlString.into();
		assert!(matches!(err, NodeError::ChainSync(ChainError::InvalidUrlString)));
		assert!(std::error::Error::source(&err).is_some());

		let err: NodeError = FundingError::ChannelManagerNotFound.into();
		assert_eq!(err.to_string(), "Channel manager not found");

		let err: NodeError = io::Error::new(io::ErrorKind::Other, "disk").into();
		assert!(matches!(err, NodeError::Persistence(_)));
		assert_eq!(NodeError::KeySeedNotFound.to_string(), "No key seed was found.");
	}
}
