// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Error types live here.

use bitcoin::ScriptBuf;

use core::fmt;

/// Indicates an error reported by the channel engine in response to a request (usually some
/// variant of attempting to use too-low or too-high values, or a channel that cannot serve it).
#[derive(Clone, PartialEq, Eq)]
pub enum APIError {
	/// Indicates the API was wholly misused (see err for more). Cases where these can be returned
	/// are documented, but generally indicates some precondition of a function was violated.
	APIMisuseError {
		/// A human-readable error message
		err: String,
	},
	/// Due to a high feerate, we were unable to complete the request.
	/// For example, this may be returned if the feerate implies we cannot open a channel at the
	/// requested value, but opening a larger channel would succeed.
	FeeRateTooHigh {
		/// A human-readable error message
		err: String,
		/// The feerate which was too high.
		feerate: u32,
	},
	/// A malformed route was provided (eg overflowed value, node id mismatch, overly-looped route,
	/// too-many-hops, etc).
	InvalidRoute {
		/// A human-readable error message
		err: String,
	},
	/// We were unable to complete the request as the channel required to do so is unable to
	/// complete the request (or was not found). This can take many forms, including disconnected
	/// peer, channel at capacity, channel shutting down, etc.
	ChannelUnavailable {
		/// A human-readable error message
		err: String,
	},
	/// Persistence of a channel monitor update is still in progress. Once it resolves the
	/// attempted action should complete automatically.
	MonitorUpdateInProgress,
	/// The shutdown script we offered is incompatible with the features the counterparty
	/// negotiated.
	///
	/// Using a SegWit v0 script should resolve this issue. If you cannot, you won't be able to open
	/// a channel or cooperatively close one with this peer (and will have to force-close instead).
	IncompatibleShutdownScript {
		/// The incompatible shutdown script.
		script: ScriptBuf,
	},
}

impl fmt::Debug for APIError {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match *self {
			APIError::APIMisuseError { ref err } => write!(f, "Misuse error: {}", err),
			APIError::FeeRateTooHigh { ref err, ref feerate } => {
				write!(f, "{} feerate: {}", err, feerate)
			},
			APIError::InvalidRoute { ref err } => write!(f, "Invalid route provided: {}", err),
			APIError::ChannelUnavailable { ref err } => write!(f, "Channel unavailable: {}", err),
			APIError::MonitorUpdateInProgress => f.write_str(
				"Client indicated a channel monitor update is in progress but not yet complete",
			),
			APIError::IncompatibleShutdownScript { ref script } => {
				write!(f, "Provided a scriptpubkey format not accepted by peer: {}", script)
			},
		}
	}
}

impl fmt::Display for APIError {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		fmt::Debug::fmt(self, f)
	}
}

impl std::error::Error for APIError {}

/// An error in decoding a persisted blob.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DecodeError {
	/// The buffer ended before the announced length was read.
	ShortRead,
	/// A length or value was read which is not valid for the field.
	InvalidValue,
}

impl fmt::Display for DecodeError {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match *self {
			DecodeError::ShortRead => f.write_str("Packet extended beyond the provided bytes"),
			DecodeError::InvalidValue => f.write_str("Nonsense bytes didn't map to the type they were interpreted as"),
		}
	}
}

impl std::error::Error for DecodeError {}

impl From<DecodeError> for std::io::Error {
	fn from(e: DecodeError) -> Self {
		std::io::Error::new(std::io::ErrorKind::InvalidData, e)
	}
}
