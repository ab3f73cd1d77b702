// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! The on-chain wallet the node funds channels from.

use bitcoin::{Script, Transaction};

use std::fmt;

/// An error returned by an [`OnchainWallet`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WalletError(pub String);

impl fmt::Display for WalletError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl std::error::Error for WalletError {}

/// Builds and signs transactions from the user's on-chain funds.
///
/// Coin selection and signing are up to the implementation. The node only asks for funding
/// transactions and hands them to the channel engine, which broadcasts them.
pub trait OnchainWallet: Send + Sync {
	/// Builds a fully signed transaction paying exactly `amount_sats` to `output_script`.
	fn build_funding_transaction(
		&self, output_script: &Script, amount_sats: u64,
	) -> Result<Transaction, WalletError>;
}
