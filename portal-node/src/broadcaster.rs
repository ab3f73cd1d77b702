// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Sends the engine's transactions to the chain source.

use portal::chain::BroadcasterInterface;
use portal::util::logger::Logger;
use portal_block_sync::ChainSource;

use bitcoin::consensus::encode;
use bitcoin::Transaction;

use tokio::runtime::Handle;

use std::sync::Arc;

/// A [`BroadcasterInterface`] submitting every transaction through a [`ChainSource`].
///
/// Submissions run as tasks on the given runtime, so [`broadcast_transactions`] never blocks.
/// Their outcome is only logged.
///
/// [`broadcast_transactions`]: BroadcasterInterface::broadcast_transactions
pub struct ChainSourceBroadcaster {
	source: Arc<dyn ChainSource>,
	runtime: Handle,
	logger: Arc<dyn Logger>,
}

impl ChainSourceBroadcaster {
	/// Creates a broadcaster spawning its submissions on `runtime`.
	pub fn new(source: Arc<dyn ChainSource>, runtime: Handle, logger: Arc<dyn Logger>) -> Self {
		Self { source, runtime, logger }
	}
}

impl BroadcasterInterface for ChainSourceBroadcaster {
	fn broadcast_transactions(&self, txs: &[&Transaction]) {
		for tx in txs {
			let txid = tx.compute_txid();
			let raw_tx = encode::serialize(*tx);
			let source = Arc::clone(&self.source);
			let logger = Arc::clone(&self.logger);
			self.runtime.spawn(async move {
				match source.submit_transaction(&raw_tx).await {
					Ok(id) => log_info!(logger, "Successfully broadcast transaction {}", id),
					Err(e) => log_error!(logger, "Failed to broadcast transaction {}: {}", txid, e),
				}
			});
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::test_utils::funding_transaction;

	use portal::util::test_utils::TestLogger;
	use portal_block_sync::test_utils::Blockchain;

	use bitcoin::ScriptBuf;

	use std::time::Duration;

	#[tokio::test]
	async fn submits_through_chain_source() {
		let chain = Arc::new(Blockchain::default());
		let logger = Arc::new(TestLogger::new());
		let broadcaster =
			ChainSourceBroadcaster::new(chain.clone(), Handle::current(), logger.clone());

		let tx = funding_transaction(&ScriptBuf::from_bytes(vec![0x51]), 50_000);
		broadcaster.broadcast_transactions(&[&tx]);

		for _ in 0..100 {
			if !chain.submitted_transactions().is_empty() {
				break;
			}
			tokio::time::sleep(Duration::from_millis(10)).await;
		}
		assert_eq!(chain.submitted_transactions(), vec![tx.clone()]);
		tokio::time::sleep(Duration::from_millis(10)).await;
		assert_eq!(logger.count_contains(&format!("Successfully broadcast transaction {}", tx.compute_txid())), 1);
	}
}
