// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Objects for configuring the node.

use crate::error::NodeError;

use portal::chain::MonitorAnchor;
use portal::ln::engine::ScoringParameters;
use portal::util::logger::Level;
use portal_block_sync::http_endpoint::HttpEndpoint;
use portal_block_sync::rest::EsploraClient;
use portal_block_sync::rpc::BitcoindRpcClient;
use portal_block_sync::{ChainError, ChainSource};

use bitcoin::Network;

use std::sync::Arc;
use std::time::Duration;

const DEFAULT_STORAGE_DIR_PATH: &str = "/tmp/portal_node/";
const DEFAULT_NETWORK: Network = Network::Regtest;
const DEFAULT_RECONCILE_INTERVAL: Duration = Duration::from_secs(15);
const DEFAULT_EVENT_POLL_INTERVAL: Duration = Duration::from_millis(100);
const DEFAULT_EVENT_QUEUE_CAPACITY: usize = 1024;
const DEFAULT_FUNDING_GENERATION_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_LOG_LEVEL: Level = Level::Debug;

/// Where the node reads the chain from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChainSourceConfig {
	/// An Esplora REST server, e.g. `http://127.0.0.1:3002/api`.
	Esplora {
		/// The server URL. Only `http` is supported.
		server_url: String,
	},
	/// A `bitcoind` JSON-RPC interface.
	BitcoindRpc {
		/// The RPC host.
		rpc_host: String,
		/// The RPC port.
		rpc_port: u16,
		/// The RPC user.
		rpc_user: String,
		/// The RPC password.
		rpc_password: String,
	},
}

impl ChainSourceConfig {
	pub(crate) fn build(&self) -> Result<Arc<dyn ChainSource>, NodeError> {
		match self {
			ChainSourceConfig::Esplora { server_url } => {
				Ok(Arc::new(EsploraClient::from_url(server_url)?))
			},
			ChainSourceConfig::BitcoindRpc { rpc_host, rpc_port, rpc_user, rpc_password } => {
				if rpc_user.is_empty() || rpc_password.is_empty() {
					return Err(NodeError::NoChainManager);
				}
				let url = if rpc_host.contains(':') {
					format!("http://[{}]:{}", rpc_host, rpc_port)
				} else {
					format!("http://{}:{}", rpc_host, rpc_port)
				};
				HttpEndpoint::from_url(&url)?;
				Ok(Arc::new(BitcoindRpcClient::with_user_password(
					rpc_host,
					*rpc_port,
					rpc_user,
					rpc_password,
				)))
			},
		}
	}
}

/// Represents the configuration of a [`Node`] instance.
///
/// ### Defaults
///
/// | Parameter                   | Value              |
/// |-----------------------------|--------------------|
/// | `storage_dir_path`          | /tmp/portal_node/  |
/// | `network`                   | Regtest            |
/// | `chain_source`              | None               |
/// | `monitor_anchor`            | ChainTip           |
/// | `reconcile_interval`        | 15s                |
/// | `event_poll_interval`       | 100ms              |
/// | `event_queue_capacity`      | 1024               |
/// | `funding_generation_timeout`| 60s                |
/// | `log_level`                 | Debug              |
///
/// [`Node`]: crate::Node
#[derive(Clone, Debug)]
pub struct Config {
	/// The path where the node stores its seed, logs and, by default, its persisted state.
	pub storage_dir_path: String,
	/// The network the node operates on.
	pub network: Network,
	/// The chain source. The node refuses to start without one.
	pub chain_source: Option<ChainSourceConfig>,
	/// The block a new channel manager starts from. A restored one resumes from its own best
	/// block instead.
	pub monitor_anchor: MonitorAnchor,
	/// How often the local chain is reconciled with the chain source.
	pub reconcile_interval: Duration,
	/// How often pending engine events are collected.
	pub event_poll_interval: Duration,
	/// How many engine events may wait for handling before collection blocks.
	pub event_queue_capacity: usize,
	/// How long a channel open waits for the counterparty to accept.
	pub funding_generation_timeout: Duration,
	/// The level at which the node's log file is written.
	pub log_level: Level,
	/// Scoring parameters handed to the engine once the chain is synced.
	pub scoring: ScoringParameters,
}

impl Default for Config {
	fn default() -> Self {
		Self {
			storage_dir_path: DEFAULT_STORAGE_DIR_PATH.to_string(),
			network: DEFAULT_NETWORK,
			chain_source: None,
			monitor_anchor: MonitorAnchor::default(),
			reconcile_interval: DEFAULT_RECONCILE_INTERVAL,
			event_poll_interval: DEFAULT_EVENT_POLL_INTERVAL,
			event_queue_capacity: DEFAULT_EVENT_QUEUE_CAPACITY,
			funding_generation_timeout: DEFAULT_FUNDING_GENERATION_TIMEOUT,
			log_level: DEFAULT_LOG_LEVEL,
			scoring: ScoringParameters::default(),
		}
	}
}

impl Config {
	pub(crate) fn validate(&self) -> Result<(), NodeError> {
		if self.storage_dir_path.is_empty() {
			return Err(NodeError::InvalidConfig("storage_dir_path is empty".to_string()));
		}
		if self.event_queue_capacity == 0 {
			return Err(NodeError::InvalidConfig("event_queue_capacity must be non-zero".to_string()));
		}
		if self.reconcile_interval.is_zero() || self.event_poll_interval.is_zero() {
			return Err(NodeError::InvalidConfig("intervals must be non-zero".to_string()));
		}
		Ok(())
	}
}
