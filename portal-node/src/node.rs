// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! The node coordinator: builds the engine and its collaborators in a fixed order and owns them
//! while running.

use crate::background::{persist_engine_state, BackgroundTasks, ChainSyncParams};
use crate::broadcaster::ChainSourceBroadcaster;
use crate::config::Config;
use crate::dispatcher::{EventDispatcher, NodeNotification};
use crate::error::{FundingError, NodeError};
use crate::funding::{ChannelOpenInfo, FundingWorkflow};
use crate::logger::FilesystemLogger;
use crate::wallet::OnchainWallet;

use portal::chain::{BestBlock, ChainListener, MonitorAnchor};
use portal::ln::engine::{ChannelDetails, ChannelEngine, ChannelEngineFactory, EngineContext};
use portal::sign::KeysManager;
use portal::util::logger::Logger;
use portal::util::persist::{read_channel_monitors, read_manager, read_network_graph, KVStore};
use portal_block_sync::{ChainError, ChainSource, ChainTracker};
use portal_persister::FilesystemStore;

use bitcoin::blockdata::constants::genesis_block;
use bitcoin::block::Header;
use bitcoin::secp256k1::PublicKey;
use bitcoin::{Block, Transaction};

use tokio::runtime::Handle;
use tokio::sync::broadcast;

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

const KEYS_SEED_FILE_NAME: &str = "keys_seed";
const LOGS_DIR_NAME: &str = "logs";
const PEER_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const NOTIFICATION_CHANNEL_CAPACITY: usize = 256;

/// Where a [`Node`] is in its startup sequence.
///
/// A successful [`Node::start`] walks `Uninitialized → KeysReady → ChainSourceReady →
/// (Restoring | FreshInit) → EngineReady → Listening`. A failed start returns to
/// `Uninitialized`; [`Node::stop`] ends in `Stopped`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeStatus {
	/// Nothing has been set up yet.
	Uninitialized,
	/// Key material was derived from the seed.
	KeysReady,
	/// The chain source was constructed.
	ChainSourceReady,
	/// The engine is being rebuilt from persisted state.
	Restoring,
	/// A new engine is being initialized at the configured anchor block.
	FreshInit,
	/// The engine exists and receives chain data.
	EngineReady,
	/// Background chain sync and event handling are running.
	Listening,
	/// The node was stopped.
	Stopped,
}

impl fmt::Display for NodeStatus {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		fmt::Debug::fmt(self, f)
	}
}

/// Feeds chain data from the [`ChainTracker`] into the engine.
struct EngineChainListener(Arc<dyn ChannelEngine>);

impl ChainListener for EngineChainListener {
	fn block_connected(&self, block: &Block, height: u32) {
		self.0.block_connected(block, height);
	}

	fn block_disconnected(&self, header: &Header, height: u32) {
		self.0.block_disconnected(header, height);
	}
}

/// A builder for a [`Node`].
pub struct NodeBuilder {
	config: Config,
	seed: Option<[u8; 32]>,
	chain_source: Option<Arc<dyn ChainSource>>,
	logger: Option<Arc<dyn Logger>>,
}

impl NodeBuilder {
	fn new(config: Config) -> Self {
		Self { config, seed: None, chain_source: None, logger: None }
	}

	/// Uses `seed` instead of reading `keys_seed` from the storage directory.
	pub fn with_seed(mut self, seed: [u8; 32]) -> Self {
		self.seed = Some(seed);
		self
	}

	/// Uses `chain_source` instead of building one from [`Config::chain_source`].
	pub fn with_chain_source(mut self, chain_source: Arc<dyn ChainSource>) -> Self {
		self.chain_source = Some(chain_source);
		self
	}

	/// Logs through `logger` instead of the log file under the storage directory.
	pub fn with_logger(mut self, logger: Arc<dyn Logger>) -> Self {
		self.logger = Some(logger);
		self
	}

	/// Builds a [`Node`] persisting to a [`FilesystemStore`] in the storage directory.
	pub fn build(
		self, factory: Arc<dyn ChannelEngineFactory>, wallet: Arc<dyn OnchainWallet>,
	) -> Result<Node<FilesystemStore>, NodeError> {
		self.config.validate()?;
		let store = Arc::new(FilesystemStore::new(PathBuf::from(&self.config.storage_dir_path)));
		self.build_with_store(store, factory, wallet)
	}

	/// Builds a [`Node`] persisting to `kv_store`.
	pub fn build_with_store<K: KVStore + 'static>(
		self, kv_store: Arc<K>, factory: Arc<dyn ChannelEngineFactory>,
		wallet: Arc<dyn OnchainWallet>,
	) -> Result<Node<K>, NodeError> {
		self.config.validate()?;
		let logger: Arc<dyn Logger> = match self.logger {
			Some(logger) => logger,
			None => {
				let log_dir = Path::new(&self.config.storage_dir_path).join(LOGS_DIR_NAME);
				Arc::new(FilesystemLogger::new(log_dir, self.config.log_level)?)
			},
		};
		let (notifier, _) = broadcast::channel(NOTIFICATION_CHANNEL_CAPACITY);
		Ok(Node {
			config: self.config,
			seed: self.seed,
			chain_source: self.chain_source,
			factory,
			wallet,
			kv_store,
			logger,
			notifier,
			status: Mutex::new(NodeStatus::Uninitialized),
			lifecycle_lock: tokio::sync::Mutex::new(()),
			running: RwLock::new(None),
		})
	}
}

/// Everything that only exists while the node is running.
struct RunningNode {
	keys_manager: Arc<KeysManager>,
	engine: Arc<dyn ChannelEngine>,
	tracker: Arc<ChainTracker>,
	funding: Arc<FundingWorkflow>,
	tasks: BackgroundTasks,
}

/// The payment-channel node.
///
/// Owns the engine and every collaborator it needs. Nothing is shared through globals: callers
/// hold the `Node` (usually in an `Arc`) and go through its methods.
pub struct Node<K: KVStore + 'static> {
	config: Config,
	seed: Option<[u8; 32]>,
	chain_source: Option<Arc<dyn ChainSource>>,
	factory: Arc<dyn ChannelEngineFactory>,
	wallet: Arc<dyn OnchainWallet>,
	kv_store: Arc<K>,
	logger: Arc<dyn Logger>,
	notifier: broadcast::Sender<NodeNotification>,
	status: Mutex<NodeStatus>,
	lifecycle_lock: tokio::sync::Mutex<()>,
	running: RwLock<Option<RunningNode>>,
}

impl Node<FilesystemStore> {
	/// Returns a builder for a node with the given configuration.
	pub fn builder(config: Config) -> NodeBuilder {
		NodeBuilder::new(config)
	}
}

impl<K: KVStore + 'static> Node<K> {
	/// Starts the node.
	///
	/// Loads keys, constructs the chain source, restores the engine from persisted state (or
	/// initializes a fresh one at [`Config::monitor_anchor`]), registers it with the chain
	/// tracker and starts background chain sync and event handling. Chain tracking resumes from
	/// the engine's best block, so blocks mined while the node was down are connected first. On failure nothing keeps running
	/// and the status returns to [`NodeStatus::Uninitialized`].
	pub async fn start(&self) -> Result<(), NodeError> {
		let _lifecycle = self.lifecycle_lock.lock().await;
		if self.running.read().unwrap().is_some() {
			return Err(NodeError::AlreadyRunning);
		}

		match self.setup().await {
			Ok(running) => {
				*self.running.write().unwrap() = Some(running);
				self.set_status(NodeStatus::Listening);
				Ok(())
			},
			Err(e) => {
				log_error!(self.logger, "Failed to start node: {}", e);
				self.set_status(NodeStatus::Uninitialized);
				Err(e)
			},
		}
	}

	async fn setup(&self) -> Result<RunningNode, NodeError> {
		let keys_manager = Arc::new(self.load_keys()?);
		self.set_status(NodeStatus::KeysReady);

		let chain_source = match &self.chain_source {
			Some(source) => Arc::clone(source),
			None => match &self.config.chain_source {
				Some(config) => config.build()?,
				None => return Err(NodeError::NoChainManager),
			},
		};
		let tracker = Arc::new(ChainTracker::new(Arc::clone(&chain_source), Arc::clone(&self.logger)));
		self.set_status(NodeStatus::ChainSourceReady);

		let broadcaster = Arc::new(ChainSourceBroadcaster::new(
			Arc::clone(&chain_source),
			Handle::current(),
			Arc::clone(&self.logger),
		));
		let context = EngineContext {
			network: self.config.network,
			keys_manager: Arc::clone(&keys_manager),
			broadcaster,
			logger: Arc::clone(&self.logger),
		};
		let engine = match read_manager(&*self.kv_store)? {
			Some(serialized_manager) => self.restore_engine(context, serialized_manager)?,
			None => self.init_engine(context, &*chain_source).await?,
		};

		let best_block = engine.best_block();
		log_info!(self.logger, "Channel manager is at block {} ({})", best_block.height, best_block.block_hash);
		tracker.register_listener(Arc::new(EngineChainListener(Arc::clone(&engine))));
		let funding = Arc::new(FundingWorkflow::new(
			Arc::clone(&engine),
			Arc::clone(&keys_manager),
			Arc::clone(&self.wallet),
			self.config.funding_generation_timeout,
			Arc::clone(&self.logger),
		));
		let dispatcher = Arc::new(EventDispatcher::new(
			Arc::clone(&engine),
			Arc::clone(&funding),
			self.notifier.clone(),
			Arc::clone(&self.logger),
		));
		self.set_status(NodeStatus::EngineReady);

		let tasks = BackgroundTasks::start(
			Arc::clone(&tracker),
			Arc::clone(&engine),
			Arc::clone(&funding),
			dispatcher,
			Arc::clone(&self.kv_store),
			ChainSyncParams {
				anchor: MonitorAnchor::Block(best_block.height),
				interval: self.config.reconcile_interval,
				scoring: self.config.scoring,
			},
			self.config.event_poll_interval,
			self.config.event_queue_capacity,
			Arc::clone(&self.logger),
		);

		Ok(RunningNode { keys_manager, engine, tracker, funding, tasks })
	}

	fn load_keys(&self) -> Result<KeysManager, NodeError> {
		let seed = match self.seed {
			Some(seed) => seed,
			None => {
				let seed_path = Path::new(&self.config.storage_dir_path).join(KEYS_SEED_FILE_NAME);
				let bytes = match std::fs::read(&seed_path) {
					Ok(bytes) => bytes,
					Err(e) if e.kind() == io::ErrorKind::NotFound => {
						return Err(NodeError::KeySeedNotFound);
					},
					Err(e) => return Err(NodeError::Persistence(e)),
				};
				<[u8; 32]>::try_from(bytes.as_slice()).map_err(|_| {
					log_error!(
						self.logger,
						"Seed at {} is {} bytes, expected 32",
						seed_path.display(),
						bytes.len()
					);
					NodeError::KeyInterfaceFailure
				})?
			},
		};
		KeysManager::from_seed(&seed, self.config.network).map_err(|e| {
			log_error!(self.logger, "Failed to derive keys from seed: {}", e);
			NodeError::KeyInterfaceFailure
		})
	}

	fn restore_engine(
		&self, context: EngineContext, serialized_manager: Vec<u8>,
	) -> Result<Arc<dyn ChannelEngine>, NodeError> {
		self.set_status(NodeStatus::Restoring);
		let monitors = read_channel_monitors(&*self.kv_store).map_err(|e| {
			log_error!(self.logger, "Failed to read channel monitors: {}", e);
			NodeError::NoChannelManager
		})?;
		let network_graph = read_network_graph(&*self.kv_store).map_err(|e| {
			log_error!(self.logger, "Failed to read network graph: {}", e);
			NodeError::NoChannelManager
		})?;
		log_info!(self.logger, "Restoring channel manager with {} channel monitors", monitors.len());
		self.factory.restore(context, serialized_manager, monitors, network_graph).map_err(|e| {
			log_error!(self.logger, "Failed to restore channel manager: {}", e);
			NodeError::NoChannelManager
		})
	}

	async fn init_engine(
		&self, context: EngineContext, chain_source: &dyn ChainSource,
	) -> Result<Arc<dyn ChannelEngine>, NodeError> {
		self.set_status(NodeStatus::FreshInit);
		let height = match self.config.monitor_anchor {
			MonitorAnchor::Genesis => 0,
			MonitorAnchor::Block(height) => height,
			MonitorAnchor::ChainTip => {
				chain_source.get_chaintip_height().await.map_err(ChainError::from)?
			},
		};
		let block_hash = chain_source.get_block_hash(height).await.map_err(ChainError::from)?;
		let genesis_hash = genesis_block(self.config.network).block_hash();
		log_info!(self.logger, "Initializing channel manager at block {} ({})", height, block_hash);
		self.factory.fresh(context, BestBlock::new(block_hash, height), genesis_hash).map_err(|e| {
			log_error!(self.logger, "Failed to initialize channel manager: {}", e);
			NodeError::NoChannelManager
		})
	}

	/// Stops background processing and persists the engine's final state.
	pub async fn stop(&self) -> Result<(), NodeError> {
		let _lifecycle = self.lifecycle_lock.lock().await;
		let running = self.running.write().unwrap().take().ok_or(NodeError::NotRunning)?;

		log_info!(self.logger, "Shutting down node...");
		running.tasks.stop(&*self.logger).await;
		let res = persist_engine_state(&*running.engine, &*self.kv_store);
		self.set_status(NodeStatus::Stopped);
		res.map_err(|e| {
			log_error!(self.logger, "Failed to persist channel state on shutdown: {}", e);
			NodeError::Persistence(e)
		})
	}

	/// Returns a receiver for the node's notifications. Only notifications published after the
	/// call are received.
	pub fn subscribe(&self) -> broadcast::Receiver<NodeNotification> {
		self.notifier.subscribe()
	}

	/// Returns where the node is in its lifecycle.
	pub fn status(&self) -> NodeStatus {
		*self.status.lock().unwrap()
	}

	/// Returns our node id, or `None` if the node is not running.
	pub fn node_id(&self) -> Option<PublicKey> {
		self.running.read().unwrap().as_ref().map(|running| running.keys_manager.node_id())
	}

	/// Returns the engine's channels. Empty if the node is not running.
	pub fn list_channels(&self) -> Vec<ChannelDetails> {
		match self.running.read().unwrap().as_ref() {
			Some(running) => running.engine.list_channels(),
			None => Vec::new(),
		}
	}

	/// Returns the tip of the locally tracked chain, if the node is running and chain tracking
	/// has started.
	pub async fn chain_tip(&self) -> Option<BestBlock> {
		let tracker = self.running.read().unwrap().as_ref().map(|r| Arc::clone(&r.tracker))?;
		tracker.tip().await
	}

	/// Connects to the peer at `address` and hands the connection to the engine.
	pub async fn connect_peer(&self, node_id: PublicKey, address: SocketAddr) -> Result<(), NodeError> {
		let engine = self.engine().ok_or(NodeError::NotRunning)?;

		let stream =
			match tokio::time::timeout(PEER_CONNECT_TIMEOUT, tokio::net::TcpStream::connect(address)).await {
				Ok(Ok(stream)) => stream,
				Ok(Err(e)) => {
					log_error!(self.logger, "Failed to connect to peer {}@{}: {}", node_id, address, e);
					return Err(NodeError::ConnectPeerFailed);
				},
				Err(_) => {
					log_error!(self.logger, "Timed out connecting to peer {}@{}", node_id, address);
					return Err(NodeError::ConnectPeerFailed);
				},
			};
		let stream = stream.into_std().map_err(|e| {
			log_error!(self.logger, "Failed to hand over connection to {}: {}", node_id, e);
			NodeError::ConnectPeerFailed
		})?;
		engine.new_outbound_connection(node_id, stream).map_err(|e| {
			log_error!(self.logger, "Peer handling rejected connection to {}: {}", node_id, e);
			NodeError::ConnectPeerFailed
		})?;
		log_info!(self.logger, "Connected to peer {}@{}", node_id, address);
		Ok(())
	}

	/// Asks `counterparty_node_id` to open a channel and waits until it accepted.
	///
	/// The returned [`ChannelOpenInfo`] carries the output script the funding transaction must
	/// pay; hand the transaction to [`Node::open_channel`].
	pub async fn request_channel_open(
		&self, counterparty_node_id: PublicKey, channel_value_satoshis: u64, reserve_satoshis: u64,
	) -> Result<ChannelOpenInfo, NodeError> {
		let funding = self.funding().ok_or(FundingError::ChannelManagerNotFound)?;
		let info = funding
			.request_channel_open(counterparty_node_id, channel_value_satoshis, reserve_satoshis)
			.await?;
		Ok(info)
	}

	/// Hands the funding transaction for a channel from [`Node::request_channel_open`] to the
	/// engine.
	pub fn open_channel(
		&self, info: &ChannelOpenInfo, funding_transaction: Transaction,
	) -> Result<(), NodeError> {
		let funding = self.funding().ok_or(FundingError::ChannelManagerNotFound)?;
		if funding.in_flight(&info.temporary_channel_id).is_none() {
			log_error!(
				self.logger,
				"No pending channel open for temporary channel {}",
				info.temporary_channel_id
			);
			return Err(NodeError::ChannelMaterialNotFound);
		}
		funding.open_channel(info, funding_transaction)?;
		Ok(())
	}

	fn engine(&self) -> Option<Arc<dyn ChannelEngine>> {
		self.running.read().unwrap().as_ref().map(|running| Arc::clone(&running.engine))
	}

	fn funding(&self) -> Option<Arc<FundingWorkflow>> {
		self.running.read().unwrap().as_ref().map(|running| Arc::clone(&running.funding))
	}

	fn set_status(&self, status: NodeStatus) {
		log_info!(self.logger, "Node status: {}", status);
		*self.status.lock().unwrap() = status;
	}
}
