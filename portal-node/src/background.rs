// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! The node's background tasks: chain reconciliation, event collection and event handling.

use crate::dispatcher::EventDispatcher;
use crate::funding::FundingWorkflow;

use portal::chain::MonitorAnchor;
use portal::events::Event;
use portal::ln::engine::{ChannelEngine, ScoringParameters};
use portal::util::logger::Logger;
use portal::util::persist::{EnginePersister, KVStore};
use portal_block_sync::{ChainError, ChainTracker};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use std::sync::Arc;
use std::time::{Duration, Instant};

/// Writes the channel manager and every channel monitor.
pub(crate) fn persist_engine_state<K: KVStore + ?Sized>(
	engine: &dyn ChannelEngine, kv_store: &K,
) -> std::io::Result<()> {
	kv_store.persist_manager(&engine.encode())?;
	for (channel_id, monitor) in engine.encode_monitors() {
		kv_store.persist_monitor(&channel_id, &monitor)?;
	}
	Ok(())
}

/// Handles to the running background tasks.
pub(crate) struct BackgroundTasks {
	stop_sender: watch::Sender<()>,
	dispatcher: Arc<EventDispatcher>,
	chain_sync: JoinHandle<()>,
	event_pump: JoinHandle<()>,
	event_consumer: JoinHandle<()>,
}

pub(crate) struct ChainSyncParams {
	pub(crate) anchor: MonitorAnchor,
	pub(crate) interval: Duration,
	pub(crate) scoring: ScoringParameters,
}

impl BackgroundTasks {
	pub(crate) fn start<K: KVStore + 'static>(
		tracker: Arc<ChainTracker>, engine: Arc<dyn ChannelEngine>, funding: Arc<FundingWorkflow>,
		dispatcher: Arc<EventDispatcher>, kv_store: Arc<K>, chain_sync_params: ChainSyncParams,
		event_poll_interval: Duration, event_queue_capacity: usize, logger: Arc<dyn Logger>,
	) -> Self {
		let (stop_sender, stop_receiver) = watch::channel(());
		let (event_sender, event_receiver) = mpsc::channel(event_queue_capacity);

		let chain_sync = tokio::spawn(run_chain_sync(
			tracker,
			Arc::clone(&engine),
			Arc::clone(&kv_store),
			chain_sync_params,
			Arc::clone(&logger),
			stop_receiver.clone(),
		));
		let event_pump = tokio::spawn(run_event_pump(
			Arc::clone(&engine),
			event_poll_interval,
			event_sender,
			Arc::clone(&logger),
			stop_receiver,
		));
		let event_consumer = tokio::spawn(run_event_consumer(
			event_receiver,
			engine,
			funding,
			Arc::clone(&dispatcher),
			kv_store,
			logger,
		));

		Self { stop_sender, dispatcher, chain_sync, event_pump, event_consumer }
	}

	/// Signals every task to stop and waits for them. Events already collected are handled
	/// before this returns; HTLC forwards still waiting on their delay are cancelled.
	pub(crate) async fn stop(self, logger: &dyn Logger) {
		if let Err(e) = self.stop_sender.send(()) {
			log_error!(logger, "Failed to send shutdown signal to background tasks: {}", e);
		}
		for (name, handle) in [
			("chain sync", self.chain_sync),
			("event collection", self.event_pump),
			("event handling", self.event_consumer),
		] {
			if let Err(e) = handle.await {
				log_error!(logger, "Background {} task failed: {}", name, e);
			}
		}
		self.dispatcher.stop().await;
	}
}

async fn sync_chain(tracker: &ChainTracker, anchor: MonitorAnchor) -> Result<(), ChainError> {
	tracker.preload(anchor).await?;
	tracker.reconcile_chaintips().await
}

/// Reconciles the local chain every `interval`, handing the engine its persister and scorer
/// once the first reconciliation succeeds.
async fn run_chain_sync<K: KVStore + 'static>(
	tracker: Arc<ChainTracker>, engine: Arc<dyn ChannelEngine>, kv_store: Arc<K>,
	params: ChainSyncParams, logger: Arc<dyn Logger>, mut stop: watch::Receiver<()>,
) {
	let mut interval = tokio::time::interval(params.interval);
	interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
	let mut chain_synced = false;
	loop {
		tokio::select! {
			_ = stop.changed() => {
				log_trace!(logger, "Terminating chain sync.");
				return;
			}
			_ = interval.tick() => {
				let now = Instant::now();
				if let Err(e) = sync_chain(&tracker, params.anchor).await {
					log_error!(logger, "Chain reconciliation failed: {}", e);
					continue;
				}
				log_debug!(logger, "Chain reconciliation finished in {}ms", now.elapsed().as_millis());

				if !chain_synced {
					let persister = Arc::clone(&kv_store) as Arc<dyn EnginePersister>;
					engine.chain_sync_completed(persister, params.scoring);
					chain_synced = true;
					log_info!(logger, "Chain sync completed, handed persister to the engine");
				}

				if let Err(e) = kv_store.persist_graph(&engine.encode_network_graph()) {
					log_error!(logger, "Failed to persist network graph, check your disk and permissions: {}", e);
				}
			}
		}
	}
}

/// Moves pending engine events into the bounded event queue.
async fn run_event_pump(
	engine: Arc<dyn ChannelEngine>, poll_interval: Duration, sender: mpsc::Sender<Event>,
	logger: Arc<dyn Logger>, mut stop: watch::Receiver<()>,
) {
	let mut interval = tokio::time::interval(poll_interval);
	interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
	loop {
		tokio::select! {
			_ = stop.changed() => {
				log_trace!(logger, "Terminating event collection.");
				return;
			}
			_ = interval.tick() => {
				for event in engine.get_and_clear_pending_events() {
					if sender.send(event).await.is_err() {
						log_error!(logger, "Event queue closed, dropping remaining events");
						return;
					}
				}
			}
		}
	}
}

/// Handles queued events in order until the queue closes, persisting the engine after every
/// batch.
async fn run_event_consumer<K: KVStore + 'static>(
	mut receiver: mpsc::Receiver<Event>, engine: Arc<dyn ChannelEngine>,
	funding: Arc<FundingWorkflow>, dispatcher: Arc<EventDispatcher>, kv_store: Arc<K>,
	logger: Arc<dyn Logger>,
) {
	while let Some(event) = receiver.recv().await {
		let mut next = Some(event);
		while let Some(event) = next {
			if let Some(event) = funding.claim_event(event) {
				dispatcher.handle_event(event);
			}
			next = receiver.try_recv().ok();
		}

		log_trace!(logger, "Persisting channel manager and monitors");
		if let Err(e) = persist_engine_state(&*engine, &*kv_store) {
			log_error!(logger, "Failed to persist channel state, check your disk and permissions: {}", e);
		}
	}
	log_trace!(logger, "Terminating event handling.");
}
