// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! The Portal payment-channel node.
//!
//! A [`Node`] sequences the channel engine through startup (keys, chain source, restore or fresh
//! initialization), keeps it on the best chain through a [`ChainTracker`], answers the events it
//! emits and runs the funding handshake for outbound channels.
//!
//! ```no_run
//! # use portal_node::{ChainSourceConfig, Config, Node};
//! # use portal::ln::engine::ChannelEngineFactory;
//! # use portal_node::wallet::OnchainWallet;
//! # use std::sync::Arc;
//! # async fn run(factory: Arc<dyn ChannelEngineFactory>, wallet: Arc<dyn OnchainWallet>) -> Result<(), portal_node::NodeError> {
//! let mut config = Config::default();
//! config.storage_dir_path = "/tmp/portal".to_string();
//! config.chain_source = Some(ChainSourceConfig::Esplora {
//! 	server_url: "http://127.0.0.1:3002/api".to_string(),
//! });
//!
//! let node = Node::builder(config).build(factory, wallet)?;
//! node.start().await?;
//! let mut notifications = node.subscribe();
//! # let _ = notifications.recv().await;
//! node.stop().await?;
//! # Ok(())
//! # }
//! ```
//!
//! [`ChainTracker`]: portal_block_sync::ChainTracker

#![deny(rustdoc::broken_intra_doc_links)]
#![deny(rustdoc::private_intra_doc_links)]
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

#[macro_use]
extern crate portal;

mod background;
pub mod broadcaster;
pub mod config;
mod dispatcher;
mod error;
mod funding;
pub mod logger;
mod node;
pub mod wallet;

#[cfg(test)]
mod test_utils;

pub use config::{ChainSourceConfig, Config};
pub use dispatcher::NodeNotification;
pub use error::{FundingError, NodeError};
pub use funding::ChannelOpenInfo;
pub use node::{Node, NodeBuilder, NodeStatus};
