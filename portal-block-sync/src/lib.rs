// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Keeps a local, linked view of a remote chain and feeds it to [`ChainListener`]s.
//!
//! [`ChainSource`] abstracts over where the chain comes from. Two implementations are provided:
//! [`rest::EsploraClient`] for Esplora-style block explorer REST APIs and
//! [`rpc::BitcoindRpcClient`] for Bitcoin Core's JSON-RPC interface. Both run over a minimal
//! HTTP/1.1 client on top of `tokio::net::TcpStream`.
//!
//! [`ChainTracker`] owns the locally-known chain, anchored at a configurable block, and
//! reconciles it with the source, walking back through reorganizations of any depth short of
//! its anchor.
//!
//! [`ChainListener`]: portal::chain::ChainListener

#![deny(rustdoc::broken_intra_doc_links)]
#![deny(rustdoc::private_intra_doc_links)]
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

#[macro_use]
extern crate portal;

pub mod http;
pub mod http_endpoint;
pub mod rest;
pub mod rpc;
pub mod tracker;

mod convert;

#[cfg(any(test, feature = "_test_utils"))]
#[allow(missing_docs)]
pub mod test_utils;

pub use crate::tracker::ChainTracker;

use bitcoin::block::Header;
use bitcoin::consensus::encode;
use bitcoin::hashes::Hash;
use bitcoin::{BlockHash, Txid};

use std::fmt;
use std::future::Future;
use std::pin::Pin;

/// A block header and some associated data, as reported by a [`ChainSource`].
///
/// Identity is the block hash; the value is never mutated once fetched.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BlockHeaderData {
	/// The block hash, checked to commit to [`header`](Self::header).
	pub block_hash: BlockHash,
	/// The block height, with the genesis block height set to 0.
	pub height: u32,
	/// The block header itself.
	pub header: Header,
	/// Number of transactions in the block.
	pub tx_count: u32,
	/// Serialized block size in bytes.
	pub size: u32,
	/// Block weight in weight units.
	pub weight: u32,
	/// Difficulty relative to the minimum, as reported by the source.
	pub difficulty: f64,
}

impl BlockHeaderData {
	/// The hash of the parent block, or `None` for the genesis block.
	pub fn previous_hash(&self) -> Option<BlockHash> {
		if self.header.prev_blockhash == BlockHash::all_zeros() {
			None
		} else {
			Some(self.header.prev_blockhash)
		}
	}

	/// The block timestamp, in seconds since the epoch.
	pub fn timestamp(&self) -> u32 {
		self.header.time
	}

	/// The consensus-encoded 80-byte header.
	pub fn raw_header(&self) -> [u8; 80] {
		let mut raw = [0u8; 80];
		raw.copy_from_slice(&encode::serialize(&self.header));
		raw
	}
}

/// Result type for `ChainSource` requests.
pub type ChainSourceResult<T> = Result<T, ChainSourceError>;

/// Result type for asynchronous `ChainSource` requests.
///
/// TODO: Replace with ChainSourceResult once async trait functions are supported. For details,
/// see: https://areweasyncyet.rs.
pub type AsyncChainSourceResult<'a, T> =
	Pin<Box<dyn Future<Output = ChainSourceResult<T>> + 'a + Send>>;

/// Error type for `ChainSource` requests.
///
/// Transient errors may be resolved when re-polling, but no attempt will be made to re-poll on
/// persistent errors.
#[derive(Debug)]
pub struct ChainSourceError {
	kind: ChainSourceErrorKind,
	error: Box<dyn std::error::Error + Send + Sync>,
}

/// The kind of `ChainSourceError`, either persistent or transient.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChainSourceErrorKind {
	/// Indicates an error that won't resolve when retrying a request (e.g., invalid data).
	Persistent,

	/// Indicates an error that may resolve when retrying a request (e.g., unresponsive).
	Transient,
}

impl ChainSourceError {
	/// Creates a new persistent error originated from the given error.
	pub fn persistent<E>(error: E) -> Self
	where
		E: Into<Box<dyn std::error::Error + Send + Sync>>,
	{
		Self { kind: ChainSourceErrorKind::Persistent, error: error.into() }
	}

	/// Creates a new transient error originated from the given error.
	pub fn transient<E>(error: E) -> Self
	where
		E: Into<Box<dyn std::error::Error + Send + Sync>>,
	{
		Self { kind: ChainSourceErrorKind::Transient, error: error.into() }
	}

	/// Returns the kind of error.
	pub fn kind(&self) -> ChainSourceErrorKind {
		self.kind
	}

	/// Converts the error into the underlying error.
	///
	/// May contain an [`std::io::Error`] from the HTTP client, possibly wrapping an
	/// [`http::HttpError`] or [`rpc::RpcError`].
	pub fn into_inner(self) -> Box<dyn std::error::Error + Send + Sync> {
		self.error
	}
}

impl fmt::Display for ChainSourceError {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self.kind {
			ChainSourceErrorKind::Persistent => write!(f, "persistent chain source error: {}", self.error),
			ChainSourceErrorKind::Transient => write!(f, "transient chain source error: {}", self.error),
		}
	}
}

impl std::error::Error for ChainSourceError {}

/// A source of chain data: tip, blocks by height and hash, headers and transactions, plus
/// transaction broadcast.
pub trait ChainSource: Sync + Send {
	/// Gets the height of the current best block.
	fn get_chaintip_height<'a>(&'a self) -> AsyncChainSourceResult<'a, u32>;

	/// Gets the hash of the current best block.
	fn get_chaintip_hash<'a>(&'a self) -> AsyncChainSourceResult<'a, BlockHash>;

	/// Gets the hash of the block at the given height on the best chain.
	fn get_block_hash<'a>(&'a self, height: u32) -> AsyncChainSourceResult<'a, BlockHash>;

	/// Gets the JSON description of the block with the given hash.
	fn get_block<'a>(&'a self, block_hash: &'a BlockHash) -> AsyncChainSourceResult<'a, BlockHeaderData>;

	/// Gets the consensus-encoded block with the given hash.
	fn get_block_binary<'a>(&'a self, block_hash: &'a BlockHash) -> AsyncChainSourceResult<'a, Vec<u8>>;

	/// Gets the 80-byte consensus-encoded header of the block with the given hash.
	fn get_block_header<'a>(&'a self, block_hash: &'a BlockHash) -> AsyncChainSourceResult<'a, Vec<u8>>;

	/// Gets the hex-encoded transaction with the given id.
	fn get_transaction_hex<'a>(&'a self, txid: &'a Txid) -> AsyncChainSourceResult<'a, String>;

	/// Gets the consensus-encoded transaction with the given id.
	fn get_raw_transaction<'a>(&'a self, txid: &'a Txid) -> AsyncChainSourceResult<'a, Vec<u8>>;

	/// Broadcasts a consensus-encoded transaction, returning its id.
	fn submit_transaction<'a>(&'a self, raw_transaction: &'a [u8]) -> AsyncChainSourceResult<'a, Txid>;
}

/// Errors raised while tracking the chain.
#[derive(Debug)]
pub enum ChainError {
	/// The anchor block could not be resolved or fetched.
	UnknownAnchorBlock,
	/// The block at the given height could not be fetched or delivered to listeners.
	UnableToConnectBlock(u32),
	/// A block was connected whose height does not follow the local tip.
	NonSequentialBlockConnection,
	/// A block was connected whose parent is not the local tip; a reorganization was not
	/// reconciled first.
	UnhandledReorganization,
	/// A disconnect would have removed the anchor block.
	ExcessiveReorganization,
	/// The chain source URL could not be parsed.
	InvalidUrlString,
	/// The chain source failed a request that is not tied to a specific block connection.
	Source(ChainSourceError),
}

impl fmt::Display for ChainError {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self {
			ChainError::UnknownAnchorBlock => write!(f, "Unable to resolve the anchor block"),
			ChainError::UnableToConnectBlock(height) => write!(f, "Unable to connect block at height {}", height),
			ChainError::NonSequentialBlockConnection => write!(f, "Attempted to connect a block out of sequence"),
			ChainError::UnhandledReorganization => write!(f, "Attempted to connect a block that does not build on the tip"),
			ChainError::ExcessiveReorganization => write!(f, "Reorganization reached past the anchor block"),
			ChainError::InvalidUrlString => write!(f, "Invalid chain source URL"),
			ChainError::Source(e) => write!(f, "Chain source request failed: {}", e),
		}
	}
}

impl std::error::Error for ChainError {
	fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
		match self {
			ChainError::Source(e) => Some(e),
			_ => None,
		}
	}
}

impl From<ChainSourceError> for ChainError {
	fn from(e: ChainSourceError) -> Self {
		ChainError::Source(e)
	}
}
