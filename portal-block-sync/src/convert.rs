// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

use crate::http::{BinaryResponse, JsonResponse};
use crate::{BlockHeaderData, ChainSourceError};

use bitcoin::block::{Block, Header, Version};
use bitcoin::consensus::encode;
use bitcoin::hashes::Hash;
use bitcoin::hex::FromHex;
use bitcoin::pow::CompactTarget;
use bitcoin::{BlockHash, TxMerkleNode, Txid};

use serde::Deserialize;

use std::convert::TryInto;
use std::str::FromStr;

/// Malformed responses are persistent, anything else from the transport is worth retrying.
impl From<std::io::Error> for ChainSourceError {
	fn from(e: std::io::Error) -> ChainSourceError {
		match e.kind() {
			std::io::ErrorKind::InvalidData => ChainSourceError::persistent(e),
			std::io::ErrorKind::InvalidInput => ChainSourceError::persistent(e),
			_ => ChainSourceError::transient(e),
		}
	}
}

fn invalid_data(msg: &str) -> std::io::Error {
	std::io::Error::new(std::io::ErrorKind::InvalidData, msg.to_string())
}

/// Decodes a hex string, ignoring surrounding whitespace.
pub(crate) fn hex_to_bytes(hex: &str) -> std::io::Result<Vec<u8>> {
	Vec::<u8>::from_hex(hex.trim()).map_err(|_| invalid_data("invalid hex data"))
}

impl TryInto<Block> for BinaryResponse {
	type Error = std::io::Error;

	fn try_into(self) -> std::io::Result<Block> {
		encode::deserialize(&self.0).map_err(|_| invalid_data("invalid block data"))
	}
}

impl TryInto<Vec<u8>> for BinaryResponse {
	type Error = std::io::Error;

	fn try_into(self) -> std::io::Result<Vec<u8>> {
		Ok(self.0)
	}
}

/// Plain-text bodies as served by Esplora, e.g. a tip hash or a transaction hex.
impl TryInto<String> for BinaryResponse {
	type Error = std::io::Error;

	fn try_into(self) -> std::io::Result<String> {
		match String::from_utf8(self.0) {
			Err(_) => Err(invalid_data("invalid utf8 text")),
			Ok(text) => Ok(text.trim().to_string()),
		}
	}
}

impl TryInto<u32> for BinaryResponse {
	type Error = std::io::Error;

	fn try_into(self) -> std::io::Result<u32> {
		let text: String = self.try_into()?;
		text.parse().map_err(|_| invalid_data("invalid height"))
	}
}

impl TryInto<BlockHash> for BinaryResponse {
	type Error = std::io::Error;

	fn try_into(self) -> std::io::Result<BlockHash> {
		let text: String = self.try_into()?;
		BlockHash::from_str(&text).map_err(|_| invalid_data("invalid block hash"))
	}
}

impl TryInto<Txid> for BinaryResponse {
	type Error = std::io::Error;

	fn try_into(self) -> std::io::Result<Txid> {
		let text: String = self.try_into()?;
		Txid::from_str(&text).map_err(|_| invalid_data("invalid txid"))
	}
}

impl TryInto<u32> for JsonResponse {
	type Error = std::io::Error;

	fn try_into(self) -> std::io::Result<u32> {
		match self.0.as_u64() {
			None => Err(invalid_data("expected JSON number")),
			Some(value) => value.try_into().map_err(|_| invalid_data("invalid height")),
		}
	}
}

impl TryInto<String> for JsonResponse {
	type Error = std::io::Error;

	fn try_into(self) -> std::io::Result<String> {
		match self.0 {
			serde_json::Value::String(text) => Ok(text),
			_ => Err(invalid_data("expected JSON string")),
		}
	}
}

impl TryInto<BlockHash> for JsonResponse {
	type Error = std::io::Error;

	fn try_into(self) -> std::io::Result<BlockHash> {
		let text: String = self.try_into()?;
		BlockHash::from_str(&text).map_err(|_| invalid_data("invalid block hash"))
	}
}

impl TryInto<Txid> for JsonResponse {
	type Error = std::io::Error;

	fn try_into(self) -> std::io::Result<Txid> {
		let text: String = self.try_into()?;
		Txid::from_str(&text).map_err(|_| invalid_data("invalid txid"))
	}
}

/// A hex-encoded JSON string, as returned for raw blocks, headers and transactions.
impl TryInto<Vec<u8>> for JsonResponse {
	type Error = std::io::Error;

	fn try_into(self) -> std::io::Result<Vec<u8>> {
		let text: String = self.try_into()?;
		hex_to_bytes(&text)
	}
}

/// Converts a block description into header data. Accepts both Esplora's `/block/:hash` shape
/// and Bitcoin Core's `getblock` with verbosity 1.
impl TryInto<BlockHeaderData> for JsonResponse {
	type Error = std::io::Error;

	fn try_into(self) -> std::io::Result<BlockHeaderData> {
		if !self.0.is_object() {
			return Err(invalid_data("expected JSON object"));
		}
		let response = serde_json::from_value::<GetBlockResponse>(self.0)
			.map_err(|_| invalid_data("invalid block response"))?;
		response.try_into()
	}
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Bits {
	Number(u32),
	Hex(String),
}

/// Block description fields shared by Esplora and Bitcoin Core, under either name.
#[derive(Deserialize)]
struct GetBlockResponse {
	#[serde(alias = "hash")]
	id: String,
	height: u32,
	version: i32,
	#[serde(alias = "time")]
	timestamp: u32,
	#[serde(alias = "nTx")]
	tx_count: u32,
	size: u32,
	weight: u32,
	#[serde(alias = "merkleroot")]
	merkle_root: String,
	previousblockhash: Option<String>,
	nonce: u32,
	bits: Bits,
	#[serde(default)]
	difficulty: f64,
}

impl TryInto<BlockHeaderData> for GetBlockResponse {
	type Error = std::io::Error;

	fn try_into(self) -> std::io::Result<BlockHeaderData> {
		let bits = match self.bits {
			Bits::Number(bits) => bits,
			Bits::Hex(hex) => {
				let bytes = <[u8; 4]>::from_hex(&hex).map_err(|_| invalid_data("invalid bits"))?;
				u32::from_be_bytes(bytes)
			},
		};
		let prev_blockhash = match self.previousblockhash {
			None => BlockHash::from_byte_array([0; 32]),
			Some(hash) => BlockHash::from_str(&hash).map_err(|_| invalid_data("invalid block hash"))?,
		};
		let header = Header {
			version: Version::from_consensus(self.version),
			prev_blockhash,
			merkle_root: TxMerkleNode::from_str(&self.merkle_root)
				.map_err(|_| invalid_data("invalid merkle root"))?,
			time: self.timestamp,
			bits: CompactTarget::from_consensus(bits),
			nonce: self.nonce,
		};

		let block_hash = BlockHash::from_str(&self.id).map_err(|_| invalid_data("invalid block hash"))?;
		if header.block_hash() != block_hash {
			return Err(invalid_data("block hash mismatch"));
		}

		Ok(BlockHeaderData {
			block_hash,
			height: self.height,
			header,
			tx_count: self.tx_count,
			size: self.size,
			weight: self.weight,
			difficulty: self.difficulty,
		})
	}
}
