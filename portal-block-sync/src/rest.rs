// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! A [`ChainSource`] backed by an Esplora-style block explorer REST API.

use crate::convert::hex_to_bytes;
use crate::http::{BinaryResponse, HttpClient, JsonResponse};
use crate::http_endpoint::HttpEndpoint;
use crate::{AsyncChainSourceResult, BlockHeaderData, ChainError, ChainSource, ChainSourceError};

use bitcoin::hex::DisplayHex;
use bitcoin::{BlockHash, Txid};

use tokio::sync::Mutex;

use std::convert::TryFrom;
use std::convert::TryInto;

/// A REST client for an Esplora server, e.g. `http://127.0.0.1:3002/api`.
///
/// The connection is opened on first use and kept alive between requests.
pub struct EsploraClient {
	endpoint: HttpEndpoint,
	client: Mutex<Option<HttpClient>>,
}

impl EsploraClient {
	/// Creates a client for the given endpoint, whose path is the API root.
	pub fn new(endpoint: HttpEndpoint) -> Self {
		Self { endpoint, client: Mutex::new(None) }
	}

	/// Creates a client from a server URL.
	pub fn from_url(server_url: &str) -> Result<Self, ChainError> {
		Ok(Self::new(HttpEndpoint::from_url(server_url)?))
	}

	fn host(&self) -> String {
		format!("{}:{}", self.endpoint.host(), self.endpoint.port())
	}

	fn uri(&self, resource_path: &str) -> String {
		format!("{}/{}", self.endpoint.path().trim_end_matches('/'), resource_path)
	}

	/// Requests a resource encoded in `F` format and interpreted as type `T`.
	pub async fn request_resource<F, T>(&self, resource_path: &str) -> std::io::Result<T>
	where F: TryFrom<Vec<u8>, Error = std::io::Error> + TryInto<T, Error = std::io::Error> {
		let (host, uri) = (self.host(), self.uri(resource_path));
		let mut slot = self.client.lock().await;
		let mut client = match slot.take() {
			Some(client) => client,
			None => HttpClient::connect(&self.endpoint)?,
		};
		let response = client.get::<F>(&uri, &host).await;
		*slot = Some(client);
		response?.try_into()
	}

	/// Posts a plain-text body to a resource and interprets the text response as type `T`.
	async fn post_resource<T>(&self, resource_path: &str, body: String) -> std::io::Result<T>
	where BinaryResponse: TryInto<T, Error = std::io::Error> {
		let (host, uri) = (self.host(), self.uri(resource_path));
		let mut slot = self.client.lock().await;
		let mut client = match slot.take() {
			Some(client) => client,
			None => HttpClient::connect(&self.endpoint)?,
		};
		let response = client.post::<BinaryResponse>(&uri, &host, None, "text/plain", body).await;
		*slot = Some(client);
		response?.try_into()
	}
}

impl ChainSource for EsploraClient {
	fn get_chaintip_height<'a>(&'a self) -> AsyncChainSourceResult<'a, u32> {
		Box::pin(async move {
			Ok(self.request_resource::<BinaryResponse, _>("blocks/tip/height").await?)
		})
	}

	fn get_chaintip_hash<'a>(&'a self) -> AsyncChainSourceResult<'a, BlockHash> {
		Box::pin(async move {
			Ok(self.request_resource::<BinaryResponse, _>("blocks/tip/hash").await?)
		})
	}

	fn get_block_hash<'a>(&'a self, height: u32) -> AsyncChainSourceResult<'a, BlockHash> {
		Box::pin(async move {
			let resource_path = format!("block-height/{}", height);
			Ok(self.request_resource::<BinaryResponse, _>(&resource_path).await?)
		})
	}

	fn get_block<'a>(&'a self, block_hash: &'a BlockHash) -> AsyncChainSourceResult<'a, BlockHeaderData> {
		Box::pin(async move {
			let resource_path = format!("block/{}", block_hash);
			Ok(self.request_resource::<JsonResponse, BlockHeaderData>(&resource_path).await?)
		})
	}

	fn get_block_binary<'a>(&'a self, block_hash: &'a BlockHash) -> AsyncChainSourceResult<'a, Vec<u8>> {
		Box::pin(async move {
			let resource_path = format!("block/{}/raw", block_hash);
			Ok(self.request_resource::<BinaryResponse, Vec<u8>>(&resource_path).await?)
		})
	}

	fn get_block_header<'a>(&'a self, block_hash: &'a BlockHash) -> AsyncChainSourceResult<'a, Vec<u8>> {
		Box::pin(async move {
			let resource_path = format!("block/{}/header", block_hash);
			let hex: String = self.request_resource::<BinaryResponse, _>(&resource_path).await?;
			let header = hex_to_bytes(&hex)?;
			if header.len() != 80 {
				return Err(ChainSourceError::persistent("block header is not 80 bytes"));
			}
			Ok(header)
		})
	}

	fn get_transaction_hex<'a>(&'a self, txid: &'a Txid) -> AsyncChainSourceResult<'a, String> {
		Box::pin(async move {
			let resource_path = format!("tx/{}/hex", txid);
			Ok(self.request_resource::<BinaryResponse, _>(&resource_path).await?)
		})
	}

	fn get_raw_transaction<'a>(&'a self, txid: &'a Txid) -> AsyncChainSourceResult<'a, Vec<u8>> {
		Box::pin(async move {
			let resource_path = format!("tx/{}/raw", txid);
			Ok(self.request_resource::<BinaryResponse, Vec<u8>>(&resource_path).await?)
		})
	}

	fn submit_transaction<'a>(&'a self, raw_transaction: &'a [u8]) -> AsyncChainSourceResult<'a, Txid> {
		Box::pin(async move {
			Ok(self.post_resource("tx", raw_transaction.to_lower_hex_string()).await?)
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::convert::tests::esplora_block_json;
	use crate::http::client_tests::{HttpServer, MessageBody};
	use crate::ChainSourceErrorKind;

	use bitcoin::blockdata::constants::genesis_block;
	use bitcoin::consensus::encode;
	use bitcoin::Network;

	#[tokio::test]
	async fn request_unknown_resource() {
		let server = HttpServer::responding_with_not_found();
		let client = EsploraClient::new(server.endpoint());

		match client.get_chaintip_height().await {
			Err(e) => assert_eq!(e.kind(), ChainSourceErrorKind::Transient),
			Ok(_) => panic!("Expected error"),
		}
	}

	#[tokio::test]
	async fn request_chaintip_height() {
		let server = HttpServer::responding_with_ok(MessageBody::Content("102"));
		let client = EsploraClient::new(server.endpoint().with_path("/api".into()));

		match client.get_chaintip_height().await {
			Err(e) => panic!("Unexpected error: {:?}", e),
			Ok(height) => assert_eq!(height, 102),
		}
		assert_eq!(server.request_lines(), vec!["GET /api/blocks/tip/height HTTP/1.1".to_string()]);
	}

	#[tokio::test]
	async fn request_malformed_chaintip_hash() {
		let server = HttpServer::responding_with_ok(MessageBody::Content("not a hash"));
		let client = EsploraClient::new(server.endpoint());

		match client.get_chaintip_hash().await {
			Err(e) => {
				assert_eq!(e.kind(), ChainSourceErrorKind::Persistent);
				assert_eq!(e.into_inner().to_string(), "invalid block hash");
			},
			Ok(_) => panic!("Expected error"),
		}
	}

	#[tokio::test]
	async fn request_block_hash_by_height() {
		let genesis = genesis_block(Network::Regtest);
		let server = HttpServer::responding_with_ok(MessageBody::Content(genesis.block_hash()));
		let client = EsploraClient::new(server.endpoint());

		match client.get_block_hash(0).await {
			Err(e) => panic!("Unexpected error: {:?}", e),
			Ok(hash) => assert_eq!(hash, genesis.block_hash()),
		}
		assert_eq!(server.request_lines(), vec!["GET /block-height/0 HTTP/1.1".to_string()]);
	}

	#[tokio::test]
	async fn request_block_description() {
		let genesis = genesis_block(Network::Regtest);
		let server = HttpServer::responding_with_ok(MessageBody::Content(esplora_block_json(&genesis, 0)));
		let client = EsploraClient::new(server.endpoint());

		match client.get_block(&genesis.block_hash()).await {
			Err(e) => panic!("Unexpected error: {:?}", e),
			Ok(data) => {
				assert_eq!(data.block_hash, genesis.block_hash());
				assert_eq!(data.height, 0);
			},
		}
	}

	#[tokio::test]
	async fn request_block_header_hex() {
		let genesis = genesis_block(Network::Regtest);
		let header_hex = encode::serialize(&genesis.header).to_lower_hex_string();
		let server = HttpServer::responding_with_ok(MessageBody::Content(header_hex));
		let client = EsploraClient::new(server.endpoint());

		match client.get_block_header(&genesis.block_hash()).await {
			Err(e) => panic!("Unexpected error: {:?}", e),
			Ok(header) => assert_eq!(header, encode::serialize(&genesis.header)),
		}
	}

	#[tokio::test]
	async fn request_truncated_block_header() {
		let genesis = genesis_block(Network::Regtest);
		let server = HttpServer::responding_with_ok(MessageBody::Content("00112233"));
		let client = EsploraClient::new(server.endpoint());

		match client.get_block_header(&genesis.block_hash()).await {
			Err(e) => assert_eq!(e.kind(), ChainSourceErrorKind::Persistent),
			Ok(_) => panic!("Expected error"),
		}
	}

	#[tokio::test]
	async fn submit_transaction_returns_txid() {
		let genesis = genesis_block(Network::Regtest);
		let coinbase = &genesis.txdata[0];
		let server = HttpServer::responding_with_ok(MessageBody::Content(coinbase.compute_txid()));
		let client = EsploraClient::new(server.endpoint());

		match client.submit_transaction(&encode::serialize(coinbase)).await {
			Err(e) => panic!("Unexpected error: {:?}", e),
			Ok(txid) => assert_eq!(txid, coinbase.compute_txid()),
		}
		assert_eq!(server.request_lines(), vec!["POST /tx HTTP/1.1".to_string()]);
	}
}
