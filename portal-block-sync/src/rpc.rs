// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! A [`ChainSource`] backed by Bitcoin Core's JSON-RPC interface.

use crate::http::{HttpClient, HttpError, JsonResponse};
use crate::http_endpoint::HttpEndpoint;
use crate::{AsyncChainSourceResult, BlockHeaderData, ChainSource, ChainSourceError};

use bitcoin::base64::engine::general_purpose::STANDARD;
use bitcoin::base64::Engine;
use bitcoin::hex::DisplayHex;
use bitcoin::{BlockHash, Txid};

use tokio::sync::Mutex;

use std::convert::TryFrom;
use std::convert::TryInto;
use std::error::Error;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

/// An error object returned by the RPC server.
#[derive(Debug)]
pub struct RpcError {
	/// The error code.
	pub code: i64,
	/// The error message.
	pub message: String,
}

impl fmt::Display for RpcError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "RPC error {}: {}", self.code, self.message)
	}
}

impl Error for RpcError {}

/// A JSON-RPC client for `bitcoind`, authenticating with HTTP basic auth.
///
/// Errors returned through [`ChainSource`] may wrap an [`RpcError`]; see
/// [`BitcoindRpcClient::call_method`].
pub struct BitcoindRpcClient {
	basic_auth: String,
	endpoint: HttpEndpoint,
	client: Mutex<Option<HttpClient>>,
	id: AtomicUsize,
}

impl BitcoindRpcClient {
	/// Creates a client for `endpoint`. `credentials` is the base64 encoding of `user:password`.
	pub fn new(credentials: &str, endpoint: HttpEndpoint) -> Self {
		Self {
			basic_auth: format!("Basic {}", credentials),
			endpoint,
			client: Mutex::new(None),
			id: AtomicUsize::new(0),
		}
	}

	/// Creates a client for `host:port` with the given RPC user and password.
	pub fn with_user_password(host: &str, port: u16, user: &str, password: &str) -> Self {
		let credentials = STANDARD.encode(format!("{}:{}", user, password));
		let endpoint = HttpEndpoint::insecure_host(host.to_string()).with_port(port);
		Self::new(&credentials, endpoint)
	}

	/// Calls `method` and interprets its `result` as type `T`.
	///
	/// When an `Err` is returned, [`std::io::Error::into_inner`] may contain an [`RpcError`] if
	/// [`std::io::Error::kind`] is [`std::io::ErrorKind::Other`].
	pub async fn call_method<T>(&self, method: &str, params: &[serde_json::Value]) -> std::io::Result<T>
	where JsonResponse: TryFrom<Vec<u8>, Error = std::io::Error> + TryInto<T, Error = std::io::Error> {
		let host = format!("{}:{}", self.endpoint.host(), self.endpoint.port());
		let content = serde_json::json!({
			"jsonrpc": "1.0",
			"method": method,
			"params": params,
			"id": &self.id.fetch_add(1, Ordering::AcqRel).to_string()
		});

		let response = {
			let mut slot = self.client.lock().await;
			let mut client = match slot.take() {
				Some(client) => client,
				None => HttpClient::connect(&self.endpoint)?,
			};
			let response = client.post::<JsonResponse>(
				self.endpoint.path(), &host, Some(&self.basic_auth), "application/json", content.to_string(),
			).await;
			*slot = Some(client);
			response
		};

		// bitcoind reports RPC failures with a non-2xx status and the error object in the body.
		let mut response = match response {
			Ok(JsonResponse(response)) => response,
			Err(e) if e.kind() == std::io::ErrorKind::Other => {
				let body = e.get_ref()
					.and_then(|inner| inner.downcast_ref::<HttpError>())
					.and_then(|http_error| JsonResponse::try_from(http_error.contents.clone()).ok());
				match body {
					Some(JsonResponse(response)) => response,
					None => return Err(e),
				}
			},
			Err(e) => return Err(e),
		};

		if !response.is_object() {
			return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "expected JSON object"));
		}

		let error = &response["error"];
		if !error.is_null() {
			let rpc_error = RpcError {
				code: error["code"].as_i64().unwrap_or(-1),
				message: error["message"].as_str().unwrap_or("unknown error").to_string(),
			};
			return Err(std::io::Error::new(std::io::ErrorKind::Other, rpc_error));
		}

		let result = &mut response["result"];
		if result.is_null() {
			return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "expected JSON result"));
		}

		JsonResponse(result.take()).try_into()
	}
}

impl ChainSource for BitcoindRpcClient {
	fn get_chaintip_height<'a>(&'a self) -> AsyncChainSourceResult<'a, u32> {
		Box::pin(async move {
			Ok(self.call_method("getblockcount", &[]).await?)
		})
	}

	fn get_chaintip_hash<'a>(&'a self) -> AsyncChainSourceResult<'a, BlockHash> {
		Box::pin(async move {
			Ok(self.call_method("getbestblockhash", &[]).await?)
		})
	}

	fn get_block_hash<'a>(&'a self, height: u32) -> AsyncChainSourceResult<'a, BlockHash> {
		Box::pin(async move {
			Ok(self.call_method("getblockhash", &[serde_json::json!(height)]).await?)
		})
	}

	fn get_block<'a>(&'a self, block_hash: &'a BlockHash) -> AsyncChainSourceResult<'a, BlockHeaderData> {
		Box::pin(async move {
			let params = [serde_json::json!(block_hash.to_string()), serde_json::json!(1)];
			Ok(self.call_method("getblock", &params).await?)
		})
	}

	fn get_block_binary<'a>(&'a self, block_hash: &'a BlockHash) -> AsyncChainSourceResult<'a, Vec<u8>> {
		Box::pin(async move {
			let params = [serde_json::json!(block_hash.to_string()), serde_json::json!(0)];
			Ok(self.call_method("getblock", &params).await?)
		})
	}

	fn get_block_header<'a>(&'a self, block_hash: &'a BlockHash) -> AsyncChainSourceResult<'a, Vec<u8>> {
		Box::pin(async move {
			let params = [serde_json::json!(block_hash.to_string()), serde_json::json!(false)];
			let header: Vec<u8> = self.call_method("getblockheader", &params).await?;
			if header.len() != 80 {
				return Err(ChainSourceError::persistent("block header is not 80 bytes"));
			}
			Ok(header)
		})
	}

	fn get_transaction_hex<'a>(&'a self, txid: &'a Txid) -> AsyncChainSourceResult<'a, String> {
		Box::pin(async move {
			let params = [serde_json::json!(txid.to_string()), serde_json::json!(false)];
			Ok(self.call_method("getrawtransaction", &params).await?)
		})
	}

	fn get_raw_transaction<'a>(&'a self, txid: &'a Txid) -> AsyncChainSourceResult<'a, Vec<u8>> {
		Box::pin(async move {
			let params = [serde_json::json!(txid.to_string()), serde_json::json!(false)];
			Ok(self.call_method("getrawtransaction", &params).await?)
		})
	}

	fn submit_transaction<'a>(&'a self, raw_transaction: &'a [u8]) -> AsyncChainSourceResult<'a, Txid> {
		Box::pin(async move {
			let params = [serde_json::json!(raw_transaction.to_lower_hex_string())];
			Ok(self.call_method("sendrawtransaction", &params).await?)
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::convert::tests::bitcoind_block_json;
	use crate::http::client_tests::{HttpServer, MessageBody};
	use crate::ChainSourceErrorKind;

	use bitcoin::blockdata::constants::genesis_block;
	use bitcoin::consensus::encode;
	use bitcoin::Network;

	/// `user:password` in base64.
	const CREDENTIALS: &'static str = "dXNlcjpwYXNzd29yZA==";

	#[test]
	fn encodes_basic_auth_credentials() {
		let client = BitcoindRpcClient::with_user_password("127.0.0.1", 18443, "user", "password");
		assert_eq!(client.basic_auth, format!("Basic {}", CREDENTIALS));
	}

	#[tokio::test]
	async fn call_method_returning_unknown_response() {
		let server = HttpServer::responding_with_not_found();
		let client = BitcoindRpcClient::new(CREDENTIALS, server.endpoint());

		match client.call_method::<u32>("getblockcount", &[]).await {
			Err(e) => assert_eq!(e.kind(), std::io::ErrorKind::Other),
			Ok(_) => panic!("Expected error"),
		}
	}

	#[tokio::test]
	async fn call_method_returning_malformed_response() {
		let server = HttpServer::responding_with_ok(MessageBody::Content(serde_json::json!("foo")));
		let client = BitcoindRpcClient::new(CREDENTIALS, server.endpoint());

		match client.call_method::<u32>("getblockcount", &[]).await {
			Err(e) => {
				assert_eq!(e.kind(), std::io::ErrorKind::InvalidData);
				assert_eq!(e.get_ref().unwrap().to_string(), "expected JSON object");
			},
			Ok(_) => panic!("Expected error"),
		}
	}

	#[tokio::test]
	async fn call_method_returning_error() {
		let response = serde_json::json!({
			"error": { "code": -8, "message": "invalid parameter" },
		});
		let server = HttpServer::responding_with_server_error(response);
		let client = BitcoindRpcClient::new(CREDENTIALS, server.endpoint());

		match client.call_method::<u32>("getblock", &[serde_json::json!("foo")]).await {
			Err(e) => {
				assert_eq!(e.kind(), std::io::ErrorKind::Other);
				let rpc_error: Box<RpcError> = e.into_inner().unwrap().downcast().unwrap();
				assert_eq!(rpc_error.code, -8);
				assert_eq!(rpc_error.message, "invalid parameter");
			},
			Ok(_) => panic!("Expected error"),
		}
	}

	#[tokio::test]
	async fn call_method_returning_missing_result() {
		let server = HttpServer::responding_with_ok(MessageBody::Content(serde_json::json!({ "result": null })));
		let client = BitcoindRpcClient::new(CREDENTIALS, server.endpoint());

		match client.call_method::<u32>("getblockcount", &[]).await {
			Err(e) => {
				assert_eq!(e.kind(), std::io::ErrorKind::InvalidData);
				assert_eq!(e.get_ref().unwrap().to_string(), "expected JSON result");
			},
			Ok(_) => panic!("Expected error"),
		}
	}

	#[tokio::test]
	async fn get_chaintip_height_from_block_count() {
		let server = HttpServer::responding_with_ok(MessageBody::Content(serde_json::json!({ "result": 654470 })));
		let client = BitcoindRpcClient::new(CREDENTIALS, server.endpoint());

		match client.get_chaintip_height().await {
			Err(e) => panic!("Unexpected error: {:?}", e),
			Ok(height) => assert_eq!(height, 654470),
		}
		assert_eq!(server.request_lines(), vec!["POST / HTTP/1.1".to_string()]);
	}

	#[tokio::test]
	async fn get_block_from_verbose_getblock() {
		let genesis = genesis_block(Network::Regtest);
		let response = serde_json::json!({ "result": bitcoind_block_json(&genesis, 0), "error": null });
		let server = HttpServer::responding_with_ok(MessageBody::Content(response));
		let client = BitcoindRpcClient::new(CREDENTIALS, server.endpoint());

		match client.get_block(&genesis.block_hash()).await {
			Err(e) => panic!("Unexpected error: {:?}", e),
			Ok(data) => assert_eq!(data.header, genesis.header),
		}
	}

	#[tokio::test]
	async fn get_block_binary_from_hex() {
		let genesis = genesis_block(Network::Regtest);
		let raw = encode::serialize(&genesis);
		let response = serde_json::json!({ "result": raw.to_lower_hex_string() });
		let server = HttpServer::responding_with_ok(MessageBody::Content(response));
		let client = BitcoindRpcClient::new(CREDENTIALS, server.endpoint());

		match client.get_block_binary(&genesis.block_hash()).await {
			Err(e) => panic!("Unexpected error: {:?}", e),
			Ok(bytes) => assert_eq!(bytes, raw),
		}
	}

	#[tokio::test]
	async fn get_block_header_rejects_wrong_length() {
		let genesis = genesis_block(Network::Regtest);
		let server = HttpServer::responding_with_ok(MessageBody::Content(serde_json::json!({ "result": "0011" })));
		let client = BitcoindRpcClient::new(CREDENTIALS, server.endpoint());

		match client.get_block_header(&genesis.block_hash()).await {
			Err(e) => assert_eq!(e.kind(), ChainSourceErrorKind::Persistent),
			Ok(_) => panic!("Expected error"),
		}
	}

	#[tokio::test]
	async fn submit_transaction_returns_txid() {
		let genesis = genesis_block(Network::Regtest);
		let coinbase = &genesis.txdata[0];
		let response = serde_json::json!({ "result": coinbase.compute_txid().to_string() });
		let server = HttpServer::responding_with_ok(MessageBody::Content(response));
		let client = BitcoindRpcClient::new(CREDENTIALS, server.endpoint());

		match client.submit_transaction(&encode::serialize(coinbase)).await {
			Err(e) => panic!("Unexpected error: {:?}", e),
			Ok(txid) => assert_eq!(txid, coinbase.compute_txid()),
		}
	}
}
