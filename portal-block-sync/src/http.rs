// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! A small HTTP/1.1 client over `tokio::net::TcpStream`, shared by the REST and JSON-RPC chain
//! sources.

use crate::http_endpoint::HttpEndpoint;

use std::convert::TryFrom;
use std::fmt;
use std::io::Read;
use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

/// Timeout for connecting and for each blocking operation on the stream.
const TCP_STREAM_TIMEOUT: Duration = Duration::from_secs(5);

/// Total time allowed for the first line of a response. Full nodes may stall for a long while
/// when flushing their UTXO cache, and every request is retried once on failure.
const TCP_STREAM_RESPONSE_TIMEOUT: Duration = Duration::from_secs(300);

/// Upper bound on the size of the status line plus headers.
const MAX_HTTP_MESSAGE_HEADER_SIZE: usize = 8192;

/// Upper bound on a response body. Fits a hex-encoded 4MB block wrapped in JSON plus chunked
/// transfer overhead.
const MAX_HTTP_MESSAGE_BODY_SIZE: usize = 2 * 4_000_000 + 32_000;

/// An outgoing HTTP request message.
struct HttpRequest<'a> {
	method: &'static str,
	uri: &'a str,
	host: &'a str,
	headers: Vec<(&'static str, String)>,
	body: Option<String>,
}

impl<'a> HttpRequest<'a> {
	fn new(method: &'static str, uri: &'a str, host: &'a str) -> Self {
		Self { method, uri, host, headers: Vec::new(), body: None }
	}

	fn header(mut self, name: &'static str, value: String) -> Self {
		self.headers.push((name, value));
		self
	}

	fn body(mut self, content_type: &str, body: String) -> Self {
		self.headers.push(("Content-Type", content_type.to_string()));
		self.headers.push(("Content-Length", body.len().to_string()));
		self.body = Some(body);
		self
	}

	fn to_message(&self) -> String {
		let mut message = format!("{} {} HTTP/1.1\r\nHost: {}\r\n", self.method, self.uri, self.host);
		for (name, value) in self.headers.iter() {
			message.push_str(&format!("{}: {}\r\n", name, value));
		}
		message.push_str("Connection: keep-alive\r\n\r\n");
		if let Some(body) = &self.body {
			message.push_str(body);
		}
		message
	}
}

/// A keep-alive connection to a single HTTP server.
pub(crate) struct HttpClient {
	address: SocketAddr,
	stream: TcpStream,
}

impl HttpClient {
	/// Resolves `endpoint` and opens a connection to the first address found.
	pub fn connect<E: ToSocketAddrs>(endpoint: E) -> std::io::Result<Self> {
		let address = endpoint.to_socket_addrs()?.next().ok_or_else(|| {
			std::io::Error::new(std::io::ErrorKind::InvalidInput, "could not resolve to any addresses")
		})?;
		let stream = std::net::TcpStream::connect_timeout(&address, TCP_STREAM_TIMEOUT)?;
		stream.set_read_timeout(Some(TCP_STREAM_TIMEOUT))?;
		stream.set_write_timeout(Some(TCP_STREAM_TIMEOUT))?;
		stream.set_nonblocking(true)?;
		let stream = TcpStream::from_std(stream)?;
		Ok(Self { address, stream })
	}

	/// Issues a `GET` for `uri` and interprets the response body as `F`.
	pub async fn get<F>(&mut self, uri: &str, host: &str) -> std::io::Result<F>
	where F: TryFrom<Vec<u8>, Error = std::io::Error> {
		let request = HttpRequest::new("GET", uri, host);
		F::try_from(self.send_with_retry(&request.to_message()).await?)
	}

	/// Issues a `POST` of `body` to `uri`, optionally with an `Authorization` header, and
	/// interprets the response body as `F`.
	pub async fn post<F>(
		&mut self, uri: &str, host: &str, auth: Option<&str>, content_type: &str, body: String,
	) -> std::io::Result<F>
	where F: TryFrom<Vec<u8>, Error = std::io::Error> {
		let mut request = HttpRequest::new("POST", uri, host);
		if let Some(auth) = auth {
			request = request.header("Authorization", auth.to_string());
		}
		let request = request.body(content_type, body);
		F::try_from(self.send_with_retry(&request.to_message()).await?)
	}

	/// Sends `message`, reconnecting and trying once more if the first attempt fails. Servers
	/// close idle keep-alive connections and a busy node may time out a single request.
	async fn send_with_retry(&mut self, message: &str) -> std::io::Result<Vec<u8>> {
		match self.send(message).await {
			Ok(body) => Ok(body),
			Err(_) => {
				tokio::time::sleep(Duration::from_millis(100)).await;
				*self = Self::connect(self.address)?;
				self.send(message).await
			},
		}
	}

	async fn send(&mut self, message: &str) -> std::io::Result<Vec<u8>> {
		self.stream.write_all(message.as_bytes()).await?;
		self.stream.flush().await?;
		self.read_response().await
	}

	async fn read_response(&mut self) -> std::io::Result<Vec<u8>> {
		let limited = (&mut self.stream).take(MAX_HTTP_MESSAGE_HEADER_SIZE as u64);
		let mut reader = BufReader::new(limited);

		let status_retries = TCP_STREAM_RESPONSE_TIMEOUT.as_secs() / TCP_STREAM_TIMEOUT.as_secs();
		let status_line = read_line(&mut reader, status_retries).await?
			.ok_or_else(|| std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "no status line"))?;
		let status = HttpStatus::parse(&status_line)?;

		let mut length = HttpMessageLength::Empty;
		loop {
			let line = read_line(&mut reader, 0).await?
				.ok_or_else(|| std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "no headers"))?;
			if line.is_empty() {
				break;
			}
			let header = HttpHeader::parse(&line)?;
			if header.has_name("Content-Length") {
				let value = header.value.parse()
					.map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
				if let HttpMessageLength::Empty = length {
					length = HttpMessageLength::ContentLength(value);
				}
			} else if header.has_name("Transfer-Encoding") {
				length = HttpMessageLength::TransferEncoding(header.value.to_string());
			}
		}

		// Anything already buffered counts against the body limit.
		let body_limit = MAX_HTTP_MESSAGE_BODY_SIZE - reader.buffer().len();
		reader.get_mut().set_limit(body_limit as u64);
		let contents = match length {
			HttpMessageLength::Empty => Vec::new(),
			HttpMessageLength::ContentLength(length) => {
				if length == 0 || length > MAX_HTTP_MESSAGE_BODY_SIZE {
					return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "out of range"));
				}
				let mut contents = vec![0; length];
				reader.read_exact(&mut contents[..]).await?;
				contents
			},
			HttpMessageLength::TransferEncoding(coding) => {
				if !coding.eq_ignore_ascii_case("chunked") {
					return Err(std::io::Error::new(
						std::io::ErrorKind::InvalidInput, "unsupported transfer coding"));
				}
				read_chunked_body(&mut reader).await?
			},
		};

		if !status.is_ok() {
			let error = HttpError { status_code: status.code.to_string(), contents };
			return Err(std::io::Error::new(std::io::ErrorKind::Other, error));
		}
		Ok(contents)
	}
}

/// Reads one CRLF-terminated line, tolerating up to `retries` read timeouts. Returns `None` at
/// end of stream.
async fn read_line<R>(reader: &mut R, retries: u64) -> std::io::Result<Option<String>>
where R: tokio::io::AsyncBufRead + Unpin {
	let mut line = String::new();
	let mut timeouts = 0;
	let bytes_read = loop {
		match reader.read_line(&mut line).await {
			Ok(bytes_read) => break bytes_read,
			Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
				timeouts += 1;
				if timeouts > retries {
					return Err(e);
				}
			},
			Err(e) => return Err(e),
		}
	};
	if bytes_read == 0 {
		return Ok(None);
	}
	if line.ends_with('\n') {
		line.pop();
		if line.ends_with('\r') {
			line.pop();
		}
	}
	Ok(Some(line))
}

/// Reads a chunked body. `chunked_transfer` has no async interface, so it only decodes each
/// chunk header to learn the size of the chunk that follows.
async fn read_chunked_body<R>(reader: &mut R) -> std::io::Result<Vec<u8>>
where R: tokio::io::AsyncBufRead + Unpin {
	let mut contents = Vec::new();
	loop {
		let mut chunk_header = String::new();
		reader.read_line(&mut chunk_header).await?;
		if chunk_header == "0\r\n" {
			// The decoder expects the terminating CRLF along with the last chunk header.
			reader.read_line(&mut chunk_header).await?;
		}

		let mut decoder = chunked_transfer::Decoder::new(chunk_header.as_bytes());
		decoder.read_to_end(&mut Vec::new())?;
		let chunk_size = match decoder.remaining_chunks_size() {
			None => break,
			Some(chunk_size) => chunk_size,
		};

		let offset = contents.len();
		contents.resize(offset + chunk_size + "\r\n".len(), 0);
		reader.read_exact(&mut contents[offset..]).await?;
		contents.truncate(offset + chunk_size);
	}
	Ok(contents)
}

/// A non-2xx response.
#[derive(Debug)]
pub struct HttpError {
	/// The three-digit status code.
	pub status_code: String,
	/// The raw response body.
	pub contents: Vec<u8>,
}

impl std::error::Error for HttpError {}

impl fmt::Display for HttpError {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		let contents = String::from_utf8_lossy(&self.contents);
		write!(f, "status_code: {}, contents: {}", self.status_code, contents)
	}
}

/// Status line of a response ([RFC 7230 section 3.1.2]).
///
/// [RFC 7230 section 3.1.2]: https://tools.ietf.org/html/rfc7230#section-3.1.2
struct HttpStatus<'a> {
	code: &'a str,
}

impl<'a> HttpStatus<'a> {
	fn parse(line: &'a str) -> std::io::Result<HttpStatus<'a>> {
		let invalid = |msg: &str| std::io::Error::new(std::io::ErrorKind::InvalidData, msg.to_string());
		let mut tokens = line.splitn(3, ' ');

		let version = tokens.next().ok_or_else(|| invalid("no HTTP-Version"))?;
		if !version.eq_ignore_ascii_case("HTTP/1.1") && !version.eq_ignore_ascii_case("HTTP/1.0") {
			return Err(invalid("invalid HTTP-Version"));
		}
		let code = tokens.next().ok_or_else(|| invalid("no Status-Code"))?;
		if code.len() != 3 || !code.chars().all(|c| c.is_ascii_digit()) {
			return Err(invalid("invalid Status-Code"));
		}
		tokens.next().ok_or_else(|| invalid("no Reason-Phrase"))?;
		Ok(Self { code })
	}

	fn is_ok(&self) -> bool {
		self.code.starts_with('2')
	}
}

/// A single `name: value` header field.
struct HttpHeader<'a> {
	name: &'a str,
	value: &'a str,
}

impl<'a> HttpHeader<'a> {
	fn parse(line: &'a str) -> std::io::Result<HttpHeader<'a>> {
		match line.split_once(':') {
			Some((name, value)) => Ok(Self { name, value: value.trim() }),
			None => Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "no header value")),
		}
	}

	fn has_name(&self, name: &str) -> bool {
		self.name.eq_ignore_ascii_case(name)
	}
}

enum HttpMessageLength {
	Empty,
	ContentLength(usize),
	TransferEncoding(String),
}

/// A response body taken as raw bytes.
pub struct BinaryResponse(pub Vec<u8>);

/// A response body parsed as JSON.
pub struct JsonResponse(pub serde_json::Value);

impl TryFrom<Vec<u8>> for BinaryResponse {
	type Error = std::io::Error;

	fn try_from(bytes: Vec<u8>) -> std::io::Result<Self> {
		Ok(BinaryResponse(bytes))
	}
}

impl TryFrom<Vec<u8>> for JsonResponse {
	type Error = std::io::Error;

	fn try_from(bytes: Vec<u8>) -> std::io::Result<Self> {
		Ok(JsonResponse(serde_json::from_slice(&bytes)?))
	}
}
