// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Endpoints for HTTP-based chain sources.

use crate::ChainError;

/// Endpoint for interacting with an HTTP-based API.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpEndpoint {
	host: String,
	port: Option<u16>,
	path: String,
}

impl HttpEndpoint {
	/// Creates an endpoint for the given host and default HTTP port.
	pub fn insecure_host(host: String) -> Self {
		Self { host, port: None, path: String::from("/") }
	}

	/// Parses an `http://host[:port][/path]` URL.
	///
	/// Only plain HTTP is supported by the underlying client, so `https` URLs are rejected along
	/// with anything else that is not a well-formed absolute HTTP URL.
	pub fn from_url(url: &str) -> Result<Self, ChainError> {
		let rest = match url.split_once("://") {
			Some((scheme, rest)) if scheme.eq_ignore_ascii_case("http") => rest,
			_ => return Err(ChainError::InvalidUrlString),
		};

		let (authority, path) = match rest.find('/') {
			Some(idx) => (&rest[..idx], &rest[idx..]),
			None => (rest, "/"),
		};
		if authority.is_empty() || authority.contains('@') {
			return Err(ChainError::InvalidUrlString);
		}

		let (host, port) = if let Some(bracketed) = authority.strip_prefix('[') {
			let (host, after) = bracketed.split_once(']').ok_or(ChainError::InvalidUrlString)?;
			match after {
				"" => (host, None),
				_ => match after.strip_prefix(':') {
					Some(port) => (host, Some(parse_port(port)?)),
					None => return Err(ChainError::InvalidUrlString),
				},
			}
		} else {
			match authority.split_once(':') {
				Some((host, port)) => (host, Some(parse_port(port)?)),
				None => (authority, None),
			}
		};
		if host.is_empty() || host.chars().any(|c| c.is_whitespace()) {
			return Err(ChainError::InvalidUrlString);
		}

		let endpoint = Self::insecure_host(host.to_string()).with_path(path.to_string());
		Ok(match port {
			Some(port) => endpoint.with_port(port),
			None => endpoint,
		})
	}

	/// Specifies a port to use with the endpoint.
	pub fn with_port(mut self, port: u16) -> Self {
		self.port = Some(port);
		self
	}

	/// Specifies a path to use with the endpoint.
	pub fn with_path(mut self, path: String) -> Self {
		self.path = path;
		self
	}

	/// Returns the endpoint host.
	pub fn host(&self) -> &str {
		&self.host
	}

	/// Returns the endpoint port.
	pub fn port(&self) -> u16 {
		match self.port {
			None => 80,
			Some(port) => port,
		}
	}

	/// Returns the endpoint path.
	pub fn path(&self) -> &str {
		&self.path
	}
}

fn parse_port(port: &str) -> Result<u16, ChainError> {
	port.parse::<u16>().map_err(|_| ChainError::InvalidUrlString)
}

impl<'a> std::net::ToSocketAddrs for &'a HttpEndpoint {
	type Iter = <(&'a str, u16) as std::net::ToSocketAddrs>::Iter;

	fn to_socket_addrs(&self) -> std::io::Result<Self::Iter> {
		(self.host(), self.port()).to_socket_addrs()
	}
}
