// TODO(docs): #![deny(missing_docs)]
#![deny(unsafe_code, single_use_lifetimes, unused_lifetimes)]
#![warn(keyword_idents, let_underscore_drop, unreachable_pub, unused_import_braces)]

#![deny(clippy::suspicious, clippy::cargo)]
#![deny(clippy::exit, clippy::semicolon_inside_block, clippy::unwrap_used)]
#![warn(clippy::pedantic, clippy::multiple_crate_versions)]
#![allow(clippy::enum_glob_use, clippy::items_after_statements)]

//! A client for the [FastCGI protocol][fastcgi] in the Responder role.
//!
//! The crate is split into three layers:
//! - [`protocol`] contains the record framing and the fixed-size record
//!   bodies of FastCGI version 1, together with the name-value pair format
//!   used for the Params stream.
//! - [`cgi`] maps an HTTP request onto a [CGI/1.1 environment][rfc3875].
//! - [`client`] drives requests over TCP or Unix domain sockets, racing each
//!   response against a configurable deadline.
//!
//! ```no_run
//! use fastcgi_client::cgi::{RequestInfo, ScriptInfo};
//! use fastcgi_client::client::{Client, Config};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let client = Client::new("unix:/run/php-fpm.sock".parse()?, Config::default());
//! let req = RequestInfo::new("GET", "/index.php?page=2", ScriptInfo::new("/srv/www", "/index.php"));
//! let resp = client.request(&req, futures_util::io::empty()).await?;
//! println!("{}", String::from_utf8_lossy(resp.output()));
//! # Ok(())
//! # }
//! ```
//!
//! [fastcgi]: https://fastcgi-archives.github.io/FastCGI_Specification.html
//! [rfc3875]: https://www.rfc-editor.org/rfc/rfc3875.html#section-4

/// Tracing helpers shared across the crate.
mod macros;

// See: https://fastcgi-archives.github.io/FastCGI_Specification.html
pub mod protocol;

pub mod cgi;

pub mod client;

pub use client::{Client, Config, Error, Response};
