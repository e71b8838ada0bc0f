//! An `async` FastCGI client for the Responder role.
//!
//! A [`Client`] forwards requests to a single upstream responder. Every
//! request runs as a separate [`Session`] on a fresh connection:
//! 1. a request ID is leased from a [`RequestIdPool`],
//! 2. BeginRequest, Params and (unless the method is `GET` or `HEAD`) Stdin
//!    records are written,
//! 3. a background task collects the Stdout, Stderr and EndRequest records
//!    into a [`Response`] while the session waits for it with a deadline.
//!
//! The request ID is released and the connection closed exactly once on
//! every exit path, including timeouts and errors before the response
//! collector has started.
use std::time::Duration;

use futures_util::io::AsyncRead;

use crate::cgi;
use crate::protocol as fcgi;

mod collector;
mod dial;
mod io;
pub mod pool;
mod session;

pub use collector::Response;
pub use dial::{InvalidUpstream, Transport, Upstream};
pub use pool::{PoolExhausted, RequestId, RequestIdPool};
pub use session::Session;


/// Errors from reading malformed records sent by a responder.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum FramingError {
    /// The connection closed after part of a record header.
    #[error("connection closed after {0} bytes of a record header")]
    TruncatedHeader(usize),
    /// The connection closed inside a record's content or padding.
    #[error("connection closed before the end of a {expected} byte record body")]
    TruncatedBody { expected: usize },
    /// A record header contains invalid values.
    #[error(transparent)]
    Protocol(#[from] fcgi::Error),
}


/// Errors that end a FastCGI [`Session`].
///
/// Every error is terminal for its session. No operation in this module is
/// retried automatically.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The connection to the responder could not be established.
    #[error("failed to connect to FastCGI responder at {upstream}")]
    Dial {
        upstream: Upstream,
        #[source]
        source: std::io::Error,
    },
    /// Connecting to the responder took longer than `Config::dial_timeout`.
    #[error("timed out connecting to FastCGI responder at {upstream}")]
    DialTimeout { upstream: Upstream },
    /// No request ID was available.
    #[error(transparent)]
    PoolExhausted(#[from] PoolExhausted),
    /// The responder sent a malformed or truncated record.
    #[error("invalid record from FastCGI responder")]
    Framing(#[from] FramingError),
    /// Writing a record to the responder failed.
    #[error("failed to write to FastCGI responder")]
    Write(#[source] std::io::Error),
    /// The responder did not complete the request within `Config::timeout`.
    #[error("FastCGI responder did not answer within {0:?}")]
    Timeout(Duration),
    /// The connection failed while the response was read.
    #[error("connection to FastCGI responder failed")]
    Upstream(#[source] std::io::Error),
    /// The request body could not be read.
    #[error("failed to read request body")]
    Body(#[source] std::io::Error),
    /// The CGI environment cannot be encoded as name-value pairs.
    #[error("CGI environment cannot be encoded")]
    Encode(#[source] fcgi::Error),
}

impl Error {
    /// Tests whether this error is the responder failing to answer in time.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::DialTimeout { .. })
    }

    /// Suggests the HTTP status to report to the original client.
    #[cfg(feature = "http")]
    #[must_use]
    pub fn status_hint(&self) -> http::StatusCode {
        use http::StatusCode;
        match self {
            Self::Timeout(_) | Self::DialTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::Dial { .. } | Self::PoolExhausted(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Framing(_) | Self::Write(_) | Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::Body(_) => StatusCode::BAD_REQUEST,
            Self::Encode(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}


/// The record sent to a responder when a session times out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CancelRecord {
    /// An AbortRequest record, FastCGI's cancellation message.
    #[default]
    AbortRequest,
    /// An EndRequest record with the given body, for responders that
    /// expect this non-standard cancellation message.
    EndRequest {
        app_status: u32,
        protocol_status: fcgi::ProtocolStatus,
    },
}

impl CancelRecord {
    /// The EndRequest variant sent by legacy clients: application status 502,
    /// protocol status Overloaded.
    pub const LEGACY: Self = Self::EndRequest {
        app_status: 502,
        protocol_status: fcgi::ProtocolStatus::Overloaded,
    };

    /// Returns the record type and content to send.
    pub(crate) fn record(self) -> (fcgi::RecordType, Vec<u8>) {
        match self {
            Self::AbortRequest => (fcgi::RecordType::AbortRequest, Vec::new()),
            Self::EndRequest { app_status, protocol_status } => {
                let body = fcgi::body::EndRequest { app_status, protocol_status };
                (fcgi::RecordType::EndRequest, body.to_bytes().to_vec())
            },
        }
    }
}


/// Settings shared by all sessions of a [`Client`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct Config {
    /// The time a responder has to complete a request once it was sent.
    pub timeout: Duration,
    /// The time allowed for establishing a connection.
    pub dial_timeout: Duration,
    /// The record sent to the responder when `timeout` elapses.
    pub cancel: CancelRecord,
    /// The size of a private request ID pool for the [`Client`]. If `None`,
    /// the process-wide `RequestIdPool::global` is used.
    pub pool_size: Option<u16>,
}

impl Config {
    /// The default session deadline.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);
    /// The default deadline for establishing a connection.
    pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(3);

    /// Sets the session deadline.
    #[inline]
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the deadline for establishing a connection.
    #[inline]
    #[must_use]
    pub fn with_dial_timeout(mut self, timeout: Duration) -> Self {
        self.dial_timeout = timeout;
        self
    }

    /// Sets the record sent to responders when a session times out.
    #[inline]
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelRecord) -> Self {
        self.cancel = cancel;
        self
    }

    /// Gives the [`Client`] its own pool of `size` request IDs, clamped to
    /// `1..=65535`.
    #[inline]
    #[must_use]
    pub fn with_pool_size(mut self, size: u16) -> Self {
        self.pool_size = Some(size.max(1));
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            timeout: Self::DEFAULT_TIMEOUT,
            dial_timeout: Self::DEFAULT_DIAL_TIMEOUT,
            cancel: CancelRecord::default(),
            pool_size: None,
        }
    }
}


/// A FastCGI client forwarding requests to one responder.
///
/// Cloning a [`Client`] is cheap. Clones share their request ID pool.
#[derive(Debug, Clone)]
pub struct Client {
    upstream: Upstream,
    config: Config,
    pool: RequestIdPool,
}

impl Client {
    /// Creates a client for `upstream`.
    #[must_use]
    pub fn new(upstream: Upstream, config: Config) -> Self {
        let pool = match config.pool_size {
            Some(size) => RequestIdPool::new(size),
            None => RequestIdPool::global().clone(),
        };
        Self { upstream, config, pool }
    }

    /// Creates a client for `upstream` that leases request IDs from `pool`.
    #[must_use]
    pub fn with_pool(upstream: Upstream, config: Config, pool: RequestIdPool) -> Self {
        Self { upstream, config, pool }
    }

    /// Returns the address of the responder.
    #[inline]
    #[must_use]
    pub fn upstream(&self) -> &Upstream {
        &self.upstream
    }

    /// Returns the client's settings.
    #[inline]
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the pool request IDs are leased from.
    #[inline]
    #[must_use]
    pub fn pool(&self) -> &RequestIdPool {
        &self.pool
    }

    /// Forwards `req` and its `body` to the responder.
    ///
    /// The CGI environment is built with `Environment::from_request`.
    ///
    /// # Errors
    /// Returns an [`Error`] if the connection cannot be established or the
    /// session fails.
    pub async fn request<B>(&self, req: &cgi::RequestInfo, body: B) -> Result<Response, Error>
    where
        B: AsyncRead + Unpin,
    {
        let env = cgi::Environment::from_request(req);
        self.request_env(&env, req.keep_alive, body).await
    }

    /// Forwards a prepared CGI environment and request `body` to the
    /// responder.
    ///
    /// # Errors
    /// Returns an [`Error`] if the connection cannot be established or the
    /// session fails.
    pub async fn request_env<B>(
        &self,
        env: &cgi::Environment,
        keep_alive: bool,
        body: B,
    ) -> Result<Response, Error>
    where
        B: AsyncRead + Unpin,
    {
        let transport = self.upstream.connect(self.config.dial_timeout).await?;
        Session::new(transport, self.pool.clone(), self.config.clone())
            .run(env, keep_alive, body)
            .await
    }
}
