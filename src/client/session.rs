use futures_util::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use futures_util::FutureExt;

use crate::cgi::Environment;
use crate::protocol as fcgi;
use super::collector::{Collector, Response};
use super::io::RecordWriter;
use super::{Config, Error, RequestIdPool};


/// The lifecycle of a [`Session`], in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, strum::IntoStaticStr)]
enum State {
    Idle,
    IdAllocated,
    BeginSent,
    ParamsSent,
    BodySent,
    AwaitingResponse,
    Completed,
    TimedOut,
    Failed,
}

#[derive(Debug)]
struct Progress {
    request_id: u16,
    state: State,
}

impl Progress {
    fn advance(&mut self, next: State) {
        debug_assert!(next > self.state, "session moved from {:?} back to {next:?}", self.state);
        self.state = next;
        let state: &'static str = next.into();
        tracing::debug!(request_id = self.request_id, state, "session state changed");
    }
}


/// A single FastCGI request over an exclusively owned transport.
///
/// `Session::run` drives the request through its whole lifecycle. The
/// session's request ID is leased from a [`RequestIdPool`] and the
/// transport is closed when `run` returns, whatever the outcome.
#[derive(Debug)]
pub struct Session<T> {
    transport: T,
    pool: RequestIdPool,
    config: Config,
}

impl<T> Session<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Creates a session sending its request over `transport`.
    #[must_use]
    pub fn new(transport: T, pool: RequestIdPool, config: Config) -> Self {
        Self { transport, pool, config }
    }

    /// Sends a Responder request with the CGI environment `env` and waits
    /// for the response.
    ///
    /// Unless `REQUEST_METHOD` is `GET` or `HEAD`, up to `CONTENT_LENGTH`
    /// bytes of `body` are sent as the Stdin stream. Otherwise `body` is not
    /// read at all.
    ///
    /// The response must arrive within `Config::timeout` after the request
    /// was sent. Afterwards, the responder is notified with
    /// `Config::cancel` if the record can be written without waiting.
    ///
    /// # Errors
    /// Returns an [`Error`] describing the first failure. The request ID is
    /// released and the transport closed in every case.
    pub async fn run<B>(self, env: &Environment, keep_alive: bool, body: B) -> Result<Response, Error>
    where
        B: AsyncRead + Unpin,
    {
        let Self { transport, pool, config } = self;
        let (reader, writer) = transport.split();
        let writer = RecordWriter::new(writer);

        match pool.alloc() {
            Ok(lease) => {
                let mut progress = Progress { request_id: lease.get(), state: State::Idle };
                progress.advance(State::IdAllocated);
                let res = exchange(&mut progress, reader, &writer, &config, env, keep_alive, body).await;
                match &res {
                    Ok(_) => progress.advance(State::Completed),
                    Err(Error::Timeout(_)) => progress.advance(State::TimedOut),
                    Err(e) => {
                        progress.advance(State::Failed);
                        tracing::debug!(request_id = lease.get(), error = %e, "session failed");
                    },
                }
                close(writer).await;
                lease.release();
                res
            },
            Err(e) => {
                tracing::warn!(capacity = e.capacity, "no FastCGI request ID available");
                close(writer).await;
                Err(e.into())
            },
        }
    }
}

async fn close<W: AsyncWrite + Unpin>(writer: RecordWriter<W>) {
    if let Err(e) = writer.close().await {
        tracing::warn!(error = %e, "failed to close FastCGI connection");
    }
}

/// Sends the request and waits for its response.
async fn exchange<R, W, B>(
    progress: &mut Progress,
    reader: R,
    writer: &RecordWriter<W>,
    config: &Config,
    env: &Environment,
    keep_alive: bool,
    body: B,
) -> Result<Response, Error>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin,
    B: AsyncRead + Unpin,
{
    use fcgi::RecordType::*;
    let request_id = progress.request_id;
    let params = env.encode().map_err(Error::Encode)?;

    let begin = fcgi::body::BeginRequest::responder(keep_alive);
    writer.write_record(BeginRequest, request_id, &begin.to_bytes()).await.map_err(Error::Write)?;
    progress.advance(State::BeginSent);

    writer.write_stream_bytes(Params, request_id, &params).await.map_err(Error::Write)?;
    progress.advance(State::ParamsSent);

    if env.expects_body() {
        let expected = env.content_length();
        let sent = writer.write_stream(Stdin, request_id, body.take(expected)).await?;
        if sent < expected {
            tracing::debug!(request_id, sent, expected, "request body ended before CONTENT_LENGTH");
        }
        progress.advance(State::BodySent);
    }

    let mut collector = Collector::spawn(reader, request_id);
    progress.advance(State::AwaitingResponse);

    match tokio::time::timeout(config.timeout, &mut collector).await {
        Ok(res) => res,
        Err(_) => {
            collector.abort();
            tracing::warn!(request_id, timeout = ?config.timeout, "FastCGI responder timed out");

            let (rtype, content) = config.cancel.record();
            match writer.write_record(rtype, request_id, &content).now_or_never() {
                Some(Ok(())) => {},
                Some(Err(e)) => tracing::warn!(request_id, error = %e, "failed to send cancel record"),
                None => tracing::debug!(request_id, "cancel record skipped, connection is busy"),
            }
            Err(Error::Timeout(config.timeout))
        },
    }
}
