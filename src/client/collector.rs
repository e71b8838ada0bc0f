use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::io::AsyncRead;
use tokio::task::JoinHandle;

use crate::protocol as fcgi;
use super::io::read_record;
use super::Error;


/// The output of a FastCGI responder for one request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[non_exhaustive]
pub struct Response {
    /// The content of all Stdout, Stderr and EndRequest records, in the
    /// order they arrived.
    pub body: Vec<u8>,
    /// The EndRequest body sent by the responder, if it sent a well-formed
    /// one before closing the connection.
    pub end_request: Option<fcgi::body::EndRequest>,
    /// Offset in `body` where the EndRequest content starts.
    end_offset: Option<usize>,
}

impl Response {
    /// Tests whether the responder explicitly completed the request.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.end_request.is_some_and(|e| e.protocol_status == fcgi::ProtocolStatus::RequestComplete)
    }

    /// Returns the Stdout and Stderr content of `body`, without the trailing
    /// EndRequest record content.
    #[must_use]
    pub fn output(&self) -> &[u8] {
        &self.body[..self.end_offset.unwrap_or(self.body.len())]
    }

    /// Interprets [`Response::output`] as a CGI/1.1 response.
    ///
    /// # Errors
    /// Returns an error if the output does not start with a well-formed
    /// header block.
    #[cfg(feature = "http")]
    pub fn into_http(mut self) -> Result<http::Response<Vec<u8>>, crate::cgi::response::Error> {
        if let Some(end) = self.end_offset {
            self.body.truncate(end);
        }
        crate::cgi::response::into_http(self.body)
    }
}


/// Reads the record stream for `request_id` until it ends.
async fn collect<R: AsyncRead + Unpin>(mut reader: R, request_id: u16) -> Result<Response, Error> {
    use fcgi::RecordType::*;
    let mut resp = Response::default();

    while let Some(rec) = read_record(&mut reader).await? {
        if rec.header.is_management() {
            tracing::info!(rtype = rec.header.rtype, "ignoring management record");
            continue;
        }
        if rec.header.request_id != request_id {
            tracing::info!(
                expected = request_id, request_id = rec.header.request_id, rtype = rec.header.rtype,
                "ignoring record for a different request"
            );
            continue;
        }

        match rec.record_type() {
            Ok(rtype) if rtype.is_output() => resp.body.extend_from_slice(&rec.content),
            Ok(EndRequest) => {
                resp.end_request = fcgi::body::EndRequest::from_slice(&rec.content).ok();
                resp.end_offset = Some(resp.body.len());
                resp.body.extend_from_slice(&rec.content);
                tracing::debug!(request_id, end_request = ?resp.end_request, "response complete");
                return Ok(resp);
            },
            Ok(rtype) => tracing::info!(request_id, ?rtype, "ignoring unexpected record"),
            Err(_) => tracing::info!(request_id, rtype = rec.header.rtype, "ignoring unknown record"),
        }
    }

    tracing::debug!(request_id, "connection closed without EndRequest");
    Ok(resp)
}


/// A background task collecting the response to one request.
///
/// Resolves exactly once, either with the complete [`Response`] or with the
/// error that ended the record stream. Dropping the [`Collector`] aborts the
/// task.
#[derive(Debug)]
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub(crate) struct Collector {
    task: JoinHandle<Result<Response, Error>>,
}

impl Collector {
    /// Spawns the collector on the current tokio runtime.
    pub(crate) fn spawn<R>(reader: R, request_id: u16) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        Self { task: tokio::spawn(collect(reader, request_id)) }
    }

    /// Stops the task, dropping its reader.
    pub(crate) fn abort(&self) {
        self.task.abort();
    }
}

impl Future for Collector {
    type Output = Result<Response, Error>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context) -> Poll<Self::Output> {
        Pin::new(&mut self.task).poll(cx).map(|res| match res {
            Ok(res) => res,
            Err(e) if e.is_panic() => Err(Error::Upstream(std::io::Error::other("response collector panicked"))),
            Err(_) => Err(Error::Upstream(std::io::ErrorKind::Interrupted.into())),
        })
    }
}

impl Drop for Collector {
    #[inline]
    fn drop(&mut self) {
        self.task.abort();
    }
}
