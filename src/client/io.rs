use std::io;
use std::sync::Arc;

use futures_util::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use futures_util::lock::Mutex;

use crate::macros::trace_record;
use crate::protocol as fcgi;
use super::{Error, FramingError};


/// Serializes outbound records onto a shared transport.
///
/// Every record is encoded into its own buffer and written out completely
/// while the writer's `Mutex` is held, so records from different callers
/// never interleave on the wire.
#[derive(Debug)]
pub(crate) struct RecordWriter<W> {
    writer: Arc<Mutex<W>>,
}

impl<W: AsyncWrite + Unpin> RecordWriter<W> {
    pub(crate) fn new(writer: W) -> Self {
        Self { writer: Arc::new(Mutex::new(writer)) }
    }

    /// Writes a single record with `content` as its body.
    ///
    /// `content` must fit into a single record.
    pub(crate) async fn write_record(
        &self,
        rtype: fcgi::RecordType,
        request_id: u16,
        content: &[u8],
    ) -> io::Result<()> {
        let (head, buf) = fcgi::Record::encode_framed(rtype, request_id, content)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

        let mut w = self.writer.lock().await;
        w.write_all(&buf).await?;
        w.flush().await?;
        drop(w);

        trace_record!("sent", head);
        Ok(())
    }

    /// Writes `content` as a complete stream: as many records as required,
    /// followed by the empty record marking the end of the stream.
    pub(crate) async fn write_stream_bytes(
        &self,
        rtype: fcgi::RecordType,
        request_id: u16,
        content: &[u8],
    ) -> io::Result<()> {
        debug_assert!(rtype.is_stream());
        for chunk in content.chunks(fcgi::MAX_CONTENT_LEN) {
            self.write_record(rtype, request_id, chunk).await?;
        }
        self.write_record(rtype, request_id, &[]).await
    }

    /// Copies all of `src` into a stream, followed by the empty record
    /// marking the end of the stream. Returns the number of bytes copied.
    ///
    /// # Errors
    /// Failures to read from `src` are reported as [`Error::Body`], failures
    /// to write as [`Error::Write`].
    pub(crate) async fn write_stream<R: AsyncRead + Unpin>(
        &self,
        rtype: fcgi::RecordType,
        request_id: u16,
        mut src: R,
    ) -> Result<u64, Error> {
        debug_assert!(rtype.is_stream());
        let mut buf = vec![0; fcgi::MAX_CONTENT_LEN];
        let mut total = 0;
        loop {
            // Fill whole records where possible instead of forwarding short reads as-is
            let mut filled = 0;
            while filled < buf.len() {
                match src.read(&mut buf[filled..]).await {
                    Ok(0) => break,
                    Ok(n) => filled += n,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => {},
                    Err(e) => return Err(Error::Body(e)),
                }
            }
            if filled == 0 {
                break;
            }
            self.write_record(rtype, request_id, &buf[..filled]).await.map_err(Error::Write)?;
            total += filled as u64;
        }
        self.write_record(rtype, request_id, &[]).await.map_err(Error::Write)?;
        Ok(total)
    }

    /// Closes the underlying transport.
    pub(crate) async fn close(self) -> io::Result<()> {
        self.writer.lock().await.close().await
    }
}


/// Reads one complete record from `reader`.
///
/// Returns `Ok(None)` if the transport ended cleanly on a record boundary.
/// The padding following the record's content is consumed and discarded.
///
/// # Errors
/// A transport closing in the middle of a record or an invalid header
/// results in [`Error::Framing`], any other I/O error in
/// [`Error::Upstream`].
pub(crate) async fn read_record<R>(reader: &mut R) -> Result<Option<fcgi::Record>, Error>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut head = [0; fcgi::RecordHeader::LEN];
    let mut filled = 0;
    while filled < head.len() {
        match reader.read(&mut head[filled..]).await {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => return Err(FramingError::TruncatedHeader(filled).into()),
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {},
            Err(e) => return Err(Error::Upstream(e)),
        }
    }

    let header = fcgi::RecordHeader::from_bytes(head).map_err(FramingError::from)?;
    trace_record!("received", header);

    let mut content = vec![0; header.body_len()];
    reader.read_exact(&mut content).await.map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => Error::Framing(FramingError::TruncatedBody {
            expected: header.body_len(),
        }),
        _ => Error::Upstream(e),
    })?;
    content.truncate(header.content_length.into());
    Ok(Some(fcgi::Record { header, content }))
}


#[cfg(test)]
mod tests {
    use futures_util::io::Cursor;
    use futures_util::FutureExt;
    use super::*;

    fn wire(rtype: fcgi::RecordType, id: u16, content: &[u8]) -> Vec<u8> {
        fcgi::Record::encode(rtype, id, content).expect("content fits into a record")
    }

    fn into_output(writer: RecordWriter<Cursor<Vec<u8>>>) -> Vec<u8> {
        let Ok(mutex) = Arc::try_unwrap(writer.writer) else {
            panic!("writer should have a single owner");
        };
        mutex.into_inner().into_inner()
    }

    async fn read_all(mut data: &[u8]) -> Vec<fcgi::Record> {
        let mut out = Vec::new();
        while let Some(rec) = read_record(&mut data).await.expect("valid record stream") {
            out.push(rec);
        }
        out
    }

    #[test]
    fn read_records() {
        let mut data = wire(fcgi::RecordType::Stdout, 3, b"hello");
        data.extend(wire(fcgi::RecordType::Stderr, 3, b""));
        data.extend(wire(fcgi::RecordType::EndRequest, 3, &[0; 8]));

        let recs = read_all(&data).now_or_never().expect("reads from a slice never block");
        assert_eq!(recs.len(), 3);
        assert_eq!(recs[0].record_type(), Ok(fcgi::RecordType::Stdout));
        assert_eq!(recs[0].header.request_id, 3);
        assert_eq!(recs[0].content, b"hello");
        assert!(recs[1].content.is_empty());
        assert_eq!(recs[2].record_type(), Ok(fcgi::RecordType::EndRequest));
    }

    #[test]
    fn truncated() {
        let data = wire(fcgi::RecordType::Stdout, 1, b"hello");
        for cut in 1..data.len() {
            let mut part = &data[..cut];
            let res = read_record(&mut part).now_or_never().expect("reads from a slice never block");
            match res {
                Err(Error::Framing(FramingError::TruncatedHeader(n))) => {
                    assert!(cut < fcgi::RecordHeader::LEN);
                    assert_eq!(n, cut);
                },
                Err(Error::Framing(FramingError::TruncatedBody { expected })) => {
                    assert!(cut >= fcgi::RecordHeader::LEN);
                    assert_eq!(expected, 8);
                },
                other => panic!("unexpected result at cut {cut}: {other:?}"),
            }
        }
    }

    #[test]
    fn bad_version() {
        let mut data = wire(fcgi::RecordType::Stdout, 1, b"");
        data[0] = 2;
        let res = read_record(&mut data.as_slice()).now_or_never().expect("slice read");
        assert!(matches!(
            res,
            Err(Error::Framing(FramingError::Protocol(fcgi::Error::UnknownVersion(2)))),
        ));
    }

    #[test]
    fn write_chunked_stream() {
        let writer = RecordWriter::new(Cursor::new(Vec::new()));
        let payload: Vec<u8> = std::iter::repeat_with(|| fastrand::u8(..))
            .take(fcgi::MAX_CONTENT_LEN * 2 + 10)
            .collect();

        let copied = writer.write_stream(fcgi::RecordType::Stdin, 9, payload.as_slice())
            .now_or_never().expect("cursor writes never block")
            .expect("write succeeds");
        assert_eq!(copied, payload.len() as u64);

        let out = into_output(writer);
        assert_eq!(out.len() % 8, 0);
        let recs = read_all(&out).now_or_never().expect("slice read");
        let lens: Vec<_> = recs.iter().map(|r| r.content.len()).collect();
        assert_eq!(lens, [fcgi::MAX_CONTENT_LEN, fcgi::MAX_CONTENT_LEN, 10, 0]);
        assert!(recs.iter().all(|r| r.header.request_id == 9));

        let joined: Vec<u8> = recs.into_iter().flat_map(|r| r.content).collect();
        assert_eq!(joined, payload);
    }

    #[test]
    fn write_empty_stream() {
        let writer = RecordWriter::new(Cursor::new(Vec::new()));
        writer.write_stream_bytes(fcgi::RecordType::Params, 1, &[])
            .now_or_never().expect("cursor writes never block")
            .expect("write succeeds");
        let out = into_output(writer);
        assert_eq!(out, wire(fcgi::RecordType::Params, 1, &[]));
    }

    #[test]
    fn write_large_params() {
        let cookie: Vec<u8> = std::iter::repeat_with(|| fastrand::u8(b'a'..=b'z')).take(70_000).collect();
        let env: crate::cgi::Environment = [
            ("HTTP_COOKIE", cookie.as_slice()),
            ("REQUEST_METHOD", b"GET".as_slice()),
            ("SCRIPT_FILENAME", b"/srv/www/index.php".as_slice()),
        ].into_iter().collect();
        let params = env.encode().expect("pairs are encodable");
        assert!(params.len() > fcgi::MAX_CONTENT_LEN);

        let writer = RecordWriter::new(Cursor::new(Vec::new()));
        writer.write_stream_bytes(fcgi::RecordType::Params, 4, &params)
            .now_or_never().expect("cursor writes never block")
            .expect("write succeeds");

        let out = into_output(writer);
        let recs = read_all(&out).now_or_never().expect("slice read");
        let lens: Vec<_> = recs.iter().map(|r| r.content.len()).collect();
        assert_eq!(lens, [fcgi::MAX_CONTENT_LEN, params.len() - fcgi::MAX_CONTENT_LEN, 0]);
        assert!(recs.iter().all(|r| r.record_type() == Ok(fcgi::RecordType::Params)));

        let joined: Vec<u8> = recs.into_iter().flat_map(|r| r.content).collect();
        let pairs: Vec<_> = fcgi::nv::NVIter::new(&joined).collect();
        assert_eq!(pairs, [
            (&b"HTTP_COOKIE"[..], cookie.as_slice()),
            (&b"REQUEST_METHOD"[..], &b"GET"[..]),
            (&b"SCRIPT_FILENAME"[..], &b"/srv/www/index.php"[..]),
        ]);
    }

    #[test]
    fn body_error() {
        struct Failing;
        impl AsyncRead for Failing {
            fn poll_read(
                self: std::pin::Pin<&mut Self>,
                _: &mut std::task::Context,
                _: &mut [u8],
            ) -> std::task::Poll<io::Result<usize>> {
                std::task::Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()))
            }
        }

        let writer = RecordWriter::new(Cursor::new(Vec::new()));
        let res = writer.write_stream(fcgi::RecordType::Stdin, 1, Failing)
            .now_or_never().expect("cursor writes never block");
        assert!(matches!(res, Err(Error::Body(_))));
    }
}
