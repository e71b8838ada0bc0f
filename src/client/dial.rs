use std::fmt;
use std::io;
use std::pin::Pin;
use std::str::FromStr;
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncReadCompatExt};
#[cfg(unix)]
use {std::path::PathBuf, tokio::net::UnixStream};

use super::Error;


/// Returned when parsing an empty or unsupported [`Upstream`] address.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid FastCGI upstream address {0:?}")]
pub struct InvalidUpstream(String);


/// The address of a FastCGI responder.
///
/// Parsed from strings of the form `unix:/path/to/socket`,
/// `unix:///path/to/socket`, `tcp://host:port` or plain `host:port`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum Upstream {
    /// A `host:port` pair, resolved when connecting.
    Tcp(String),
    /// The path of a Unix domain socket.
    #[cfg(unix)]
    Unix(PathBuf),
}

impl Upstream {
    /// Builds an [`Upstream`] from a network name and an address, as in
    /// `("unix", "/run/php-fpm.sock")` or `("tcp", "127.0.0.1:9000")`.
    ///
    /// Every network other than `unix` is treated as TCP.
    ///
    /// # Errors
    /// Returns an error if `addr` is empty, or for `unix` on platforms
    /// without Unix domain sockets.
    pub fn from_network(network: &str, addr: &str) -> Result<Self, InvalidUpstream> {
        if addr.is_empty() {
            return Err(InvalidUpstream(addr.into()));
        }
        match network {
            #[cfg(unix)]
            "unix" => Ok(Self::Unix(addr.into())),
            #[cfg(not(unix))]
            "unix" => Err(InvalidUpstream(addr.into())),
            _ => Ok(Self::Tcp(addr.into())),
        }
    }

    /// Connects to the responder, giving up after `timeout`.
    ///
    /// TCP connections have `TCP_NODELAY` set.
    ///
    /// # Errors
    /// Returns [`Error::Dial`] if the connection fails and
    /// [`Error::DialTimeout`] if it is not established in time.
    pub async fn connect(&self, timeout: Duration) -> Result<Transport, Error> {
        match tokio::time::timeout(timeout, self.open()).await {
            Ok(Ok(t)) => {
                tracing::debug!(upstream = %self, "connected to FastCGI responder");
                Ok(t)
            },
            Ok(Err(source)) => Err(Error::Dial { upstream: self.clone(), source }),
            Err(_) => Err(Error::DialTimeout { upstream: self.clone() }),
        }
    }

    async fn open(&self) -> io::Result<Transport> {
        match self {
            Self::Tcp(addr) => {
                let stream = TcpStream::connect(addr.as_str()).await?;
                stream.set_nodelay(true)?;
                Ok(Transport::Tcp(stream.compat()))
            },
            #[cfg(unix)]
            Self::Unix(path) => Ok(Transport::Unix(UnixStream::connect(path).await?.compat())),
        }
    }
}

impl FromStr for Upstream {
    type Err = InvalidUpstream;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(path) = s.strip_prefix("unix:") {
            // unix:///path keeps its leading slash
            let path = path.strip_prefix("//").unwrap_or(path);
            return Self::from_network("unix", path).map_err(|_| InvalidUpstream(s.into()));
        }
        let addr = s.strip_prefix("tcp://").unwrap_or(s);
        Self::from_network("tcp", addr).map_err(|_| InvalidUpstream(s.into()))
    }
}

impl fmt::Display for Upstream {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Tcp(addr) => write!(f, "tcp://{addr}"),
            #[cfg(unix)]
            Self::Unix(path) => write!(f, "unix:{}", path.display()),
        }
    }
}


/// A connection to a FastCGI responder, as returned by `Upstream::connect`.
#[derive(Debug)]
#[non_exhaustive]
pub enum Transport {
    Tcp(Compat<TcpStream>),
    #[cfg(unix)]
    Unix(Compat<UnixStream>),
}

impl AsyncRead for Transport {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context, buf: &mut [u8]) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Tcp(s) => Pin::new(s).poll_read(cx, buf),
            #[cfg(unix)]
            Self::Unix(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Transport {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context, buf: &[u8]) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Tcp(s) => Pin::new(s).poll_write(cx, buf),
            #[cfg(unix)]
            Self::Unix(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context,
        bufs: &[io::IoSlice],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Tcp(s) => Pin::new(s).poll_write_vectored(cx, bufs),
            #[cfg(unix)]
            Self::Unix(s) => Pin::new(s).poll_write_vectored(cx, bufs),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(s) => Pin::new(s).poll_flush(cx),
            #[cfg(unix)]
            Self::Unix(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_close(self: Pin<&mut Self>, cx: &mut Context) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(s) => Pin::new(s).poll_close(cx),
            #[cfg(unix)]
            Self::Unix(s) => Pin::new(s).poll_close(cx),
        }
    }
}


#[cfg(test)]
mod tests {
    use futures_util::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use crate::cgi::{RequestInfo, ScriptInfo};
    use crate::client::io::read_record;
    use crate::client::{Client, Config, RequestIdPool};
    use crate::protocol as fcgi;
    use super::*;

    #[test]
    fn parse() -> Result<(), InvalidUpstream> {
        assert_eq!("127.0.0.1:9000".parse::<Upstream>()?, Upstream::Tcp("127.0.0.1:9000".into()));
        assert_eq!("tcp://php:9000".parse::<Upstream>()?, Upstream::Tcp("php:9000".into()));
        assert_eq!(Upstream::from_network("tcp6", "[::1]:9000")?, Upstream::Tcp("[::1]:9000".into()));
        assert!("".parse::<Upstream>().is_err());
        assert!("tcp://".parse::<Upstream>().is_err());

        #[cfg(unix)]
        {
            let sock = Upstream::Unix("/run/php-fpm.sock".into());
            assert_eq!("unix:/run/php-fpm.sock".parse::<Upstream>()?, sock);
            assert_eq!("unix:///run/php-fpm.sock".parse::<Upstream>()?, sock);
            assert_eq!(Upstream::from_network("unix", "/run/php-fpm.sock")?, sock);
            assert_eq!(sock.to_string(), "unix:/run/php-fpm.sock");
            assert!("unix:".parse::<Upstream>().is_err());
        }
        assert_eq!(Upstream::Tcp("php:9000".into()).to_string(), "tcp://php:9000");
        Ok(())
    }

    #[tokio::test]
    async fn dial_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind succeeds");
        let addr = listener.local_addr().expect("bound address");
        drop(listener);

        let upstream = Upstream::Tcp(addr.to_string());
        let res = upstream.connect(Duration::from_secs(3)).await;
        assert!(matches!(res, Err(Error::Dial { .. })), "{res:?}");
    }

    /// Answers one request with a fixed document and returns the records it
    /// received.
    async fn serve_one<T: AsyncRead + AsyncWrite + Unpin>(conn: T) -> Vec<fcgi::Record> {
        let (mut r, mut w) = conn.split();
        let mut seen = Vec::new();
        while let Some(rec) = read_record(&mut r).await.expect("valid request records") {
            let id = rec.header.request_id;
            let stdin_end = rec.record_type() == Ok(fcgi::RecordType::Stdin) && rec.content.is_empty();
            seen.push(rec);
            if stdin_end {
                let end = fcgi::body::EndRequest { app_status: 0, protocol_status: fcgi::ProtocolStatus::RequestComplete };
                let mut reply = fcgi::Record::encode(fcgi::RecordType::Stdout, id, b"Content-Type: text/plain\r\n\r\nposted")
                    .expect("content fits into a record");
                reply.extend(fcgi::Record::encode(fcgi::RecordType::EndRequest, id, &end.to_bytes())
                    .expect("content fits into a record"));
                w.write_all(&reply).await.expect("reply succeeds");
                break;
            }
        }
        seen
    }

    #[tokio::test]
    async fn client_over_tcp() -> Result<(), Error> {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind succeeds");
        let addr = listener.local_addr().expect("bound address");
        let server = tokio::spawn(async move {
            let (conn, _) = listener.accept().await.expect("accept succeeds");
            serve_one(conn.compat()).await
        });

        let pool = RequestIdPool::new(16);
        let client = Client::with_pool(Upstream::Tcp(addr.to_string()), Config::default(), pool.clone());
        let req = RequestInfo::new("POST", "/form.php?x=1", ScriptInfo::new("/srv/www", "/form.php"))
            .header("Content-Length", "4")
            .header("Content-Type", "text/plain");

        let resp = client.request(&req, &b"data"[..]).await?;
        assert!(resp.is_complete());
        assert!(resp.body.starts_with(b"Content-Type: text/plain\r\n\r\nposted"));
        assert_eq!(pool.in_use(), 0);

        let seen = server.await.expect("server finished");
        let stdin: Vec<u8> = seen.iter()
            .filter(|r| r.record_type() == Ok(fcgi::RecordType::Stdin))
            .flat_map(|r| r.content.iter().copied())
            .collect();
        assert_eq!(stdin, b"data");
        Ok(())
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn client_over_unix() -> Result<(), Error> {
        let path = std::env::temp_dir().join(format!("fastcgi-client-{}.sock", fastrand::u64(..)));
        let listener = tokio::net::UnixListener::bind(&path).expect("bind succeeds");
        let server = tokio::spawn(async move {
            let (conn, _) = listener.accept().await.expect("accept succeeds");
            serve_one(conn.compat()).await
        });

        let upstream: Upstream = format!("unix:{}", path.display()).parse().expect("valid address");
        let client = Client::new(upstream, Config::default().with_pool_size(1));
        let req = RequestInfo::new("PUT", "/upload", ScriptInfo::new("/srv/www", "/upload.php"))
            .header("Content-Length", "0");
        let resp = client.request(&req, futures_util::io::empty()).await?;
        assert!(resp.is_complete());

        server.await.expect("server finished");
        std::fs::remove_file(&path).expect("socket file removed");
        Ok(())
    }
}
