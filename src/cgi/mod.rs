use std::collections::btree_map::{self, BTreeMap};
use std::fmt;
use std::net::{IpAddr, SocketAddr};

use compact_str::CompactString;
use smallvec::SmallVec;

use crate::protocol as fcgi;

mod intern;
/// Conversion of CGI/1.1 response output into [`http::Response`] values.
#[cfg(feature = "http")]
pub mod response;

pub use intern::StaticVarName;
pub use StaticVarName::*;


const SMALLVEC_BASE_SIZE: usize = std::mem::size_of::<SmallVec<[u8; 0]>>();
// Maximum number of inline bytes before SmallVec exceeds SMALLVEC_BASE_SIZE.
const INLINE_BYTES: usize = SMALLVEC_BASE_SIZE - std::mem::size_of::<usize>();
type SmallBytes = SmallVec<[u8; INLINE_BYTES]>;

/// The `SERVER_SOFTWARE` value used by [`ScriptInfo::new`].
pub const DEFAULT_SERVER_SOFTWARE: &str = concat!("fastcgi-client/", env!("CARGO_PKG_VERSION"));


/// Maps an HTTP header name to its CGI/1.1 meta-variable name.
///
/// The name is upper-cased, `-` becomes `_`, and the result is prefixed
/// with `HTTP_`. For example, `X-Forwarded-For` maps to
/// `HTTP_X_FORWARDED_FOR`.
#[must_use]
pub fn header_var_name(name: &str) -> CompactString {
    let mut var = CompactString::with_capacity(5 + name.len());
    var.push_str("HTTP_");
    var.extend(name.chars().map(|c| if c == '-' { '_' } else { c.to_ascii_uppercase() }));
    var
}


/// Server-side metadata about the script that handles a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptInfo {
    /// The document root the script lives in.
    pub document_root: String,
    /// The URI path of the script, such as `/index.php`.
    pub script_name: String,
    /// The file system path of the script.
    pub script_filename: String,
    /// Extra path information following the script name.
    pub path_info: Option<String>,
    /// The host name of the server that received the request.
    pub server_name: String,
    /// The port the request was received on.
    pub server_port: u16,
    /// The address the request was received on, if known.
    pub server_addr: Option<IpAddr>,
    /// The name and version of the server forwarding the request.
    pub server_software: String,
    /// Whether the request was received over TLS.
    pub https: bool,
}

impl ScriptInfo {
    /// Creates a [`ScriptInfo`] for `script_name` below `document_root`.
    ///
    /// `script_filename` is the concatenation of both. The server is
    /// described as `localhost:80` until changed.
    #[must_use]
    pub fn new(document_root: impl Into<String>, script_name: impl Into<String>) -> Self {
        let document_root = document_root.into();
        let script_name = script_name.into();
        let script_filename = format!("{}{script_name}", document_root.trim_end_matches('/'));
        Self {
            document_root, script_name, script_filename,
            path_info: None,
            server_name: "localhost".into(),
            server_port: 80,
            server_addr: None,
            server_software: DEFAULT_SERVER_SOFTWARE.into(),
            https: false,
        }
    }
}


/// An inbound HTTP request, as far as the FastCGI client is concerned.
///
/// The client only ever reads from a [`RequestInfo`]. Reading the request
/// line and headers off the original connection is up to the caller.
#[derive(Debug, Clone)]
pub struct RequestInfo {
    /// The HTTP method, such as `GET` or `POST`.
    pub method: CompactString,
    /// The request target: the URI path with an optional query string.
    pub uri: String,
    /// The HTTP protocol version, such as `HTTP/1.1`.
    pub protocol: CompactString,
    /// The request headers in the order they were received.
    pub headers: Vec<(CompactString, Vec<u8>)>,
    /// The resolved length of the request body, if known. The
    /// `Content-Length` header is used verbatim otherwise.
    pub content_length: Option<u64>,
    /// The address of the client that sent the request.
    pub remote_addr: Option<SocketAddr>,
    /// Whether the client asked for a persistent connection.
    pub keep_alive: bool,
    /// Metadata about the script handling the request.
    pub script: ScriptInfo,
}

impl RequestInfo {
    /// Creates an `HTTP/1.1` [`RequestInfo`] without headers.
    #[must_use]
    pub fn new(method: &str, uri: impl Into<String>, script: ScriptInfo) -> Self {
        Self {
            method: method.into(),
            uri: uri.into(),
            protocol: "HTTP/1.1".into(),
            headers: Vec::new(),
            content_length: None,
            remote_addr: None,
            keep_alive: false,
            script,
        }
    }

    /// Appends a header to the request.
    #[must_use]
    pub fn header(mut self, name: &str, value: impl Into<Vec<u8>>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Returns the path component of the request target.
    #[must_use]
    pub fn path(&self) -> &str {
        self.uri.split_once('?').map_or(self.uri.as_str(), |(p, _)| p)
    }

    /// Returns the query string of the request target, without the `?`.
    #[must_use]
    pub fn query(&self) -> &str {
        self.uri.split_once('?').map_or("", |(_, q)| q)
    }

    /// Returns the first value of the named header, compared
    /// case-insensitively.
    #[must_use]
    pub fn header_value(&self, name: &str) -> Option<&[u8]> {
        self.headers.iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| &v[..])
    }
}

#[cfg(feature = "http")]
impl RequestInfo {
    /// Describes the head of an [`http::Request`].
    ///
    /// Persistent connections are derived from the HTTP version and the
    /// `Connection` header.
    #[must_use]
    pub fn from_http(
        parts: &http::request::Parts,
        remote_addr: Option<SocketAddr>,
        script: ScriptInfo,
    ) -> Self {
        use http::header::CONNECTION;
        use http::Version;

        let uri = parts.uri.path_and_query().map_or("/", http::uri::PathAndQuery::as_str);
        let connection = parts.headers.get(CONNECTION).map(http::HeaderValue::as_bytes);
        let keep_alive = if parts.version <= Version::HTTP_10 {
            connection.is_some_and(|c| c.eq_ignore_ascii_case(b"keep-alive"))
        } else {
            !connection.is_some_and(|c| c.eq_ignore_ascii_case(b"close"))
        };

        Self {
            method: parts.method.as_str().into(),
            uri: uri.into(),
            protocol: CompactString::from(format!("{:?}", parts.version)),
            headers: parts.headers.iter()
                .map(|(n, v)| (n.as_str().into(), v.as_bytes().to_vec()))
                .collect(),
            content_length: None,
            remote_addr,
            keep_alive,
            script,
        }
    }
}


/// The CGI/1.1 environment sent in a request's `Params` stream.
///
/// Variables are kept sorted by name, so iteration and encoding are
/// deterministic. Names are unique; inserting an existing name replaces
/// its value.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Environment {
    vars: BTreeMap<CompactString, SmallBytes>,
}

impl Environment {
    /// Creates an empty [`Environment`].
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the environment for a request.
    ///
    /// Every header becomes an `HTTP_*` variable named by
    /// [`header_var_name`]. Repeated headers are joined with `", "`.
    #[must_use]
    pub fn from_request(req: &RequestInfo) -> Self {
        let mut env = Self::new();
        for (name, value) in &req.headers {
            env.append_header(name, value);
        }

        let script = &req.script;
        env.set(GATEWAY_INTERFACE, "CGI/1.1");
        env.set(SERVER_SOFTWARE, &script.server_software);
        env.set(SERVER_NAME, &script.server_name);
        env.set(SERVER_PORT, script.server_port.to_string());
        if let Some(addr) = script.server_addr {
            env.set(SERVER_ADDR, addr.to_string());
        }
        env.set(SERVER_PROTOCOL, req.protocol.as_str());

        env.set(REQUEST_METHOD, req.method.as_str());
        env.set(REQUEST_URI, &req.uri);
        env.set(DOCUMENT_URI, req.path());
        env.set(QUERY_STRING, req.query());
        env.set(DOCUMENT_ROOT, &script.document_root);
        env.set(SCRIPT_NAME, &script.script_name);
        env.set(SCRIPT_FILENAME, &script.script_filename);
        if let Some(path_info) = &script.path_info {
            env.set(PATH_INFO, path_info);
        }

        if script.https {
            env.set(REQUEST_SCHEME, "https");
            env.set(HTTPS, "on");
        } else {
            env.set(REQUEST_SCHEME, "http");
        }
        if let Some(remote) = req.remote_addr {
            env.set(REMOTE_ADDR, remote.ip().to_string());
            env.set(REMOTE_PORT, remote.port().to_string());
        }
        env.set(REDIRECT_STATUS, "200");

        match (req.content_length, req.header_value("content-length")) {
            (Some(len), _) => env.set(CONTENT_LENGTH, len.to_string()),
            (None, Some(raw)) => env.set(CONTENT_LENGTH, raw),
            (None, None) => {},
        }
        if let Some(ctype) = req.header_value("content-type") {
            env.set(CONTENT_TYPE, ctype);
        }
        env
    }

    /// Inserts a variable, returning `true` if it replaced an existing value.
    pub fn insert(&mut self, name: impl Into<CompactString>, value: impl AsRef<[u8]>) -> bool {
        self.vars.insert(name.into(), SmallBytes::from_slice(value.as_ref())).is_some()
    }

    #[inline]
    fn set(&mut self, name: StaticVarName, value: impl AsRef<[u8]>) {
        self.insert(name.as_str(), value);
    }

    fn append_header(&mut self, name: &str, value: &[u8]) {
        match self.vars.entry(header_var_name(name)) {
            btree_map::Entry::Occupied(mut e) => {
                let joined = e.get_mut();
                joined.extend_from_slice(b", ");
                joined.extend_from_slice(value);
            },
            btree_map::Entry::Vacant(e) => {
                e.insert(SmallBytes::from_slice(value));
            },
        }
    }

    /// Removes a variable, returning whether it was present.
    pub fn remove(&mut self, name: &str) -> bool {
        self.vars.remove(name).is_some()
    }

    /// Retrieves the value stored for the variable name, if there is one.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.vars.get(name).map(AsRef::as_ref)
    }

    /// Attempts to retrieve the string value stored for the variable name.
    ///
    /// Returns [`None`] if there is no value *or if it is not valid UTF-8*.
    #[must_use]
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(|v| std::str::from_utf8(v).ok())
    }

    /// Returns the number of variables.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    /// Tests whether no variables are set.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Returns an iterator over all variables, sorted by name.
    pub fn iter(&self) -> impl ExactSizeIterator<Item = (&str, &[u8])> + Clone + '_ {
        self.vars.iter().map(|(k, v)| (k.as_str(), &v[..]))
    }

    /// Returns the number of request body bytes announced by
    /// `CONTENT_LENGTH`.
    ///
    /// A missing, unparsable or non-positive value counts as 0.
    #[must_use]
    pub fn content_length(&self) -> u64 {
        self.get_str(CONTENT_LENGTH.as_str())
            .and_then(|s| s.trim().parse::<i64>().ok())
            .and_then(|n| u64::try_from(n).ok())
            .unwrap_or(0)
    }

    /// Tests whether `REQUEST_METHOD` permits a request body, which holds
    /// for every method except `GET` and `HEAD`.
    #[must_use]
    pub fn expects_body(&self) -> bool {
        !matches!(self.get(REQUEST_METHOD.as_str()), Some(b"GET" | b"HEAD"))
    }

    /// Encodes all variables as FastCGI name-value pairs.
    ///
    /// # Errors
    /// Returns an error if a name or value is too long to be encoded.
    pub fn encode(&self) -> Result<Vec<u8>, fcgi::Error> {
        fcgi::nv::encode_all(self.iter().map(|(k, v)| (k.as_bytes(), v)))
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_map()
            .entries(self.iter().map(|(k, v)| (k, String::from_utf8_lossy(v))))
            .finish()
    }
}

impl<K, V> FromIterator<(K, V)> for Environment
where
    K: Into<CompactString>,
    V: AsRef<[u8]>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut env = Self::new();
        env.extend(iter);
        env
    }
}

impl<K, V> Extend<(K, V)> for Environment
where
    K: Into<CompactString>,
    V: AsRef<[u8]>,
{
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (k, v) in iter {
            self.insert(k, v);
        }
    }
}
