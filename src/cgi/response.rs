use http::header::{HeaderName, HeaderValue, LOCATION};
use http::StatusCode;


/// Errors from interpreting a responder's output as a CGI/1.1 response.
#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The output ended before the empty line that terminates the headers.
    #[error("CGI response ends inside its header block")]
    MissingHeaderEnd,
    /// A header line has no `:` separator or an invalid name or value.
    #[error("CGI response contains a malformed header line")]
    InvalidHeader,
    /// The `Status` header does not start with a 3-digit status code.
    #[error("CGI response carries an invalid Status header")]
    InvalidStatus,
}


/// Finds the end of the header block, returning the offsets of the
/// terminating empty line and of the first body byte.
fn header_end(raw: &[u8]) -> Option<(usize, usize)> {
    let mut line_start = 0;
    while let Some(nl) = raw[line_start..].iter().position(|&b| b == b'\n') {
        let line_end = line_start + nl;
        let line = &raw[line_start..line_end];
        if line.is_empty() || line == b"\r" {
            return Some((line_start, line_end + 1));
        }
        line_start = line_end + 1;
    }
    None
}

/// Parses the value of a `Status` header, such as `404 Not Found`.
fn parse_status(value: &[u8]) -> Result<StatusCode, Error> {
    let code = value.get(..3).ok_or(Error::InvalidStatus)?;
    StatusCode::from_bytes(code).map_err(|_| Error::InvalidStatus)
}

/// Converts the output of a responder into an [`http::Response`].
///
/// CGI/1.1 responses start with a block of header lines separated by `\n`
/// or `\r\n` and terminated by an empty line. The `Status` header sets the
/// response status and is not copied into the headers. Without it, a
/// `Location` header implies `302 Found` and anything else `200 OK`.
///
/// # Errors
/// Returns an error if the header block is incomplete or malformed.
pub fn into_http(mut raw: Vec<u8>) -> Result<http::Response<Vec<u8>>, Error> {
    let (head_len, body_start) = header_end(&raw).ok_or(Error::MissingHeaderEnd)?;
    let mut builder = http::Response::builder();
    let mut status = None;

    for line in raw[..head_len].split(|&b| b == b'\n') {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.is_empty() {
            continue;
        }
        let sep = line.iter().position(|&b| b == b':').ok_or(Error::InvalidHeader)?;
        let name = HeaderName::from_bytes(&line[..sep]).map_err(|_| Error::InvalidHeader)?;
        let value = line[sep + 1..].trim_ascii();

        if name.as_str() == "status" {
            status = Some(parse_status(value)?);
            continue;
        }
        if name == LOCATION && status.is_none() {
            status = Some(StatusCode::FOUND);
        }
        let value = HeaderValue::from_bytes(value).map_err(|_| Error::InvalidHeader)?;
        builder = builder.header(name, value);
    }

    let body = raw.split_off(body_start);
    builder
        .status(status.unwrap_or(StatusCode::OK))
        .body(body)
        .map_err(|_| Error::InvalidHeader)
}
