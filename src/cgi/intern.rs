use std::fmt;


/// A CGI/1.1 meta-variable set by [`Environment::from_request`].
///
/// The names follow RFC 3875, Section 4.1, plus the Apache and nginx
/// additions that PHP-FPM and similar responders rely on. The variants are
/// exposed as constants on the [`cgi`](crate::cgi) module.
///
/// [`Environment::from_request`]: super::Environment::from_request
#[allow(missing_docs, non_camel_case_types, clippy::upper_case_acronyms)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, strum::IntoStaticStr)]
#[cfg_attr(test, derive(strum::EnumIter))]
#[non_exhaustive]
pub enum StaticVarName {
    // From RFC 3875, Section 4.1 (CGI/1.1)
    CONTENT_LENGTH,
    CONTENT_TYPE,
    GATEWAY_INTERFACE,
    PATH_INFO,
    QUERY_STRING,
    REMOTE_ADDR,
    REMOTE_PORT,
    REQUEST_METHOD,
    SCRIPT_NAME,
    SERVER_NAME,
    SERVER_PORT,
    SERVER_PROTOCOL,
    SERVER_SOFTWARE,

    // From Apache's variables
    REQUEST_SCHEME,
    REQUEST_URI,
    DOCUMENT_URI,
    SCRIPT_FILENAME,
    DOCUMENT_ROOT,
    HTTPS,

    // From nginx/conf/fastcgi_params
    SERVER_ADDR,
    REDIRECT_STATUS,
}

impl StaticVarName {
    /// Returns the variable name as it appears in the `Params` stream.
    #[inline]
    #[must_use]
    pub fn as_str(self) -> &'static str {
        self.into()
    }
}

impl AsRef<str> for StaticVarName {
    #[inline]
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Debug for StaticVarName {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(self.as_str(), f)
    }
}

impl fmt::Display for StaticVarName {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}


#[cfg(test)]
mod tests {
    use strum::IntoEnumIterator;
    use super::*;

    #[test]
    fn names_are_upper_snake() {
        for v in StaticVarName::iter() {
            let s = v.as_str();
            assert!(s.bytes().all(|b| b.is_ascii_uppercase() || b == b'_'), "{s}");
        }
        assert_eq!(StaticVarName::SCRIPT_FILENAME.to_string(), "SCRIPT_FILENAME");
    }
}
