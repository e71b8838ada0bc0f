/// Types representing the bodies of fixed-size FastCGI records.
pub mod body;
mod fields;
/// An encoder and decoder for FastCGI name-value pairs.
pub mod nv;
/// The 1- or 4-byte length prefix used by FastCGI name-value pairs.
pub mod varint;

pub use fields::*;


/// The fixed FastCGI request ID for management records.
pub const FCGI_NULL_REQUEST_ID: u16 = 0;

/// The largest payload a single FastCGI record can carry.
pub const MAX_CONTENT_LEN: usize = u16::MAX as usize;


/// Error types that may occur while processing FastCGI protocol elements.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The FastCGI version field specifies an unknown version identifier.
    #[error("unknown FastCGI protocol version {0}")]
    UnknownVersion(u8),
    /// The FastCGI record type field specifies an unknown record type.
    #[error("unknown FastCGI record type {0}")]
    UnknownRecordType(u8),
    /// The FastCGI request role field specifies an unknown role identifier.
    #[error("unknown FastCGI role {0}")]
    UnknownRole(u16),
    /// The FastCGI request flags contain at least one unknown flag bit.
    #[error("unknown FastCGI request flags {0:#010b}")]
    UnknownFlags(u8),
    /// The FastCGI response protocol status specifies an unknown status.
    #[error("unknown FastCGI protocol status {0}")]
    UnknownStatus(u8),

    /// The input value is too large to be encoded as a FastCGI VarInt.
    #[error("input is too large to be encoded as a FastCGI VarInt")]
    InvalidVarInt,
    /// A record payload exceeds [`MAX_CONTENT_LEN`].
    #[error("record content of {0} bytes exceeds the FastCGI limit of {MAX_CONTENT_LEN}")]
    ContentTooLong(usize),
    /// A fixed-size record body is shorter than its wire format.
    #[error("FastCGI record body has {actual} bytes, expected at least {expected}")]
    ShortBody { expected: usize, actual: usize },
}


/// Returns the amount of padding FastCGI recommends after `content_length`
/// bytes of payload.
///
/// The result is always below 8 and makes `content_length + padding` a
/// multiple of 8.
#[inline]
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub const fn padding_for(content_length: u16) -> u8 {
    ((8 - content_length % 8) % 8) as u8
}


/// A FastCGI record header.
///
/// The record type is kept as its raw wire value so that records of unknown
/// type can still be framed and skipped. Use `RecordHeader::record_type` to
/// validate it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordHeader {
    /// The FastCGI version of this record.
    pub version: Version,
    /// The raw type of this record, defining its payload.
    pub rtype: u8,
    /// The ID of the request this record belongs to.
    pub request_id: u16,
    /// The length of this record's payload.
    pub content_length: u16,
    /// The amount of padding following this record.
    pub padding_length: u8,
}

impl RecordHeader {
    /// The number of bytes in the wire format of a [`RecordHeader`].
    pub const LEN: usize = 8;

    /// Creates a [`RecordHeader`] with [`Version::V1`] for `content_length`
    /// bytes of payload and the matching amount of padding.
    #[inline]
    #[must_use]
    pub fn new(rtype: RecordType, request_id: u16, content_length: u16) -> Self {
        Self {
            version: Version::V1,
            rtype: rtype.into(),
            request_id,
            content_length,
            padding_length: padding_for(content_length),
        }
    }

    /// Validates the raw record type of this header.
    ///
    /// # Errors
    /// Returns an error if the type is not defined by FastCGI version 1.
    #[inline]
    pub fn record_type(self) -> Result<RecordType, Error> {
        RecordType::try_from(self.rtype)
    }

    /// Tests whether this [`RecordHeader`] belongs to a management record.
    #[inline]
    #[must_use]
    pub fn is_management(self) -> bool {
        self.request_id == FCGI_NULL_REQUEST_ID
    }

    /// Returns the number of bytes following the header on the wire.
    #[inline]
    #[must_use]
    pub fn body_len(self) -> usize {
        usize::from(self.content_length) + usize::from(self.padding_length)
    }

    /// Returns a slice of `self.padding_length` zero bytes to be used as padding.
    #[inline]
    #[must_use]
    pub fn padding_bytes(self) -> &'static [u8] {
        static PADDING: [u8; u8::MAX as usize] = [0; u8::MAX as usize];
        &PADDING[..self.padding_length.into()]
    }

    /// Parses the input bytes into a FastCGI [`RecordHeader`].
    ///
    /// The reserved byte is ignored and the record type is not validated.
    ///
    /// # Errors
    /// Returns an error if the version is unknown. Without a known version,
    /// the rest of the record cannot be framed.
    pub fn from_bytes(data: [u8; Self::LEN]) -> Result<Self, Error> {
        Ok(Self {
            version: Version::try_from(data[0])?,
            rtype: data[1],
            request_id: u16::from_be_bytes([data[2], data[3]]),
            content_length: u16::from_be_bytes([data[4], data[5]]),
            padding_length: data[6],
        })
    }

    /// Encodes the [`RecordHeader`] into its binary wire format.
    #[inline]
    #[must_use]
    pub fn to_bytes(self) -> [u8; Self::LEN] {
        let mut buf = [0; Self::LEN];
        buf[0] = self.version.into();
        buf[1] = self.rtype;
        buf[2..4].copy_from_slice(&self.request_id.to_be_bytes());
        buf[4..6].copy_from_slice(&self.content_length.to_be_bytes());
        buf[6] = self.padding_length;
        buf
    }
}


/// A complete FastCGI record with its payload. Padding is not retained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// The header this record was framed with.
    pub header: RecordHeader,
    /// The payload of the record, exactly `header.content_length` bytes long.
    pub content: Vec<u8>,
}

impl Record {
    /// Encodes a record of type `rtype` carrying `content` into a freshly
    /// allocated buffer, including its header and padding.
    ///
    /// # Errors
    /// Returns an error if `content` is longer than [`MAX_CONTENT_LEN`].
    pub fn encode(rtype: RecordType, request_id: u16, content: &[u8]) -> Result<Vec<u8>, Error> {
        Self::encode_framed(rtype, request_id, content).map(|(_, buf)| buf)
    }

    /// Like `Record::encode`, but also returns the header the record was
    /// framed with.
    ///
    /// # Errors
    /// Returns an error if `content` is longer than [`MAX_CONTENT_LEN`].
    pub fn encode_framed(
        rtype: RecordType,
        request_id: u16,
        content: &[u8],
    ) -> Result<(RecordHeader, Vec<u8>), Error> {
        let len = u16::try_from(content.len())
            .map_err(|_| Error::ContentTooLong(content.len()))?;
        let head = RecordHeader::new(rtype, request_id, len);

        let mut buf = Vec::with_capacity(RecordHeader::LEN + head.body_len());
        buf.extend_from_slice(&head.to_bytes());
        buf.extend_from_slice(content);
        buf.extend_from_slice(head.padding_bytes());
        Ok((head, buf))
    }

    /// Validates the record type of this record.
    ///
    /// # Errors
    /// Returns an error if the type is not defined by FastCGI version 1.
    #[inline]
    pub fn record_type(&self) -> Result<RecordType, Error> {
        self.header.record_type()
    }
}


#[cfg(test)]
mod tests {
    use std::iter::repeat_with;
    use strum::IntoEnumIterator;
    use super::*;

    #[test]
    fn header_roundtrip() -> Result<(), Error> {
        for rtype in RecordType::iter() {
            let orig = RecordHeader {
                version: Version::V1, rtype: rtype.into(), request_id: fastrand::u16(..),
                content_length: fastrand::u16(..), padding_length: fastrand::u8(..),
            };
            let rt = RecordHeader::from_bytes(orig.to_bytes())?;
            assert_eq!(orig, rt);
            assert_eq!(rt.record_type()?, rtype);
        }
        Ok(())
    }

    #[test]
    fn header_wire_layout() -> Result<(), Error> {
        const GOOD: [u8; 8] = [0x01, 0x06, 0x46, 0xaf, 0x32, 0xa4, 0x04, 0xee];
        let head = RecordHeader::from_bytes(GOOD)?;
        assert_eq!(head.version, Version::V1);
        assert_eq!(head.record_type()?, RecordType::Stdout);
        assert_eq!(head.request_id, 0x46af);
        assert_eq!(head.content_length, 0x32a4);
        assert_eq!(head.padding_length, 0x04);

        // Reserved byte is ignored on read and zeroed on write
        assert_eq!(head.to_bytes()[..7], GOOD[..7]);
        assert_eq!(head.to_bytes()[7], 0);
        Ok(())
    }

    #[test]
    fn header_unknown_values() {
        const BAD_VERSION: [u8; 8] = [0xe5, 0x03, 0xc8, 0xf4, 0xe0, 0xa3, 0x76, 0xa8];
        let bad_version = RecordHeader::from_bytes(BAD_VERSION);
        assert!(matches!(bad_version, Err(Error::UnknownVersion(0xe5))));

        // Unknown types still frame, but don't validate
        const BAD_RTYPE: [u8; 8] = [0x01, 0x7a, 0xdb, 0x58, 0x1b, 0x4b, 0x87, 0x6b];
        let head = RecordHeader::from_bytes(BAD_RTYPE).expect("unknown rtype should frame");
        assert!(matches!(head.record_type(), Err(Error::UnknownRecordType(0x7a))));
        assert_eq!(head.body_len(), 0x1b4b + 0x87);
    }

    #[test]
    fn padding_alignment() {
        for len in 0..=u16::MAX {
            let pad = padding_for(len);
            assert!(pad < 8);
            let total = RecordHeader::LEN + usize::from(len) + usize::from(pad);
            assert_eq!(total % 8, 0, "record of length {len} is not 8-byte aligned");
        }
        assert_eq!(padding_for(0), 0);
        assert_eq!(padding_for(1), 7);
        assert_eq!(padding_for(8), 0);
        assert_eq!(padding_for(u16::MAX), 1);
    }

    #[test]
    fn padding_bytes_zeroed() {
        for padding_length in [0, 1, 7, 68, u8::MAX] {
            let mut head = RecordHeader::new(RecordType::Stdin, 1965, 4982);
            head.padding_length = padding_length;
            assert_eq!(head.padding_bytes().len(), padding_length.into());
            assert!(head.padding_bytes().iter().all(|&b| b == 0));
        }
    }

    #[test]
    fn record_encode() -> Result<(), Error> {
        for len in [0usize, 1, 7, 8, MAX_CONTENT_LEN] {
            let content: Vec<u8> = repeat_with(|| fastrand::u8(..)).take(len).collect();
            let (framed, buf) = Record::encode_framed(RecordType::Stdout, 0x1234, &content)?;
            assert_eq!(buf.len() % 8, 0);
            assert_eq!(buf.len(), RecordHeader::LEN + framed.body_len());
            assert_eq!(Record::encode(RecordType::Stdout, 0x1234, &content)?, buf);

            let mut head = [0; RecordHeader::LEN];
            head.copy_from_slice(&buf[..RecordHeader::LEN]);
            let head = RecordHeader::from_bytes(head)?;
            assert_eq!(head, framed);
            assert_eq!(head.record_type()?, RecordType::Stdout);
            assert_eq!(head.request_id, 0x1234);
            assert_eq!(usize::from(head.content_length), len);
            assert_eq!(&buf[RecordHeader::LEN..][..len], &content[..]);
        }
        Ok(())
    }

    #[test]
    fn record_too_long() {
        let content = vec![0; MAX_CONTENT_LEN + 1];
        let res = Record::encode(RecordType::Params, 1, &content);
        assert!(matches!(res, Err(Error::ContentTooLong(n)) if n == MAX_CONTENT_LEN + 1));
    }
}
