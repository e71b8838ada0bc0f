use std::fmt;

use super::Error as ProtocolError;


/// A validated FastCGI version number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, strum::FromRepr)]
#[repr(u8)]
pub enum Version {
    /// FastCGI Version 1
    V1 = 1,
}

impl TryFrom<u8> for Version {
    type Error = ProtocolError;

    #[inline]
    fn try_from(v: u8) -> Result<Self, Self::Error> {
        Self::from_repr(v).ok_or(ProtocolError::UnknownVersion(v))
    }
}

impl From<Version> for u8 {
    #[inline]
    fn from(v: Version) -> Self {
        v as Self
    }
}


/// A FastCGI role identifier, sent in the `BeginRequest` record.
///
/// This client only ever asks for [`Role::Responder`]. The other roles are
/// listed so that their wire values can be recognized.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, strum::FromRepr)]
#[cfg_attr(test, derive(strum::EnumIter))]
#[repr(u16)]
pub enum Role {
    Responder = 1,
    Authorizer = 2,
    Filter = 3,
}

impl TryFrom<u16> for Role {
    type Error = ProtocolError;

    #[inline]
    fn try_from(v: u16) -> Result<Self, Self::Error> {
        Self::from_repr(v).ok_or(ProtocolError::UnknownRole(v))
    }
}

impl From<Role> for u16 {
    #[inline]
    fn from(v: Role) -> Self {
        v as Self
    }
}


bitflags::bitflags! {
    /// A set of FastCGI request flags.
    #[derive(Default, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct RequestFlags: u8 {
        /// Ask the application to keep the connection open after it sent
        /// the `EndRequest` record.
        const KeepConn = 1;
    }
}

impl RequestFlags {
    /// Derives the request flags from the inbound client's wish for a
    /// persistent connection.
    #[inline]
    #[must_use]
    pub fn from_keep_alive(keep_alive: bool) -> Self {
        if keep_alive { Self::KeepConn } else { Self::empty() }
    }
}

impl TryFrom<u8> for RequestFlags {
    type Error = ProtocolError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        Self::from_bits(v).ok_or(ProtocolError::UnknownFlags(v & !Self::all().bits()))
    }
}

impl From<RequestFlags> for u8 {
    #[inline]
    fn from(v: RequestFlags) -> Self {
        v.bits()
    }
}

impl fmt::Debug for RequestFlags {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("RequestFlags(")?;
        bitflags::parser::to_writer(self, &mut *f)?;
        f.write_str(")")
    }
}


/// The protocol-level reason an `EndRequest` record was sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, strum::FromRepr)]
#[cfg_attr(test, derive(strum::EnumIter))]
#[repr(u8)]
pub enum ProtocolStatus {
    /// The request completed normally.
    RequestComplete = 0,
    /// The application refused a second request on a connection it
    /// cannot multiplex.
    CantMpxConn = 1,
    /// The application ran out of some resource, such as request slots.
    Overloaded = 2,
    /// The application does not implement the requested role.
    UnknownRole = 3,
}

impl TryFrom<u8> for ProtocolStatus {
    type Error = ProtocolError;

    #[inline]
    fn try_from(v: u8) -> Result<Self, Self::Error> {
        Self::from_repr(v).ok_or(ProtocolError::UnknownStatus(v))
    }
}

impl From<ProtocolStatus> for u8 {
    #[inline]
    fn from(v: ProtocolStatus) -> Self {
        v as Self
    }
}


/// A FastCGI record type.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, strum::FromRepr)]
#[cfg_attr(test, derive(strum::EnumIter))]
#[repr(u8)]
pub enum RecordType {
    BeginRequest = 1,
    AbortRequest = 2,
    EndRequest = 3,
    Params = 4,
    Stdin = 5,
    Stdout = 6,
    Stderr = 7,
    Data = 8,
    GetValues = 9,
    GetValuesResult = 10,
    UnknownType = 11,
}

impl TryFrom<u8> for RecordType {
    type Error = ProtocolError;

    #[inline]
    fn try_from(v: u8) -> Result<Self, Self::Error> {
        Self::from_repr(v).ok_or(ProtocolError::UnknownRecordType(v))
    }
}

impl From<RecordType> for u8 {
    #[inline]
    fn from(v: RecordType) -> Self {
        v as Self
    }
}

impl RecordType {
    /// Tests whether this [`RecordType`] forms a stream that the sender
    /// closes with an empty record.
    #[inline]
    #[must_use]
    pub fn is_stream(self) -> bool {
        use RecordType::*;
        matches!(self, Params | Stdin | Stdout | Stderr | Data)
    }

    /// Tests whether records of this [`RecordType`] carry response output
    /// from the application.
    #[inline]
    #[must_use]
    pub fn is_output(self) -> bool {
        matches!(self, Self::Stdout | Self::Stderr)
    }
}


#[cfg(test)]
mod tests {
    use strum::IntoEnumIterator;
    use super::*;

    #[test]
    fn enum_roundtrip() -> Result<(), ProtocolError> {
        for r in Role::iter() {
            assert_eq!(Role::try_from(u16::from(r))?, r);
        }
        for s in ProtocolStatus::iter() {
            assert_eq!(ProtocolStatus::try_from(u8::from(s))?, s);
        }
        for t in RecordType::iter() {
            assert_eq!(RecordType::try_from(u8::from(t))?, t);
        }
        Ok(())
    }

    #[test]
    fn wire_values() {
        assert_eq!(u8::from(RecordType::BeginRequest), 1);
        assert_eq!(u8::from(RecordType::UnknownType), 11);
        assert_eq!(u16::from(Role::Responder), 1);
        assert_eq!(u8::from(ProtocolStatus::Overloaded), 2);
        assert_eq!(u8::from(Version::V1), 1);
    }

    #[test]
    fn unknown_values() {
        assert!(matches!(RecordType::try_from(0), Err(ProtocolError::UnknownRecordType(0))));
        assert!(matches!(RecordType::try_from(12), Err(ProtocolError::UnknownRecordType(12))));
        assert!(matches!(Role::try_from(4), Err(ProtocolError::UnknownRole(4))));
        assert!(matches!(ProtocolStatus::try_from(9), Err(ProtocolError::UnknownStatus(9))));
        assert!(matches!(Version::try_from(2), Err(ProtocolError::UnknownVersion(2))));
    }

    #[test]
    fn request_flags() {
        assert_eq!(RequestFlags::from_keep_alive(true), RequestFlags::KeepConn);
        assert_eq!(u8::from(RequestFlags::from_keep_alive(false)), 0);
        assert!(matches!(RequestFlags::try_from(0b101), Err(ProtocolError::UnknownFlags(0b100))));
        assert_eq!(format!("{:?}", RequestFlags::KeepConn), "RequestFlags(KeepConn)");
    }

    #[test]
    fn stream_types() {
        let streams: Vec<_> = RecordType::iter().filter(|t| t.is_stream()).collect();
        assert_eq!(streams, [
            RecordType::Params, RecordType::Stdin, RecordType::Stdout,
            RecordType::Stderr, RecordType::Data,
        ]);
        assert!(RecordType::iter().filter(|t| t.is_output()).all(RecordType::is_stream));
    }
}
