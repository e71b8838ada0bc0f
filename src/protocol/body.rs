use super::Error as ProtocolError;
use super::{ProtocolStatus, RequestFlags, Role};


/// Copies the fixed-size prefix of a record body, rejecting short bodies.
fn fixed_prefix<const N: usize>(data: &[u8]) -> Result<[u8; N], ProtocolError> {
    data.get(..N)
        .and_then(|d| d.try_into().ok())
        .ok_or(ProtocolError::ShortBody { expected: N, actual: data.len() })
}


/// The body of a [`RecordType::BeginRequest`](super::RecordType::BeginRequest) FastCGI record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BeginRequest {
    /// The role of the FastCGI application in this request.
    pub role: Role,
    /// The control flags for this request.
    pub flags: RequestFlags,
}

impl BeginRequest {
    /// The number of bytes in the wire format of a [`BeginRequest`] body.
    pub const LEN: usize = 8;

    /// Creates a [`BeginRequest`] body for the [`Role::Responder`] role.
    #[inline]
    #[must_use]
    pub fn responder(keep_alive: bool) -> Self {
        Self { role: Role::Responder, flags: RequestFlags::from_keep_alive(keep_alive) }
    }

    /// Encodes the [`BeginRequest`] record body into its binary wire format.
    #[must_use]
    pub fn to_bytes(self) -> [u8; Self::LEN] {
        let mut buf = [0; Self::LEN];
        buf[..2].copy_from_slice(&u16::to_be_bytes(self.role.into()));
        buf[2] = self.flags.into();
        buf
    }
}

// Responders decode BeginRequest, the client only ever sends it
#[cfg(test)]
impl BeginRequest {
    pub(crate) fn from_slice(data: &[u8]) -> Result<Self, ProtocolError> {
        let data: [u8; Self::LEN] = fixed_prefix(data)?;
        let role = u16::from_be_bytes([data[0], data[1]]);
        Ok(Self {
            role: Role::try_from(role)?,
            flags: RequestFlags::try_from(data[2])?,
        })
    }

    pub(crate) fn from_record(record: &super::Record) -> Result<Self, ProtocolError> {
        match record.record_type()? {
            super::RecordType::BeginRequest => Self::from_slice(&record.content),
            _ => Err(ProtocolError::UnknownRecordType(record.header.rtype)),
        }
    }
}


/// The body of a [`RecordType::EndRequest`](super::RecordType::EndRequest) FastCGI record.
///
/// The body is 4 bytes of big-endian application status, 1 byte of
/// [`ProtocolStatus`] and 3 reserved bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndRequest {
    /// The application's exit status, as it would be passed to exit(3)
    /// by a regular CGI program.
    pub app_status: u32,
    /// The protocol status code for this response.
    pub protocol_status: ProtocolStatus,
}

impl EndRequest {
    /// The number of bytes in the wire format of an [`EndRequest`] body.
    pub const LEN: usize = 8;

    /// Parses the leading bytes of `data` into a FastCGI [`EndRequest`]
    /// record body. Bytes past [`EndRequest::LEN`] are ignored.
    ///
    /// # Errors
    /// Returns an error if `data` is too short or the protocol status
    /// is unknown.
    pub fn from_slice(data: &[u8]) -> Result<Self, ProtocolError> {
        let data: [u8; Self::LEN] = fixed_prefix(data)?;
        Ok(Self {
            app_status: u32::from_be_bytes([data[0], data[1], data[2], data[3]]),
            protocol_status: ProtocolStatus::try_from(data[4])?,
        })
    }

    /// Encodes the [`EndRequest`] record body into its binary wire format.
    #[must_use]
    pub fn to_bytes(self) -> [u8; Self::LEN] {
        let mut buf = [0; Self::LEN];
        buf[..4].copy_from_slice(&u32::to_be_bytes(self.app_status));
        buf[4] = self.protocol_status.into();
        buf
    }
}
