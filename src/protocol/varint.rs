use std::fmt;
use std::io::{self, prelude::*};

use super::Error as ProtocolError;


/// A length prefix of a FastCGI name-value pair.
///
/// Values up to 127 are encoded in a single byte. Larger values take 4 bytes
/// in big-endian order with the most significant bit set, which limits the
/// range to 31 bits.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct VarInt(u32);

impl VarInt {
    /// Marks the 4-byte encoding in the first byte.
    const LONG_BIT: u8 = 1 << 7;
    /// The largest value with a 1-byte encoding.
    pub const SHORT_MAX: u32 = 127;
    /// The maximum value a [`VarInt`] can encode.
    pub const MAX: Self = VarInt((1 << 31) - 1);

    /// Returns the number of bytes this value occupies on the wire.
    #[inline]
    #[must_use]
    pub const fn encoded_len(self) -> usize {
        if self.0 <= Self::SHORT_MAX { 1 } else { 4 }
    }

    /// Encodes the value into a buffer, returning the buffer and the number
    /// of leading bytes that make up the encoding.
    #[must_use]
    pub fn to_bytes(self) -> ([u8; 4], usize) {
        let mut buf = self.0.to_be_bytes();
        if self.0 <= Self::SHORT_MAX {
            buf[0] = buf[3];
            return (buf, 1);
        }
        buf[0] |= Self::LONG_BIT;
        (buf, 4)
    }

    /// Encodes the [`VarInt`] into the writer's output.
    ///
    /// # Errors
    /// Any errors from [`Write::write_all`] are forwarded to the caller.
    pub fn write(self, mut w: impl Write) -> io::Result<usize> {
        let (buf, len) = self.to_bytes();
        w.write_all(&buf[..len])?;
        Ok(len)
    }

    /// Decodes a [`VarInt`] from the reader's input.
    ///
    /// # Errors
    /// Any errors from [`Read::read_exact`] are forwarded to the caller.
    pub fn read(mut r: impl Read) -> io::Result<Self> {
        let mut buf = [0u8; 4];
        r.read_exact(&mut buf[..1])?;
        if buf[0] & Self::LONG_BIT == 0 {
            return Ok(Self(buf[0].into()));
        }

        r.read_exact(&mut buf[1..])?;
        buf[0] &= !Self::LONG_BIT;
        Ok(Self(u32::from_be_bytes(buf)))
    }

    /// Converts the [`VarInt`] into a [`usize`], saturating at [`usize::MAX`].
    #[inline]
    #[must_use]
    pub fn to_usize(self) -> usize {
        usize::try_from(self.0).unwrap_or(usize::MAX)
    }
}

impl From<VarInt> for u32 {
    #[inline]
    fn from(v: VarInt) -> Self {
        v.0
    }
}

impl From<u8> for VarInt {
    #[inline]
    fn from(v: u8) -> Self {
        Self(v.into())
    }
}

impl From<u16> for VarInt {
    #[inline]
    fn from(v: u16) -> Self {
        Self(v.into())
    }
}

impl TryFrom<u32> for VarInt {
    type Error = ProtocolError;

    /// Converts a [`u32`] into a [`VarInt`], unless it exceeds [`VarInt::MAX`].
    #[inline]
    fn try_from(v: u32) -> Result<Self, Self::Error> {
        if v > Self::MAX.0 {
            Err(ProtocolError::InvalidVarInt)
        } else {
            Ok(Self(v))
        }
    }
}

impl TryFrom<usize> for VarInt {
    type Error = ProtocolError;

    /// Converts a [`usize`] into a [`VarInt`], unless it exceeds [`VarInt::MAX`].
    #[inline]
    fn try_from(v: usize) -> Result<Self, Self::Error> {
        u32::try_from(v)
            .map_err(|_| ProtocolError::InvalidVarInt)
            .and_then(Self::try_from)
    }
}

impl fmt::Display for VarInt {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}
