use super::varint::VarInt;
use super::Error as ProtocolError;


/// An iterator decoding complete name-value pairs from its input.
///
/// Iteration stops at the end of the input or at the first incomplete pair.
/// `NVIter::into_inner` returns whatever could not be decoded.
#[derive(Debug, Clone)]
pub struct NVIter<'a> {
    data: &'a [u8],
}

impl<'a> NVIter<'a> {
    /// Creates a new [`NVIter`] over the referenced input bytes.
    #[inline]
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    /// Extracts the remaining input bytes from the iterator.
    #[inline]
    #[must_use]
    pub fn into_inner(self) -> &'a [u8] {
        self.data
    }
}

impl<'a> Iterator for NVIter<'a> {
    type Item = (&'a [u8], &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        let mut cur = self.data;
        let name_len = VarInt::read(&mut cur).ok()?.to_usize();
        let val_len = VarInt::read(&mut cur).ok()?.to_usize();

        let total_len = name_len.checked_add(val_len)?;
        let (name, value) = cur.get(..total_len)?.split_at(name_len);
        self.data = &cur[total_len..];
        Some((name, value))
    }
}

impl std::iter::FusedIterator for NVIter<'_> {}


/// Returns the number of bytes `write` produces for the pair.
///
/// # Errors
/// Returns an error if the name or value is too long to be encoded.
pub fn encoded_len((name, value): (&[u8], &[u8])) -> Result<usize, ProtocolError> {
    let name_len = VarInt::try_from(name.len())?.encoded_len();
    let val_len = VarInt::try_from(value.len())?.encoded_len();
    Ok(name_len + val_len + name.len() + value.len())
}

/// Appends the encoding of a name-value pair to `buf`.
///
/// # Errors
/// Returns an error if the name or value is too long to be encoded. `buf`
/// is left untouched in that case.
pub fn write((name, value): (&[u8], &[u8]), buf: &mut Vec<u8>) -> Result<usize, ProtocolError> {
    let (name_len, name_n) = VarInt::try_from(name.len())?.to_bytes();
    let (val_len, val_n) = VarInt::try_from(value.len())?.to_bytes();

    buf.extend_from_slice(&name_len[..name_n]);
    buf.extend_from_slice(&val_len[..val_n]);
    buf.extend_from_slice(name);
    buf.extend_from_slice(value);
    Ok(name_n + val_n + name.len() + value.len())
}

/// Encodes all pairs back to back into one contiguous buffer, ready to be
/// split into `Params` records.
///
/// # Errors
/// Returns an error if any name or value is too long to be encoded.
pub fn encode_all<'a, I>(pairs: I) -> Result<Vec<u8>, ProtocolError>
where
    I: IntoIterator<Item = (&'a [u8], &'a [u8])>,
    I::IntoIter: Clone,
{
    let pairs = pairs.into_iter();
    let total = pairs.clone().map(encoded_len).sum::<Result<usize, _>>()?;
    let mut buf = Vec::with_capacity(total);
    for nv in pairs {
        write(nv, &mut buf)?;
    }
    debug_assert_eq!(buf.len(), total);
    Ok(buf)
}
