use crate::error::ChunkedError;

/// Parses the hexadecimal chunk size at the start of `line`.
///
/// Returns the size and the number of bytes that made up the number. At least
/// one digit is required, no sign or leading whitespace is accepted, and the
/// value must fit in a `u64`.
#[inline]
pub(crate) fn parse_chunk_size(line: &[u8]) -> Result<(u64, usize), ChunkedError> {
    let mut size: u64 = 0;
    let mut digits = 0;

    for &b in line {
        let val = match b {
            b'0'..=b'9' => b - b'0',
            b'a'..=b'f' => b - b'a' + 10,
            b'A'..=b'F' => b - b'A' + 10,
            _ => break,
        };
        size = size
            .checked_mul(16)
            .and_then(|s| s.checked_add(u64::from(val)))
            .ok_or(ChunkedError::ChunkSizeOverflow)?;
        digits += 1;
    }

    if digits == 0 {
        return Err(ChunkedError::InvalidChunkSize);
    }
    Ok((size, digits))
}

/// Checks the bytes following the chunk size.
///
/// Up to the `;` that opens the extension only spaces and tabs are allowed.
/// Whatever follows the `;` is accepted as is.
#[inline]
pub(crate) fn validate_chunk_extension(rest: &[u8]) -> Result<(), ChunkedError> {
    for &b in rest {
        match b {
            b';' => break,
            b' ' | b'\t' => continue,
            byte => return Err(ChunkedError::InvalidChunkExtension { byte }),
        }
    }
    Ok(())
}

/// Position of the LF ending the first line of `buf`, if any.
#[inline(always)]
pub(crate) fn find_lf(buf: &[u8]) -> Option<usize> {
    buf.iter().position(|&b| b == b'\n')
}
