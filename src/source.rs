//! Read-only byte source contract
//!
//! Scanners and decoders never touch raw buffers directly; everything goes
//! through [`ByteSource`], which checks every access against the source's
//! bounds. A failed read is a normal [`RomSeqError::OutOfRange`] result,
//! never a panic, so adversarial pointer fields in headers can be followed
//! safely and rejected when they land outside the dump.
//!
//! The trait is object safe and implemented for `[u8]`, so any in-memory
//! ROM or disk-image dump can be scanned with `&data`.

use crate::{Result, RomSeqError};

/// Byte order for multi-byte scalar reads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    /// Least significant byte first
    Little,
    /// Most significant byte first
    Big,
}

/// Immutable, randomly addressable byte array with bounds-checked readers
pub trait ByteSource {
    /// Total number of addressable bytes
    fn len(&self) -> usize;

    /// Whether the source contains no bytes
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Borrow `len` bytes starting at `offset`
    fn slice(&self, offset: usize, len: usize) -> Result<&[u8]>;

    /// Read one byte at `offset`
    fn read_u8(&self, offset: usize) -> Result<u8> {
        Ok(self.slice(offset, 1)?[0])
    }

    /// Read a 16-bit scalar at `offset`
    fn read_u16(&self, offset: usize, endian: Endian) -> Result<u16> {
        let bytes = self.slice(offset, 2)?;
        let raw = [bytes[0], bytes[1]];
        Ok(match endian {
            Endian::Little => u16::from_le_bytes(raw),
            Endian::Big => u16::from_be_bytes(raw),
        })
    }

    /// Read a 24-bit scalar at `offset`, zero-extended to 32 bits
    ///
    /// Three-byte fields are common in sound-driver data (pointer tables,
    /// tempo fields), so they get a first-class reader.
    fn read_u24(&self, offset: usize, endian: Endian) -> Result<u32> {
        let bytes = self.slice(offset, 3)?;
        Ok(match endian {
            Endian::Little => {
                u32::from(bytes[0]) | u32::from(bytes[1]) << 8 | u32::from(bytes[2]) << 16
            }
            Endian::Big => {
                u32::from(bytes[0]) << 16 | u32::from(bytes[1]) << 8 | u32::from(bytes[2])
            }
        })
    }

    /// Read a 32-bit scalar at `offset`
    fn read_u32(&self, offset: usize, endian: Endian) -> Result<u32> {
        let bytes = self.slice(offset, 4)?;
        let raw = [bytes[0], bytes[1], bytes[2], bytes[3]];
        Ok(match endian {
            Endian::Little => u32::from_le_bytes(raw),
            Endian::Big => u32::from_be_bytes(raw),
        })
    }
}

impl ByteSource for [u8] {
    fn len(&self) -> usize {
        <[u8]>::len(self)
    }

    fn slice(&self, offset: usize, len: usize) -> Result<&[u8]> {
        let end = offset.checked_add(len).ok_or(RomSeqError::OutOfRange {
            offset,
            len,
            source_len: <[u8]>::len(self),
        })?;
        self.get(offset..end).ok_or(RomSeqError::OutOfRange {
            offset,
            len,
            source_len: <[u8]>::len(self),
        })
    }
}

// `&[u8]` and `Vec<u8>` are sized, so either can stand in for
// `&dyn ByteSource` directly.
impl<T: ByteSource + ?Sized> ByteSource for &T {
    fn len(&self) -> usize {
        (**self).len()
    }

    fn slice(&self, offset: usize, len: usize) -> Result<&[u8]> {
        (**self).slice(offset, len)
    }
}

impl ByteSource for Vec<u8> {
    fn len(&self) -> usize {
        self.as_slice().len()
    }

    fn slice(&self, offset: usize, len: usize) -> Result<&[u8]> {
        self.as_slice().slice(offset, len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_reads_both_endians() {
        let data: &[u8] = &[0x12, 0x34, 0x56, 0x78];
        assert_eq!(data.read_u8(0).unwrap(), 0x12);
        assert_eq!(data.read_u16(0, Endian::Little).unwrap(), 0x3412);
        assert_eq!(data.read_u16(0, Endian::Big).unwrap(), 0x1234);
        assert_eq!(data.read_u24(1, Endian::Little).unwrap(), 0x785634);
        assert_eq!(data.read_u24(0, Endian::Big).unwrap(), 0x123456);
        assert_eq!(data.read_u32(0, Endian::Little).unwrap(), 0x78563412);
        assert_eq!(data.read_u32(0, Endian::Big).unwrap(), 0x12345678);
    }

    #[test]
    fn test_read_past_end_is_out_of_range() {
        let data: &[u8] = &[0xAA, 0xBB];
        assert!(data.read_u8(1).is_ok());
        let err = data.read_u32(1, Endian::Little).unwrap_err();
        assert_eq!(
            err,
            RomSeqError::OutOfRange {
                offset: 1,
                len: 4,
                source_len: 2
            }
        );
    }

    #[test]
    fn test_offset_overflow_is_out_of_range() {
        let data: &[u8] = &[0u8; 8];
        assert!(data.slice(usize::MAX, 2).is_err());
    }

    #[test]
    fn test_empty_source() {
        let data: &[u8] = &[];
        assert!(data.is_empty());
        assert!(data.read_u8(0).is_err());
        assert_eq!(data.slice(0, 0).unwrap(), &[] as &[u8]);
    }
}
