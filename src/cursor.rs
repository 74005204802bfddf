use crate::{is_valid_alignment, Endian, RarcError, Result};
use binread::{BinRead, BinReaderExt};
use binwrite::{BinWrite, WriterOption};
use std::io::{Cursor, Read, Write};
use std::ops::{Deref, DerefMut};

/// A seekable cursor over a byte buffer which reads and writes every
/// multi-byte value in a configurable byte order.
///
/// Reads are bounds-checked up front so that a truncated archive surfaces as
/// [`RarcError::CorruptArchive`] with the offending offset rather than a bare
/// end-of-file error.
#[derive(Debug, Clone)]
pub struct EndianCursor<T> {
    inner: Cursor<T>,
    endian: Endian,
}

impl<T: AsRef<[u8]>> EndianCursor<T> {
    pub fn new(data: T, endian: Endian) -> Self {
        EndianCursor {
            inner: Cursor::new(data),
            endian,
        }
    }

    pub fn endian(&self) -> Endian {
        self.endian
    }

    pub fn set_endian(&mut self, endian: Endian) {
        self.endian = endian;
    }

    pub fn position(&self) -> u64 {
        self.inner.position()
    }

    /// Total length of the underlying buffer
    pub fn len(&self) -> u64 {
        self.inner.get_ref().as_ref().len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Move to an absolute position. Seeking past the end is allowed; the next
    /// read fails and the next write zero-fills the gap.
    pub fn seek(&mut self, pos: u64) {
        self.inner.set_position(pos);
    }

    /// Move relative to the current position
    pub fn skip(&mut self, count: i64) -> Result<()> {
        let pos = self.position();
        let target = if count < 0 {
            pos.checked_sub(count.unsigned_abs())
        } else {
            pos.checked_add(count as u64)
        };
        let target = target.ok_or_else(|| RarcError::corrupt(pos, "relative seek out of range"))?;
        self.seek(target);
        Ok(())
    }

    /// Seek to `pos` for the lifetime of the returned guard. The previous
    /// position is restored when the guard is dropped, on every exit path.
    pub fn scoped_seek(&mut self, pos: u64) -> SeekGuard<'_, T> {
        let restore = self.position();
        self.seek(pos);
        SeekGuard {
            cursor: self,
            restore,
        }
    }

    fn require(&self, count: u64, what: &str) -> Result<()> {
        let pos = self.position();
        match pos.checked_add(count) {
            Some(end) if end <= self.len() => Ok(()),
            _ => Err(RarcError::corrupt(
                pos,
                format!(
                    "{} of {:#x} bytes runs past the end of the data ({:#x})",
                    what,
                    count,
                    self.len()
                ),
            )),
        }
    }

    /// Read a fixed-size structure of `size` bytes in the cursor's byte order
    pub fn read_struct<S: BinRead>(&mut self, size: u64, what: &str) -> Result<S> {
        self.require(size, what)?;
        Ok(match self.endian {
            Endian::Big => self.inner.read_be()?,
            Endian::Little => self.inner.read_le()?,
        })
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        self.read_struct(2, "u16")
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        self.read_struct(4, "u32")
    }

    pub fn read_bytes(&mut self, count: usize) -> Result<Vec<u8>> {
        self.require(count as u64, "byte block")?;
        let mut buf = vec![0u8; count];
        self.inner.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Read a zero-terminated UTF-8 string and leave the cursor after the
    /// terminator
    pub fn read_cstring(&mut self) -> Result<String> {
        let start = self.position();
        let data = self.inner.get_ref().as_ref();
        let rest = data
            .get(start as usize..)
            .ok_or_else(|| RarcError::corrupt(start, "string offset past the end of the data"))?;
        let term_pos = rest
            .iter()
            .position(|b| *b == 0)
            .ok_or_else(|| RarcError::corrupt(start, "string is not terminated"))?;
        let name = std::str::from_utf8(&rest[..term_pos])
            .map_err(|source| RarcError::InvalidFileName {
                offset: start,
                source,
            })?
            .to_owned();
        self.seek(start + term_pos as u64 + 1);
        Ok(name)
    }
}

impl EndianCursor<Vec<u8>> {
    /// An empty, growable cursor for output
    pub fn writer(endian: Endian) -> Self {
        Self::new(Vec::new(), endian)
    }

    fn options(&self) -> WriterOption {
        let mut opts = WriterOption::default();
        opts.endian = self.endian.into();
        opts
    }

    pub fn write_struct<S: BinWrite>(&mut self, value: &S) -> Result<()> {
        let opts = self.options();
        value.write_options(&mut self.inner, &opts)?;
        Ok(())
    }

    pub fn write_u16(&mut self, value: u16) -> Result<()> {
        self.write_struct(&value)
    }

    pub fn write_u32(&mut self, value: u32) -> Result<()> {
        self.write_struct(&value)
    }

    pub fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        self.inner.write_all(data)?;
        Ok(())
    }

    /// Write `value` followed by a zero terminator
    pub fn write_cstring(&mut self, value: &str) -> Result<()> {
        self.write_bytes(value.as_bytes())?;
        self.write_bytes(&[0])
    }

    /// Pad with `pad` up to the next multiple of `alignment`, returning the
    /// number of bytes written
    pub fn align(&mut self, alignment: usize, pad: u8) -> Result<usize> {
        if !is_valid_alignment(alignment) {
            return Err(RarcError::invalid_op(format!(
                "{} is not a valid alignment",
                alignment
            )));
        }
        let pos = self.position() as usize;
        let count = crate::align(pos, alignment) - pos;
        self.write_bytes(&vec![pad; count])?;
        Ok(count)
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.inner.into_inner()
    }
}

/// Restores the cursor position it was created from when dropped
pub struct SeekGuard<'a, T: AsRef<[u8]>> {
    cursor: &'a mut EndianCursor<T>,
    restore: u64,
}

impl<T: AsRef<[u8]>> Deref for SeekGuard<'_, T> {
    type Target = EndianCursor<T>;

    fn deref(&self) -> &Self::Target {
        self.cursor
    }
}

impl<T: AsRef<[u8]>> DerefMut for SeekGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.cursor
    }
}

impl<T: AsRef<[u8]>> Drop for SeekGuard<'_, T> {
    fn drop(&mut self) {
        self.cursor.seek(self.restore);
    }
}
