use std::io::{Cursor, Error, ErrorKind, Result};

#[derive(Clone, Copy, Default)]
enum Endianness {
    #[default]
    Big,
    Little,
}

/// Borrowing reader for mp4 boxes (big endian) and wire frames (little endian).
#[derive(Clone, Default)]
pub struct Reader<'a> {
    endian: Endianness,
    inner: Cursor<&'a [u8]>,
}

impl<'a> Reader<'a> {
    pub fn new_big_endian(data: &'a [u8]) -> Self {
        Self {
            endian: Endianness::Big,
            inner: Cursor::new(data),
        }
    }

    pub fn new_little_endian(data: &'a [u8]) -> Self {
        Self {
            endian: Endianness::Little,
            inner: Cursor::new(data),
        }
    }

    pub fn has_more_data(&self) -> bool {
        self.inner.position() < self.get_length()
    }

    pub fn get_length(&self) -> u64 {
        self.inner.get_ref().len() as u64
    }

    pub fn get_position(&self) -> u64 {
        self.inner.position()
    }

    /// Number of unread bytes.
    pub fn remaining(&self) -> u64 {
        self.get_length().saturating_sub(self.get_position())
    }

    pub fn set_position(&mut self, position: u64) {
        self.inner.set_position(position.min(self.get_length()));
    }

    pub fn skip(&mut self, bytes: u64) -> Result<()> {
        if bytes > self.remaining() {
            return Err(Error::new(
                ErrorKind::UnexpectedEof,
                "Reader skips out of memory bounds.",
            ));
        }

        self.inner.set_position(self.get_position() + bytes);
        Ok(())
    }

    /// Skip up to `bytes`, stopping at the end of data.
    pub fn skip_saturating(&mut self, bytes: u64) {
        let position = self.get_position().saturating_add(bytes);
        self.set_position(position);
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut buf = [0; N];
        buf.copy_from_slice(self.read_bytes_u8(N)?);
        Ok(buf)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_array::<1>()?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        let buf = self.read_array()?;

        match self.endian {
            Endianness::Big => Ok(u16::from_be_bytes(buf)),
            Endianness::Little => Ok(u16::from_le_bytes(buf)),
        }
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let buf = self.read_array()?;

        match self.endian {
            Endianness::Big => Ok(u32::from_be_bytes(buf)),
            Endianness::Little => Ok(u32::from_le_bytes(buf)),
        }
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        let buf = self.read_array()?;

        match self.endian {
            Endianness::Big => Ok(u64::from_be_bytes(buf)),
            Endianness::Little => Ok(u64::from_le_bytes(buf)),
        }
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        Ok(f64::from_bits(self.read_u64()?))
    }

    /// Borrow the next `bytes` bytes without copying them.
    pub fn read_bytes_u8(&mut self, bytes: usize) -> Result<&'a [u8]> {
        let data: &'a [u8] = *self.inner.get_ref();
        let start = self.get_position() as usize;
        let end = start
            .checked_add(bytes)
            .filter(|end| *end <= data.len())
            .ok_or_else(|| {
                Error::new(
                    ErrorKind::UnexpectedEof,
                    format!("Reader needs {bytes} bytes at position {start}."),
                )
            })?;

        self.inner.set_position(end as u64);
        Ok(&data[start..end])
    }

    /// Borrow everything that has not been read yet.
    pub fn read_to_end(&mut self) -> &'a [u8] {
        let data: &'a [u8] = *self.inner.get_ref();
        let start = (self.get_position() as usize).min(data.len());
        self.inner.set_position(data.len() as u64);
        &data[start..]
    }
}
