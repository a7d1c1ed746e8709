use crate::{Error, Result};
use byteorder::{BigEndian, WriteBytesExt};
use std::io::{Seek, SeekFrom, Write};

/// Unity transformation matrix shared by `mvhd` and `tkhd`.
pub const UNITY_MATRIX: [u32; 9] = [0x00010000, 0, 0, 0, 0x00010000, 0, 0, 0, 0x40000000];

/// Undetermined language ("und") packed as ISO-639-2/T.
pub const LANGUAGE_UND: u16 = 0x55C4;

/// Reserve a 32-bit size field and return its position.
pub fn box_size_placeholder<W: Write + Seek>(writer: &mut W) -> Result<u64> {
    let position = writer.stream_position()?;
    writer.write_u32::<BigEndian>(0)?;
    Ok(position)
}

/// Write the distance from `size_pos` to the current position into the
/// placeholder at `size_pos`, then seek back to the end.
pub fn fill_box_size<W: Write + Seek>(writer: &mut W, size_pos: u64) -> Result<u32> {
    let end = writer.stream_position()?;
    let size = to_u32("box size", end - size_pos)?;

    writer.seek(SeekFrom::Start(size_pos))?;
    writer.write_u32::<BigEndian>(size)?;
    writer.seek(SeekFrom::Start(end))?;
    Ok(size)
}

/// Start a box of unknown size. Close it with [`fill_box_size`].
pub fn begin_box<W: Write + Seek>(writer: &mut W, fourcc: &[u8; 4]) -> Result<u64> {
    let size_pos = box_size_placeholder(writer)?;
    writer.write_all(fourcc)?;
    Ok(size_pos)
}

/// Start a full box (version + 24-bit flags) of unknown size.
pub fn begin_full_box<W: Write + Seek>(
    writer: &mut W,
    fourcc: &[u8; 4],
    version: u8,
    flags: u32,
) -> Result<u64> {
    let size_pos = begin_box(writer, fourcc)?;
    writer.write_u32::<BigEndian>(((version as u32) << 24) | (flags & 0xFFFFFF))?;
    Ok(size_pos)
}

pub fn write_matrix<W: Write>(writer: &mut W) -> Result<()> {
    for value in UNITY_MATRIX {
        writer.write_u32::<BigEndian>(value)?;
    }

    Ok(())
}

pub fn write_zeros<W: Write>(writer: &mut W, count: usize) -> Result<()> {
    writer.write_all(&vec![0; count])?;
    Ok(())
}

pub fn to_u32(field: &'static str, value: u64) -> Result<u32> {
    u32::try_from(value).map_err(|_| Error::FieldOverflow { field, value })
}
