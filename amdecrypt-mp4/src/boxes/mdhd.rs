use crate::{Reader, Result};

pub struct MdhdBox {
    /// As per ISO/IEC 14496-12: an integer that specifies the time‐scale for this media;
    /// this is the number of time units that pass in one second
    pub timescale: u32,
    pub duration: u64,
    /// Language code for this media
    pub language: String,
}

impl MdhdBox {
    /// Parses a MDHD box payload (version and flags included).
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let mut reader = Reader::new_big_endian(payload);
        let (timescale, duration) = read_times(&mut reader)?;
        let language = reader.read_u16()?;

        // language is stored as an ISO-639-2/T code in an array of three
        // 5-bit fields each field is the packed difference between its ASCII
        // value and 0x60
        let language = [language >> 10, (language & 0x03e0) >> 5, language & 0x1f]
            .iter()
            .map(|x| char::from((*x as u8).wrapping_add(0x60)))
            .collect();

        Ok(Self {
            timescale,
            duration,
            language,
        })
    }
}

pub struct MvhdBox {
    pub timescale: u32,
    pub duration: u64,
}

impl MvhdBox {
    /// Parses a MVHD box payload (version and flags included).
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let (timescale, duration) = read_times(&mut Reader::new_big_endian(payload))?;
        Ok(Self {
            timescale,
            duration,
        })
    }
}

/// Shared prefix of `mvhd` and `mdhd`.
fn read_times(reader: &mut Reader) -> Result<(u32, u64)> {
    let version = reader.read_u8()?;
    reader.skip(3)?; // flags

    if version == 1 {
        // creation + modification time
        reader.skip(16)?;
        let timescale = reader.read_u32()?;
        Ok((timescale, reader.read_u64()?))
    } else {
        reader.skip(8)?;
        let timescale = reader.read_u32()?;
        Ok((timescale, reader.read_u32()? as u64))
    }
}
