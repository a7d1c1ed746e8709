use crate::{Error, FourCC, Reader, Result, children, find_box};

/// First audio sample entry of a `stsd` box.
#[derive(Clone, Debug, PartialEq)]
pub struct SampleEntry {
    pub fourcc: FourCC,
    pub entry_count: u32,
    pub channel_count: u32,
    pub sample_size: u32,
    /// Sample rate in Hz, integer part only.
    pub sample_rate: u32,
    /// Format recorded in `sinf/frma` of a protected (`enca`) entry.
    pub original_format: Option<FourCC>,
}

impl SampleEntry {
    /// Parses a STSD box payload (version and flags included) and
    /// describes its first sample entry.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let mut reader = Reader::new_big_endian(payload);

        reader.skip(4)?; // version + flags
        let entry_count = reader.read_u32()?;

        let entries = reader.read_to_end();
        let Some((header, body)) = children(entries, 8).next() else {
            return Err(Error::malformed(8, "stsd carries no sample entry"));
        };

        let mut reader = Reader::new_big_endian(body);

        // 6 bytes reserved
        // 2 bytes data reference index
        reader.skip(8)?;

        // 2 bytes version
        let version = reader.read_u16()?;
        // 2 bytes revision (0, could be ignored)
        // 4 bytes reserved
        reader.skip(6)?;

        let (channel_count, sample_size, sample_rate) = if version == 2 {
            // 16 bytes hard-coded values with no comments
            reader.skip(16)?;
            let sample_rate = reader.read_f64()? as u32;
            let channel_count = reader.read_u32()?;
            // 4 bytes hard-coded values with no comments
            reader.skip(4)?;
            let sample_size = reader.read_u32()?;
            // 4 bytes lpcm flags
            // 4 bytes sample size
            // 4 bytes samples per packet
            reader.skip(12)?;
            (channel_count, sample_size, sample_rate)
        } else {
            let channel_count = reader.read_u16()? as u32;
            let sample_size = reader.read_u16()? as u32;
            // 2 bytes compression ID
            // 2 bytes packet size
            reader.skip(4)?;
            // 16.16 fixed point
            (channel_count, sample_size, reader.read_u32()? >> 16)
        };

        if version == 1 {
            // 4 bytes samples per packet
            // 4 bytes bytes per packet
            // 4 bytes bytes per frame
            // 4 bytes bytes per sample
            reader.skip(16)?;
        }

        let original_format = find_box(reader.read_to_end(), &[b"sinf", b"frma"])
            .and_then(|frma| frma.get(..4))
            .and_then(|code| code.try_into().ok())
            .map(FourCC);

        Ok(Self {
            fourcc: header.fourcc,
            entry_count,
            channel_count,
            sample_size,
            sample_rate,
            original_format,
        })
    }

    /// Codec of the track, looking through the protection wrapper when
    /// there is one.
    pub fn codec(&self) -> FourCC {
        self.original_format.unwrap_or(self.fourcc)
    }

    pub fn is_protected(&self) -> bool {
        self.fourcc == b"enca"
    }
}
