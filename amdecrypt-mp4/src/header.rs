use crate::Reader;
use log::debug;
use std::fmt;

/// Four character code identifying a box.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourCC(pub [u8; 4]);

impl FourCC {
    pub const fn new(code: &[u8; 4]) -> Self {
        Self(*code)
    }

    pub fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }
}

impl From<&[u8; 4]> for FourCC {
    fn from(code: &[u8; 4]) -> Self {
        Self(*code)
    }
}

impl PartialEq<&[u8; 4]> for FourCC {
    fn eq(&self, other: &&[u8; 4]) -> bool {
        &self.0 == *other
    }
}

impl fmt::Display for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            if byte.is_ascii_graphic() || byte == b' ' {
                write!(f, "{}", byte as char)?;
            } else {
                write!(f, "\\x{byte:02x}")?;
            }
        }

        Ok(())
    }
}

impl fmt::Debug for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FourCC({self})")
    }
}

/// Box types the extractor acts on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BoxKind {
    Ftyp,
    Moov,
    Moof,
    Mdat,
    Traf,
    Tfhd,
    Trun,
    Other(FourCC),
}

impl From<FourCC> for BoxKind {
    fn from(fourcc: FourCC) -> Self {
        match &fourcc.0 {
            b"ftyp" => Self::Ftyp,
            b"moov" => Self::Moov,
            b"moof" => Self::Moof,
            b"mdat" => Self::Mdat,
            b"traf" => Self::Traf,
            b"tfhd" => Self::Tfhd,
            b"trun" => Self::Trun,
            _ => Self::Other(fourcc),
        }
    }
}

/// Location of one box inside a byte buffer.
///
/// `size` is always resolved: a declared size of 0 has been replaced by the
/// distance to the end of the buffer and a declared size of 1 by the 64-bit
/// `largesize` that follows the type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BoxHeader {
    pub offset: u64,
    pub size: u64,
    pub fourcc: FourCC,
    /// 8, or 16 when a 64-bit size is present.
    pub header_size: u8,
}

impl BoxHeader {
    pub fn kind(&self) -> BoxKind {
        self.fourcc.into()
    }

    pub fn end(&self) -> u64 {
        self.offset.saturating_add(self.size)
    }

    pub fn payload_offset(&self) -> u64 {
        self.offset + self.header_size as u64
    }

    /// The whole box, header included, clamped to `data`.
    pub fn bytes<'a>(&self, data: &'a [u8]) -> &'a [u8] {
        clamp(data, self.offset, self.end())
    }

    /// The box payload, clamped to `data`.
    pub fn payload<'a>(&self, data: &'a [u8]) -> &'a [u8] {
        clamp(data, self.payload_offset(), self.end())
    }
}

fn clamp(data: &[u8], start: u64, end: u64) -> &[u8] {
    let len = data.len() as u64;
    let start = start.min(len) as usize;
    let end = end.min(len) as usize;
    &data[start..end.max(start)]
}

/// Read the box header at the current position of `reader`.
///
/// Returns `None` at end of data, when fewer than 8 bytes remain, when a
/// 64-bit size is truncated or when the resolved size is smaller than the
/// header itself. The reader is left after the header on success.
pub fn read_box_header(reader: &mut Reader) -> Option<BoxHeader> {
    let offset = reader.get_position();

    // size(4 bytes) + type(4 bytes) = 8 bytes
    if reader.remaining() < 8 {
        return None;
    }

    let mut size = reader.read_u32().ok()? as u64;
    let fourcc = FourCC(reader.read_bytes_u8(4).ok()?.try_into().ok()?);
    let mut header_size = 8;

    match size {
        0 => size = reader.get_length() - offset,
        1 => {
            size = reader.read_u64().ok()?;
            header_size = 16;
        }
        _ => (),
    }

    if size < header_size as u64 {
        return None;
    }

    Some(BoxHeader {
        offset,
        size,
        fourcc,
        header_size,
    })
}

/// Why a sibling walk ended before consuming all data.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Truncation {
    /// Absolute offset of the header that could not be read.
    pub offset: u64,
    pub remaining: u64,
}

/// Iterator over sibling boxes of one nesting level.
///
/// Header offsets are absolute: `base` is added to the position inside
/// `data`. A malformed header ends the walk at this level and is recorded
/// in [`Boxes::truncation`].
pub struct Boxes<'a> {
    data: &'a [u8],
    reader: Reader<'a>,
    base: u64,
    truncation: Option<Truncation>,
}

impl<'a> Boxes<'a> {
    pub fn new(data: &'a [u8], base: u64) -> Self {
        Self {
            data,
            reader: Reader::new_big_endian(data),
            base,
            truncation: None,
        }
    }

    pub fn truncation(&self) -> Option<Truncation> {
        self.truncation
    }
}

impl<'a> Iterator for Boxes<'a> {
    type Item = (BoxHeader, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        if !self.reader.has_more_data() || self.truncation.is_some() {
            return None;
        }

        let start = self.reader.get_position();

        let Some(header) = read_box_header(&mut self.reader) else {
            let truncation = Truncation {
                offset: self.base + start,
                remaining: self.reader.get_length() - start,
            };
            debug!(
                "box walk stopped at byte {} with {} bytes left",
                truncation.offset, truncation.remaining
            );
            self.truncation = Some(truncation);
            return None;
        };

        // A box running past the end of its parent is clamped, which also
        // ends the walk at this level.
        self.reader.set_position(header.end());
        let payload = header.payload(self.data);

        Some((
            BoxHeader {
                offset: self.base + header.offset,
                ..header
            },
            payload,
        ))
    }
}

/// Walk sibling boxes of `data`, treating positions as absolute offsets.
pub fn children(data: &[u8], base: u64) -> Boxes<'_> {
    Boxes::new(data, base)
}

/// Find a box by path (e.g. `[b"moov", b"trak", b"mdia"]`) and return its
/// payload, or `None` when any path element is absent.
///
/// Each level only searches inside the payload matched at the level above.
pub fn find_box<'a>(data: &'a [u8], path: &[&[u8; 4]]) -> Option<&'a [u8]> {
    let mut current = data;

    for target in path {
        current = children(current, 0)
            .find(|(header, _)| header.fourcc == *target)?
            .1;
    }

    Some(current)
}

/// Result of scanning the top-level boxes of a file.
#[derive(Clone, Debug, Default)]
pub struct TopLevel {
    pub boxes: Vec<BoxHeader>,
    pub truncation: Option<Truncation>,
}

/// Collect the top-level boxes of `data`.
///
/// A box declaring size 0 swallows the rest of the data, so the scan ends
/// there. A malformed header ends the scan without error and keeps every
/// box collected so far.
pub fn scan(data: &[u8]) -> TopLevel {
    let mut walk = children(data, 0);
    let boxes = walk.by_ref().collect::<Vec<_>>();

    TopLevel {
        boxes: boxes.into_iter().map(|(header, _)| header).collect(),
        truncation: walk.truncation(),
    }
}
