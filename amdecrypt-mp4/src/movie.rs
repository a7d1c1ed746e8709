use crate::{
    Error, FourCC, Reader, Result,
    boxes::{MdhdBox, MvhdBox, SampleEntry},
    children, find_box,
};
use log::{debug, warn};

/// Timescale used when the source movie box does not carry one.
pub const DEFAULT_TIMESCALE: u32 = 44100;

const STBL_PATH: [&[u8; 4]; 5] = [b"moov", b"trak", b"mdia", b"minf", b"stbl"];

/// Locate the `stsd` box (header included) inside a movie box.
///
/// The regular `moov/trak/mdia/minf/stbl/stsd` path is tried first, then a
/// byte scan for any plausible `stsd` box in the data.
pub fn sample_description(movie: &[u8]) -> Result<&[u8]> {
    if let Some(stbl) = find_box(movie, &STBL_PATH)
        && let Some((header, _)) = children(stbl, 0).find(|(x, _)| x.fourcc == b"stsd")
    {
        return Ok(header.bytes(stbl));
    }

    debug!("stsd not found on the regular path, scanning the movie box");

    // The size field precedes the type, so the earliest match is at byte 4.
    movie
        .windows(4)
        .enumerate()
        .skip(4)
        .filter(|(_, x)| *x == b"stsd")
        .map(|(i, _)| i - 4)
        .find_map(|start| {
            let size = u32::from_be_bytes(movie[start..start + 4].try_into().ok()?) as usize;
            ((16..=10000).contains(&size) && start + size <= movie.len())
                .then(|| &movie[start..start + size])
        })
        .ok_or(Error::MissingSampleDescription)
}

/// Media timescale of the first track, falling back to the movie timescale
/// and then to [`DEFAULT_TIMESCALE`].
pub fn timescale(movie: &[u8]) -> u32 {
    let media = find_box(movie, &[b"moov", b"trak", b"mdia", b"mdhd"])
        .and_then(|x| MdhdBox::parse(x).ok())
        .map(|x| x.timescale);
    let fallback = || {
        find_box(movie, &[b"moov", b"mvhd"])
            .and_then(|x| MvhdBox::parse(x).ok())
            .map(|x| x.timescale)
    };

    media
        .filter(|x| *x != 0)
        .or_else(|| fallback().filter(|x| *x != 0))
        .unwrap_or(DEFAULT_TIMESCALE)
}

/// What the muxer reuses from the source movie box.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MuxTemplate {
    pub timescale: u32,
    /// Verbatim `stsd` box, header included. `None` selects the built-in
    /// ALAC description.
    pub sample_description: Option<Vec<u8>>,
}

impl Default for MuxTemplate {
    fn default() -> Self {
        Self {
            timescale: DEFAULT_TIMESCALE,
            sample_description: None,
        }
    }
}

impl MuxTemplate {
    pub fn from_movie(movie: &[u8]) -> Self {
        let sample_description = match sample_description(movie) {
            Ok(stsd) => Some(stsd.to_vec()),
            Err(e) => {
                warn!("{e}, using the default ALAC sample description");
                None
            }
        };

        Self {
            timescale: timescale(movie),
            sample_description,
        }
    }

    /// Codec of the first sample entry, when a template is present and
    /// parsable.
    pub fn codec(&self) -> Option<FourCC> {
        let stsd = self.sample_description.as_deref()?;
        let (_, payload) = children(stsd, 0).next()?;
        SampleEntry::parse(payload).ok().map(|x| x.codec())
    }
}

/// Sample tables of the first track of a non-fragmented file.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SampleTables {
    /// `(sample_count, sample_delta)` pairs.
    pub time_to_sample: Vec<(u32, u32)>,
    /// `(first_chunk, samples_per_chunk, sample_description_index)`.
    pub sample_to_chunk: Vec<(u32, u32, u32)>,
    pub sample_sizes: Vec<u32>,
    pub chunk_offsets: Vec<u64>,
}

impl SampleTables {
    /// Read `stts`, `stsc`, `stsz` and `stco`/`co64` from `data`, which may
    /// be a whole file or just its movie box.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let stbl = find_box(data, &STBL_PATH)
            .ok_or_else(|| Error::malformed(0, "no sample table box"))?;
        let mut tables = Self::default();

        for (header, payload) in children(stbl, 0) {
            let mut reader = Reader::new_big_endian(payload);

            match header.fourcc.as_bytes() {
                b"stts" => {
                    reader.skip(4)?;
                    for _ in 0..reader.read_u32()? {
                        tables
                            .time_to_sample
                            .push((reader.read_u32()?, reader.read_u32()?));
                    }
                }
                b"stsc" => {
                    reader.skip(4)?;
                    for _ in 0..reader.read_u32()? {
                        tables.sample_to_chunk.push((
                            reader.read_u32()?,
                            reader.read_u32()?,
                            reader.read_u32()?,
                        ));
                    }
                }
                b"stsz" => {
                    reader.skip(4)?;
                    let sample_size = reader.read_u32()?;
                    let count = reader.read_u32()?;

                    for _ in 0..count {
                        tables.sample_sizes.push(if sample_size == 0 {
                            reader.read_u32()?
                        } else {
                            sample_size
                        });
                    }
                }
                b"stco" => {
                    reader.skip(4)?;
                    for _ in 0..reader.read_u32()? {
                        tables.chunk_offsets.push(reader.read_u32()? as u64);
                    }
                }
                b"co64" => {
                    reader.skip(4)?;
                    for _ in 0..reader.read_u32()? {
                        tables.chunk_offsets.push(reader.read_u64()?);
                    }
                }
                _ => (),
            }
        }

        Ok(tables)
    }

    /// Expand the run-length encoded durations.
    pub fn durations(&self) -> Vec<u32> {
        self.time_to_sample
            .iter()
            .flat_map(|(count, delta)| std::iter::repeat_n(*delta, *count as usize))
            .collect()
    }
}
