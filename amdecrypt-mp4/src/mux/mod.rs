//! Non-fragmented m4a writer.
//!
//! Boxes whose size is not known up front are written with a placeholder
//! size and patched once their end is reached. The single `stco` entry is
//! patched last, after the `mdat` header position is known.

mod atoms;

use crate::{Error, MuxTemplate, Result, Sample};
use atoms::{
    LANGUAGE_UND, begin_box, begin_full_box, fill_box_size, to_u32, write_matrix, write_zeros,
};
use byteorder::{BigEndian, WriteBytesExt};
use log::debug;
use std::{
    fs::File,
    io::{BufWriter, Seek, SeekFrom, Write},
    path::Path,
};

/// ALAC magic cookie used when no sample description can be reused:
/// 4096 frames, 24-bit, stereo, 44100 Hz.
pub const DEFAULT_ALAC_COOKIE: [u8; 24] = [
    0x00, 0x00, 0x10, 0x00, // frame length
    0x00, // compatible version
    0x18, // bit depth
    0x28, 0x28, 0x0A, // pb, mb, kb
    0x02, // channels
    0x00, 0x00, // max run
    0x00, 0x00, 0xFF, 0xFF, // max frame bytes
    0x00, 0x0D, 0x00, 0x80, // average bitrate
    0x00, 0x00, 0xAC, 0x44, // sample rate
];

/// Where the pieces of a written file ended up.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MuxLayout {
    pub moov_offset: u64,
    pub moov_size: u64,
    pub mdat_offset: u64,
    /// First media byte, also the value stored in `stco`.
    pub mdat_payload_offset: u64,
    /// Total duration in timescale units.
    pub duration: u64,
    pub total_size: u64,
}

/// Run-length encode sample durations into `stts` entries.
pub fn time_to_sample<I: IntoIterator<Item = u32>>(durations: I) -> Vec<(u32, u32)> {
    let mut entries: Vec<(u32, u32)> = Vec::new();

    for duration in durations {
        match entries.last_mut() {
            Some((count, delta)) if *delta == duration => *count += 1,
            _ => entries.push((1, duration)),
        }
    }

    entries
}

/// Write a complete m4a: `ftyp`, `moov` and one `mdat` holding `media`.
///
/// `samples` supply sizes and durations only. `media` is the concatenation
/// of the samples' final bytes and must be exactly as long as their sum.
pub fn write_m4a<W: Write + Seek>(
    writer: &mut W,
    samples: &[Sample],
    media: &[u8],
    template: &MuxTemplate,
) -> Result<MuxLayout> {
    let expected = samples.iter().map(|x| x.len() as u64).sum::<u64>();

    if expected != media.len() as u64 {
        return Err(Error::SizeMismatch {
            expected,
            actual: media.len() as u64,
        });
    }

    let duration = samples.iter().map(|x| x.duration as u64).sum::<u64>();
    let track = Track {
        timescale: template.timescale,
        duration: to_u32("duration", duration)?,
        sample_count: to_u32("sample count", samples.len() as u64)?,
    };

    write_ftyp(writer)?;

    let moov_offset = writer.stream_position()?;
    let stco_entry = write_moov(writer, &track, samples, template)?;
    let mdat_offset = writer.stream_position()?;

    // 64-bit size only when the 32-bit field cannot hold it.
    let mdat_size = media.len() as u64 + 8;
    if mdat_size > u32::MAX as u64 {
        writer.write_u32::<BigEndian>(1)?;
        writer.write_all(b"mdat")?;
        writer.write_u64::<BigEndian>(mdat_size + 8)?;
    } else {
        writer.write_u32::<BigEndian>(mdat_size as u32)?;
        writer.write_all(b"mdat")?;
    }

    let mdat_payload_offset = writer.stream_position()?;
    writer.write_all(media)?;
    let total_size = writer.stream_position()?;

    writer.seek(SeekFrom::Start(stco_entry))?;
    writer.write_u32::<BigEndian>(to_u32("chunk offset", mdat_payload_offset)?)?;
    writer.seek(SeekFrom::Start(total_size))?;

    let layout = MuxLayout {
        moov_offset,
        moov_size: mdat_offset - moov_offset,
        mdat_offset,
        mdat_payload_offset,
        duration,
        total_size,
    };
    debug!("muxed {} samples: {layout:?}", samples.len());
    Ok(layout)
}

/// [`write_m4a`] into a freshly created file at `path`.
pub fn write_m4a_file<T: AsRef<Path>>(
    path: T,
    samples: &[Sample],
    media: &[u8],
    template: &MuxTemplate,
) -> Result<MuxLayout> {
    let mut writer = BufWriter::new(File::create(path)?);
    let layout = write_m4a(&mut writer, samples, media, template)?;
    writer.flush()?;
    Ok(layout)
}

struct Track {
    timescale: u32,
    duration: u32,
    sample_count: u32,
}

fn write_ftyp<W: Write>(writer: &mut W) -> Result<()> {
    writer.write_u32::<BigEndian>(32)?;
    writer.write_all(b"ftyp")?;
    writer.write_all(b"M4A ")?; // major brand
    writer.write_u32::<BigEndian>(0)?; // minor version
    writer.write_all(b"M4A mp42isom\0\0\0\0")?; // compatible brands
    Ok(())
}

/// Returns the position of the `stco` entry to patch.
fn write_moov<W: Write + Seek>(
    writer: &mut W,
    track: &Track,
    samples: &[Sample],
    template: &MuxTemplate,
) -> Result<u64> {
    let moov = begin_box(writer, b"moov")?;

    let mvhd = begin_full_box(writer, b"mvhd", 0, 0)?;
    writer.write_u32::<BigEndian>(0)?; // creation_time
    writer.write_u32::<BigEndian>(0)?; // modification_time
    writer.write_u32::<BigEndian>(track.timescale)?;
    writer.write_u32::<BigEndian>(track.duration)?;
    writer.write_u32::<BigEndian>(0x00010000)?; // rate
    writer.write_u16::<BigEndian>(0x0100)?; // volume
    write_zeros(writer, 10)?;
    write_matrix(writer)?;
    write_zeros(writer, 24)?; // pre_defined
    writer.write_u32::<BigEndian>(2)?; // next_track_id
    fill_box_size(writer, mvhd)?;

    let trak = begin_box(writer, b"trak")?;

    // enabled | in_movie | in_preview
    let tkhd = begin_full_box(writer, b"tkhd", 0, 7)?;
    writer.write_u32::<BigEndian>(0)?; // creation_time
    writer.write_u32::<BigEndian>(0)?; // modification_time
    writer.write_u32::<BigEndian>(1)?; // track_id
    writer.write_u32::<BigEndian>(0)?;
    writer.write_u32::<BigEndian>(track.duration)?;
    write_zeros(writer, 8)?;
    writer.write_u16::<BigEndian>(0)?; // layer
    writer.write_u16::<BigEndian>(0)?; // alternate_group
    writer.write_u16::<BigEndian>(0x0100)?; // volume
    writer.write_u16::<BigEndian>(0)?;
    write_matrix(writer)?;
    writer.write_u32::<BigEndian>(0)?; // width
    writer.write_u32::<BigEndian>(0)?; // height
    fill_box_size(writer, tkhd)?;

    let mdia = begin_box(writer, b"mdia")?;

    let mdhd = begin_full_box(writer, b"mdhd", 0, 0)?;
    writer.write_u32::<BigEndian>(0)?; // creation_time
    writer.write_u32::<BigEndian>(0)?; // modification_time
    writer.write_u32::<BigEndian>(track.timescale)?;
    writer.write_u32::<BigEndian>(track.duration)?;
    writer.write_u16::<BigEndian>(LANGUAGE_UND)?;
    writer.write_u16::<BigEndian>(0)?; // pre_defined
    fill_box_size(writer, mdhd)?;

    let hdlr = begin_full_box(writer, b"hdlr", 0, 0)?;
    writer.write_u32::<BigEndian>(0)?; // pre_defined
    writer.write_all(b"soun")?;
    write_zeros(writer, 12)?;
    writer.write_all(b"SoundHandler\0")?;
    fill_box_size(writer, hdlr)?;

    let minf = begin_box(writer, b"minf")?;

    let smhd = begin_full_box(writer, b"smhd", 0, 0)?;
    writer.write_u16::<BigEndian>(0)?; // balance
    writer.write_u16::<BigEndian>(0)?;
    fill_box_size(writer, smhd)?;

    let dinf = begin_box(writer, b"dinf")?;
    let dref = begin_full_box(writer, b"dref", 0, 0)?;
    writer.write_u32::<BigEndian>(1)?; // entry_count
    // media is in this file
    let url = begin_full_box(writer, b"url ", 0, 1)?;
    fill_box_size(writer, url)?;
    fill_box_size(writer, dref)?;
    fill_box_size(writer, dinf)?;

    let stco_entry = write_stbl(writer, track, samples, template)?;

    fill_box_size(writer, minf)?;
    fill_box_size(writer, mdia)?;
    fill_box_size(writer, trak)?;
    fill_box_size(writer, moov)?;
    Ok(stco_entry)
}

fn write_stbl<W: Write + Seek>(
    writer: &mut W,
    track: &Track,
    samples: &[Sample],
    template: &MuxTemplate,
) -> Result<u64> {
    let stbl = begin_box(writer, b"stbl")?;

    match &template.sample_description {
        Some(stsd) => writer.write_all(stsd)?,
        None => write_alac_stsd(writer)?,
    }

    let entries = time_to_sample(samples.iter().map(|x| x.duration));
    let stts = begin_full_box(writer, b"stts", 0, 0)?;
    writer.write_u32::<BigEndian>(entries.len() as u32)?;
    for (count, delta) in entries {
        writer.write_u32::<BigEndian>(count)?;
        writer.write_u32::<BigEndian>(delta)?;
    }
    fill_box_size(writer, stts)?;

    // every sample in chunk 1
    let stsc = begin_full_box(writer, b"stsc", 0, 0)?;
    writer.write_u32::<BigEndian>(1)?;
    writer.write_u32::<BigEndian>(1)?; // first_chunk
    writer.write_u32::<BigEndian>(track.sample_count)?;
    writer.write_u32::<BigEndian>(1)?; // sample_description_index
    fill_box_size(writer, stsc)?;

    let stsz = begin_full_box(writer, b"stsz", 0, 0)?;
    writer.write_u32::<BigEndian>(0)?; // sample_size, 0 means per sample
    writer.write_u32::<BigEndian>(track.sample_count)?;
    for sample in samples {
        writer.write_u32::<BigEndian>(to_u32("sample size", sample.len() as u64)?)?;
    }
    fill_box_size(writer, stsz)?;

    let stco = begin_full_box(writer, b"stco", 0, 0)?;
    writer.write_u32::<BigEndian>(1)?;
    let stco_entry = writer.stream_position()?;
    writer.write_u32::<BigEndian>(0)?;
    fill_box_size(writer, stco)?;

    fill_box_size(writer, stbl)?;
    Ok(stco_entry)
}

fn write_alac_stsd<W: Write + Seek>(writer: &mut W) -> Result<()> {
    let stsd = begin_full_box(writer, b"stsd", 0, 0)?;
    writer.write_u32::<BigEndian>(1)?; // entry_count

    let alac = begin_box(writer, b"alac")?;
    write_zeros(writer, 6)?;
    writer.write_u16::<BigEndian>(1)?; // data_reference_index
    write_zeros(writer, 8)?; // version, revision, vendor
    writer.write_u16::<BigEndian>(2)?; // channel_count
    writer.write_u16::<BigEndian>(16)?; // sample_size
    writer.write_u16::<BigEndian>(0)?; // compression_id
    writer.write_u16::<BigEndian>(0)?; // packet_size
    writer.write_u32::<BigEndian>(44100 << 16)?;

    let cookie = begin_full_box(writer, b"alac", 0, 0)?;
    writer.write_all(&DEFAULT_ALAC_COOKIE)?;
    fill_box_size(writer, cookie)?;

    fill_box_size(writer, alac)?;
    fill_box_size(writer, stsd)?;
    Ok(())
}
