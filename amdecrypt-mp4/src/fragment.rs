use crate::{
    BoxKind, Result,
    boxes::{FragmentDefaults, TfhdBox, TrunBox},
    children, scan,
};
use log::{debug, warn};
use std::path::Path;

/// One media sample cut out of a fragment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sample {
    pub data: Vec<u8>,
    /// Duration in timescale units.
    pub duration: u32,
    /// 0-based index into the key list.
    pub description_index: u32,
}

impl Sample {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Length of the 16-byte aligned prefix that carries ciphertext.
    pub fn encrypted_len(&self) -> usize {
        self.data.len() & !0xF
    }

    /// Length of the trailing bytes stored in the clear.
    pub fn clear_len(&self) -> usize {
        self.data.len() % 16
    }
}

/// Everything the rest of the pipeline needs from a fragmented input.
#[derive(Clone, Debug, Default)]
pub struct SongAssets {
    pub samples: Vec<Sample>,
    /// Raw `ftyp` box, header included. Empty when absent.
    pub type_box: Vec<u8>,
    /// Raw `moov` box, header included. Empty when absent.
    pub movie_box: Vec<u8>,
}

impl SongAssets {
    pub fn total_bytes(&self) -> u64 {
        self.samples.iter().map(|x| x.len() as u64).sum()
    }

    /// Sum of every sample duration, in timescale units.
    pub fn duration(&self) -> u64 {
        self.samples.iter().map(|x| x.duration as u64).sum()
    }
}

/// Split a fragmented file into samples.
///
/// Top-level boxes are visited in order. Each `mdat` is paired with the most
/// recent unpaired `moof`; an `mdat` without one is skipped. Malformed
/// headers never fail the extraction, the walk simply stops and whatever
/// was already collected is returned.
pub fn extract_song(data: &[u8]) -> SongAssets {
    let top = scan(data);
    let mut assets = SongAssets::default();
    let mut pending_moof = None;

    for header in &top.boxes {
        match header.kind() {
            BoxKind::Ftyp => assets.type_box = header.bytes(data).to_vec(),
            BoxKind::Moov => assets.movie_box = header.bytes(data).to_vec(),
            BoxKind::Moof => pending_moof = Some(header),
            BoxKind::Mdat => match pending_moof.take() {
                Some(moof) => {
                    let samples = fragment_samples(moof.payload(data), header.payload(data));
                    debug!(
                        "fragment at byte {} yielded {} samples",
                        moof.offset,
                        samples.len()
                    );
                    assets.samples.extend(samples);
                }
                None => debug!("mdat at byte {} has no moof, skipping", header.offset),
            },
            _ => (),
        }
    }

    if let Some(truncation) = top.truncation {
        warn!(
            "input is truncated at byte {} ({} bytes ignored)",
            truncation.offset, truncation.remaining
        );
    }

    assets
}

/// Read `path` into memory and run [`extract_song`] on it.
pub fn extract_song_file<T: AsRef<Path>>(path: T) -> Result<SongAssets> {
    let data = std::fs::read(path)?;
    Ok(extract_song(&data))
}

/// Cut the payload of one `mdat` into the samples described by its `moof`.
///
/// Defaults start fresh for every `traf` and every `trun` of that `traf` is
/// resolved against them. Slicing starts at the first payload byte and
/// stops at the first zero-sized or out-of-bounds entry.
pub fn fragment_samples(moof: &[u8], mdat: &[u8]) -> Vec<Sample> {
    let mut runs = Vec::new();

    for (_, traf) in children(moof, 0).filter(|(x, _)| x.kind() == BoxKind::Traf) {
        let mut defaults = FragmentDefaults::default();
        let mut truns = Vec::new();

        for (header, payload) in children(traf, 0) {
            match header.kind() {
                BoxKind::Tfhd => {
                    if let Some(tfhd) = TfhdBox::parse(payload) {
                        defaults = tfhd.apply(defaults);
                    }
                }
                BoxKind::Trun => truns.extend(TrunBox::parse(payload)),
                _ => (),
            }
        }

        runs.extend(truns.into_iter().map(|trun| (defaults, trun)));
    }

    let mut samples = Vec::new();
    let mut position = 0;

    for (defaults, trun) in runs {
        for entry in trun.samples() {
            let size = entry.sample_size.unwrap_or(defaults.default_size) as usize;
            let end = position + size;

            if size == 0 || end > mdat.len() {
                warn!(
                    "unusable sample {} ({size} bytes at {position} of a {} byte mdat), dropping the rest of the fragment",
                    samples.len(),
                    mdat.len()
                );
                return samples;
            }

            samples.push(Sample {
                data: mdat[position..end].to_vec(),
                duration: entry.sample_duration.unwrap_or(defaults.default_duration),
                description_index: defaults.description_index,
            });
            position = end;
        }
    }

    samples
}
