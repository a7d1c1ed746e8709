use crate::Reader;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TrunSample {
    /// The length of the sample in timescale units.
    pub sample_duration: Option<u32>,
    /// The size of the sample in bytes.
    pub sample_size: Option<u32>,
}

pub struct TrunBox<'a> {
    pub flags: u32,
    /// As per ISO/IEC 14496-12: the number of samples being added in this run;
    pub sample_count: u32,
    entries: &'a [u8],
}

impl<'a> TrunBox<'a> {
    /// Parses a TRUN box payload (version and flags included).
    ///
    /// Returns `None` when version, flags and sample count are not all
    /// present. Entries are decoded lazily by [`TrunBox::samples`].
    pub fn parse(payload: &'a [u8]) -> Option<Self> {
        let mut reader = Reader::new_big_endian(payload);

        // version(1) + flags(3) + sample_count(4)
        if reader.remaining() < 8 {
            return None;
        }

        let flags = reader.read_u32().ok()? & 0xFFFFFF;
        let sample_count = reader.read_u32().ok()?;

        // Skip "data_offset" if present.
        if (flags & 0x000001) != 0 {
            reader.skip_saturating(4);
        }

        // Skip "first_sample_flags" if present.
        if (flags & 0x000004) != 0 {
            reader.skip_saturating(4);
        }

        Some(Self {
            flags,
            sample_count,
            entries: reader.read_to_end(),
        })
    }

    /// Iterate over exactly `sample_count` entries. Fields missing from a
    /// truncated table come back as `None`.
    pub fn samples(&self) -> TrunSamples<'a> {
        TrunSamples {
            flags: self.flags,
            left: self.sample_count,
            reader: Reader::new_big_endian(self.entries),
        }
    }
}

pub struct TrunSamples<'a> {
    flags: u32,
    left: u32,
    reader: Reader<'a>,
}

impl Iterator for TrunSamples<'_> {
    type Item = TrunSample;

    fn next(&mut self) -> Option<Self::Item> {
        if self.left == 0 {
            return None;
        }

        self.left -= 1;

        let mut sample = TrunSample::default();
        let reader = &mut self.reader;

        // Read "sample_duration" if present.
        if (self.flags & 0x000100) != 0 && reader.remaining() >= 4 {
            sample.sample_duration = reader.read_u32().ok();
        }

        // Read "sample_size" if present.
        if (self.flags & 0x000200) != 0 && reader.remaining() >= 4 {
            sample.sample_size = reader.read_u32().ok();
        }

        // Skip "sample_flags" if present.
        if (self.flags & 0x000400) != 0 {
            reader.skip_saturating(4);
        }

        // Skip "sample_composition_time_offset" if present.
        if (self.flags & 0x000800) != 0 {
            reader.skip_saturating(4);
        }

        Some(sample)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.left as usize, Some(self.left as usize))
    }
}
