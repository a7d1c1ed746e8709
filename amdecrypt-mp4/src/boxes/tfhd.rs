use crate::Reader;

/// Sample defaults inherited by every run entry of a track fragment that
/// omits its own duration or size.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FragmentDefaults {
    /// 0-based index into the key list.
    pub description_index: u32,
    pub default_duration: u32,
    pub default_size: u32,
}

impl Default for FragmentDefaults {
    fn default() -> Self {
        Self {
            description_index: 0,
            default_duration: 1024,
            default_size: 0,
        }
    }
}

pub struct TfhdBox {
    /// As per ISO/IEC 14496-12: an integer that uniquely identifies this
    /// track over the entire life‐time of this presentation
    pub track_id: u32,
    pub flags: u32,
    /// If specified via flags, this indicate the base data offset
    pub base_data_offset: Option<u64>,
    /// 1-based sample description index, if specified via flags
    pub sample_description_index: Option<u32>,
    /// If specified via flags, this overrides the default sample
    /// duration in the Track Extends Box for this fragment
    pub default_sample_duration: Option<u32>,
    /// If specified via flags, this overrides the default sample
    /// size in the Track Extends Box for this fragment
    pub default_sample_size: Option<u32>,
}

impl TfhdBox {
    /// Parses a TFHD box payload (version and flags included).
    ///
    /// Returns `None` when the payload is too short to carry the track id.
    /// Optional fields are read in their fixed order, each only when its
    /// flag is set and enough bytes remain.
    pub fn parse(payload: &[u8]) -> Option<Self> {
        let mut reader = Reader::new_big_endian(payload);

        // version(1) + flags(3) + track_id(4)
        if reader.remaining() < 8 {
            return None;
        }

        let flags = reader.read_u32().ok()? & 0xFFFFFF;
        let track_id = reader.read_u32().ok()?;

        let mut tfhd = Self {
            track_id,
            flags,
            base_data_offset: None,
            sample_description_index: None,
            default_sample_duration: None,
            default_sample_size: None,
        };

        if (flags & 0x000001) != 0 && reader.remaining() >= 8 {
            tfhd.base_data_offset = reader.read_u64().ok();
        }

        if (flags & 0x000002) != 0 && reader.remaining() >= 4 {
            tfhd.sample_description_index = reader.read_u32().ok();
        }

        if (flags & 0x000008) != 0 && reader.remaining() >= 4 {
            tfhd.default_sample_duration = reader.read_u32().ok();
        }

        if (flags & 0x000010) != 0 && reader.remaining() >= 4 {
            tfhd.default_sample_size = reader.read_u32().ok();
        }

        Some(tfhd)
    }

    /// Layer this header over `defaults`.
    ///
    /// A present, non-zero sample description index is converted from
    /// 1-based to 0-based.
    pub fn apply(&self, defaults: FragmentDefaults) -> FragmentDefaults {
        FragmentDefaults {
            description_index: match self.sample_description_index {
                Some(index) if index > 0 => index - 1,
                Some(_) => 0,
                None => defaults.description_index,
            },
            default_duration: self
                .default_sample_duration
                .unwrap_or(defaults.default_duration),
            default_size: self.default_sample_size.unwrap_or(defaults.default_size),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(flags: u32, fields: &[u32]) -> Vec<u8> {
        let mut data = flags.to_be_bytes().to_vec();
        data.extend_from_slice(&1u32.to_be_bytes());
        for field in fields {
            data.extend_from_slice(&field.to_be_bytes());
        }
        data
    }

    #[test]
    fn test_tfhd_all_fields() {
        // base_data_offset is 8 bytes, written as two u32 halves
        let data = payload(0x1b, &[0, 64, 2, 4096, 1200]);
        let tfhd = TfhdBox::parse(&data).unwrap();

        assert_eq!(tfhd.track_id, 1);
        assert_eq!(tfhd.base_data_offset, Some(64));
        assert_eq!(tfhd.sample_description_index, Some(2));
        assert_eq!(tfhd.default_sample_duration, Some(4096));
        assert_eq!(tfhd.default_sample_size, Some(1200));

        assert_eq!(
            tfhd.apply(FragmentDefaults::default()),
            FragmentDefaults {
                description_index: 1,
                default_duration: 4096,
                default_size: 1200,
            }
        );
    }

    #[test]
    fn test_tfhd_inherits_missing_fields() {
        let tfhd = TfhdBox::parse(&payload(0x10, &[512])).unwrap();
        let defaults = tfhd.apply(FragmentDefaults {
            description_index: 1,
            default_duration: 2048,
            default_size: 0,
        });

        assert_eq!(defaults.description_index, 1);
        assert_eq!(defaults.default_duration, 2048);
        assert_eq!(defaults.default_size, 512);
    }

    #[test]
    fn test_tfhd_zero_description_index() {
        let tfhd = TfhdBox::parse(&payload(0x02, &[0])).unwrap();
        assert_eq!(tfhd.apply(FragmentDefaults::default()).description_index, 0);
    }

    #[test]
    fn test_tfhd_short_payloads() {
        assert!(TfhdBox::parse(&[0, 0, 0, 2, 0, 0, 0]).is_none());

        // duration flag set but only two bytes remain
        let mut data = payload(0x08, &[]);
        data.extend_from_slice(&[0, 1]);
        let tfhd = TfhdBox::parse(&data).unwrap();
        assert_eq!(tfhd.default_sample_duration, None);
    }
}
