mod mdhd;
mod stsd;
mod tfhd;
mod trun;

pub use mdhd::{MdhdBox, MvhdBox};
pub use stsd::SampleEntry;
pub use tfhd::{FragmentDefaults, TfhdBox};
pub use trun::{TrunBox, TrunSample, TrunSamples};
