#![cfg_attr(docsrs, feature(doc_cfg))]

//! This crate splits fragmented mp4 audio into its raw samples and writes
//! samples back out as a plain, non-fragmented m4a.
//!
//! It only understands the boxes needed for that round trip:
//! `ftyp`, `moov`, `moof`/`traf`/`tfhd`/`trun` and `mdat` on the way in,
//! and a single audio track with one chunk on the way out.
//!
//! ```no_run
//! use amdecrypt_mp4::{MuxTemplate, extract_song_file, write_m4a_file};
//!
//! let assets = extract_song_file("song.mp4").unwrap();
//! let media = assets
//!     .samples
//!     .iter()
//!     .flat_map(|x| x.data.iter().copied())
//!     .collect::<Vec<_>>();
//! let template = MuxTemplate::from_movie(&assets.movie_box);
//! write_m4a_file("song.m4a", &assets.samples, &media, &template).unwrap();
//! ```

pub mod boxes;

mod error;
mod fragment;
mod header;
mod movie;
mod mux;
mod reader;

pub use error::Error;
pub use fragment::{Sample, SongAssets, extract_song, extract_song_file, fragment_samples};
pub use header::*;
pub use movie::{
    DEFAULT_TIMESCALE, MuxTemplate, SampleTables, sample_description, timescale,
};
pub use mux::{DEFAULT_ALAC_COOKIE, MuxLayout, time_to_sample, write_m4a, write_m4a_file};
pub use reader::Reader;

/// A `Result` alias where the `Err` case is `amdecrypt_mp4::Error`.
pub type Result<T> = std::result::Result<T, Error>;
