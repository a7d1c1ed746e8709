//! Decrypt fragmented FairPlay protected songs into plain m4a files.
//!
//! Samples are pulled out of the fragmented input, their encrypted prefixes
//! are decrypted by an external peer speaking a small TCP protocol, and the
//! plaintext is remuxed into a single track m4a. An optional normalizer run
//! cleans up what is left of the protection boxes.
//!
//! ```no_run
//! let report = amdecrypt::decrypt(
//!     "127.0.0.1:10020",
//!     "mp4decrypt",
//!     "1440935467",
//!     "skd://itunes.apple.com/P000000000/s1/e1",
//!     "song.mp4",
//!     "song.m4a",
//! )
//! .unwrap();
//!
//! println!("{} samples", report.samples);
//! ```

mod error;
mod normalize;
mod options;
mod pipeline;

pub mod session;
pub mod testing;

pub use error::{Error, Stage};
pub use normalize::{ZERO_KEY, finalize, find_executable, normalize};
pub use options::{DEFAULT_ENDPOINT, DEFAULT_NORMALIZER, DecryptOptions, Job, resolve_endpoint};
pub use pipeline::{Report, decrypt, decrypt_async, run, run_with};
pub use session::PREFETCH_KEY;

/// A `Result` alias where the `Err` case is `amdecrypt::Error`.
pub type Result<T> = std::result::Result<T, Error>;
