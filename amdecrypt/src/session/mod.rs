//! Client side of the decryption peer's wire protocol.
//!
//! All integers are little endian.
//!
//! | message      | bytes                                      |
//! |--------------|--------------------------------------------|
//! | register key | `[u8 id_len][id][u8 uri_len][uri]`         |
//! | ciphertext   | `[u32 len][len bytes]`, answered with `len` bytes |
//! | key switch   | `[0, 0, 0, 0]`, before every registration but the first |
//! | close        | `[0, 0, 0, 0, 0]`                          |

mod transport;

pub use transport::{DecryptionTransport, TcpTransport, connect_any, probe};

use crate::{Error, Result};
use amdecrypt_mp4::Sample;
use log::{debug, trace};

/// Key every song's first samples are encrypted with.
pub const PREFETCH_KEY: &str = "skd://itunes.apple.com/P000000000/s1/e1";
pub const PREFETCH_KEY_ID: &str = "0";

const KEY_SWITCH: [u8; 4] = [0; 4];
const CLOSE: [u8; 5] = [0; 5];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Key {
    pub id: String,
    pub uri: String,
}

impl Key {
    pub fn new(id: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            uri: uri.into(),
        }
    }

    fn check(&self) -> Result<()> {
        for (field, value) in [("id", &self.id), ("uri", &self.uri)] {
            if value.len() > u8::MAX as usize {
                return Err(Error::KeyTooLong {
                    field,
                    len: value.len(),
                });
            }
        }

        Ok(())
    }
}

/// Key list addressed by sample description indices: the prefetch key,
/// then the song key.
pub fn key_table(track_id: &str, key_uri: &str) -> Vec<Key> {
    vec![
        Key::new(PREFETCH_KEY_ID, PREFETCH_KEY),
        Key::new(track_id, key_uri),
    ]
}

/// Length prefix of a ciphertext frame.
fn frame_len(sample: usize, len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| Error::FrameTooLarge { sample, len })
}

/// One connection's worth of decryption.
pub struct DecryptionSession<T: DecryptionTransport> {
    transport: T,
    keys: Vec<Key>,
    active_key: Option<usize>,
}

impl<T: DecryptionTransport> DecryptionSession<T> {
    pub fn new(transport: T, track_id: &str, key_uri: &str) -> Result<Self> {
        let keys = key_table(track_id, key_uri);

        for key in &keys {
            key.check()?;
        }

        Ok(Self {
            transport,
            keys,
            active_key: None,
        })
    }

    pub fn keys(&self) -> &[Key] {
        &self.keys
    }

    /// Index of the registered key, `None` before the first registration.
    pub fn active_key(&self) -> Option<usize> {
        self.active_key
    }

    /// Out of range description indices use the last key.
    pub fn key_index(&self, description_index: u32) -> usize {
        (description_index as usize).min(self.keys.len() - 1)
    }

    fn register(&mut self, index: usize) -> Result<()> {
        if self.active_key.is_some() {
            self.transport
                .send_frame(&[&KEY_SWITCH])
                .map_err(Error::Transport)?;
        }

        let key = &self.keys[index];
        debug!("registering key {} ({})", key.id, key.uri);

        // lengths were checked in new
        self.transport
            .send_frame(&[
                &[key.id.len() as u8],
                key.id.as_bytes(),
                &[key.uri.len() as u8],
                key.uri.as_bytes(),
            ])
            .map_err(Error::Transport)?;

        self.active_key = Some(index);
        Ok(())
    }

    /// Decrypt one sample and append its plaintext to `out`.
    ///
    /// Only the 16-byte aligned prefix goes over the wire. The trailing
    /// clear bytes are appended as they are. A sample without an aligned
    /// prefix touches neither the wire nor the key state.
    pub fn decrypt_sample(
        &mut self,
        number: usize,
        sample: &Sample,
        out: &mut Vec<u8>,
    ) -> Result<()> {
        let prefix = sample.encrypted_len();

        if prefix > 0 {
            let key = self.key_index(sample.description_index);

            if self.active_key != Some(key) {
                self.register(key)?;
            }

            let len = frame_len(number, prefix)?;

            trace!("sample {number}: sending {prefix} bytes");
            self.transport
                .send_frame(&[&len.to_le_bytes(), &sample.data[..prefix]])
                .map_err(Error::Transport)?;

            let start = out.len();
            out.resize(start + prefix, 0);
            let received = self
                .transport
                .recv_exact(&mut out[start..])
                .map_err(Error::Transport)?;

            if received != prefix {
                return Err(Error::ShortTransportRead {
                    expected: prefix,
                    actual: received,
                    sample: number,
                });
            }
        }

        out.extend_from_slice(&sample.data[prefix..]);
        Ok(())
    }

    /// Decrypt `samples` in order into one buffer. `progress` is called
    /// after every sample with the number of samples done.
    pub fn decrypt_samples<F: FnMut(usize)>(
        &mut self,
        samples: &[Sample],
        mut progress: F,
    ) -> Result<Vec<u8>> {
        let total = samples.iter().map(|x| x.len()).sum();
        let mut plaintext = Vec::with_capacity(total);

        for (i, sample) in samples.iter().enumerate() {
            self.decrypt_sample(i, sample, &mut plaintext)?;
            progress(i + 1);
        }

        Ok(plaintext)
    }

    /// Send the terminator and hand back the transport.
    pub fn close(mut self) -> Result<T> {
        self.transport
            .send_frame(&[&CLOSE])
            .map_err(Error::Transport)?;
        Ok(self.transport)
    }
}
