//! Mock decryption peers and synthetic inputs for tests.
//!
//! The mock peer understands the full wire protocol and "decrypts" by
//! xor-ing every ciphertext byte with [`MOCK_MASK`].

use crate::session::DecryptionTransport;
use amdecrypt_mp4::Reader;
use std::{
    collections::VecDeque,
    io::{self, Read, Write},
    net::{SocketAddr, TcpListener},
    thread::{self, JoinHandle},
};

pub const MOCK_MASK: u8 = 0x5A;

/// What the peer saw, in order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PeerEvent {
    Register { id: String, uri: String },
    /// Zero-length ciphertext frame announcing a new registration.
    Switch,
    Cipher { key_id: String, len: usize },
    Close,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
enum State {
    #[default]
    Register,
    Frame,
    Closed,
    HungUp,
}

enum Message {
    Register { id: String, uri: String },
    Switch,
    Cipher(Vec<u8>),
    Close,
}

/// Incremental parser for the client side of the protocol.
#[derive(Clone, Debug, Default)]
pub struct MockPeer {
    buffer: Vec<u8>,
    state: State,
    key_id: Option<String>,
    events: Vec<PeerEvent>,
    answered: usize,
    hang_up_after: Option<usize>,
}

impl MockPeer {
    /// Stop answering after `frames` ciphertext frames.
    pub fn hang_up_after(mut self, frames: usize) -> Self {
        self.hang_up_after = Some(frames);
        self
    }

    pub fn events(&self) -> &[PeerEvent] {
        &self.events
    }

    /// Whether the peer stopped talking, either closed or hung up.
    pub fn is_done(&self) -> bool {
        matches!(self.state, State::Closed | State::HungUp)
    }

    /// Consume client bytes and return the bytes to answer with.
    pub fn feed(&mut self, data: &[u8]) -> Vec<u8> {
        self.buffer.extend_from_slice(data);
        let mut reply = Vec::new();

        while !self.is_done() {
            let Some((consumed, message)) = self.parse() else {
                break;
            };
            self.buffer.drain(..consumed);

            match message {
                Message::Register { id, uri } => {
                    self.key_id = Some(id.clone());
                    self.events.push(PeerEvent::Register { id, uri });
                    self.state = State::Frame;
                }
                Message::Switch => {
                    self.events.push(PeerEvent::Switch);
                    self.state = State::Register;
                }
                Message::Close => {
                    // the terminator starts like a key switch
                    if self.events.last() == Some(&PeerEvent::Switch) {
                        self.events.pop();
                    }
                    self.events.push(PeerEvent::Close);
                    self.state = State::Closed;
                }
                Message::Cipher(data) => {
                    if self.hang_up_after == Some(self.answered) {
                        self.state = State::HungUp;
                        break;
                    }

                    self.events.push(PeerEvent::Cipher {
                        key_id: self.key_id.clone().unwrap_or_default(),
                        len: data.len(),
                    });
                    reply.extend(data.iter().map(|x| x ^ MOCK_MASK));
                    self.answered += 1;
                }
            }
        }

        reply
    }

    fn parse(&self) -> Option<(usize, Message)> {
        let mut reader = Reader::new_little_endian(&self.buffer);

        let message = match self.state {
            State::Register => {
                let id_len = reader.read_u8().ok()?;

                if id_len == 0 {
                    Message::Close
                } else {
                    let id = reader.read_bytes_u8(id_len as usize).ok()?;
                    let uri_len = reader.read_u8().ok()?;
                    let uri = reader.read_bytes_u8(uri_len as usize).ok()?;

                    Message::Register {
                        id: String::from_utf8_lossy(id).into_owned(),
                        uri: String::from_utf8_lossy(uri).into_owned(),
                    }
                }
            }
            State::Frame => match reader.read_u32().ok()? {
                0 => Message::Switch,
                len => Message::Cipher(reader.read_bytes_u8(len as usize).ok()?.to_vec()),
            },
            State::Closed | State::HungUp => return None,
        };

        Some((reader.get_position() as usize, message))
    }
}

/// In-memory transport wired straight into a [`MockPeer`].
#[derive(Debug, Default)]
pub struct MockTransport {
    pub peer: MockPeer,
    /// Every byte the client sent.
    pub sent: Vec<u8>,
    pending: VecDeque<u8>,
}

impl MockTransport {
    pub fn new(peer: MockPeer) -> Self {
        Self {
            peer,
            ..Default::default()
        }
    }
}

impl DecryptionTransport for MockTransport {
    fn send_frame(&mut self, parts: &[&[u8]]) -> io::Result<()> {
        for part in parts {
            self.sent.extend_from_slice(part);
            let reply = self.peer.feed(part);
            self.pending.extend(reply);
        }

        Ok(())
    }

    fn recv_exact(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = buf.len().min(self.pending.len());

        for (slot, byte) in buf.iter_mut().zip(self.pending.drain(..n)) {
            *slot = byte;
        }

        Ok(n)
    }
}

/// Serve one connection per peer, in order, on a loopback port. The handle
/// yields each peer's events once every connection ended.
pub fn spawn_tcp_peer(
    peers: Vec<MockPeer>,
) -> io::Result<(SocketAddr, JoinHandle<io::Result<Vec<Vec<PeerEvent>>>>)> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let addr = listener.local_addr()?;

    let handle = thread::spawn(move || {
        let mut events = Vec::new();

        for mut peer in peers {
            let (mut stream, _) = listener.accept()?;
            let mut buf = vec![0; 64 * 1024];

            while !peer.is_done() {
                let n = stream.read(&mut buf)?;

                if n == 0 {
                    break;
                }

                let reply = peer.feed(&buf[..n]);
                stream.write_all(&reply)?;
            }

            events.push(peer.events().to_vec());
        }

        Ok(events)
    });

    Ok((addr, handle))
}

/// Builds small fragmented songs: an `enca`/`alac` movie box and one
/// `moof`/`mdat` pair per fragment.
#[derive(Clone, Debug)]
pub struct SongBuilder {
    timescale: u32,
    movie: bool,
    fragments: Vec<(u32, Vec<(usize, u32)>)>,
}

impl Default for SongBuilder {
    fn default() -> Self {
        Self {
            timescale: 44100,
            movie: true,
            fragments: Vec::new(),
        }
    }
}

impl SongBuilder {
    pub fn timescale(mut self, timescale: u32) -> Self {
        self.timescale = timescale;
        self
    }

    /// Leave out the movie box, forcing the fallback sample description.
    pub fn without_movie(mut self) -> Self {
        self.movie = false;
        self
    }

    /// Add a fragment of `(size, duration)` samples using the 1-based
    /// sample description index `description_index`.
    pub fn fragment(mut self, description_index: u32, samples: &[(usize, u32)]) -> Self {
        self.fragments.push((description_index, samples.to_vec()));
        self
    }

    /// Sample bytes count up from 0 across the whole song, wrapping at 256.
    pub fn build(&self) -> Vec<u8> {
        let mut data = bx(b"ftyp", b"M4A \0\0\0\0M4A mp42isom");

        if self.movie {
            data.extend(movie(self.timescale));
        }

        let mut counter = 0u8;

        for (description_index, samples) in &self.fragments {
            let mut trun = words(&[0x300, samples.len() as u32]);
            let mut media = Vec::new();

            for (size, duration) in samples {
                trun.extend(words(&[*duration, *size as u32]));
                for _ in 0..*size {
                    media.push(counter);
                    counter = counter.wrapping_add(1);
                }
            }

            let mut traf = bx(b"tfhd", &words(&[0x02, 1, *description_index]));
            traf.extend(bx(b"trun", &trun));

            data.extend(bx(b"moof", &bx(b"traf", &traf)));
            data.extend(bx(b"mdat", &media));
        }

        data
    }
}

fn bx(fourcc: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut data = ((payload.len() + 8) as u32).to_be_bytes().to_vec();
    data.extend_from_slice(fourcc);
    data.extend_from_slice(payload);
    data
}

fn words(values: &[u32]) -> Vec<u8> {
    values.iter().flat_map(|x| x.to_be_bytes()).collect()
}

fn movie(timescale: u32) -> Vec<u8> {
    let mut entry = vec![0, 0, 0, 0, 0, 0, 0, 1];
    entry.extend_from_slice(&[0; 8]);
    entry.extend(words(&[(2 << 16) | 16, 0, timescale << 16]));
    entry.extend(bx(b"alac", &[0; 28]));
    entry.extend(bx(b"sinf", &bx(b"frma", b"alac")));

    let mut stsd = words(&[0, 1]);
    stsd.extend(bx(b"enca", &entry));

    let mut mdhd = words(&[0, 0, 0, timescale, 0]);
    mdhd.extend_from_slice(&[0x55, 0xC4, 0, 0]);

    let mut mdia = bx(b"mdhd", &mdhd);
    mdia.extend(bx(b"minf", &bx(b"stbl", &bx(b"stsd", &stsd))));

    bx(b"moov", &bx(b"trak", &bx(b"mdia", &mdia)))
}
