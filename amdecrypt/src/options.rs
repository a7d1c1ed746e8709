use crate::{Error, Result};
use std::{
    net::{SocketAddr, ToSocketAddrs},
    path::PathBuf,
    time::Duration,
};

pub const DEFAULT_ENDPOINT: &str = "127.0.0.1:10020";
pub const DEFAULT_NORMALIZER: &str = "mp4decrypt";

/// Settings shared by every song decrypted against one peer.
#[derive(Clone, Debug)]
pub struct DecryptOptions {
    /// Decryption peer as `host:port`.
    pub endpoint: String,
    /// Normalizer executable. An empty path disables normalization.
    pub normalizer: PathBuf,
    /// Connect, read and write timeout of the peer connection.
    pub timeout: Duration,
    /// Kernel send and receive buffer size of the socket, also the capacity
    /// of the buffered reader and writer around it.
    pub socket_buffer_size: usize,
    /// How many times the whole pipeline is re-run after a transport failure.
    pub retries: u32,
    /// Keep the un-normalized file next to the output.
    pub keep_temp: bool,
}

impl Default for DecryptOptions {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_owned(),
            normalizer: PathBuf::from(DEFAULT_NORMALIZER),
            timeout: Duration::from_secs(120),
            socket_buffer_size: 256 * 1024,
            retries: 0,
            keep_temp: false,
        }
    }
}

impl DecryptOptions {
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn normalizer(mut self, normalizer: impl Into<PathBuf>) -> Self {
        self.normalizer = normalizer.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn keep_temp(mut self, keep_temp: bool) -> Self {
        self.keep_temp = keep_temp;
        self
    }

    pub fn socket_addrs(&self) -> Result<Vec<SocketAddr>> {
        resolve_endpoint(&self.endpoint)
    }
}

/// One song to decrypt.
#[derive(Clone, Debug)]
pub struct Job {
    /// Registered as the key id of the song key.
    pub track_id: String,
    /// `skd://` URI of the song key.
    pub key_uri: String,
    pub input: PathBuf,
    pub output: PathBuf,
}

impl Job {
    /// Where the muxed file is written before normalization.
    pub fn temp_path(&self) -> PathBuf {
        let mut path = self.output.clone().into_os_string();
        path.push(".tmp.m4a");
        path.into()
    }
}

/// Check that `endpoint` is `host:port` and resolve it. IPv4 addresses come
/// first, a host name may resolve to `::1` ahead of `127.0.0.1`.
pub fn resolve_endpoint(endpoint: &str) -> Result<Vec<SocketAddr>> {
    let invalid = || Error::InvalidEndpoint(endpoint.to_owned());
    let (host, port) = endpoint.rsplit_once(':').ok_or_else(invalid)?;

    if host.is_empty() || port.parse::<u16>().is_err() {
        return Err(invalid());
    }

    let mut addrs = endpoint
        .to_socket_addrs()
        .map_err(|_| invalid())?
        .collect::<Vec<_>>();

    if addrs.is_empty() {
        return Err(invalid());
    }

    addrs.sort_by_key(|x| x.is_ipv6());
    Ok(addrs)
}
