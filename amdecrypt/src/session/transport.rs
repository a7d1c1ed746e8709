use crate::{DecryptOptions, Error, Result};
use log::{debug, warn};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::{
    io::{self, BufReader, BufWriter, ErrorKind, Read, Write},
    net::{SocketAddr, TcpStream},
    time::Duration,
};

/// Byte pipe to a decryption peer.
pub trait DecryptionTransport {
    /// Send the concatenation of `parts` as one message and flush it.
    fn send_frame(&mut self, parts: &[&[u8]]) -> io::Result<()>;

    /// Read until `buf` is full or the peer closes. Returns the number of
    /// bytes read, which is less than `buf.len()` only at end of stream.
    fn recv_exact(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

impl<T: DecryptionTransport + ?Sized> DecryptionTransport for &mut T {
    fn send_frame(&mut self, parts: &[&[u8]]) -> io::Result<()> {
        (**self).send_frame(parts)
    }

    fn recv_exact(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (**self).recv_exact(buf)
    }
}

/// Blocking TCP connection with Nagle disabled and buffered halves.
pub struct TcpTransport {
    reader: BufReader<TcpStream>,
    writer: BufWriter<TcpStream>,
}

impl TcpTransport {
    pub fn connect(options: &DecryptOptions) -> Result<Self> {
        let addrs = options.socket_addrs()?;
        let stream = connect_any(&addrs, options.timeout, Some(options.socket_buffer_size))
            .map_err(Error::Transport)?;

        Self::from_stream(stream, options.timeout, options.socket_buffer_size)
            .map_err(Error::Transport)
    }

    pub fn from_stream(
        stream: TcpStream,
        timeout: Duration,
        buffer_size: usize,
    ) -> io::Result<Self> {
        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(timeout))?;
        stream.set_write_timeout(Some(timeout))?;

        Ok(Self {
            reader: BufReader::with_capacity(buffer_size, stream.try_clone()?),
            writer: BufWriter::with_capacity(buffer_size, stream),
        })
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.writer.get_ref().peer_addr()
    }
}

impl DecryptionTransport for TcpTransport {
    fn send_frame(&mut self, parts: &[&[u8]]) -> io::Result<()> {
        for part in parts {
            self.writer.write_all(part)?;
        }

        self.writer.flush()
    }

    fn recv_exact(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut filled = 0;

        while filled < buf.len() {
            match self.reader.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => (),
                Err(e) => return Err(e),
            }
        }

        Ok(filled)
    }
}

/// Connect to the first of `addrs` that accepts, returning the last error
/// when none does. `buffer_size` sets the kernel send and receive buffers
/// before connecting.
pub fn connect_any(
    addrs: &[SocketAddr],
    timeout: Duration,
    buffer_size: Option<usize>,
) -> io::Result<TcpStream> {
    let mut last_error = io::Error::new(ErrorKind::InvalidInput, "no addresses to connect to");

    for addr in addrs {
        debug!("connecting to decryption peer at {addr}");

        match connect_socket(*addr, timeout, buffer_size) {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                debug!("{addr}: {e}");
                last_error = e;
            }
        }
    }

    Err(last_error)
}

fn connect_socket(
    addr: SocketAddr,
    timeout: Duration,
    buffer_size: Option<usize>,
) -> io::Result<TcpStream> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;

    if let Some(size) = buffer_size {
        // the kernel may clamp or double the value
        if let Err(e) = socket
            .set_send_buffer_size(size)
            .and_then(|_| socket.set_recv_buffer_size(size))
        {
            warn!("could not set {size} byte socket buffers: {e}");
        }
    }

    socket.connect_timeout(&SockAddr::from(addr), timeout)?;
    Ok(socket.into())
}

/// Check that something accepts connections at `endpoint`. Nothing is sent.
pub fn probe(endpoint: &str, timeout: Duration) -> Result<()> {
    let addrs = crate::resolve_endpoint(endpoint)?;
    let stream = connect_any(&addrs, timeout, None).map_err(Error::Transport)?;
    let peer = stream.peer_addr().map_err(Error::Transport)?;
    debug!("decryption peer at {peer} is reachable");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    fn closed_port() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    }

    #[test]
    fn test_probe() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let endpoint = listener.local_addr().unwrap().to_string();

        assert!(probe(&endpoint, Duration::from_secs(5)).is_ok());
        assert!(matches!(
            probe(&closed_port().to_string(), Duration::from_secs(5)),
            Err(Error::Transport(_))
        ));
        assert!(matches!(
            probe("no-port", Duration::from_secs(5)),
            Err(Error::InvalidEndpoint(_))
        ));
    }

    #[test]
    fn test_connect_any_falls_through() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let open = listener.local_addr().unwrap();

        let addrs = [closed_port(), open];
        let stream = connect_any(&addrs, Duration::from_secs(5), Some(256 * 1024)).unwrap();
        assert_eq!(stream.peer_addr().unwrap(), open);

        assert!(connect_any(&[closed_port()], Duration::from_secs(5), None).is_err());
        assert_eq!(
            connect_any(&[], Duration::from_secs(5), None).unwrap_err().kind(),
            ErrorKind::InvalidInput
        );
    }

    #[test]
    fn test_connect_with_options() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let options = DecryptOptions::default().endpoint(addr.to_string());

        let transport = TcpTransport::connect(&options).unwrap();
        assert_eq!(transport.peer_addr().unwrap(), addr);
    }
}
