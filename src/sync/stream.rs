use std::io::{BufReader, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::os::unix::net::UnixStream;
use std::time::Duration;

#[cfg(feature = "sync-tls")]
use native_tls::TlsStream;

use crate::buffer_set::BufferSet;
use crate::error::{Error, Result};
use crate::opts::Opts;
use crate::protocol::codec::{FRAME_HEADER_LEN, parse_frame_header};

pub enum Stream {
    Tcp(BufReader<TcpStream>),
    #[cfg(feature = "sync-tls")]
    Tls(Box<BufReader<TlsStream<TcpStream>>>),
    Unix(BufReader<UnixStream>),
}

impl Stream {
    pub fn tcp(stream: TcpStream) -> Self {
        Self::Tcp(BufReader::new(stream))
    }

    pub fn unix(stream: UnixStream) -> Self {
        Self::Unix(BufReader::new(stream))
    }

    /// Open the socket named by `opts`, honoring `connect_timeout`.
    pub fn connect(opts: &Opts) -> Result<Self> {
        if let Some(path) = opts.socket_path() {
            return Ok(Self::unix(UnixStream::connect(path)?));
        }
        if opts.host.is_empty() {
            return Err(Error::InvalidUsage("host is empty".into()));
        }
        let tcp = match opts.connect_timeout {
            None => TcpStream::connect((opts.host.as_str(), opts.port))?,
            Some(timeout) => connect_with_timeout(&opts.host, opts.port, timeout)?,
        };
        tcp.set_nodelay(true)?;
        Ok(Self::tcp(tcp))
    }

    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> std::io::Result<()> {
        match self {
            Stream::Tcp(r) => r.get_ref().set_read_timeout(timeout),
            #[cfg(feature = "sync-tls")]
            Stream::Tls(r) => r.get_ref().get_ref().set_read_timeout(timeout),
            Stream::Unix(r) => r.get_ref().set_read_timeout(timeout),
        }
    }

    /// Run the TLS handshake over a plain TCP stream.
    ///
    /// Returns the upgraded stream and the DER of the peer certificate.
    #[cfg(feature = "sync-tls")]
    pub fn upgrade_tls(self, opts: &Opts) -> Result<(Self, Option<Vec<u8>>)> {
        let tcp = match self {
            Stream::Tcp(r) => r.into_inner(),
            _ => return Err(Error::InvalidUsage("TLS is only negotiated over TCP".into())),
        };
        let connector = crate::tls::connector(opts.ssl_mode)?;
        let tls = connector.connect(&opts.host, tcp).map_err(|e| match e {
            native_tls::HandshakeError::Failure(e) => Error::Tls(e),
            native_tls::HandshakeError::WouldBlock(_) => {
                Error::Io(std::io::Error::from(std::io::ErrorKind::WouldBlock))
            }
        })?;
        let der = crate::tls::peer_certificate_der(&tls)?;
        Ok((Stream::Tls(Box::new(BufReader::new(tls))), der))
    }

    pub fn read_exact(&mut self, buf: &mut [u8]) -> std::io::Result<()> {
        match self {
            Stream::Tcp(r) => r.read_exact(buf),
            #[cfg(feature = "sync-tls")]
            Stream::Tls(r) => r.read_exact(buf),
            Stream::Unix(r) => r.read_exact(buf),
        }
    }

    pub fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        match self {
            Stream::Tcp(r) => r.get_mut().write_all(buf),
            #[cfg(feature = "sync-tls")]
            Stream::Tls(r) => r.get_mut().write_all(buf),
            Stream::Unix(r) => r.get_mut().write_all(buf),
        }
    }

    pub fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Stream::Tcp(r) => r.get_mut().flush(),
            #[cfg(feature = "sync-tls")]
            Stream::Tls(r) => r.get_mut().flush(),
            Stream::Unix(r) => r.get_mut().flush(),
        }
    }

    /// Read one backend message into `buffer_set`.
    pub fn read_message(&mut self, buffer_set: &mut BufferSet, max_message_size: usize) -> Result<()> {
        let mut header = [0u8; FRAME_HEADER_LEN];
        self.read_exact(&mut header).map_err(Error::from_read)?;
        let (tag, len) = parse_frame_header(&header, max_message_size)?;
        buffer_set.type_byte = tag;
        buffer_set.read_buffer.clear();
        buffer_set.read_buffer.resize(len, 0);
        self.read_exact(&mut buffer_set.read_buffer)
            .map_err(Error::from_read)?;
        tracing::trace!(tag = %(tag as char), len, "received message");
        Ok(())
    }

    /// Read the single-byte answer to SSLRequest.
    pub fn read_byte(&mut self) -> Result<u8> {
        let mut byte = [0u8; 1];
        self.read_exact(&mut byte).map_err(Error::from_read)?;
        Ok(byte[0])
    }
}

fn connect_with_timeout(host: &str, port: u16, timeout: Duration) -> Result<TcpStream> {
    let mut last_error = None;
    for addr in (host, port).to_socket_addrs()? {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => last_error = Some(e),
        }
    }
    Err(match last_error {
        Some(e) if e.kind() == std::io::ErrorKind::TimedOut => Error::Timeout,
        Some(e) => Error::Io(e),
        None => Error::InvalidUsage(format!("{} did not resolve to any address", host)),
    })
}
