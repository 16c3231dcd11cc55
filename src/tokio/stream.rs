//! Async stream abstraction for tokio.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::UnixStream;

#[cfg(feature = "tokio-tls")]
use tokio_native_tls::TlsStream;

use crate::buffer_set::BufferSet;
use crate::error::{Error, Result};
use crate::opts::Opts;
use crate::protocol::codec::{FRAME_HEADER_LEN, parse_frame_header};

pub enum Stream {
    Tcp(BufReader<TcpStream>),
    #[cfg(feature = "tokio-tls")]
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
    pub async fn connect(opts: &Opts) -> Result<Self> {
        if let Some(path) = opts.socket_path() {
            let unix = with_timeout(opts.connect_timeout, UnixStream::connect(path)).await?;
            return Ok(Self::unix(unix));
        }
        if opts.host.is_empty() {
            return Err(Error::InvalidUsage("host is empty".into()));
        }
        let connect = TcpStream::connect((opts.host.as_str(), opts.port));
        let tcp = with_timeout(opts.connect_timeout, connect).await?;
        tcp.set_nodelay(true)?;
        Ok(Self::tcp(tcp))
    }

    /// Run the TLS handshake over a plain TCP stream.
    ///
    /// Returns the upgraded stream and the DER of the peer certificate.
    #[cfg(feature = "tokio-tls")]
    pub async fn upgrade_tls(self, opts: &Opts) -> Result<(Self, Option<Vec<u8>>)> {
        let tcp = match self {
            Stream::Tcp(r) => r.into_inner(),
            _ => return Err(Error::InvalidUsage("TLS is only negotiated over TCP".into())),
        };
        let connector = tokio_native_tls::TlsConnector::from(crate::tls::connector(opts.ssl_mode)?);
        let tls = connector.connect(&opts.host, tcp).await?;
        let der = crate::tls::peer_certificate_der(tls.get_ref())?;
        Ok((Stream::Tls(Box::new(BufReader::new(tls))), der))
    }

    pub async fn read_exact(&mut self, buf: &mut [u8]) -> std::io::Result<()> {
        match self {
            Stream::Tcp(r) => r.read_exact(buf).await.map(drop),
            #[cfg(feature = "tokio-tls")]
            Stream::Tls(r) => r.read_exact(buf).await.map(drop),
            Stream::Unix(r) => r.read_exact(buf).await.map(drop),
        }
    }

    pub async fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        match self {
            Stream::Tcp(r) => r.get_mut().write_all(buf).await,
            #[cfg(feature = "tokio-tls")]
            Stream::Tls(r) => r.get_mut().write_all(buf).await,
            Stream::Unix(r) => r.get_mut().write_all(buf).await,
        }
    }

    pub async fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Stream::Tcp(r) => r.get_mut().flush().await,
            #[cfg(feature = "tokio-tls")]
            Stream::Tls(r) => r.get_mut().flush().await,
            Stream::Unix(r) => r.get_mut().flush().await,
        }
    }

    /// Read one backend message into `buffer_set`.
    ///
    /// `read_timeout` bounds the whole message, header and payload.
    pub async fn read_message(
        &mut self,
        buffer_set: &mut BufferSet,
        max_message_size: usize,
        read_timeout: Option<Duration>,
    ) -> Result<()> {
        with_timeout(read_timeout, self.read_message_inner(buffer_set, max_message_size)).await
    }

    async fn read_message_inner(
        &mut self,
        buffer_set: &mut BufferSet,
        max_message_size: usize,
    ) -> Result<()> {
        let mut header = [0u8; FRAME_HEADER_LEN];
        self.read_exact(&mut header).await.map_err(Error::from_read)?;
        let (tag, len) = parse_frame_header(&header, max_message_size)?;
        buffer_set.type_byte = tag;
        buffer_set.read_buffer.clear();
        buffer_set.read_buffer.resize(len, 0);
        self.read_exact(&mut buffer_set.read_buffer)
            .await
            .map_err(Error::from_read)?;
        tracing::trace!(tag = %(tag as char), len, "received message");
        Ok(())
    }

    /// Read the single-byte answer to SSLRequest.
    pub async fn read_byte(&mut self) -> Result<u8> {
        let mut byte = [0u8; 1];
        self.read_exact(&mut byte).await.map_err(Error::from_read)?;
        Ok(byte[0])
    }
}

async fn with_timeout<T, E, F>(timeout: Option<Duration>, future: F) -> Result<T>
where
    F: Future<Output = std::result::Result<T, E>>,
    Error: From<E>,
{
    match timeout {
        None => Ok(future.await?),
        Some(limit) => match tokio::time::timeout(limit, future).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(Error::Timeout),
        },
    }
}
