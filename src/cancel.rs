//! Out-of-band query cancellation.

use std::io::Write;
use std::net::TcpStream;
use std::os::unix::net::UnixStream;

use crate::error::Result;
use crate::opts::Opts;
use crate::protocol::frontend::write_cancel_request;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Target {
    Tcp { host: String, port: u16 },
    Unix(String),
}

/// Everything needed to cancel the statement running on one session.
///
/// Can be sent to another thread and used while the session is busy. The
/// cancelled statement fails with SQLSTATE `57014`, unless it finished
/// first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancelToken {
    target: Target,
    pid: u32,
    secret: u32,
}

impl CancelToken {
    pub(crate) fn new(opts: &Opts, pid: u32, secret: u32) -> Self {
        let target = match opts.socket_path() {
            Some(path) => Target::Unix(path),
            None => Target::Tcp {
                host: opts.host.clone(),
                port: opts.port,
            },
        };
        Self {
            target,
            pid,
            secret,
        }
    }

    /// Backend process the token targets.
    pub fn process_id(&self) -> u32 {
        self.pid
    }

    fn request(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(16);
        write_cancel_request(&mut buf, self.pid, self.secret);
        buf
    }

    /// Open a fresh connection, send CancelRequest and close it.
    pub fn cancel(&self) -> Result<()> {
        tracing::debug!(pid = self.pid, "sending cancel request");
        let request = self.request();
        match &self.target {
            Target::Tcp { host, port } => {
                let mut stream = TcpStream::connect((host.as_str(), *port))?;
                stream.write_all(&request)?;
                stream.flush()?;
            }
            Target::Unix(path) => {
                let mut stream = UnixStream::connect(path)?;
                stream.write_all(&request)?;
                stream.flush()?;
            }
        }
        Ok(())
    }

    /// [`cancel`](Self::cancel) over tokio sockets.
    #[cfg(feature = "tokio")]
    pub async fn cancel_async(&self) -> Result<()> {
        use tokio::io::AsyncWriteExt;

        tracing::debug!(pid = self.pid, "sending cancel request");
        let request = self.request();
        match &self.target {
            Target::Tcp { host, port } => {
                let mut stream = tokio::net::TcpStream::connect((host.as_str(), *port)).await?;
                stream.write_all(&request).await?;
                stream.flush().await?;
            }
            Target::Unix(path) => {
                let mut stream = tokio::net::UnixStream::connect(path).await?;
                stream.write_all(&request).await?;
                stream.flush().await?;
            }
        }
        Ok(())
    }
}
