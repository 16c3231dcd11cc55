//! COPY FROM STDIN and COPY TO STDOUT over a synchronous connection.

use std::io::{Read, Write};

use super::Conn;
use crate::error::{Error, Result};
use crate::protocol::frontend::write_copy_data;
use crate::state::{CopyInStateMachine, CopyOutStateMachine};

/// Bytes read from a source per CopyData message.
const CHUNK_SIZE: usize = 64 * 1024;

/// An open COPY FROM STDIN.
///
/// Dropping it before [`finish`](Self::finish) or [`fail`](Self::fail)
/// aborts the COPY, so the connection is always left usable.
pub struct CopyIn<'a> {
    conn: &'a mut Conn,
    columns: usize,
    done: bool,
}

impl CopyIn<'_> {
    /// Number of columns the server expects per row.
    pub fn column_count(&self) -> usize {
        self.columns
    }

    /// Send a chunk of COPY data. Chunks need not align with rows.
    pub fn send(&mut self, data: &[u8]) -> Result<()> {
        let conn = &mut *self.conn;
        conn.buffer_set.write_buffer.clear();
        write_copy_data(&mut conn.buffer_set.write_buffer, data);
        conn.send_buffer()
    }

    /// Send CopyDone and return the number of rows copied.
    pub fn finish(mut self) -> Result<u64> {
        self.done = true;
        let conn = &mut *self.conn;
        let mut state_machine = CopyInStateMachine::finish(&mut conn.buffer_set);
        conn.drive(&mut state_machine)?;
        tracing::debug!(rows = state_machine.rows(), "COPY FROM STDIN finished");
        Ok(state_machine.rows())
    }

    /// Abort with CopyFail. The server discards everything sent.
    pub fn fail(mut self, reason: &str) -> Result<()> {
        self.done = true;
        abort(self.conn, reason)
    }
}

impl Drop for CopyIn<'_> {
    fn drop(&mut self) {
        if !self.done
            && !self.conn.is_broken()
            && let Err(e) = abort(self.conn, "COPY abandoned by the client")
        {
            tracing::warn!(error = %e, "failed to abort COPY");
        }
    }
}

fn abort(conn: &mut Conn, reason: &str) -> Result<()> {
    let mut state_machine = CopyInStateMachine::fail(&mut conn.buffer_set, reason);
    conn.drive(&mut state_machine)
}

impl Conn {
    /// Start a `COPY ... FROM STDIN`.
    ///
    /// ```ignore
    /// let mut copy = conn.copy_in("COPY t (a, b) FROM STDIN")?;
    /// copy.send(b"1\tone\n2\ttwo\n")?;
    /// let rows = copy.finish()?;
    /// ```
    pub fn copy_in(&mut self, sql: &str) -> Result<CopyIn<'_>> {
        self.check_open()?;
        self.begin_if_needed()?;
        let mut state_machine = CopyInStateMachine::start(&mut self.buffer_set, sql);
        self.drive(&mut state_machine)?;
        Ok(CopyIn {
            columns: state_machine.column_count(),
            conn: self,
            done: false,
        })
    }

    /// COPY `data` in one go.
    pub fn copy_in_bytes(&mut self, sql: &str, data: &[u8]) -> Result<u64> {
        let mut copy = self.copy_in(sql)?;
        for chunk in data.chunks(CHUNK_SIZE) {
            copy.send(chunk)?;
        }
        copy.finish()
    }

    /// COPY everything `reader` yields.
    ///
    /// A read error aborts the COPY with CopyFail and is returned as
    /// [`Error::Io`]; the connection stays usable.
    pub fn copy_in_from_reader<R: Read>(&mut self, sql: &str, mut reader: R) -> Result<u64> {
        let mut copy = self.copy_in(sql)?;
        let mut chunk = vec![0u8; CHUNK_SIZE];
        loop {
            match reader.read(&mut chunk) {
                Ok(0) => return copy.finish(),
                Ok(n) => copy.send(&chunk[..n])?,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => {
                    copy.fail(&format!("reading COPY data failed: {}", e))?;
                    return Err(Error::Io(e));
                }
            }
        }
    }

    /// Run a `COPY ... TO STDOUT` into `writer`, returning the row count.
    ///
    /// A write error stops writing but the rest of the data is still read
    /// off the connection before the error is returned.
    pub fn copy_out<W: Write>(&mut self, sql: &str, mut writer: W) -> Result<u64> {
        self.check_open()?;
        self.begin_if_needed()?;
        let mut write_error = None;
        let sink = |data: &[u8]| -> Result<()> {
            if write_error.is_none()
                && let Err(e) = writer.write_all(data)
            {
                write_error = Some(e);
            }
            Ok(())
        };
        let mut state_machine = CopyOutStateMachine::new(&mut self.buffer_set, sql, sink);
        self.drive(&mut state_machine)?;
        let rows = state_machine.rows();
        if let Some(e) = write_error {
            return Err(Error::Io(e));
        }
        writer.flush()?;
        tracing::debug!(rows, "COPY TO STDOUT finished");
        Ok(rows)
    }

    /// Run a `COPY ... TO STDOUT` and collect the CopyData payloads.
    pub fn copy_out_chunks(&mut self, sql: &str) -> Result<Vec<Vec<u8>>> {
        self.check_open()?;
        self.begin_if_needed()?;
        let mut chunks = Vec::new();
        let sink = |data: &[u8]| -> Result<()> {
            chunks.push(data.to_vec());
            Ok(())
        };
        let mut state_machine = CopyOutStateMachine::new(&mut self.buffer_set, sql, sink);
        self.drive(&mut state_machine)?;
        Ok(chunks)
    }
}
