//! COPY over an asynchronous connection.

use std::sync::{Mutex, PoisonError};

use tokio::io::{AsyncWrite, AsyncWriteExt};

use super::Conn;
use crate::error::{Error, Result};
use crate::protocol::frontend::write_copy_data;
use crate::state::{CopyInStateMachine, CopyOutStateMachine, StateMachine};

const CHUNK_SIZE: usize = 64 * 1024;

impl Conn {
    /// Run a `COPY ... FROM STDIN` fed with `data`, returning the row count.
    pub async fn copy_in_bytes(&mut self, sql: &str, data: &[u8]) -> Result<u64> {
        self.check_open()?;
        self.begin_if_needed().await?;
        let mut start = CopyInStateMachine::start(&mut self.buffer_set, sql);
        self.drive(&mut start).await?;

        for chunk in data.chunks(CHUNK_SIZE) {
            self.buffer_set.write_buffer.clear();
            write_copy_data(&mut self.buffer_set.write_buffer, chunk);
            self.send_buffer().await?;
        }

        let mut finish = CopyInStateMachine::finish(&mut self.buffer_set);
        self.drive(&mut finish).await?;
        tracing::debug!(rows = finish.rows(), "COPY FROM STDIN finished");
        Ok(finish.rows())
    }

    /// Run a `COPY ... TO STDOUT` into `writer`, returning the row count.
    ///
    /// Data is written as each message arrives. A write error stops writing
    /// but the response is still drained before the error is returned.
    pub async fn copy_out<W: AsyncWrite + Unpin>(&mut self, sql: &str, mut writer: W) -> Result<u64> {
        self.check_open()?;
        self.begin_if_needed().await?;
        let pending = Mutex::new(Vec::<Vec<u8>>::new());
        let sink = |data: &[u8]| -> Result<()> {
            pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(data.to_vec());
            Ok(())
        };
        let mut state_machine = CopyOutStateMachine::new(&mut self.buffer_set, sql, sink);
        let mut write_error = None;

        let result = loop {
            let action = match state_machine.step(&mut self.buffer_set) {
                Ok(action) => action,
                Err(e) => break Err(e),
            };
            let chunks = std::mem::take(&mut *pending.lock().unwrap_or_else(PoisonError::into_inner));
            for chunk in chunks {
                if write_error.is_none()
                    && let Err(e) = writer.write_all(&chunk).await
                {
                    write_error = Some(e);
                }
            }
            match self.perform(action).await {
                Ok(true) => break Ok(()),
                Ok(false) => {}
                Err(e) => break Err(e),
            }
        };
        self.settle(state_machine.ready_status(), result)?;
        let rows = state_machine.rows();

        if let Some(e) = write_error {
            return Err(Error::Io(e));
        }
        writer.flush().await?;
        tracing::debug!(rows, "COPY TO STDOUT finished");
        Ok(rows)
    }
}
