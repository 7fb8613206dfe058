//!
//! Pipe communication
//!
//! Every frame on the wire is a big-endian `u32` length followed
//! by that many bytes. Message frames carry MessagePack, chunk
//! frames carry raw bytes; a zero length frame terminates a byte
//! stream. The length prefix is authoritative, no escaping is
//! needed.
//!
use nix::{errno::Errno, unistd};
use serde::de;
use std::ops::ControlFlow;
use std::os::fd::{AsRawFd, RawFd};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{ChildStdin, ChildStdout};

use crate::errors::{Error, Result};
use crate::messages::{Envelop, JsonValue, Message, Tagged};

pub(crate) struct Pipe {
    stdin: ChildStdin,
    stdout: ChildStdout,
    buffer: Vec<u8>,
    // Reusable output buffer for serializing messages
    encode_buf: Vec<u8>,
}

/// Options for Pipe
pub(crate) struct PipeOptions {
    pub buffer_size: usize,
}

impl Pipe {
    pub fn new(stdin: ChildStdin, stdout: ChildStdout, options: PipeOptions) -> Self {
        Self {
            stdin,
            stdout,
            buffer: vec![0; options.buffer_size],
            encode_buf: Vec::with_capacity(1024),
        }
    }

    /// Send a message frame
    pub async fn put_message<T>(&mut self, msg: &T) -> Result<()>
    where
        T: Message,
    {
        self.encode_buf.clear();
        rmp_serde::encode::write_named(&mut self.encode_buf, &Tagged(msg))?;
        self.stdin.write_u32(self.encode_buf.len() as u32).await?;
        self.stdin.write_all(self.encode_buf.as_slice()).await?;
        self.stdin.flush().await?;
        Ok(())
    }

    /// Read the next frame.
    ///
    /// Returns `None` for a zero length frame. Reads loop until
    /// the declared length is reached; EOF means the peer exited.
    pub async fn read_frame(&mut self) -> Result<Option<&[u8]>> {
        match self.stdout.read_u32().await? as usize {
            size if size > self.buffer.capacity() => Err(Error::IoBufferOverflow),
            size if size > 0 => {
                let buf = &mut self.buffer[..size];
                let mut len = self.stdout.read(buf).await?;
                while len < size {
                    match self.stdout.read(&mut buf[len..]).await? {
                        0 => return Err(Error::WorkerProcessDead),
                        n => len += n,
                    }
                }
                Ok(Some(&self.buffer[..size]))
            }
            _ => Ok(None),
        }
    }

    /// Read a single shot `(status, payload)` reply
    pub async fn read_response<T: de::DeserializeOwned>(&mut self) -> Result<(i64, T)> {
        if let Some(bytes) = self.read_frame().await? {
            match rmp_serde::from_slice(bytes)? {
                Envelop::Success(status, payload) => Ok((status, payload)),
                Envelop::Failure(status, msg) => Err(Error::ResponseError(status, msg)),
                Envelop::NoData => Err(Error::NoDataResponse),
            }
        } else {
            Err(Error::ResponseExpected)
        }
    }

    /// Read a reply that carries no data
    pub async fn read_nodata(&mut self) -> Result<()> {
        if let Some(bytes) = self.read_frame().await? {
            match rmp_serde::from_slice::<Envelop<JsonValue>>(bytes)? {
                Envelop::NoData => Ok(()),
                Envelop::Success(status, msg) | Envelop::Failure(status, msg) => {
                    Err(Error::ResponseError(status, msg))
                }
            }
        } else {
            Err(Error::ResponseExpected)
        }
    }

    /// Read the next element of a streamed reply:
    /// `(206, item)` continues, `(204,)` terminates.
    pub async fn read_stream<T: de::DeserializeOwned>(
        &mut self,
    ) -> Result<ControlFlow<Option<T>, T>> {
        if let Some(bytes) = self.read_frame().await? {
            match rmp_serde::from_slice(bytes)? {
                Envelop::Success(status, item) => {
                    if status == 206 {
                        Ok(ControlFlow::Continue(item))
                    } else {
                        Ok(ControlFlow::Break(Some(item)))
                    }
                }
                Envelop::Failure(status, msg) => Err(Error::ResponseError(status, msg)),
                Envelop::NoData => Ok(ControlFlow::Break(None)),
            }
        } else {
            Err(Error::ResponseExpected)
        }
    }

    /// Read the next raw bytes chunk; a zero length frame
    /// terminates the stream.
    pub async fn read_chunk(&mut self) -> Result<ControlFlow<(), &[u8]>> {
        match self.read_frame().await? {
            Some(bytes) => Ok(ControlFlow::Continue(bytes)),
            None => Ok(ControlFlow::Break(())),
        }
    }

    /// Send a message and wait for its single shot reply
    pub async fn send_message<T, R>(&mut self, msg: &T) -> Result<(i64, R)>
    where
        T: Message,
        R: de::DeserializeOwned,
    {
        self.put_message(msg).await?;
        self.read_response().await
    }

    /// Send a message that expects no reply data
    pub async fn send_noreply_message<T: Message>(&mut self, msg: &T) -> Result<()> {
        self.put_message(msg).await?;
        self.read_nodata().await
    }

    /// Pull out all data pending on the output pipe,
    /// until it would block or return 0.
    pub async fn drain(&mut self) -> Result<bool> {
        let fd = self.stdout.as_raw_fd();
        let mut buf = [0u8; 1];
        // Probe with a single byte read; the descriptor is in non
        // blocking mode since it was opened through an async call.
        match unistd::read(fd, &mut buf) {
            Ok(0) | Err(Errno::EWOULDBLOCK) => Ok(false),
            Ok(_) => self.drain_blocking(fd).await,
            Err(errno) => {
                log::error!("Drain: I/O error: {errno:#?}");
                Err(Error::from(errno))
            }
        }
    }

    async fn drain_blocking(&mut self, fd: RawFd) -> Result<bool> {
        // Draining may take some time for large data, run it
        // on the blocking pool.
        match tokio::task::spawn_blocking(move || {
            let mut waste = [0u8; 4096];
            let mut len = 0;
            log::trace!("Entering blocking i/o drain...");
            loop {
                match unistd::read(fd, &mut waste) {
                    Ok(0) | Err(Errno::EWOULDBLOCK) => return Ok(len > 0),
                    Ok(n) => len += n,
                    Err(errno) => {
                        log::error!("Drain: I/O error: {errno:#?}");
                        return Err(Error::from(errno));
                    }
                }
            }
        })
        .await
        {
            Ok(rv) => rv,
            Err(err) => {
                if !err.is_cancelled() {
                    log::error!("Drain task failed: {err:?}");
                    Err(Error::TaskFailed("Drain task failed".to_string()))
                } else {
                    log::trace!("Drain finished");
                    Ok(true)
                }
            }
        }
    }
}
