//!
//! Framed connection to the supervisor
//!
//! Blocking counterpart of the supervisor pipe codec: big-endian
//! `u32` length prefix, MessagePack message frames, raw chunk
//! frames, zero length frame as byte stream terminator.
//!
use serde::Serialize;
use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::FromRawFd;

use crate::errors::{Error, Result};

/// Blocking duplex frame transport
pub trait Connection {
    /// Read the next frame. Fails with `ConnectionClosed` on EOF:
    /// the peer has exited and the worker must terminate.
    fn recv_frame(&mut self) -> Result<Vec<u8>>;

    /// Write a frame, looping until all bytes are sent
    fn send_frame(&mut self, bytes: &[u8]) -> Result<()>;

    /// Write the zero length terminator frame
    fn send_eos(&mut self) -> Result<()>;
}

/// Reply helpers shared by all message handlers
pub trait Reply: Connection {
    /// Single shot `(status, payload)` reply
    fn send_reply<T: Serialize>(&mut self, status: i64, payload: T) -> Result<()> {
        let frame = rmp_serde::to_vec_named(&(status, payload))?;
        self.send_frame(&frame)
    }

    /// `(204,)` no-data reply or stream terminator
    fn send_nodata(&mut self) -> Result<()> {
        let frame = rmp_serde::to_vec(&204i64)?;
        self.send_frame(&frame)
    }

    /// `(206, item)` stream element
    fn send_item<T: Serialize>(&mut self, item: T) -> Result<()> {
        self.send_reply(206, item)
    }

    /// Raw bytes chunk
    fn send_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        self.send_frame(chunk)
    }
}

impl<C: Connection + ?Sized> Reply for C {}

/// Connection over the process stdio.
///
/// The write side is a duplicate of the original stdout file
/// descriptor taken before fd 1 was redirected to stderr; only
/// the framing layer writes to it.
pub struct StdioConnection {
    input: File,
    output: File,
}

impl StdioConnection {
    /// Take over the process stdio.
    ///
    /// Duplicates fd 0 and fd 1 for framing, then redirects fd 1
    /// to stderr so that stray prints from engine plugins cannot
    /// corrupt the frame stream.
    pub fn take_stdio() -> Result<Self> {
        let input = nix::unistd::dup(0)?;
        let output = nix::unistd::dup(1)?;
        nix::unistd::dup2(2, 1)?;
        // SAFETY: both fds are freshly duplicated and owned here
        Ok(unsafe {
            Self {
                input: File::from_raw_fd(input),
                output: File::from_raw_fd(output),
            }
        })
    }

    #[cfg(test)]
    pub(crate) fn from_files(input: File, output: File) -> Self {
        Self { input, output }
    }
}

impl Connection for StdioConnection {
    fn recv_frame(&mut self) -> Result<Vec<u8>> {
        let mut prefix = [0u8; 4];
        read_exact(&mut self.input, &mut prefix)?;
        let size = u32::from_be_bytes(prefix) as usize;
        let mut frame = vec![0u8; size];
        if size > 0 {
            read_exact(&mut self.input, &mut frame)?;
        }
        Ok(frame)
    }

    fn send_frame(&mut self, bytes: &[u8]) -> Result<()> {
        self.output.write_all(&(bytes.len() as u32).to_be_bytes())?;
        self.output.write_all(bytes)?;
        self.output.flush()?;
        Ok(())
    }

    fn send_eos(&mut self) -> Result<()> {
        self.output.write_all(&0u32.to_be_bytes())?;
        self.output.flush()?;
        Ok(())
    }
}

// Read loop failing on EOF.
//
// Interrupted reads are retried by hand so that a pending
// SIGTERM can stop an idle worker blocked on the pipe.
fn read_exact(reader: &mut impl Read, buf: &mut [u8]) -> Result<()> {
    let mut offset = 0;
    while offset < buf.len() {
        match reader.read(&mut buf[offset..]) {
            Ok(0) => return Err(Error::ConnectionClosed),
            Ok(n) => offset += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {
                if crate::signals::terminated() {
                    return Err(Error::Terminated);
                }
            }
            Err(err) => return Err(Error::from(err)),
        }
    }
    Ok(())
}

// =======================
// Tests
// =======================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// In-memory connection for handler tests
    #[derive(Default)]
    pub struct MemoryConnection {
        pub incoming: std::collections::VecDeque<Vec<u8>>,
        pub frames: Vec<Option<Vec<u8>>>,
    }

    impl Connection for MemoryConnection {
        fn recv_frame(&mut self) -> Result<Vec<u8>> {
            self.incoming.pop_front().ok_or(Error::ConnectionClosed)
        }

        fn send_frame(&mut self, bytes: &[u8]) -> Result<()> {
            self.frames.push(Some(bytes.to_vec()));
            Ok(())
        }

        fn send_eos(&mut self) -> Result<()> {
            self.frames.push(None);
            Ok(())
        }
    }

    impl MemoryConnection {
        /// Decode frame `i` as a `(status, payload)` reply
        pub fn reply_at<T: serde::de::DeserializeOwned>(&self, i: usize) -> (i64, T) {
            let frame = self.frames[i].as_ref().expect("expecting a data frame");
            rmp_serde::from_slice(frame).expect("invalid reply frame")
        }

        /// Decode frame `i` as a bare status
        pub fn status_at(&self, i: usize) -> i64 {
            let frame = self.frames[i].as_ref().expect("expecting a data frame");
            rmp_serde::from_slice(frame).expect("invalid status frame")
        }
    }

    #[test]
    fn test_reply_frame_format() {
        let mut conn = MemoryConnection::default();
        conn.send_reply(200, "hello").unwrap();
        let (status, echo): (i64, String) = conn.reply_at(0);
        assert_eq!(status, 200);
        assert_eq!(echo, "hello");
    }

    #[test]
    fn test_nodata_frame_format() {
        let mut conn = MemoryConnection::default();
        conn.send_nodata().unwrap();
        assert_eq!(conn.status_at(0), 204);
    }
}
