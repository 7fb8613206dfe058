//!
//! Chunked response writer
//!
//! Buffers engine output until the first flush; the first flush
//! emits the `RequestReply` head (status and headers), then the
//! body follows as raw chunk frames bounded by `max_chunk_size`.
//! `finish` emits the zero length sentinel so that the byte
//! stream always terminates, on success, error and cancellation
//! alike.
//!
use crate::connection::{Connection, Reply};
use crate::engine::ResponseSink;
use crate::errors::Result;
use crate::messages::RequestReply;
use crate::signals::Feedback;

pub struct Response<'c, C: Connection> {
    conn: &'c mut C,
    status: i64,
    headers: Vec<(String, String)>,
    header_prefix: Option<String>,
    target: Option<String>,
    checkout_status: Option<i64>,
    cache_id: String,
    chunk_size: usize,
    buffer: Vec<u8>,
    headers_sent: bool,
    feedback: Feedback,
}

impl<'c, C: Connection> Response<'c, C> {
    pub fn new(conn: &'c mut C, chunk_size: usize, feedback: Feedback) -> Self {
        Self {
            conn,
            status: 200,
            headers: Vec::new(),
            header_prefix: None,
            target: None,
            checkout_status: None,
            cache_id: String::new(),
            chunk_size,
            buffer: Vec::new(),
            headers_sent: false,
            feedback,
        }
    }

    pub fn header_prefix(mut self, prefix: Option<&str>) -> Self {
        self.header_prefix = prefix.map(str::to_string);
        self
    }

    pub fn target(mut self, target: Option<&str>) -> Self {
        self.target = target.map(str::to_string);
        self
    }

    pub fn checkout_status(mut self, status: Option<i64>) -> Self {
        self.checkout_status = status;
        self
    }

    pub fn cache_id(mut self, cache_id: &str) -> Self {
        self.cache_id = cache_id.to_string();
        self
    }

    pub fn headers_sent(&self) -> bool {
        self.headers_sent
    }

    fn cancelled(&self) -> bool {
        self.feedback.is_cancelled()
    }

    // Emit the RequestReply head
    fn send_head(&mut self) -> Result<()> {
        let prefix = self.header_prefix.as_deref().unwrap_or_default();
        let reply = RequestReply {
            status_code: self.status,
            target: self.target.take(),
            checkout_status: self.checkout_status,
            headers: self
                .headers
                .drain(..)
                .map(|(k, v)| (format!("{prefix}{}", k.to_lowercase()), v))
                .collect(),
            cache_id: std::mem::take(&mut self.cache_id),
        };
        self.conn.send_reply(200, reply)?;
        self.headers_sent = true;
        Ok(())
    }

    fn push_chunks(&mut self, last: bool) -> Result<()> {
        if !self.headers_sent {
            self.send_head()?;
        }
        let mut offset = 0;
        while self.buffer.len() - offset >= self.chunk_size {
            self.conn
                .send_chunk(&self.buffer[offset..offset + self.chunk_size])?;
            offset += self.chunk_size;
        }
        if last && offset < self.buffer.len() {
            self.conn.send_chunk(&self.buffer[offset..])?;
            offset = self.buffer.len();
        }
        self.buffer.drain(..offset);
        Ok(())
    }

    /// Report an error to the supervisor.
    ///
    /// Errors after the head was emitted cannot be reported
    /// anymore: they are logged and the stream is truncated.
    pub fn send_error(&mut self, status: i64, message: &str) -> Result<()> {
        if self.headers_sent {
            log::error!("Error after response head was sent: {} {}", status, message);
            Ok(())
        } else {
            self.headers_sent = true;
            self.buffer.clear();
            self.conn.send_reply(status, message)
        }
    }

    /// Terminate the byte stream.
    ///
    /// A cancelled response that never emitted its head emits
    /// nothing at all: the supervisor is draining the pipe.
    pub fn finish(&mut self) -> Result<()> {
        if self.cancelled() {
            if self.headers_sent {
                self.conn.send_eos()?;
            }
            return Ok(());
        }
        self.push_chunks(true)?;
        self.conn.send_eos()
    }
}

impl<C: Connection> ResponseSink for Response<'_, C> {
    fn set_status(&mut self, code: i64) {
        self.status = code;
    }

    fn set_header(&mut self, name: &str, value: &str) {
        self.headers.push((name.to_string(), value.to_string()));
    }

    /// Buffer body bytes, spilling complete chunks.
    /// Writes become no-ops once cancelled.
    fn write(&mut self, data: &[u8]) -> Result<()> {
        if self.cancelled() {
            return Ok(());
        }
        self.buffer.extend_from_slice(data);
        if self.buffer.len() >= self.chunk_size {
            self.push_chunks(false)?;
        }
        Ok(())
    }

    /// Force the head and pending data out
    fn flush(&mut self) -> Result<()> {
        if self.cancelled() {
            return Ok(());
        }
        self.push_chunks(true)
    }
}

// =======================
// Tests
// =======================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::tests::MemoryConnection;

    fn feedback() -> Feedback {
        Feedback::default()
    }

    #[test]
    fn test_response_head_and_chunks() {
        let mut conn = MemoryConnection::default();
        {
            let mut resp = Response::new(&mut conn, 8, feedback())
                .header_prefix(Some("x-reply-header-"))
                .cache_id("test");
            resp.set_header("Content-Type", "text/xml");
            resp.write(b"0123456789abcdef-tail").unwrap();
            resp.finish().unwrap();
        }

        // Head frame
        let (status, reply): (i64, serde_json::Value) = conn.reply_at(0);
        assert_eq!(status, 200);
        assert_eq!(reply["status_code"], 200);
        assert_eq!(
            reply["headers"][0][0].as_str().unwrap(),
            "x-reply-header-content-type"
        );

        // Two full chunks, the remainder, then the sentinel
        assert_eq!(conn.frames[1].as_deref(), Some(&b"01234567"[..]));
        assert_eq!(conn.frames[2].as_deref(), Some(&b"89abcdef"[..]));
        assert_eq!(conn.frames[3].as_deref(), Some(&b"-tail"[..]));
        assert_eq!(conn.frames[4], None);
        assert_eq!(conn.frames.len(), 5);
    }

    #[test]
    fn test_response_empty_body() {
        let mut conn = MemoryConnection::default();
        {
            let mut resp = Response::new(&mut conn, 8, feedback());
            resp.finish().unwrap();
        }
        let (status, _): (i64, serde_json::Value) = conn.reply_at(0);
        assert_eq!(status, 200);
        // The stream still ends with exactly one zero chunk
        assert_eq!(conn.frames[1], None);
        assert_eq!(conn.frames.len(), 2);
    }

    #[test]
    fn test_response_error_before_head() {
        let mut conn = MemoryConnection::default();
        {
            let mut resp = Response::new(&mut conn, 8, feedback());
            resp.send_error(404, "not found").unwrap();
        }
        let (status, msg): (i64, String) = conn.reply_at(0);
        assert_eq!(status, 404);
        assert_eq!(msg, "not found");
        assert_eq!(conn.frames.len(), 1);
    }

    #[test]
    fn test_response_cancelled_after_head() {
        let mut conn = MemoryConnection::default();
        let feedback = feedback();
        {
            let mut resp = Response::new(&mut conn, 4, feedback.clone());
            resp.write(b"01234567").unwrap();
            feedback.cancel();
            resp.write(b"dropped").unwrap();
            resp.finish().unwrap();
        }
        // Head, the two complete chunks, then the sentinel:
        // cancelled writes are dropped but the terminator is
        // still emitted.
        assert_eq!(conn.frames.len(), 4);
        assert_eq!(conn.frames[3], None);
    }

    #[test]
    fn test_response_cancelled_before_head() {
        let mut conn = MemoryConnection::default();
        let feedback = feedback();
        {
            let mut resp = Response::new(&mut conn, 4, feedback.clone());
            feedback.cancel();
            resp.write(b"dropped").unwrap();
            resp.finish().unwrap();
        }
        assert!(conn.frames.is_empty());
    }
}
