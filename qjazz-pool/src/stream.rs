//!
//! Stream-like objects over the worker pipe
//!
//! Both streams latch their termination state: once the
//! terminator (or an error) was seen, `next` keeps returning
//! `None` without touching the pipe.
//!
use crate::errors::Result;
use crate::pipes::Pipe;
use serde::de;
use std::marker::PhantomData;
use std::ops::ControlFlow;

/// Raw bytes chunk stream
pub struct ByteStream<'a> {
    io: &'a mut Pipe,
    done: bool,
}

impl<'a> ByteStream<'a> {
    pub(crate) fn new(io: &'a mut Pipe) -> Self {
        Self { io, done: false }
    }

    /// Next chunk as shared data
    pub async fn next(&mut self) -> Result<Option<&[u8]>> {
        if self.done {
            return Ok(None);
        }
        match self.io.read_chunk().await {
            Ok(ControlFlow::Continue(data)) => Ok(Some(data)),
            Ok(ControlFlow::Break(())) => {
                self.done = true;
                Ok(None)
            }
            Err(err) => {
                self.done = true;
                Err(err)
            }
        }
    }
}

/// Stream of `(206, item)` replies
pub struct ObjectStream<'a, T> {
    io: &'a mut Pipe,
    done: bool,
    item_type: PhantomData<T>,
}

impl<'a, T> ObjectStream<'a, T>
where
    T: de::DeserializeOwned,
{
    pub(crate) fn new(io: &'a mut Pipe) -> Self {
        Self {
            io,
            done: false,
            item_type: PhantomData,
        }
    }

    /// Next item of the stream
    pub async fn next(&mut self) -> Result<Option<T>> {
        if self.done {
            return Ok(None);
        }
        match self.io.read_stream().await {
            Ok(ControlFlow::Continue(item)) => Ok(Some(item)),
            Ok(ControlFlow::Break(item)) => {
                self.done = true;
                Ok(item)
            }
            Err(err) => {
                self.done = true;
                Err(err)
            }
        }
    }
}
