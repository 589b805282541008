// Authors: Robert Lopez
// License: MIT (See `LICENSE.md`)

use std::{
    io,
    pin::Pin,
    task::{Context, Poll},
};
use tokio::io::{AsyncRead, ReadBuf};

/// Hands out at most `max_read` bytes per read, like a slow pipe.
pub struct ChoppyReader {
    data: Vec<u8>,
    position: usize,
    max_read: usize,
}

impl ChoppyReader {
    pub fn new(data: Vec<u8>, max_read: usize) -> Self {
        Self {
            data,
            position: 0,
            max_read: max_read.max(1),
        }
    }
}

impl AsyncRead for ChoppyReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let remaining = &self.data[self.position..];
        let length = remaining.len().min(buf.remaining()).min(self.max_read);

        buf.put_slice(&remaining[..length]);
        self.position += length;

        Poll::Ready(Ok(()))
    }
}

/// Yields `data`, then fails every read with a non-EOF error.
pub struct FailingReader {
    data: Vec<u8>,
    position: usize,
}

impl FailingReader {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data, position: 0 }
    }
}

impl AsyncRead for FailingReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.position == self.data.len() {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "pipe writer went away",
            )));
        }

        let remaining = &self.data[self.position..];
        let length = remaining.len().min(buf.remaining());

        buf.put_slice(&remaining[..length]);
        self.position += length;

        Poll::Ready(Ok(()))
    }
}
