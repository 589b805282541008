// Authors: Robert Lopez
// License: MIT (See `LICENSE.md`)

use super::{
    buffer_pool::{BufferPool, PooledBuffer},
    Chunk,
};
use crate::error::Error;
use std::{
    io::{self, ErrorKind},
    sync::Arc,
};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Splits a one-pass stream of exactly `input_size` bytes into part-sized chunks.
///
/// Every chunk but the last holds exactly `part_size` bytes. The declared size
/// is authoritative: bytes past it are never read, and a stream that ends
/// before it is an input error.
///
/// ---
/// Example Usage:
/// ```
///
/// let pool = Arc::new(BufferPool::new(1, 5_242_880));
/// let mut reader = ChunkReader::new(tokio::io::stdin(), input_size, pool);
///
/// while let Some(chunk) = reader.next_chunk().await? {
///     ...
/// }
/// ```
pub struct ChunkReader<R> {
    stream: R,
    pool: Arc<BufferPool>,
    part_size: u64,
    input_size: u64,
    consumed: u64,
    next_part: u32,
    failed: bool,
}

impl<R> ChunkReader<R>
where
    R: AsyncRead + Unpin,
{
    /// The part size is the pool's buffer size.
    pub fn new(stream: R, input_size: u64, pool: Arc<BufferPool>) -> Self {
        Self {
            stream,
            part_size: pool.buffer_size() as u64,
            pool,
            input_size,
            consumed: 0,
            next_part: 1,
            failed: false,
        }
    }

    /// Bytes handed out in chunks so far
    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    /// Reads the next chunk, waiting for a free pooled buffer first.
    ///
    /// Returns `Ok(None)` once `input_size` bytes have been produced. After
    /// an error the reader is exhausted.
    pub async fn next_chunk(&mut self) -> Result<Option<Chunk>, Error> {
        let remaining = self.input_size - self.consumed;
        if self.failed || remaining == 0 {
            return Ok(None);
        }

        let want = remaining.min(self.part_size);
        let mut buffer = self.pool.checkout().await?;

        if let Err(err) = self.fill(&mut buffer, want).await {
            self.failed = true;

            return Err(Error::Input {
                consumed: self.consumed + buffer.len() as u64,
                expected: self.input_size,
                source: err,
            });
        }

        self.consumed += want;
        let chunk = Chunk {
            part_number: self.next_part,
            buffer,
        };
        self.next_part += 1;

        Ok(Some(chunk))
    }

    async fn fill(&mut self, buffer: &mut PooledBuffer, want: u64) -> io::Result<()> {
        let buffer = buffer.writable();
        let mut limited = (&mut self.stream).take(want);

        while (buffer.len() as u64) < want {
            if limited.read_buf(buffer).await? == 0 {
                return Err(io::Error::new(
                    ErrorKind::UnexpectedEof,
                    "stream ended before the declared input size",
                ));
            }
        }

        Ok(())
    }
}
