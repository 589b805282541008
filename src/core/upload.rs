// Authors: Robert Lopez
// License: MIT (See `LICENSE.md`)

pub mod buffer_pool;
pub mod chunk_reader;
pub mod client;
pub mod manifest;
pub mod part_uploader;
pub mod session;
pub mod worker_pool;

use self::{
    buffer_pool::{BufferPool, PooledBuffer},
    client::StorageClient,
    session::{SessionCoordinator, UploadReceipt},
};
use crate::{
    core::{
        sizing::{MemoryProbe, PartSizing, SizingPolicy},
        target::ObjectTarget,
    },
    error::Error,
};
use std::sync::Arc;
use tokio::io::AsyncRead;

/// One part-sized slice of the input, numbered from 1.
#[derive(Debug)]
pub struct Chunk {
    pub part_number: u32,
    pub buffer: PooledBuffer,
}

/// A part the backend accepted, with its integrity tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    pub part_number: u32,
    pub e_tag: String,
}

/// Settings for `upload_stream`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadOptions {
    /// Exact number of bytes the stream will provide
    pub input_size: u64,
    pub sizing: PartSizing,
    /// Parts uploaded at once, 1 uploads strictly in sequence
    pub concurrency: usize,
}

impl UploadOptions {
    pub fn new(input_size: u64) -> Self {
        Self {
            input_size,
            sizing: PartSizing::default(),
            concurrency: 1,
        }
    }

    pub fn sizing(mut self, sizing: PartSizing) -> Self {
        self.sizing = sizing;
        self
    }

    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }
}

/// Upload `input_size` bytes of `stream` to `target` as a multipart upload,
/// sizing parts from the system's memory when asked to.
///
/// ---
/// Example Usage:
/// ```
///
/// let client: Arc<S3StorageClient> = ...;
/// let target = ObjectTarget::parse("s3://sharks/shark.jpg")?;
///
/// let receipt: UploadReceipt = upload_stream(
///     client,
///     &target,
///     tokio::io::stdin(),
///     UploadOptions::new(input_size).concurrency(4),
/// )
/// .await?;
/// ```
pub async fn upload_stream<C, R>(
    client: Arc<C>,
    target: &ObjectTarget,
    stream: R,
    options: UploadOptions,
) -> Result<UploadReceipt, Error>
where
    C: StorageClient,
    R: AsyncRead + Unpin + Send,
{
    upload_stream_with_policy(client, target, stream, options, &SizingPolicy::new()).await
}

/// `upload_stream` with a caller-supplied sizing policy
pub async fn upload_stream_with_policy<C, R, P>(
    client: Arc<C>,
    target: &ObjectTarget,
    stream: R,
    UploadOptions {
        input_size,
        sizing,
        concurrency,
    }: UploadOptions,
    policy: &SizingPolicy<P>,
) -> Result<UploadReceipt, Error>
where
    C: StorageClient,
    R: AsyncRead + Unpin + Send,
    P: MemoryProbe,
{
    if concurrency == 0 {
        return Err(Error::config("concurrency must be at least 1"));
    }

    let part_size = policy.part_size(input_size, sizing, concurrency)?;
    let buffer_size = usize::try_from(part_size)
        .map_err(|_| Error::config(format!("part size {part_size} does not fit in memory")))?;

    let pool = Arc::new(BufferPool::for_concurrency(concurrency, buffer_size));

    SessionCoordinator::new(client, pool, concurrency)
        .upload(target, stream, input_size)
        .await
}
