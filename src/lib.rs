// Authors: Robert Lopez
// License: MIT (See `LICENSE.md`)

//! Streams a one-pass input of known length to S3 as a multipart upload,
//! holding at most a few part-sized buffers in memory.

pub mod core;
pub mod error;

#[cfg(test)]
mod tests;

pub use crate::{
    core::{
        sizing::{MemoryBudget, PartSizing},
        target::ObjectTarget,
        upload::{
            client::{S3StorageClient, StorageClient},
            session::UploadReceipt,
            upload_stream, UploadOptions,
        },
    },
    error::{Error, ErrorKind},
};
use aws_sdk_s3::Client;
use std::sync::Arc;
use tokio::io::AsyncRead;

/// How the S3 client is built.
#[derive(Debug, Clone, Default)]
pub struct ClientOptions {
    /// Custom S3-compatible endpoint, addressed path-style
    pub endpoint: Option<String>,
    /// Use the region's dual-stack (IPv4 and IPv6) endpoint
    pub dual_stack: bool,
}

/// Streaming uploader utilizing the S3 multipart API
///
/// ---
/// Example Usage:
/// ```
///
/// let uploader = Uploader::new(ClientOptions::default()).await;
///
/// let target = ObjectTarget::parse("s3://sharks/shark.jpg")?;
///
/// let receipt: UploadReceipt = uploader
///     .upload_stream(
///         &target,
///         tokio::io::stdin(),
///         UploadOptions::new(input_size).concurrency(4),
///     )
///     .await?;
/// ```
pub struct Uploader<C = S3StorageClient> {
    pub client: Arc<C>,
}

impl Uploader<S3StorageClient> {
    /// Constructs a new Uploader
    ///
    /// Loads credentials and region from the environment
    pub async fn new(options: ClientOptions) -> Self {
        let mut loader = aws_config::from_env();
        if let Some(endpoint) = &options.endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        let config = loader.load().await;

        let s3_config = aws_sdk_s3::config::Builder::from(&config)
            .use_dual_stack(options.dual_stack)
            .force_path_style(options.endpoint.is_some())
            .build();

        Self {
            client: Arc::new(S3StorageClient::new(Client::from_conf(s3_config))),
        }
    }
}

impl<C: StorageClient> Uploader<C> {
    pub fn with_client(client: Arc<C>) -> Self {
        Self { client }
    }

    /// Upload exactly `options.input_size` bytes of `stream` to `target`
    ///
    /// Returns the location of the new object. On failure the multipart
    /// session, if one was opened, has been aborted.
    pub async fn upload_stream<R>(
        &self,
        target: &ObjectTarget,
        stream: R,
        options: UploadOptions,
    ) -> Result<UploadReceipt, Error>
    where
        R: AsyncRead + Unpin + Send,
    {
        upload_stream(self.client.clone(), target, stream, options).await
    }
}
