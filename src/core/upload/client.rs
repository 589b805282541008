// Authors: Robert Lopez
// License: MIT (See `LICENSE.md`)

use super::CompletedPart;
use crate::{core::target::ObjectTarget, error::BackendError};
use async_trait::async_trait;
use aws_sdk_s3::{
    primitives::ByteStream,
    types::{CompletedMultipartUpload, CompletedPart as S3CompletedPart},
    Client,
};
use bytes::Bytes;
use std::sync::Arc;

/// Everything a part upload needs to address an open multipart session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHandle {
    pub bucket: String,
    pub key: String,
    pub upload_id: String,
}

/// The multipart protocol of the storage backend.
///
/// Retries, signing and endpoint selection all live behind this trait.
#[async_trait]
pub trait StorageClient: Send + Sync + 'static {
    async fn open_session(&self, target: &ObjectTarget) -> Result<SessionHandle, BackendError>;

    /// Returns the backend's integrity tag for the part.
    ///
    /// `bytes` shares the pooled buffer of the part. Implementations must not
    /// keep it, or any clone of it, once the call returns: the buffer cannot
    /// be reused while it is still referenced, and the pool stops counting it.
    async fn upload_part(
        &self,
        session: &SessionHandle,
        part_number: u32,
        bytes: Bytes,
    ) -> Result<String, BackendError>;

    /// Returns the location of the finished object.
    async fn complete_session(
        &self,
        session: &SessionHandle,
        parts: Vec<CompletedPart>,
    ) -> Result<String, BackendError>;

    async fn abort_session(&self, session: &SessionHandle) -> Result<(), BackendError>;
}

/// `StorageClient` backed by the AWS S3 SDK.
#[derive(Debug, Clone)]
pub struct S3StorageClient {
    pub client: Arc<Client>,
}

impl S3StorageClient {
    pub fn new(client: Client) -> Self {
        Self {
            client: Arc::new(client),
        }
    }
}

#[async_trait]
impl StorageClient for S3StorageClient {
    async fn open_session(&self, target: &ObjectTarget) -> Result<SessionHandle, BackendError> {
        let upload_id = self
            .client
            .create_multipart_upload()
            .bucket(&target.bucket)
            .key(&target.key)
            .send()
            .await
            .map_err(BackendError::sdk)?
            .upload_id
            .ok_or_else(|| BackendError::new("upload_id was None for a valid multipart call"))?;

        Ok(SessionHandle {
            bucket: target.bucket.clone(),
            key: target.key.clone(),
            upload_id,
        })
    }

    async fn upload_part(
        &self,
        session: &SessionHandle,
        part_number: u32,
        bytes: Bytes,
    ) -> Result<String, BackendError> {
        let part_number = i32::try_from(part_number)
            .map_err(|_| BackendError::new(format!("part number {part_number} out of range")))?;

        self.client
            .upload_part()
            .bucket(&session.bucket)
            .key(&session.key)
            .upload_id(&session.upload_id)
            .part_number(part_number)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(BackendError::sdk)?
            .e_tag
            .ok_or_else(|| BackendError::new("e_tag was None on upload_part"))
    }

    async fn complete_session(
        &self,
        session: &SessionHandle,
        parts: Vec<CompletedPart>,
    ) -> Result<String, BackendError> {
        let completed_parts = parts
            .into_iter()
            .map(|CompletedPart { part_number, e_tag }| {
                S3CompletedPart::builder()
                    .e_tag(e_tag)
                    .part_number(part_number as i32)
                    .build()
            })
            .collect::<Vec<S3CompletedPart>>();

        let completed_multipart_upload = CompletedMultipartUpload::builder()
            .set_parts(Some(completed_parts))
            .build();

        let output = self
            .client
            .complete_multipart_upload()
            .bucket(&session.bucket)
            .key(&session.key)
            .multipart_upload(completed_multipart_upload)
            .upload_id(&session.upload_id)
            .send()
            .await
            .map_err(BackendError::sdk)?;

        Ok(output
            .location
            .unwrap_or_else(|| format!("s3://{}/{}", session.bucket, session.key)))
    }

    async fn abort_session(&self, session: &SessionHandle) -> Result<(), BackendError> {
        self.client
            .abort_multipart_upload()
            .bucket(&session.bucket)
            .key(&session.key)
            .upload_id(&session.upload_id)
            .send()
            .await
            .map_err(BackendError::sdk)?;

        Ok(())
    }
}
