// Authors: Robert Lopez
// License: MIT (See `LICENSE.md`)

use super::{
    client::{SessionHandle, StorageClient},
    Chunk, CompletedPart,
};
use crate::error::Error;
use std::sync::Arc;
use tracing::info;

/// Uploads chunks as numbered parts of one open session.
///
/// Cloning is cheap; every worker holds its own copy.
pub struct PartUploader<C> {
    client: Arc<C>,
    session: Arc<SessionHandle>,
}

impl<C> Clone for PartUploader<C> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            session: self.session.clone(),
        }
    }
}

impl<C: StorageClient> PartUploader<C> {
    pub fn new(client: Arc<C>, session: Arc<SessionHandle>) -> Self {
        Self { client, session }
    }

    /// Uploads one chunk. No retries: a failure here ends the session.
    ///
    /// The chunk's buffer is back in its pool by the time this returns,
    /// whatever the outcome.
    pub async fn upload(&self, chunk: Chunk) -> Result<CompletedPart, Error> {
        let Chunk {
            part_number,
            mut buffer,
        } = chunk;
        let length = buffer.len();

        let result = self
            .client
            .upload_part(&self.session, part_number, buffer.freeze())
            .await;
        drop(buffer);

        let e_tag = result.map_err(|source| Error::Upload {
            part_number,
            source,
        })?;

        info!("Uploaded part {} ({} bytes)", part_number, length);

        Ok(CompletedPart { part_number, e_tag })
    }
}
