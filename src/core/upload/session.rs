// Authors: Robert Lopez
// License: MIT (See `LICENSE.md`)

use super::{
    buffer_pool::BufferPool,
    chunk_reader::ChunkReader,
    client::{SessionHandle, StorageClient},
    manifest::PartManifest,
    part_uploader::PartUploader,
    worker_pool::WorkerPool,
    Chunk,
};
use crate::{
    core::{
        sizing::{part_count, MAX_PARTS},
        target::ObjectTarget,
    },
    error::{Error, SessionStage},
};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, PoisonError,
};
use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Lifecycle of one multipart upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Opening,
    Active,
    Completing,
    Done,
    Aborting,
    Aborted,
}

/// One open multipart session on the backend.
#[derive(Debug)]
pub struct UploadSession {
    handle: Arc<SessionHandle>,
    input_size: u64,
    part_count: u64,
    abort_issued: AtomicBool,
}

impl UploadSession {
    pub fn new(handle: SessionHandle, part_size: u64, input_size: u64) -> Self {
        Self {
            handle: Arc::new(handle),
            input_size,
            part_count: part_count(input_size, part_size),
            abort_issued: AtomicBool::new(false),
        }
    }

    pub fn handle(&self) -> &Arc<SessionHandle> {
        &self.handle
    }

    pub fn part_count(&self) -> u64 {
        self.part_count
    }

    /// Issues the abort call. Only the first call reaches the backend; later
    /// calls return `false` without doing anything.
    ///
    /// A failed abort is logged and otherwise ignored.
    pub async fn abort<C: StorageClient>(&self, client: &C) -> bool {
        if self.abort_issued.swap(true, Ordering::SeqCst) {
            return false;
        }

        if let Err(err) = client.abort_session(&self.handle).await {
            warn!(
                upload_id = %self.handle.upload_id,
                "Failed to abort multipart upload: {}", err
            );
        }

        true
    }
}

/// Result of a completed upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    pub location: String,
    pub parts: u64,
    pub bytes: u64,
}

/// Holds the first error of a concurrent run and cancels everything else.
struct FirstFailure {
    error: Mutex<Option<Error>>,
    cancel: CancellationToken,
}

impl FirstFailure {
    fn new(cancel: CancellationToken) -> Self {
        Self {
            error: Mutex::new(None),
            cancel,
        }
    }

    fn fail(&self, err: Error) {
        let mut slot = self.error.lock().unwrap_or_else(PoisonError::into_inner);

        if slot.is_none() {
            *slot = Some(err);
        } else {
            debug!("Discarding error after the first failure: {}", err);
        }

        self.cancel.cancel();
    }

    fn take(self) -> Option<Error> {
        self.error
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Drives one upload through open, part uploads and complete, aborting the
/// session on any failure once it is open.
///
/// With a concurrency of 1 chunks are read and uploaded strictly in turn.
/// Above that, up to `concurrency` parts upload at once while the reader
/// fills the next buffer. Memory is bounded by the pool handed in.
///
/// ---
/// Example Usage:
/// ```
///
/// let client: Arc<S3StorageClient> = ...;
/// let pool = Arc::new(BufferPool::for_concurrency(4, 64 * 1024 * 1024));
///
/// let mut coordinator = SessionCoordinator::new(client, pool, 4);
///
/// let receipt: UploadReceipt = coordinator
///     .upload(&target, tokio::io::stdin(), input_size)
///     .await?;
/// ```
pub struct SessionCoordinator<C> {
    client: Arc<C>,
    pool: Arc<BufferPool>,
    concurrency: usize,
    state: SessionState,
}

impl<C: StorageClient> SessionCoordinator<C> {
    /// The part size is the pool's buffer size.
    pub fn new(client: Arc<C>, pool: Arc<BufferPool>, concurrency: usize) -> Self {
        Self {
            client,
            pool,
            concurrency,
            state: SessionState::Idle,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn transition(&mut self, next: SessionState) {
        debug!(from = ?self.state, to = ?next, "Session state changed");
        self.state = next;
    }

    /// Streams exactly `input_size` bytes of `stream` to `target`.
    ///
    /// Either the object's location or an error is returned, never both.
    /// Once a session is open every error is preceded by one abort attempt.
    #[instrument(
        skip(self, stream),
        fields(
            bucket = %target.bucket,
            key = %target.key,
            part_size = self.pool.buffer_size(),
            concurrency = self.concurrency,
        )
    )]
    pub async fn upload<R>(
        &mut self,
        target: &ObjectTarget,
        stream: R,
        input_size: u64,
    ) -> Result<UploadReceipt, Error>
    where
        R: AsyncRead + Unpin + Send,
    {
        let part_size = self.validate(input_size)?;

        self.transition(SessionState::Opening);
        let handle = match self.client.open_session(target).await {
            Ok(handle) => handle,
            Err(source) => {
                self.transition(SessionState::Aborted);

                return Err(Error::Session {
                    stage: SessionStage::Open,
                    source,
                });
            }
        };

        let session = UploadSession::new(handle, part_size, input_size);
        self.transition(SessionState::Active);
        debug!(
            upload_id = %session.handle.upload_id,
            parts = session.part_count,
            "Opened multipart session"
        );

        let uploaded = if self.concurrency == 1 {
            self.upload_sequential(&session, stream).await
        } else {
            self.upload_concurrent(&session, stream).await
        };

        let parts = match uploaded.and_then(|manifest| {
            debug!(
                recorded = manifest.filled(),
                expected = manifest.expected(),
                "All chunks handed off"
            );
            manifest.into_parts()
        }) {
            Ok(parts) => parts,
            Err(err) => return Err(self.abort(&session, err).await),
        };

        self.transition(SessionState::Completing);
        let location = match self.client.complete_session(&session.handle, parts).await {
            Ok(location) => location,
            Err(source) => {
                let err = Error::Session {
                    stage: SessionStage::Complete,
                    source,
                };

                return Err(self.abort(&session, err).await);
            }
        };

        self.transition(SessionState::Done);
        info!(location = %location, "Upload completed successfully");

        Ok(UploadReceipt {
            location,
            parts: session.part_count,
            bytes: input_size,
        })
    }

    /// Rejects arguments that cannot make a valid session. Returns the part size.
    fn validate(&self, input_size: u64) -> Result<u64, Error> {
        if self.state != SessionState::Idle {
            return Err(Error::config("a coordinator runs a single upload"));
        }

        if input_size == 0 {
            return Err(Error::config("input size must be positive"));
        }

        if self.concurrency == 0 {
            return Err(Error::config("concurrency must be at least 1"));
        }

        let part_size = self.pool.buffer_size() as u64;
        if part_size == 0 {
            return Err(Error::config("part size must be positive"));
        }

        let parts = part_count(input_size, part_size);
        if parts > MAX_PARTS {
            return Err(Error::config(format!(
                "{input_size} bytes in parts of {part_size} bytes needs {parts} parts, \
                 more than the {MAX_PARTS} allowed"
            )));
        }

        Ok(part_size)
    }

    async fn abort(&mut self, session: &UploadSession, err: Error) -> Error {
        self.transition(SessionState::Aborting);
        warn!(
            upload_id = %session.handle.upload_id,
            "Aborting multipart upload: {}", err
        );

        session.abort(self.client.as_ref()).await;
        self.transition(SessionState::Aborted);

        err
    }

    async fn upload_sequential<R>(
        &self,
        session: &UploadSession,
        stream: R,
    ) -> Result<PartManifest, Error>
    where
        R: AsyncRead + Unpin + Send,
    {
        let manifest = PartManifest::new(session.part_count as usize);
        let uploader = PartUploader::new(self.client.clone(), session.handle.clone());
        let mut reader = ChunkReader::new(stream, session.input_size, self.pool.clone());

        while let Some(chunk) = reader.next_chunk().await? {
            manifest.record(uploader.upload(chunk).await?)?;
        }

        Ok(manifest)
    }

    async fn upload_concurrent<R>(
        &self,
        session: &UploadSession,
        stream: R,
    ) -> Result<PartManifest, Error>
    where
        R: AsyncRead + Unpin + Send,
    {
        let manifest = PartManifest::new(session.part_count as usize);
        let cancel = CancellationToken::new();
        let failure = FirstFailure::new(cancel.clone());

        let uploader = PartUploader::new(self.client.clone(), session.handle.clone());
        let (tasks, mut results, workers) =
            WorkerPool::spawn(self.concurrency, 1, cancel.clone(), move |chunk: Chunk| {
                let uploader = uploader.clone();
                async move { uploader.upload(chunk).await }
            })
            .into_parts();

        let mut reader = ChunkReader::new(stream, session.input_size, self.pool.clone());
        let (failure_ref, cancel_ref, manifest_ref) = (&failure, &cancel, &manifest);

        let producer = async move {
            loop {
                let next = tokio::select! {
                    biased;
                    _ = cancel_ref.cancelled() => break,
                    next = reader.next_chunk() => next,
                };

                let chunk = match next {
                    Ok(Some(chunk)) => chunk,
                    Ok(None) => break,
                    Err(err) => {
                        failure_ref.fail(err);
                        break;
                    }
                };

                let sent = tokio::select! {
                    biased;
                    _ = cancel_ref.cancelled() => break,
                    sent = tasks.send(chunk) => sent,
                };

                if sent.is_err() {
                    failure_ref.fail(Error::internal("upload workers exited early"));
                    break;
                }
            }
        };

        let collector = async move {
            loop {
                let result = tokio::select! {
                    biased;
                    _ = cancel_ref.cancelled() => break,
                    result = results.recv() => result,
                };

                let Some(result) = result else {
                    break;
                };

                if let Err(err) = result.and_then(|part| manifest_ref.record(part)) {
                    failure_ref.fail(err);
                    break;
                }
            }
        };

        tokio::join!(producer, collector);

        if cancel.is_cancelled() {
            workers.cancel();
        }

        if let Err(err) = workers.join().await {
            failure.fail(err);
        }

        match failure.take() {
            Some(err) => Err(err),
            None => Ok(manifest),
        }
    }
}
