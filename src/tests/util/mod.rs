// Authors: Robert Lopez
// License: MIT (See `LICENSE.md`)

pub mod readers;

use crate::{
    core::{
        target::ObjectTarget,
        upload::{
            client::{SessionHandle, StorageClient},
            CompletedPart,
        },
    },
    error::BackendError,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::{
    collections::BTreeMap,
    sync::{Mutex, MutexGuard},
    time::Duration,
};

pub const MIB: usize = 1024 * 1024;

/// Deterministic, non-repeating-per-part test payload
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// In-memory multipart backend with scriptable failures.
#[derive(Default)]
pub struct MemoryStorage {
    state: Mutex<StorageState>,
    fail_open: bool,
    fail_parts: Vec<u32>,
    fail_complete: bool,
    fail_abort: bool,
    delay: Option<fn(u32) -> Duration>,
}

#[derive(Default)]
pub struct StorageState {
    pub opened: usize,
    pub aborts: usize,
    pub completes: usize,
    pub parts: BTreeMap<u32, Vec<u8>>,
    /// Part numbers in the order their uploads finished
    pub finish_order: Vec<u32>,
    pub manifest: Option<Vec<CompletedPart>>,
    pub object: Option<Vec<u8>>,
    pub in_flight: usize,
    pub max_in_flight: usize,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_open(mut self) -> Self {
        self.fail_open = true;
        self
    }

    pub fn fail_part(mut self, part_number: u32) -> Self {
        self.fail_parts.push(part_number);
        self
    }

    pub fn fail_complete(mut self) -> Self {
        self.fail_complete = true;
        self
    }

    pub fn fail_abort(mut self) -> Self {
        self.fail_abort = true;
        self
    }

    pub fn delay(mut self, delay: fn(u32) -> Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn state(&self) -> MutexGuard<'_, StorageState> {
        self.state.lock().unwrap()
    }
}

#[async_trait]
impl StorageClient for MemoryStorage {
    async fn open_session(&self, target: &ObjectTarget) -> Result<SessionHandle, BackendError> {
        if self.fail_open {
            return Err(BackendError::new("NoSuchBucket"));
        }

        let mut state = self.state();
        state.opened += 1;

        Ok(SessionHandle {
            bucket: target.bucket.clone(),
            key: target.key.clone(),
            upload_id: format!("upload-{}", state.opened),
        })
    }

    async fn upload_part(
        &self,
        _session: &SessionHandle,
        part_number: u32,
        bytes: Bytes,
    ) -> Result<String, BackendError> {
        {
            let mut state = self.state();
            state.in_flight += 1;
            state.max_in_flight = state.max_in_flight.max(state.in_flight);
        }

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay(part_number)).await;
        }

        let mut state = self.state();
        state.in_flight -= 1;

        if self.fail_parts.contains(&part_number) {
            return Err(BackendError::new(format!(
                "InternalError on part {part_number}"
            )));
        }

        state.parts.insert(part_number, bytes.to_vec());
        state.finish_order.push(part_number);

        Ok(format!("\"etag-{part_number}\""))
    }

    async fn complete_session(
        &self,
        session: &SessionHandle,
        parts: Vec<CompletedPart>,
    ) -> Result<String, BackendError> {
        let mut state = self.state();
        state.completes += 1;

        if self.fail_complete {
            return Err(BackendError::new("InvalidPart"));
        }

        let mut object = vec![];
        for part in &parts {
            let bytes = state
                .parts
                .get(&part.part_number)
                .ok_or_else(|| BackendError::new(format!("unknown part {}", part.part_number)))?;
            object.extend_from_slice(bytes);
        }

        state.object = Some(object);
        state.manifest = Some(parts);

        Ok(format!("https://{}.example/{}", session.bucket, session.key))
    }

    async fn abort_session(&self, _session: &SessionHandle) -> Result<(), BackendError> {
        self.state().aborts += 1;

        if self.fail_abort {
            return Err(BackendError::new("AccessDenied"));
        }

        Ok(())
    }
}

/// Tracing output for a test, shown with `--nocapture`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("s3pipe=debug")
        .try_init();
}
