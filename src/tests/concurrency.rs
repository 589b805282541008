// Authors: Robert Lopez
// License: MIT (See `LICENSE.md`)

use super::util::{init_tracing, payload, readers::ChoppyReader, MemoryStorage};
use crate::{
    core::{
        target::ObjectTarget,
        upload::{
            buffer_pool::BufferPool,
            session::{SessionCoordinator, SessionState},
        },
    },
    error::Error,
};
use std::{sync::Arc, time::Duration};

const PART_SIZE: usize = 4_096;

fn target() -> ObjectTarget {
    ObjectTarget::new("sharks", "hammerhead.bin")
}

/// Later parts finish first
fn reversed(part_number: u32) -> Duration {
    Duration::from_millis(u64::from(20u32.saturating_sub(part_number)) * 5)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_manifest_is_ordered_despite_completion_order() {
    init_tracing();
    let storage = Arc::new(MemoryStorage::new().delay(reversed));
    let pool = Arc::new(BufferPool::for_concurrency(4, PART_SIZE));
    let mut coordinator = SessionCoordinator::new(storage.clone(), pool.clone(), 4);
    let data = payload(8 * PART_SIZE + 100);

    let receipt = coordinator
        .upload(&target(), &data[..], data.len() as u64)
        .await
        .unwrap();

    assert_eq!(receipt.parts, 9);
    assert_eq!(coordinator.state(), SessionState::Done);

    let state = storage.state();
    let manifest: Vec<u32> = state
        .manifest
        .as_ref()
        .unwrap()
        .iter()
        .map(|part| part.part_number)
        .collect();
    assert_eq!(manifest, (1..=9).collect::<Vec<u32>>());

    let mut sorted = state.finish_order.clone();
    sorted.sort();
    assert_ne!(state.finish_order, sorted);
    assert_eq!(state.object.as_ref(), Some(&data));
}

#[tokio::test]
async fn test_memory_and_parallelism_stay_bounded() {
    let storage = Arc::new(
        MemoryStorage::new().delay(|part_number| Duration::from_millis(u64::from(part_number % 3))),
    );
    let pool = Arc::new(BufferPool::for_concurrency(3, PART_SIZE));
    let mut coordinator = SessionCoordinator::new(storage.clone(), pool.clone(), 3);
    let data = payload(40 * PART_SIZE);

    coordinator
        .upload(
            &target(),
            ChoppyReader::new(data.clone(), 1_000),
            data.len() as u64,
        )
        .await
        .unwrap();

    assert!(pool.allocated() <= 4, "allocated {}", pool.allocated());
    assert_eq!(pool.available(), 4);

    let state = storage.state();
    assert!(state.max_in_flight <= 3, "in flight {}", state.max_in_flight);
    assert_eq!(state.parts.len(), 40);
    assert_eq!(state.object.as_ref(), Some(&data));
}

#[tokio::test]
async fn test_failed_part_cancels_and_aborts_once() {
    init_tracing();
    let storage = Arc::new(MemoryStorage::new().delay(reversed).fail_part(2));
    let pool = Arc::new(BufferPool::for_concurrency(3, PART_SIZE));
    let mut coordinator = SessionCoordinator::new(storage.clone(), pool.clone(), 3);
    let data = payload(12 * PART_SIZE);

    let err = coordinator
        .upload(&target(), &data[..], data.len() as u64)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Upload { part_number: 2, .. }), "{err:?}");
    assert_eq!(coordinator.state(), SessionState::Aborted);
    assert_eq!(pool.available(), pool.capacity());

    let state = storage.state();
    assert_eq!(state.aborts, 1);
    assert_eq!(state.completes, 0);
    assert!(state.parts.len() < 12);
}

#[tokio::test]
async fn test_many_failures_still_abort_once() {
    let storage = Arc::new(
        MemoryStorage::new()
            .fail_part(1)
            .fail_part(2)
            .fail_part(3)
            .fail_part(4),
    );
    let mut coordinator = SessionCoordinator::new(
        storage.clone(),
        Arc::new(BufferPool::for_concurrency(4, PART_SIZE)),
        4,
    );
    let data = payload(4 * PART_SIZE);

    let err = coordinator
        .upload(&target(), &data[..], data.len() as u64)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Upload { .. }), "{err:?}");
    assert_eq!(storage.state().aborts, 1);
    assert_eq!(storage.state().completes, 0);
}

#[tokio::test]
async fn test_truncated_input_aborts() {
    let storage = Arc::new(MemoryStorage::new());
    let mut coordinator = SessionCoordinator::new(
        storage.clone(),
        Arc::new(BufferPool::for_concurrency(2, PART_SIZE)),
        2,
    );
    let data = payload(5 * PART_SIZE + 10);

    let err = coordinator
        .upload(&target(), &data[..], 8 * PART_SIZE as u64)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Input { .. }), "{err:?}");
    assert_eq!(storage.state().aborts, 1);
    assert_eq!(storage.state().completes, 0);
}
