// Authors: Robert Lopez
// License: MIT (See `LICENSE.md`)

use crate::error::Error;
use sysinfo::System;
use tracing::debug;

pub const MIB: u64 = 1024 * 1024;

/// Smallest part the backend accepts (every part but the last)
pub const MIN_PART_SIZE: u64 = 5 * MIB;

/// Largest part the backend accepts
pub const MAX_PART_SIZE: u64 = 5 * 1024 * MIB;

/// Most parts a single multipart session may hold
pub const MAX_PARTS: u64 = 10_000;

pub const DEFAULT_PART_SIZE: u64 = 64 * MIB;

/// Memory left untouched when the part size is derived from a budget
pub const RESERVED_MEMORY: u64 = 64 * MIB;

/// Number of parts needed to carry `input_size` bytes in `part_size` chunks.
///
/// Panics if `part_size` is zero.
pub fn part_count(input_size: u64, part_size: u64) -> u64 {
    input_size / part_size + if input_size % part_size == 0 { 0 } else { 1 }
}

/// Number of buffers the pool may hold for a given concurrency: one when
/// reading and uploading alternate, `concurrency + 1` otherwise so the
/// reader can fill the next chunk while every worker is busy.
pub fn buffer_slots(concurrency: usize) -> usize {
    if concurrency <= 1 {
        1
    } else {
        concurrency + 1
    }
}

/// How the part size is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartSizing {
    /// An explicit part size in bytes
    Fixed(u64),
    /// Derive the part size from a memory budget
    Memory(MemoryBudget),
}

impl Default for PartSizing {
    fn default() -> Self {
        Self::Fixed(DEFAULT_PART_SIZE)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryBudget {
    /// Whatever the host currently reports as available
    Available,
    /// A fixed number of bytes
    Limit(u64),
}

/// Source of the host's available memory.
pub trait MemoryProbe: Send + Sync {
    fn available_memory(&self) -> Option<u64>;
}

/// Reads available memory from the operating system.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemMemory;

impl MemoryProbe for SystemMemory {
    fn available_memory(&self) -> Option<u64> {
        let mut system = System::new();
        system.refresh_memory();

        match system.available_memory() {
            0 => None,
            bytes => Some(bytes),
        }
    }
}

/// Computes the part size for an upload from the input size, the requested
/// sizing mode and the backend's part constraints.
///
/// ---
/// Example Usage:
/// ```
///
/// let policy = SizingPolicy::new();
///
/// let part_size: u64 = policy.part_size(
///     input_size,
///     PartSizing::Memory(MemoryBudget::Available),
///     4,
/// )?;
/// ```
#[derive(Debug, Default)]
pub struct SizingPolicy<P = SystemMemory> {
    probe: P,
}

impl SizingPolicy {
    pub fn new() -> Self {
        Self {
            probe: SystemMemory,
        }
    }
}

impl<P: MemoryProbe> SizingPolicy<P> {
    pub fn with_probe(probe: P) -> Self {
        Self { probe }
    }

    pub fn part_size(
        &self,
        input_size: u64,
        sizing: PartSizing,
        concurrency: usize,
    ) -> Result<u64, Error> {
        if input_size == 0 {
            return Err(Error::config("input size must be positive"));
        }

        match sizing {
            PartSizing::Fixed(part_size) => fixed_part_size(input_size, part_size),
            PartSizing::Memory(budget) => {
                let budget = match budget {
                    MemoryBudget::Limit(bytes) => bytes,
                    MemoryBudget::Available => self.probe.available_memory().ok_or_else(|| {
                        Error::config(
                            "available memory could not be determined, pass an explicit part size",
                        )
                    })?,
                };

                budget_part_size(input_size, budget, concurrency)
            }
        }
    }
}

/// Smallest part size that keeps `input_size` within `MAX_PARTS` parts
fn required_part_size(input_size: u64) -> u64 {
    part_count(input_size, MAX_PARTS).max(MIN_PART_SIZE)
}

fn fixed_part_size(input_size: u64, part_size: u64) -> Result<u64, Error> {
    if part_size < MIN_PART_SIZE {
        return Err(Error::config(format!(
            "part size {part_size} is below the minimum of {MIN_PART_SIZE} bytes"
        )));
    }

    if part_size > MAX_PART_SIZE {
        return Err(Error::config(format!(
            "part size {part_size} is above the maximum of {MAX_PART_SIZE} bytes"
        )));
    }

    let required = required_part_size(input_size);
    if part_size < required {
        return Err(Error::config(format!(
            "{input_size} bytes in parts of {part_size} bytes exceeds {MAX_PARTS} parts, \
             use a part size of at least {required} bytes"
        )));
    }

    Ok(part_size)
}

fn budget_part_size(input_size: u64, budget: u64, concurrency: usize) -> Result<u64, Error> {
    let slots = buffer_slots(concurrency) as u64;
    let usable = budget.saturating_sub(RESERVED_MEMORY);
    let per_buffer = usable / slots / MIB * MIB;

    if per_buffer < MIN_PART_SIZE {
        return Err(Error::config(format!(
            "memory budget of {budget} bytes cannot hold {slots} buffer(s) of {MIN_PART_SIZE} bytes \
             above the {RESERVED_MEMORY} byte reserve"
        )));
    }

    let ceiling = per_buffer.min(MAX_PART_SIZE);
    let required = required_part_size(input_size);
    if required > ceiling {
        return Err(Error::config(format!(
            "{input_size} bytes need parts of at least {required} bytes, \
             the memory budget affords {ceiling}"
        )));
    }

    let part_size = ceiling.min(input_size.max(MIN_PART_SIZE));

    debug!(
        budget = budget,
        buffers = slots,
        part_size = part_size,
        "Derived part size from memory budget"
    );

    Ok(part_size)
}
