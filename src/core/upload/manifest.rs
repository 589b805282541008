// Authors: Robert Lopez
// License: MIT (See `LICENSE.md`)

use super::CompletedPart;
use crate::error::Error;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    OnceLock,
};

/// Completed parts recorded by position, so the manifest comes out in
/// part-number order no matter which upload finishes first.
///
/// Each slot is written at most once; `filled` counts the written slots.
#[derive(Debug)]
pub struct PartManifest {
    slots: Vec<OnceLock<CompletedPart>>,
    filled: AtomicUsize,
}

impl PartManifest {
    pub fn new(part_count: usize) -> Self {
        Self {
            slots: (0..part_count).map(|_| OnceLock::new()).collect(),
            filled: AtomicUsize::new(0),
        }
    }

    pub fn expected(&self) -> usize {
        self.slots.len()
    }

    pub fn filled(&self) -> usize {
        self.filled.load(Ordering::SeqCst)
    }

    pub fn is_complete(&self) -> bool {
        self.filled() == self.expected()
    }

    /// Records a part into slot `part_number - 1`.
    pub fn record(&self, part: CompletedPart) -> Result<(), Error> {
        let slot = (part.part_number as usize)
            .checked_sub(1)
            .and_then(|index| self.slots.get(index))
            .ok_or_else(|| {
                Error::Internal(format!(
                    "part {} is outside the expected {} parts",
                    part.part_number,
                    self.expected()
                ))
            })?;

        let part_number = part.part_number;
        slot.set(part)
            .map_err(|_| Error::Internal(format!("part {part_number} was recorded twice")))?;
        self.filled.fetch_add(1, Ordering::SeqCst);

        Ok(())
    }

    /// The ordered manifest, or an error naming the first missing part.
    pub fn into_parts(self) -> Result<Vec<CompletedPart>, Error> {
        if !self.is_complete() {
            let missing = self
                .slots
                .iter()
                .position(|slot| slot.get().is_none())
                .map_or(self.expected(), |index| index + 1);

            return Err(Error::Internal(format!(
                "only {} of {} parts were uploaded, part {missing} is missing",
                self.filled(),
                self.expected()
            )));
        }

        Ok(self
            .slots
            .into_iter()
            .filter_map(OnceLock::into_inner)
            .collect())
    }
}
