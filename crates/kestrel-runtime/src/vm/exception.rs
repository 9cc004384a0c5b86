//! Handler stack for try/catch/finally
//!
//! `TryEnter` pushes a record snapshotting the frame depth and stack pointer.
//! A throw pops the innermost record, unwinds to its snapshot and continues
//! at the catch target (or the finally target when there is no catch).

use crate::bytecode::NO_TARGET;

/// Saved unwind target for one active try region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerRecord {
    pub catch_target: Option<usize>,
    pub finally_target: Option<usize>,
    /// Number of frames live when the region was entered
    pub frame_depth: usize,
    /// Stack pointer when the region was entered
    pub sp: usize,
}

impl HandlerRecord {
    /// Build a record from raw `TryEnter` operands
    pub fn from_operands(catch: usize, finally: usize, frame_depth: usize, sp: usize) -> Self {
        let target = |t: usize| (t != NO_TARGET).then_some(t);
        Self {
            catch_target: target(catch),
            finally_target: target(finally),
            frame_depth,
            sp,
        }
    }
}

/// LIFO stack of handler records for one task
#[derive(Debug, Default)]
pub struct HandlerStack {
    records: Vec<HandlerRecord>,
}

impl HandlerStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: HandlerRecord) {
        self.records.push(record);
    }

    pub fn pop(&mut self) -> Option<HandlerRecord> {
        self.records.pop()
    }

    /// Whether a handler is registered at all
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Drop the records registered by frames at or above `frame_depth`
    ///
    /// Called when a frame returns so its regions cannot catch throws raised
    /// after it is gone.
    pub fn discard_frame(&mut self, frame_depth: usize) {
        while self
            .records
            .last()
            .is_some_and(|record| record.frame_depth >= frame_depth)
        {
            self.records.pop();
        }
    }
}
