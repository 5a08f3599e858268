// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    fail::Fail,
    interface::PullSource,
    types::{
        DataBlock,
        ObjectHandle,
    },
};
use ::std::{
    collections::VecDeque,
    sync::{
        Condvar,
        Mutex,
        MutexGuard,
        PoisonError,
    },
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Bounded byte queue standing between a producer that pushes into a memsink and the owner that pulls from it.
pub struct StagingQueue {
    state: Mutex<StagingState>,
    /// Signaled when data arrives or the queue closes.
    ready: Condvar,
    capacity: usize,
    /// Whether pulls wait for data.
    blocking: bool,
}

struct StagingState {
    data: VecDeque<u8>,
    closed: bool,
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl StagingQueue {
    pub fn new(capacity: usize, blocking: bool) -> Self {
        Self {
            state: Mutex::new(StagingState {
                data: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            ready: Condvar::new(),
            capacity,
            blocking,
        }
    }

    /// Copies whole blocks into the queue until one does not fit. Returns the number of blocks accepted.
    pub fn push(&self, blocks: &[DataBlock]) -> Result<usize, Fail> {
        let mut state: MutexGuard<StagingState> = self.state.lock()?;
        if state.closed {
            return Err(Fail::new(libc::ECONNRESET, "staging queue is closed"));
        }
        let mut accepted: usize = 0;
        for block in blocks {
            if state.data.len() + block.len() > self.capacity {
                break;
            }
            state.data.extend(block.as_slice());
            accepted += 1;
        }
        if accepted > 0 {
            self.ready.notify_all();
        }
        Ok(accepted)
    }

    /// Number of queued bytes.
    pub fn len(&self) -> usize {
        self.state.lock().map(|state| state.data.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Closes the queue, waking up any pull waiting for data.
    pub fn close(&self) {
        let mut state: MutexGuard<StagingState> = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.closed = true;
        self.ready.notify_all();
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl PullSource for StagingQueue {
    fn pull_data(&self, _src: ObjectHandle, blocks: &mut [DataBlock]) -> Result<usize, Fail> {
        let mut state: MutexGuard<StagingState> = self.state.lock()?;
        while self.blocking && state.data.is_empty() && !state.closed {
            state = self.ready.wait(state)?;
        }
        if state.data.is_empty() && state.closed {
            return Err(Fail::new(libc::ECONNRESET, "producer detached"));
        }

        let mut filled: usize = 0;
        for block in blocks.iter_mut() {
            let n: usize = block.len().min(state.data.len());
            if n == 0 {
                break;
            }
            for (dst, src) in block.as_mut_slice()[..n].iter_mut().zip(state.data.drain(..n)) {
                *dst = src;
            }
            block.truncate(n);
            filled += 1;
        }
        Ok(filled)
    }

    fn test_for_data(&self, _src: ObjectHandle) -> Result<usize, Fail> {
        Ok(self.state.lock()?.data.len())
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
