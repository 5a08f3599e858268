// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use ::std::{
    fmt,
    ptr::NonNull,
    slice,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Data Block
///
/// One contiguous memory segment of a transfer. Blocks only exist inside a [crate::runtime::memory::BlockChain],
/// which keeps the backing memory mapped (and pinned, for user memory) for as long as the blocks are reachable.
pub struct DataBlock {
    /// Start of the segment.
    addr: NonNull<u8>,
    /// Number of bytes mapped at `addr`.
    capacity: usize,
    /// Number of valid bytes. A pull source may shrink this to what it actually wrote.
    len: usize,
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl DataBlock {
    /// Creates a block spanning `len` bytes at `addr`.
    ///
    /// # Safety
    ///
    /// `addr` must be valid for reads and writes of `len` bytes for as long as the block is alive, and no other
    /// block may alias the same bytes.
    pub(crate) unsafe fn new(addr: NonNull<u8>, len: usize) -> Self {
        Self {
            addr,
            capacity: len,
            len,
        }
    }

    /// Number of valid bytes in the target block.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Checks whether the target block holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of bytes mapped by the target block.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Shrinks the valid length of the target block. Growing is not possible.
    pub fn truncate(&mut self, len: usize) {
        if len < self.len {
            self.len = len;
        }
    }

    /// Start address of the target block.
    pub fn as_ptr(&self) -> *const u8 {
        self.addr.as_ptr()
    }

    /// Valid bytes of the target block.
    pub fn as_slice(&self) -> &[u8] {
        // Safety: guaranteed by the contract of `new()` and `len <= capacity`.
        unsafe { slice::from_raw_parts(self.addr.as_ptr(), self.len) }
    }

    /// Valid bytes of the target block, writable.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // Safety: guaranteed by the contract of `new()` and `len <= capacity`.
        unsafe { slice::from_raw_parts_mut(self.addr.as_ptr(), self.len) }
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl fmt::Debug for DataBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataBlock")
            .field("addr", &self.addr)
            .field("len", &self.len)
            .field("capacity", &self.capacity)
            .finish()
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
