// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

mod chain;

//==============================================================================
// Imports
//==============================================================================

use crate::runtime::fail::Fail;
use ::std::ptr::NonNull;

//==============================================================================
// Exports
//==============================================================================

pub use self::chain::{
    build_block_chain,
    release_block_chain,
    BlockChain,
};

//==============================================================================
// Structures
//==============================================================================

/// A page frame mapped in the kernel address space.
pub struct Page {
    frame: NonNull<u8>,
}

// Safety: a page frame is plain memory; ownership of the reference is tracked by the [AddressSpace].
unsafe impl Send for Page {}
unsafe impl Sync for Page {}

impl Page {
    /// Wraps the kernel mapping of a page frame.
    ///
    /// # Safety
    ///
    /// `frame` must point to `page_size()` bytes that stay mapped while the page is pinned or, for vmalloc
    /// memory, while the owning region is allocated.
    pub unsafe fn from_raw(frame: NonNull<u8>) -> Self {
        Self { frame }
    }

    /// Kernel address of the first byte of the target page.
    pub fn as_ptr(&self) -> NonNull<u8> {
        self.frame
    }
}

//==============================================================================
// Traits
//==============================================================================

/// Page services a block chain relies on.
pub trait AddressSpace: Send + Sync {
    /// Page granularity of the target address space.
    fn page_size(&self) -> usize;

    /// Pins up to `count` user pages starting at the page-aligned address `start`. Pages are returned in address
    /// order. A short vector means the remaining pages could not be pinned; those that were must still be unpinned
    /// by the caller.
    fn pin_user_pages(&self, start: usize, count: usize) -> Result<Vec<Page>, Fail>;

    /// Drops the reference taken on `page` by [AddressSpace::pin_user_pages].
    fn unpin_user_page(&self, page: Page);

    /// Resolves the page backing the vmalloc address `addr`.
    fn vmalloc_to_page(&self, addr: usize) -> Option<Page>;

    /// Resolves a kernel-linear buffer of `len` bytes at `addr`.
    fn kernel_buffer(&self, addr: usize, len: usize) -> Result<NonNull<u8>, Fail>;

    /// Writes back and invalidates CPU caches for `page`.
    fn flush_dcache_page(&self, page: &Page);
}
