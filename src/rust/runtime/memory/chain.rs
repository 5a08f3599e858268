// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    fail::Fail,
    memory::{
        AddressSpace,
        Page,
    },
    types::{
        DataBlock,
        MemoryDomain,
    },
};
use ::std::{
    mem,
    ptr::NonNull,
    sync::Arc,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Block Chain
///
/// Ordered blocks describing one transfer, together with the pages that back them. Pages are flushed and released
/// exactly once, when the chain is dropped.
pub struct BlockChain {
    /// Blocks in address order.
    blocks: Vec<DataBlock>,
    /// Pages pinned or resolved for this chain. Empty for kernel-linear buffers.
    pages: Vec<Page>,
    /// Domain the chain was built for.
    domain: MemoryDomain,
    /// Address space that owns the pages.
    space: Arc<dyn AddressSpace>,
}

/// Pages pinned so far. Unpinned on drop unless handed over to a [BlockChain].
struct PinnedPages<'a> {
    pages: Vec<Page>,
    space: &'a dyn AddressSpace,
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl BlockChain {
    /// Blocks of the target chain.
    pub fn blocks(&self) -> &[DataBlock] {
        &self.blocks
    }

    /// Blocks of the target chain, writable.
    pub fn blocks_mut(&mut self) -> &mut [DataBlock] {
        &mut self.blocks
    }

    /// Number of mapped segments.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Checks whether the target chain maps no segment.
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Domain of the target chain.
    pub fn domain(&self) -> MemoryDomain {
        self.domain
    }

    /// Total number of valid bytes in the target chain.
    pub fn total_len(&self) -> usize {
        self.blocks.iter().map(DataBlock::len).sum()
    }

    /// Number of bytes held by the first `filled` blocks. Never accounts for more blocks than are mapped.
    pub fn filled_len(&self, filled: usize) -> usize {
        if filled > self.blocks.len() {
            warn!(
                "filled_len(): peer reported {:?} filled blocks out of {:?}",
                filled,
                self.blocks.len()
            );
        }
        self.blocks.iter().take(filled).map(DataBlock::len).sum()
    }
}

impl<'a> PinnedPages<'a> {
    fn new(space: &'a dyn AddressSpace, pages: Vec<Page>) -> Self {
        Self { pages, space }
    }

    fn len(&self) -> usize {
        self.pages.len()
    }

    /// Hands the pinned pages over to the caller, who becomes responsible for unpinning them.
    fn take(mut self) -> Vec<Page> {
        mem::take(&mut self.pages)
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl Drop for BlockChain {
    fn drop(&mut self) {
        // Blocks point into the pages, so they go first.
        self.blocks.clear();
        for page in self.pages.drain(..) {
            self.space.flush_dcache_page(&page);
            if self.domain == MemoryDomain::UserPinned {
                self.space.unpin_user_page(page);
            }
        }
    }
}

impl<'a> Drop for PinnedPages<'a> {
    fn drop(&mut self) {
        for page in self.pages.drain(..) {
            self.space.unpin_user_page(page);
        }
    }
}

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// Describes the `len` bytes at `addr` in `domain` as a chain of blocks, one per page touched (or a single block for
/// kernel-linear memory). Either the whole range is mapped or nothing is kept.
pub fn build_block_chain(
    space: &Arc<dyn AddressSpace>,
    domain: MemoryDomain,
    addr: usize,
    len: usize,
) -> Result<BlockChain, Fail> {
    trace!("build_block_chain() domain={:?} addr={:#x} len={:?}", domain, addr, len);

    if addr == 0 {
        let cause: &str = "null buffer";
        error!("build_block_chain(): {}", cause);
        return Err(Fail::new(libc::EINVAL, cause));
    }
    if len == 0 {
        let cause: String = format!("zero-length buffer (addr={:#x})", addr);
        error!("build_block_chain(): {}", cause);
        return Err(Fail::new(libc::EINVAL, &cause));
    }
    if addr.checked_add(len).is_none() {
        let cause: String = format!("buffer wraps around the address space (addr={:#x}, len={:?})", addr, len);
        error!("build_block_chain(): {}", cause);
        return Err(Fail::new(libc::EINVAL, &cause));
    }

    let (blocks, pages): (Vec<DataBlock>, Vec<Page>) = match domain {
        MemoryDomain::UserPinned => map_user_pages(space.as_ref(), addr, len)?,
        MemoryDomain::KernelVirtualNoncontiguous => map_vmalloc_pages(space.as_ref(), addr, len)?,
        MemoryDomain::KernelDirect => {
            let base: NonNull<u8> = space.kernel_buffer(addr, len)?;
            let mut blocks: Vec<DataBlock> = alloc_vec(1)?;
            // Safety: the address space vouches for `len` bytes at `base`.
            blocks.push(unsafe { DataBlock::new(base, len) });
            (blocks, Vec::new())
        },
        MemoryDomain::Physical => {
            let cause: String = format!("physical memory is not supported (addr={:#x})", addr);
            error!("build_block_chain(): {}", cause);
            return Err(Fail::new(libc::ENOTSUP, &cause));
        },
    };

    Ok(BlockChain {
        blocks,
        pages,
        domain,
        space: space.clone(),
    })
}

/// Releases a chain built by [build_block_chain]: flushes every page it maps and drops the pins it holds.
pub fn release_block_chain(chain: BlockChain) {
    trace!(
        "release_block_chain() domain={:?} segments={:?}",
        chain.domain,
        chain.blocks.len()
    );
    drop(chain);
}

/// Pins the user pages spanned by `[addr, addr + len)` and builds one block per page.
fn map_user_pages(space: &dyn AddressSpace, addr: usize, len: usize) -> Result<(Vec<DataBlock>, Vec<Page>), Fail> {
    let (first, offset, nr_pages): (usize, usize, usize) = span(space.page_size(), addr, len)?;

    let pinned: PinnedPages = PinnedPages::new(space, space.pin_user_pages(first, nr_pages)?);
    if pinned.len() < nr_pages {
        let cause: String = format!("could only pin {:?} of {:?} user pages", pinned.len(), nr_pages);
        error!("map_user_pages(): {}", cause);
        return Err(Fail::new(libc::ENOMEM, &cause));
    }

    // Dropping `pinned` on any error below releases every page.
    let blocks: Vec<DataBlock> = split_pages(space.page_size(), &pinned.pages, offset, len)?;
    Ok((blocks, pinned.take()))
}

/// Resolves the vmalloc pages spanned by `[addr, addr + len)` and builds one block per page.
fn map_vmalloc_pages(space: &dyn AddressSpace, addr: usize, len: usize) -> Result<(Vec<DataBlock>, Vec<Page>), Fail> {
    let page_size: usize = space.page_size();
    let (first, offset, nr_pages): (usize, usize, usize) = span(page_size, addr, len)?;

    let mut pages: Vec<Page> = alloc_vec(nr_pages)?;
    for i in 0..nr_pages {
        let page_addr: usize = first + i * page_size;
        match space.vmalloc_to_page(page_addr) {
            Some(page) => pages.push(page),
            None => {
                let cause: String = format!("vmalloc page is not mapped (addr={:#x})", page_addr);
                error!("map_vmalloc_pages(): {}", cause);
                return Err(Fail::new(libc::EFAULT, &cause));
            },
        }
    }

    let blocks: Vec<DataBlock> = split_pages(page_size, &pages, offset, len)?;
    Ok((blocks, pages))
}

/// Computes the first page address, the offset into it, and the number of pages spanned by a buffer.
fn span(page_size: usize, addr: usize, len: usize) -> Result<(usize, usize, usize), Fail> {
    debug_assert!(page_size.is_power_of_two());
    let offset: usize = addr & (page_size - 1);
    let first: usize = addr - offset;
    let end: usize = match len.checked_add(offset + page_size - 1) {
        Some(end) => end,
        None => {
            let cause: String = format!("buffer ends in the last page of the address space (addr={:#x})", addr);
            error!("span(): {}", cause);
            return Err(Fail::new(libc::EINVAL, &cause));
        },
    };
    Ok((first, offset, end / page_size))
}

/// Builds one block per page, the first one starting at `offset` and the last one ending after `len` bytes total.
fn split_pages(page_size: usize, pages: &[Page], offset: usize, len: usize) -> Result<Vec<DataBlock>, Fail> {
    let mut blocks: Vec<DataBlock> = alloc_vec(pages.len())?;
    let mut remaining: usize = len;
    let mut start: usize = offset;
    for page in pages {
        let block_len: usize = (page_size - start).min(remaining);
        // Safety: `start + block_len <= page_size`, and the page stays mapped until the chain is dropped.
        let block: DataBlock = unsafe {
            let base: NonNull<u8> = NonNull::new_unchecked(page.as_ptr().as_ptr().add(start));
            DataBlock::new(base, block_len)
        };
        blocks.push(block);
        remaining -= block_len;
        start = 0;
    }
    debug_assert_eq!(remaining, 0);
    Ok(blocks)
}

/// Allocates an empty vector able to hold `n` elements, failing with `ENOMEM` instead of aborting.
fn alloc_vec<T>(n: usize) -> Result<Vec<T>, Fail> {
    let mut v: Vec<T> = Vec::new();
    if v.try_reserve_exact(n).is_err() {
        let cause: String = format!("failed to allocate {:?} entries", n);
        error!("alloc_vec(): {}", cause);
        return Err(Fail::new(libc::ENOMEM, &cause));
    }
    Ok(v)
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
