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
};
use ::std::{
    ptr::{
        self,
        NonNull,
    },
    sync::{
        atomic::{
            AtomicUsize,
            Ordering,
        },
        Mutex,
        MutexGuard,
        PoisonError,
    },
};

//======================================================================================================================
// Constants
//======================================================================================================================

const USER_BASE: usize = 0x1000_0000;
const VMALLOC_BASE: usize = 0x5000_0000;
const KERNEL_BASE: usize = 0x9000_0000;

//======================================================================================================================
// Structures
//======================================================================================================================

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum RegionKind {
    User,
    Vmalloc,
    Kernel,
}

/// A simulated mapping backed by heap memory.
struct Region {
    kind: RegionKind,
    start: usize,
    len: usize,
    buf: NonNull<u8>,
}

struct SimState {
    regions: Vec<Region>,
    user_cursor: usize,
    vmalloc_cursor: usize,
    kernel_cursor: usize,
    /// One-shot: the next pin request stops after this many pages.
    fail_pin_at: Option<usize>,
}

/// Address space that backs user, vmalloc, and kernel-linear mappings with heap memory and counts the page
/// operations performed on it.
///
/// Every mapping is followed by an unmapped guard page, so buffers that overrun a mapping fail to resolve.
pub struct SimulatedAddressSpace {
    page_size: usize,
    state: Mutex<SimState>,
    pins: AtomicUsize,
    unpins: AtomicUsize,
    bad_unpins: AtomicUsize,
    flushes: AtomicUsize,
}

// Safety: region buffers are only reached through raw pointers handed out by the address space, and the region table
// is guarded by a mutex.
unsafe impl Send for SimulatedAddressSpace {}
unsafe impl Sync for SimulatedAddressSpace {}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl SimulatedAddressSpace {
    pub fn new(page_size: usize) -> Self {
        assert!(page_size.is_power_of_two());
        Self {
            page_size,
            state: Mutex::new(SimState {
                regions: Vec::new(),
                user_cursor: USER_BASE,
                vmalloc_cursor: VMALLOC_BASE,
                kernel_cursor: KERNEL_BASE,
                fail_pin_at: None,
            }),
            pins: AtomicUsize::new(0),
            unpins: AtomicUsize::new(0),
            bad_unpins: AtomicUsize::new(0),
            flushes: AtomicUsize::new(0),
        }
    }

    /// Maps `len` zeroed bytes of pinnable user memory. Returns the page-aligned start address.
    pub fn map_user(&self, len: usize) -> usize {
        self.map(RegionKind::User, len)
    }

    /// Maps `len` zeroed bytes of vmalloc memory. Returns the page-aligned start address.
    pub fn map_vmalloc(&self, len: usize) -> usize {
        self.map(RegionKind::Vmalloc, len)
    }

    /// Maps `len` zeroed bytes of kernel-linear memory. Returns the page-aligned start address.
    pub fn map_kernel(&self, len: usize) -> usize {
        self.map(RegionKind::Kernel, len)
    }

    /// Makes the next pin request stop after `n` pages.
    pub fn fail_pin_at(&self, n: usize) {
        self.lock().fail_pin_at = Some(n);
    }

    /// Copies `data` to the simulated address `addr`.
    pub fn write(&self, addr: usize, data: &[u8]) -> Result<(), Fail> {
        let dst: NonNull<u8> = self.resolve(addr, data.len())?;
        // Safety: `resolve` checked that the range lies inside a live region.
        unsafe { ptr::copy_nonoverlapping(data.as_ptr(), dst.as_ptr(), data.len()) };
        Ok(())
    }

    /// Copies `len` bytes out of the simulated address `addr`.
    pub fn read(&self, addr: usize, len: usize) -> Result<Vec<u8>, Fail> {
        let src: NonNull<u8> = self.resolve(addr, len)?;
        let mut data: Vec<u8> = vec![0; len];
        // Safety: `resolve` checked that the range lies inside a live region.
        unsafe { ptr::copy_nonoverlapping(src.as_ptr(), data.as_mut_ptr(), len) };
        Ok(data)
    }

    /// Number of pages pinned so far.
    pub fn pin_count(&self) -> usize {
        self.pins.load(Ordering::SeqCst)
    }

    /// Number of pages unpinned so far.
    pub fn unpin_count(&self) -> usize {
        self.unpins.load(Ordering::SeqCst)
    }

    /// Number of unpin requests for pages that were never pinnable.
    pub fn bad_unpin_count(&self) -> usize {
        self.bad_unpins.load(Ordering::SeqCst)
    }

    /// Number of pages flushed so far.
    pub fn flush_count(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }

    /// Number of pages currently pinned.
    pub fn pinned_pages(&self) -> usize {
        self.pin_count().saturating_sub(self.unpin_count())
    }

    fn lock(&self) -> MutexGuard<SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn map(&self, kind: RegionKind, len: usize) -> usize {
        let len: usize = (len.max(1) + self.page_size - 1) & !(self.page_size - 1);
        let buf: Box<[u8]> = vec![0; len].into_boxed_slice();
        // Safety: a boxed slice is never null.
        let buf: NonNull<u8> = unsafe { NonNull::new_unchecked(Box::into_raw(buf) as *mut u8) };

        let mut state: MutexGuard<SimState> = self.lock();
        let cursor: &mut usize = match kind {
            RegionKind::User => &mut state.user_cursor,
            RegionKind::Vmalloc => &mut state.vmalloc_cursor,
            RegionKind::Kernel => &mut state.kernel_cursor,
        };
        let start: usize = *cursor;
        *cursor += len + self.page_size;
        state.regions.push(Region { kind, start, len, buf });
        start
    }

    /// Resolves `[addr, addr + len)` inside a single region of any kind.
    fn resolve(&self, addr: usize, len: usize) -> Result<NonNull<u8>, Fail> {
        self.resolve_in(None, addr, len)
    }

    fn resolve_in(&self, kind: Option<RegionKind>, addr: usize, len: usize) -> Result<NonNull<u8>, Fail> {
        let state: MutexGuard<SimState> = self.lock();
        for region in state.regions.iter() {
            if kind.map_or(false, |k| k != region.kind) {
                continue;
            }
            if addr >= region.start && addr.saturating_add(len) <= region.start + region.len {
                // Safety: the offset is within the region buffer.
                return Ok(unsafe { NonNull::new_unchecked(region.buf.as_ptr().add(addr - region.start)) });
            }
        }
        Err(Fail::new(libc::EFAULT, "address is not mapped"))
    }

    fn is_user_frame(&self, frame: NonNull<u8>) -> bool {
        let frame: usize = frame.as_ptr() as usize;
        self.lock().regions.iter().any(|region| {
            let buf: usize = region.buf.as_ptr() as usize;
            region.kind == RegionKind::User && frame >= buf && frame < buf + region.len
        })
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl AddressSpace for SimulatedAddressSpace {
    fn page_size(&self) -> usize {
        self.page_size
    }

    fn pin_user_pages(&self, start: usize, count: usize) -> Result<Vec<Page>, Fail> {
        let limit: usize = match self.lock().fail_pin_at.take() {
            Some(n) => n.min(count),
            None => count,
        };
        let mut pages: Vec<Page> = Vec::with_capacity(limit);
        for i in 0..limit {
            let page_addr: usize = start + i * self.page_size;
            match self.resolve_in(Some(RegionKind::User), page_addr, self.page_size) {
                Ok(frame) => {
                    self.pins.fetch_add(1, Ordering::SeqCst);
                    // Safety: the frame stays mapped until the address space is dropped.
                    pages.push(unsafe { Page::from_raw(frame) });
                },
                Err(_) => break,
            }
        }
        Ok(pages)
    }

    fn unpin_user_page(&self, page: Page) {
        if !self.is_user_frame(page.as_ptr()) {
            self.bad_unpins.fetch_add(1, Ordering::SeqCst);
            return;
        }
        self.unpins.fetch_add(1, Ordering::SeqCst);
    }

    fn vmalloc_to_page(&self, addr: usize) -> Option<Page> {
        let page_addr: usize = addr & !(self.page_size - 1);
        let frame: NonNull<u8> = self
            .resolve_in(Some(RegionKind::Vmalloc), page_addr, self.page_size)
            .ok()?;
        // Safety: the frame stays mapped until the address space is dropped.
        Some(unsafe { Page::from_raw(frame) })
    }

    fn kernel_buffer(&self, addr: usize, len: usize) -> Result<NonNull<u8>, Fail> {
        self.resolve_in(Some(RegionKind::Kernel), addr, len)
    }

    fn flush_dcache_page(&self, _page: &Page) {
        self.flushes.fetch_add(1, Ordering::SeqCst);
    }
}

impl Drop for SimulatedAddressSpace {
    fn drop(&mut self) {
        let state: &mut SimState = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        for region in state.regions.drain(..) {
            // Safety: the buffer was leaked from a boxed slice of `region.len` bytes in `map`.
            unsafe {
                drop(Box::from_raw(ptr::slice_from_raw_parts_mut(region.buf.as_ptr(), region.len)));
            }
        }
    }
}
