// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

mod block;
mod object;

//======================================================================================================================
// Exports
//======================================================================================================================

pub use self::{
    block::DataBlock,
    object::ObjectHandle,
};

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::fail::Fail;

//======================================================================================================================
// Structures
//======================================================================================================================

/// Memory domain in which the address of a transfer is valid.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum MemoryDomain {
    /// User virtual addresses. Pages are pinned for the duration of a transfer.
    UserPinned,
    /// A kernel-linear buffer. Used as-is.
    KernelDirect,
    /// A vmalloc region. Pages are resolved one by one.
    KernelVirtualNoncontiguous,
    /// Physical addresses. Not supported.
    Physical,
}

/// Transfer semantics advertised by an endpoint.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum IoMode {
    /// Calls may suspend waiting for space or data.
    Blocking,
    /// Calls never suspend.
    NonBlocking,
    /// Asynchronous streaming. Advertised only; transfers behave as [IoMode::NonBlocking].
    Streaming,
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl TryFrom<u32> for MemoryDomain {
    type Error = Fail;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(MemoryDomain::UserPinned),
            1 => Ok(MemoryDomain::KernelDirect),
            2 => Ok(MemoryDomain::KernelVirtualNoncontiguous),
            3 => Ok(MemoryDomain::Physical),
            _ => {
                let cause: String = format!("invalid memory domain (value={:?})", value);
                error!("MemoryDomain::try_from(): {}", cause);
                Err(Fail::new(libc::EINVAL, &cause))
            },
        }
    }
}

impl From<MemoryDomain> for u32 {
    fn from(domain: MemoryDomain) -> Self {
        match domain {
            MemoryDomain::UserPinned => 0,
            MemoryDomain::KernelDirect => 1,
            MemoryDomain::KernelVirtualNoncontiguous => 2,
            MemoryDomain::Physical => 3,
        }
    }
}

impl TryFrom<u32> for IoMode {
    type Error = Fail;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(IoMode::Blocking),
            1 => Ok(IoMode::NonBlocking),
            2 => Ok(IoMode::Streaming),
            _ => {
                let cause: String = format!("invalid io mode (value={:?})", value);
                error!("IoMode::try_from(): {}", cause);
                Err(Fail::new(libc::EINVAL, &cause))
            },
        }
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
