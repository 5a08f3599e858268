// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//==============================================================================
// Structures
//==============================================================================

/// Registry Object Handle
///
/// Identifies types and instances alike. Handles are never reused by an [crate::runtime::registry::ObjectRegistry]
/// while the object is registered.
#[derive(Debug, Eq, PartialEq, Hash, Copy, Clone)]
pub struct ObjectHandle(u64);

//==============================================================================
// Trait Implementations
//==============================================================================

impl From<ObjectHandle> for u64 {
    /// Converts a [ObjectHandle] to a [u64].
    fn from(val: ObjectHandle) -> Self {
        val.0
    }
}

impl From<u64> for ObjectHandle {
    /// Converts a [u64] to a [ObjectHandle].
    fn from(val: u64) -> Self {
        ObjectHandle(val)
    }
}
