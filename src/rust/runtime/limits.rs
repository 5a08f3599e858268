// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

/// Default page size used to split buffers into blocks.
pub const PAGE_SIZE: usize = 4096;

/// Default capacity of a memsink staging queue, in bytes.
pub const STAGING_CAPACITY: usize = 65536;

/// Maximum length of an object name.
pub const NAME_LEN_MAX: usize = 64;
