// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

/// Encodes control operations on a memory sink.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum MemsinkOp {
    Attach,
    Detach,
}
