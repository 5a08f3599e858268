// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

/// Encodes control operations on a memory source.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum MemsrcOp {
    /// Begin attaching to a consumer.
    Attach,
    /// The consumer accepted the connection.
    Attached,
    /// Begin detaching from the consumer.
    Detach,
    /// The connection is gone, either detached or refused.
    Detached,
    /// Begin pushing data.
    Push,
    /// Pushing completed, successfully or not.
    Pushed,
    /// Begin a status query.
    Report,
    /// Status query completed.
    Reported,
    /// Tear the source down.
    Exit,
}
