// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    fail::Fail,
    types::{
        DataBlock,
        IoMode,
        MemoryDomain,
        ObjectHandle,
    },
};
use ::std::{
    fmt,
    sync::Arc,
};

//======================================================================================================================
// Constants
//======================================================================================================================

/// Registry tag of the push-sink capability.
pub const PUSH_SINK_INTERFACE: &str = "stm_data_interface_push_sink";

/// Registry tag of the pull-sink capability.
pub const PULL_SINK_INTERFACE: &str = "stm_data_interface_pull_sink";

/// Registry tag of the push-notify capability.
pub const PUSH_NOTIFY_INTERFACE: &str = "stm_data_interface_push_notify";

//======================================================================================================================
// Traits
//======================================================================================================================

/// Capability exposed by a producer to the consumer that pulls from it.
pub trait PullSource: Send + Sync {
    /// Fills `blocks` in order. Returns the number of blocks that hold data; a block may be shrunk to the number of
    /// bytes actually written.
    fn pull_data(&self, src: ObjectHandle, blocks: &mut [DataBlock]) -> Result<usize, Fail>;

    /// Returns the number of bytes ready to be pulled.
    fn test_for_data(&self, _src: ObjectHandle) -> Result<usize, Fail> {
        Err(Fail::new(libc::ENODEV, "test_for_data is not provided"))
    }

    /// Reads control `selector` into `value`, returning the number of bytes written.
    fn get_compound_control(&self, _src: ObjectHandle, _selector: u32, _value: &mut [u8]) -> Result<usize, Fail> {
        Err(Fail::new(libc::ENODEV, "get_compound_control is not provided"))
    }

    /// Writes control `selector`.
    fn set_compound_control(&self, _src: ObjectHandle, _selector: u32, _value: &[u8]) -> Result<(), Fail> {
        Err(Fail::new(libc::ENODEV, "set_compound_control is not provided"))
    }
}

/// Capability exposed by a consumer that pulls data from a producer.
pub trait PullSink: Send + Sync {
    /// Binds producer `src` to consumer `sink`, handing over the producer's pull-source capability.
    fn connect(&self, src: ObjectHandle, sink: ObjectHandle, source: Arc<dyn PullSource>) -> Result<(), Fail>;

    /// Unbinds producer `src` from consumer `sink`.
    fn disconnect(&self, src: ObjectHandle, sink: ObjectHandle) -> Result<(), Fail>;

    /// Signals event `event` to consumer `sink`.
    fn notify(&self, sink: ObjectHandle, event: u32) -> Result<(), Fail>;

    fn mode(&self) -> IoMode;

    fn alignment(&self) -> usize;

    /// Largest transfer accepted at once. Zero means unlimited.
    fn max_transfer(&self) -> usize;

    fn domain(&self) -> MemoryDomain;
}

/// Capability exposed by a consumer that has data pushed into it.
pub trait PushSink: Send + Sync {
    /// Binds producer `src` to consumer `sink`.
    fn connect(&self, src: ObjectHandle, sink: ObjectHandle) -> Result<(), Fail>;

    /// Unbinds producer `src` from consumer `sink`.
    fn disconnect(&self, src: ObjectHandle, sink: ObjectHandle) -> Result<(), Fail>;

    /// Consumes `blocks` pushed by producer `src` in order. Returns the number of blocks consumed; a block may be shrunk
    /// to the number of bytes actually consumed.
    fn push_data(&self, src: ObjectHandle, sink: ObjectHandle, blocks: &mut [DataBlock]) -> Result<usize, Fail>;

    fn mode(&self) -> IoMode;

    fn alignment(&self) -> usize;

    /// Largest transfer accepted at once. Zero means unlimited.
    fn max_transfer(&self) -> usize;

    fn domain(&self) -> MemoryDomain;
}

/// Capability exposed by a producer to be told about consumer-side conditions.
pub trait PushNotify: Send + Sync {
    fn notify(&self, src: ObjectHandle, event: u32) -> Result<(), Fail>;
}

//======================================================================================================================
// Structures
//======================================================================================================================

/// Interface a producer asks for when attaching to a consumer.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum InterfaceType {
    PushSink,
    PullSink,
    PushNotify,
}

/// A capability table, as published in the registry.
#[derive(Clone)]
pub enum Capability {
    PushSink(Arc<dyn PushSink>),
    PullSink(Arc<dyn PullSink>),
    PushNotify(Arc<dyn PushNotify>),
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl InterfaceType {
    /// Registry tag under which the target interface is published.
    pub fn tag(&self) -> &'static str {
        match self {
            InterfaceType::PushSink => PUSH_SINK_INTERFACE,
            InterfaceType::PullSink => PULL_SINK_INTERFACE,
            InterfaceType::PushNotify => PUSH_NOTIFY_INTERFACE,
        }
    }
}

impl Capability {
    pub fn interface_type(&self) -> InterfaceType {
        match self {
            Capability::PushSink(_) => InterfaceType::PushSink,
            Capability::PullSink(_) => InterfaceType::PullSink,
            Capability::PushNotify(_) => InterfaceType::PushNotify,
        }
    }

    pub fn into_push_sink(self) -> Result<Arc<dyn PushSink>, Fail> {
        match self {
            Capability::PushSink(sink) => Ok(sink),
            other => Err(mismatch(InterfaceType::PushSink, other.interface_type())),
        }
    }

    pub fn into_pull_sink(self) -> Result<Arc<dyn PullSink>, Fail> {
        match self {
            Capability::PullSink(sink) => Ok(sink),
            other => Err(mismatch(InterfaceType::PullSink, other.interface_type())),
        }
    }

    pub fn into_push_notify(self) -> Result<Arc<dyn PushNotify>, Fail> {
        match self {
            Capability::PushNotify(notify) => Ok(notify),
            other => Err(mismatch(InterfaceType::PushNotify, other.interface_type())),
        }
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl fmt::Debug for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Capability({:?})", self.interface_type())
    }
}

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

fn mismatch(expected: InterfaceType, found: InterfaceType) -> Fail {
    let cause: String = format!("capability mismatch (expected={:?}, found={:?})", expected, found);
    error!("Capability: {}", cause);
    Fail::new(libc::ENODEV, &cause)
}
