// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    fail::Fail,
    interface::{
        Capability,
        PullSource,
        PushSink,
        PUSH_SINK_INTERFACE,
    },
    types::{
        DataBlock,
        IoMode,
        MemoryDomain,
        ObjectHandle,
    },
    MemioRuntime,
};
use ::crossbeam_channel::{
    Receiver,
    Sender,
};
use ::std::{
    collections::{
        HashMap,
        VecDeque,
    },
    sync::{
        Arc,
        Mutex,
        MutexGuard,
        PoisonError,
    },
};

//======================================================================================================================
// Constants
//======================================================================================================================

/// Registry type of stub consumers.
pub const STUB_CONSUMER_TYPE: &str = "stub_consumer";

/// Registry type of stub producers.
pub const STUB_PRODUCER_TYPE: &str = "stub_producer";

//======================================================================================================================
// Structures
//======================================================================================================================

/// How a [StubPushSink] treats what it is given.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum StubBehavior {
    /// Consumes every block in full.
    ConsumeAll,
    /// Consumes at most this many bytes, shrinking the last block it touches.
    ConsumeBytes(usize),
    /// Refuses connections.
    RefuseConnect,
    /// Fails every push with this errno.
    FailPush(i32),
}

/// Consumer exposing the push-sink capability. Records what it is given.
pub struct StubPushSink {
    behavior: StubBehavior,
    mode: IoMode,
    max_transfer: usize,
    state: Mutex<StubSinkState>,
}

struct StubSinkState {
    connected: Option<ObjectHandle>,
    connects: usize,
    disconnects: usize,
    pushes: usize,
    received: Vec<u8>,
    /// Blocks the next push until released.
    gate: Option<(Sender<()>, Receiver<()>)>,
}

/// Producer exposing the pull-source capability, serving bytes queued with [StubPullSource::feed].
pub struct StubPullSource {
    state: Mutex<StubSourceState>,
}

struct StubSourceState {
    data: VecDeque<u8>,
    controls: HashMap<u32, Vec<u8>>,
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl StubPushSink {
    pub fn new(behavior: StubBehavior, mode: IoMode, max_transfer: usize) -> Self {
        Self {
            behavior,
            mode,
            max_transfer,
            state: Mutex::new(StubSinkState {
                connected: None,
                connects: 0,
                disconnects: 0,
                pushes: 0,
                received: Vec::new(),
                gate: None,
            }),
        }
    }

    /// Makes the next push wait. Returns a receiver signaled once the push has started and a sender that lets it go.
    pub fn hold_next_push(&self) -> (Receiver<()>, Sender<()>) {
        let (entered_tx, entered_rx): (Sender<()>, Receiver<()>) = crossbeam_channel::bounded(1);
        let (release_tx, release_rx): (Sender<()>, Receiver<()>) = crossbeam_channel::bounded(1);
        self.lock().gate = Some((entered_tx, release_rx));
        (entered_rx, release_tx)
    }

    pub fn connected(&self) -> Option<ObjectHandle> {
        self.lock().connected
    }

    pub fn connects(&self) -> usize {
        self.lock().connects
    }

    pub fn disconnects(&self) -> usize {
        self.lock().disconnects
    }

    pub fn pushes(&self) -> usize {
        self.lock().pushes
    }

    /// Bytes consumed so far, in order.
    pub fn received(&self) -> Vec<u8> {
        self.lock().received.clone()
    }

    fn lock(&self) -> MutexGuard<StubSinkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl StubPullSource {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(StubSourceState {
                data: VecDeque::new(),
                controls: HashMap::new(),
            }),
        }
    }

    /// Queues `data` to be pulled.
    pub fn feed(&self, data: &[u8]) {
        self.lock().data.extend(data);
    }

    /// Value last written to control `selector`.
    pub fn control(&self, selector: u32) -> Option<Vec<u8>> {
        self.lock().controls.get(&selector).cloned()
    }

    fn lock(&self) -> MutexGuard<StubSourceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl PushSink for StubPushSink {
    fn connect(&self, src: ObjectHandle, _sink: ObjectHandle) -> Result<(), Fail> {
        if self.behavior == StubBehavior::RefuseConnect {
            return Err(Fail::new(libc::EAGAIN, "stub consumer refuses connections"));
        }
        let mut state: MutexGuard<StubSinkState> = self.lock();
        if state.connected.is_some() {
            return Err(Fail::new(libc::EBUSY, "stub consumer is already connected"));
        }
        state.connected = Some(src);
        state.connects += 1;
        Ok(())
    }

    fn disconnect(&self, src: ObjectHandle, _sink: ObjectHandle) -> Result<(), Fail> {
        let mut state: MutexGuard<StubSinkState> = self.lock();
        if state.connected != Some(src) {
            return Err(Fail::new(libc::ENODEV, "stub consumer is not connected to this producer"));
        }
        state.connected = None;
        state.disconnects += 1;
        Ok(())
    }

    fn push_data(&self, _src: ObjectHandle, _sink: ObjectHandle, blocks: &mut [DataBlock]) -> Result<usize, Fail> {
        let gate: Option<(Sender<()>, Receiver<()>)> = self.lock().gate.take();
        if let Some((entered, release)) = gate {
            let _ = entered.send(());
            let _ = release.recv();
        }

        let mut state: MutexGuard<StubSinkState> = self.lock();
        state.pushes += 1;
        let mut budget: usize = match self.behavior {
            StubBehavior::FailPush(errno) => return Err(Fail::new(errno, "stub consumer fails pushes")),
            StubBehavior::ConsumeBytes(n) => n,
            StubBehavior::ConsumeAll | StubBehavior::RefuseConnect => usize::MAX,
        };
        let mut consumed: usize = 0;
        for block in blocks.iter_mut() {
            if budget == 0 {
                break;
            }
            let n: usize = block.len().min(budget);
            state.received.extend_from_slice(&block.as_slice()[..n]);
            block.truncate(n);
            budget -= n;
            consumed += 1;
        }
        Ok(consumed)
    }

    fn mode(&self) -> IoMode {
        self.mode
    }

    fn alignment(&self) -> usize {
        0
    }

    fn max_transfer(&self) -> usize {
        self.max_transfer
    }

    fn domain(&self) -> MemoryDomain {
        MemoryDomain::KernelDirect
    }
}

impl PullSource for StubPullSource {
    fn pull_data(&self, _src: ObjectHandle, blocks: &mut [DataBlock]) -> Result<usize, Fail> {
        let mut state: MutexGuard<StubSourceState> = self.lock();
        let mut filled: usize = 0;
        for block in blocks.iter_mut() {
            let n: usize = block.len().min(state.data.len());
            if n == 0 {
                break;
            }
            for (dst, src) in block.as_mut_slice()[..n].iter_mut().zip(state.data.drain(..n)) {
                *dst = src;
            }
            block.truncate(n);
            filled += 1;
        }
        Ok(filled)
    }

    fn test_for_data(&self, _src: ObjectHandle) -> Result<usize, Fail> {
        Ok(self.lock().data.len())
    }

    fn get_compound_control(&self, _src: ObjectHandle, selector: u32, value: &mut [u8]) -> Result<usize, Fail> {
        let state: MutexGuard<StubSourceState> = self.lock();
        match state.controls.get(&selector) {
            Some(stored) => {
                let n: usize = stored.len().min(value.len());
                value[..n].copy_from_slice(&stored[..n]);
                Ok(n)
            },
            None => Err(Fail::new(libc::EINVAL, "unknown control")),
        }
    }

    fn set_compound_control(&self, _src: ObjectHandle, selector: u32, value: &[u8]) -> Result<(), Fail> {
        self.lock().controls.insert(selector, value.to_vec());
        Ok(())
    }
}

impl Default for StubPullSource {
    fn default() -> Self {
        Self::new()
    }
}

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// Registers a stub consumer named `name` and publishes `sink` as its push-sink capability.
pub fn register_push_sink(runtime: &MemioRuntime, name: &str, sink: Arc<StubPushSink>) -> Result<ObjectHandle, Fail> {
    let registry = runtime.registry();
    let typ: ObjectHandle = registry.register_type(STUB_CONSUMER_TYPE)?;
    let handle: ObjectHandle = registry.register_instance(typ, name)?;
    registry.publish_attribute(handle, PUSH_SINK_INTERFACE, Capability::PushSink(sink))?;
    Ok(handle)
}

/// Registers a stub producer named `name`.
pub fn register_producer(runtime: &MemioRuntime, name: &str) -> Result<ObjectHandle, Fail> {
    let registry = runtime.registry();
    let typ: ObjectHandle = registry.register_type(STUB_PRODUCER_TYPE)?;
    registry.register_instance(typ, name)
}
