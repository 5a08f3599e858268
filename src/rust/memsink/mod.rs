// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

mod operation;
mod staging;
mod state;

//======================================================================================================================
// Exports
//======================================================================================================================

pub use self::{
    staging::StagingQueue,
    state::MemsinkState,
};

//======================================================================================================================
// Imports
//======================================================================================================================

use self::{
    operation::MemsinkOp,
    state::MemsinkStateMachine,
};
use crate::runtime::{
    check_object_name,
    event::Event,
    fail::Fail,
    interface::{
        Capability,
        PullSink,
        PullSource,
        PushSink,
        PULL_SINK_INTERFACE,
        PUSH_SINK_INTERFACE,
    },
    memory::{
        build_block_chain,
        release_block_chain,
        BlockChain,
    },
    types::{
        DataBlock,
        IoMode,
        MemoryDomain,
        ObjectHandle,
    },
    MemioRuntime,
};
use ::std::sync::{
    Arc,
    Mutex,
    MutexGuard,
    PoisonError,
    Weak,
};

//======================================================================================================================
// Constants
//======================================================================================================================

/// Registry type of memory sinks.
pub const MEMSINK_TYPE: &str = "memsink";

/// Data is ready to be pulled.
pub const MEMSINK_EVENT_DATA_AVAILABLE: u32 = 1 << 0;

/// Pushed data did not fit and was left with the producer.
pub const MEMSINK_EVENT_BUFFER_OVERFLOW: u32 = 1 << 1;

//======================================================================================================================
// Structures
//======================================================================================================================

/// Events a memory sink forwards to its subscribers.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MemsinkEvent {
    DataAvailable,
    BufferOverflow,
}

/// Compound controls forwarded to the producer.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CompoundControl {
    /// Zero-copy shared data pool. Not supported.
    SharedDataPool,
    /// Passed through to the producer untouched.
    Opaque(u32),
}

/// Snapshot returned by [Memsink::status].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct MemsinkStatus {
    pub state: MemsinkState,
    pub producer: Option<ObjectHandle>,
    pub io_mode: IoMode,
    pub bytes_pulled: u64,
}

/// Memory Sink
///
/// Consumer side of a pull connection. A producer attaches either through the pull-sink capability, handing over
/// its pull source, or through the push-sink capability, in which case pushed data is staged until pulled. Cloning
/// yields another handle to the same sink.
#[derive(Clone)]
pub struct Memsink(Arc<MemsinkObject>);

struct MemsinkObject {
    name: String,
    handle: ObjectHandle,
    domain: MemoryDomain,
    runtime: MemioRuntime,
    /// State, producer, and the producer's capability table are only touched with this lock held.
    inner: Mutex<MemsinkInner>,
}

struct MemsinkInner {
    state: MemsinkStateMachine,
    deleted: bool,
    io_mode: IoMode,
    producer: Option<ObjectHandle>,
    source: Option<Arc<dyn PullSource>>,
    /// Set when the producer pushes rather than being pulled from.
    staging: Option<Arc<StagingQueue>>,
    bytes_pulled: u64,
}

/// Where an attaching producer's data comes from.
enum PeerSource {
    Pull(Arc<dyn PullSource>),
    Staged,
}

/// Capability tables published for a sink. The advertised mode is fixed at publication time.
struct MemsinkInterface {
    memsink: Weak<MemsinkObject>,
    mode: IoMode,
    alignment: usize,
    max_transfer: usize,
    /// Pushed data is staged, so a push never carries more than the staging queue holds.
    staging_capacity: usize,
    domain: MemoryDomain,
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl Memsink {
    /// Creates a memory sink named `name` whose buffers live in `domain`.
    pub fn new(runtime: &MemioRuntime, name: &str, io_mode: IoMode, domain: MemoryDomain) -> Result<Self, Fail> {
        trace!("Memsink::new() name={:?} io_mode={:?} domain={:?}", name, io_mode, domain);
        check_object_name(name)?;

        let typ: ObjectHandle = runtime.registry().register_type(MEMSINK_TYPE)?;
        let handle: ObjectHandle = runtime.registry().register_instance(typ, name)?;
        let object: Arc<MemsinkObject> = Arc::new(MemsinkObject {
            name: name.to_string(),
            handle,
            domain,
            runtime: runtime.clone(),
            inner: Mutex::new(MemsinkInner {
                state: MemsinkStateMachine::new(),
                deleted: false,
                io_mode,
                producer: None,
                source: None,
                staging: None,
                bytes_pulled: 0,
            }),
        });

        // On failure, dropping `object` unregisters the instance.
        MemsinkObject::publish(&object, io_mode)?;
        Ok(Self(object))
    }

    /// Binds `producer` to the target sink. Invoked through the pull-sink capability by the producer's attach.
    pub fn attach_from_producer(&self, producer: ObjectHandle, source: Arc<dyn PullSource>) -> Result<(), Fail> {
        trace!("attach_from_producer() memsink={:?} producer={:?}", self.0.handle, producer);
        self.0.attach(producer, PeerSource::Pull(source))
    }

    /// Unbinds `producer` from the target sink.
    pub fn detach_from_producer(&self, producer: ObjectHandle) -> Result<(), Fail> {
        trace!("detach_from_producer() memsink={:?} producer={:?}", self.0.handle, producer);
        self.0.detach(producer)
    }

    /// Pulls up to `len` bytes from the attached producer into `addr`. Returns the number of bytes extracted.
    pub fn pull_data(&self, addr: usize, len: usize) -> Result<usize, Fail> {
        trace!("pull_data() memsink={:?} addr={:#x} len={:?}", self.0.handle, addr, len);
        let (source, producer): (Arc<dyn PullSource>, ObjectHandle) = {
            let inner: MutexGuard<MemsinkInner> = self.0.lock()?;
            inner.ensure_alive()?;
            inner.state.may_pull()?;
            inner.peer()?
        };

        // The lock is not held while the producer runs: a blocking pull must not keep the producer from detaching.
        let mut chain: BlockChain = build_block_chain(self.0.runtime.space(), self.0.domain, addr, len)?;
        let filled: usize = source.pull_data(producer, chain.blocks_mut())?;
        let bytes: usize = chain.filled_len(filled);
        release_block_chain(chain);

        self.0.lock()?.bytes_pulled += bytes as u64;
        Ok(bytes)
    }

    /// Returns the number of bytes the attached producer has ready.
    pub fn test_for_data(&self) -> Result<usize, Fail> {
        trace!("test_for_data() memsink={:?}", self.0.handle);
        let (source, producer): (Arc<dyn PullSource>, ObjectHandle) = self.0.control_peer()?;
        source.test_for_data(producer)
    }

    /// Writes compound control `control` on the attached producer.
    pub fn set_compound_control(&self, control: CompoundControl, value: &[u8]) -> Result<(), Fail> {
        trace!("set_compound_control() memsink={:?} control={:?}", self.0.handle, control);
        let selector: u32 = selector(control)?;
        let (source, producer): (Arc<dyn PullSource>, ObjectHandle) = self.0.control_peer()?;
        source.set_compound_control(producer, selector, value)
    }

    /// Reads compound control `control` from the attached producer into `value`. Returns the number of bytes read.
    pub fn get_compound_control(&self, control: CompoundControl, value: &mut [u8]) -> Result<usize, Fail> {
        trace!("get_compound_control() memsink={:?} control={:?}", self.0.handle, control);
        let selector: u32 = selector(control)?;
        let (source, producer): (Arc<dyn PullSource>, ObjectHandle) = self.0.control_peer()?;
        source.get_compound_control(producer, selector, value)
    }

    /// Changes the advertised I/O mode and republishes the capability tables.
    pub fn set_iomode(&self, mode: IoMode) -> Result<(), Fail> {
        trace!("set_iomode() memsink={:?} mode={:?}", self.0.handle, mode);
        {
            let mut inner: MutexGuard<MemsinkInner> = self.0.lock()?;
            inner.ensure_alive()?;
            inner.io_mode = mode;
        }
        MemsinkObject::publish(&self.0, mode)
    }

    /// Forwards event `event` to the subscribers of the target sink.
    pub fn notify(&self, event: u32) -> Result<(), Fail> {
        trace!("notify() memsink={:?} event={:#x}", self.0.handle, event);
        self.0.notify(event)
    }

    /// Reports the state of the target sink.
    pub fn status(&self) -> Result<MemsinkStatus, Fail> {
        let inner: MutexGuard<MemsinkInner> = self.0.lock()?;
        inner.ensure_alive()?;
        Ok(MemsinkStatus {
            state: inner.state.current(),
            producer: inner.producer,
            io_mode: inner.io_mode,
            bytes_pulled: inner.bytes_pulled,
        })
    }

    /// Deletes the target sink. The sink must be detached.
    pub fn delete(&self) -> Result<(), Fail> {
        trace!("delete() memsink={:?}", self.0.handle);
        let mut inner: MutexGuard<MemsinkInner> = self.0.lock()?;
        inner.ensure_alive()?;
        inner.state.may_delete()?;
        let registry = self.0.runtime.registry();
        for tag in [PULL_SINK_INTERFACE, PUSH_SINK_INTERFACE] {
            if let Err(e) = registry.unpublish(self.0.handle, tag) {
                warn!("delete(): failed to unpublish capability (tag={:?}, cause={:?})", tag, e);
            }
        }
        if let Err(e) = registry.unregister(self.0.handle) {
            error!("delete(): failed to unregister memsink ({:?})", e);
            return Err(e);
        }
        inner.deleted = true;
        Ok(())
    }

    pub fn handle(&self) -> ObjectHandle {
        self.0.handle
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn domain(&self) -> MemoryDomain {
        self.0.domain
    }

    pub fn io_mode(&self) -> Result<IoMode, Fail> {
        Ok(self.0.lock()?.io_mode)
    }
}

impl MemsinkObject {
    fn lock(&self) -> Result<MutexGuard<MemsinkInner>, Fail> {
        Ok(self.inner.lock()?)
    }

    /// Publishes the pull-sink and push-sink capability tables of `object`, advertising `mode`.
    fn publish(object: &Arc<MemsinkObject>, mode: IoMode) -> Result<(), Fail> {
        let interface: Arc<MemsinkInterface> = Arc::new(MemsinkInterface {
            memsink: Arc::downgrade(object),
            mode,
            alignment: object.runtime.config().get_alignment(),
            max_transfer: object.runtime.config().get_max_transfer(),
            staging_capacity: object.runtime.config().get_staging_capacity(),
            domain: object.domain,
        });
        let registry = object.runtime.registry();
        registry.publish_attribute(object.handle, PULL_SINK_INTERFACE, Capability::PullSink(interface.clone()))?;
        registry.publish_attribute(object.handle, PUSH_SINK_INTERFACE, Capability::PushSink(interface))?;
        Ok(())
    }

    fn attach(&self, producer: ObjectHandle, source: PeerSource) -> Result<(), Fail> {
        if let Err(e) = self.runtime.registry().type_of(producer) {
            let cause: String = format!("unknown producer (producer={:?}, cause={:?})", producer, e.cause);
            error!("attach(): {}", cause);
            return Err(Fail::new(libc::ENODEV, &cause));
        }

        let mut inner: MutexGuard<MemsinkInner> = self.lock()?;
        inner.ensure_alive()?;
        inner.state.transition(MemsinkOp::Attach)?;
        let source: Arc<dyn PullSource> = match source {
            PeerSource::Pull(source) => source,
            PeerSource::Staged => {
                let blocking: bool = inner.io_mode == IoMode::Blocking;
                let staging: Arc<StagingQueue> =
                    Arc::new(StagingQueue::new(self.runtime.config().get_staging_capacity(), blocking));
                inner.staging = Some(staging.clone());
                staging
            },
        };
        inner.source = Some(source);
        inner.producer = Some(producer);
        Ok(())
    }

    fn detach(&self, producer: ObjectHandle) -> Result<(), Fail> {
        let mut inner: MutexGuard<MemsinkInner> = self.lock()?;
        inner.ensure_alive()?;
        inner.state.may_control()?;
        if inner.producer != Some(producer) {
            let cause: String = format!(
                "producer is not attached (producer={:?}, attached={:?})",
                producer, inner.producer
            );
            error!("detach(): {}", cause);
            return Err(Fail::new(libc::ENODEV, &cause));
        }
        inner.state.transition(MemsinkOp::Detach)?;
        inner.producer = None;
        inner.source = None;
        if let Some(staging) = inner.staging.take() {
            staging.close();
        }
        Ok(())
    }

    /// Returns the attached producer's capability table, for a control operation.
    fn control_peer(&self) -> Result<(Arc<dyn PullSource>, ObjectHandle), Fail> {
        let inner: MutexGuard<MemsinkInner> = self.lock()?;
        inner.ensure_alive()?;
        inner.state.may_control()?;
        inner.peer()
    }

    /// Stages blocks pushed by `producer`. Returns the number of blocks accepted.
    fn accept_push(&self, producer: ObjectHandle, blocks: &[DataBlock]) -> Result<usize, Fail> {
        let staging: Arc<StagingQueue> = {
            let inner: MutexGuard<MemsinkInner> = self.lock()?;
            inner.ensure_alive()?;
            inner.state.may_pull()?;
            // A producer the sink let go of stays reset, even once another one attaches.
            if inner.producer != Some(producer) {
                let cause: String = format!(
                    "producer is not attached (producer={:?}, attached={:?})",
                    producer, inner.producer
                );
                warn!("accept_push(): {}", cause);
                return Err(Fail::new(libc::ECONNRESET, &cause));
            }
            match inner.staging.clone() {
                Some(staging) => staging,
                None => {
                    let cause: &str = "memsink is attached to a pull source";
                    error!("accept_push(): {}", cause);
                    return Err(Fail::new(libc::ENOTSUP, cause));
                },
            }
        };

        let accepted: usize = staging.push(blocks)?;
        if accepted > 0 {
            self.signal(MemsinkEvent::DataAvailable);
        }
        if accepted < blocks.len() {
            self.signal(MemsinkEvent::BufferOverflow);
        }
        Ok(accepted)
    }

    fn notify(&self, event: u32) -> Result<(), Fail> {
        let event: MemsinkEvent = MemsinkEvent::try_from(event)?;
        {
            let inner: MutexGuard<MemsinkInner> = self.lock()?;
            inner.ensure_alive()?;
            inner.state.may_control()?;
        }
        self.runtime.events().signal(Event {
            object: self.handle,
            id: event.into(),
        })
    }

    fn signal(&self, event: MemsinkEvent) {
        let event: Event = Event {
            object: self.handle,
            id: event.into(),
        };
        if let Err(e) = self.runtime.events().signal(event) {
            warn!("signal(): failed to signal {:?} ({:?})", event, e);
        }
    }
}

impl MemsinkInner {
    fn ensure_alive(&self) -> Result<(), Fail> {
        if self.deleted {
            return Err(Fail::new(libc::ENODEV, "memsink was deleted"));
        }
        Ok(())
    }

    fn peer(&self) -> Result<(Arc<dyn PullSource>, ObjectHandle), Fail> {
        match (self.source.clone(), self.producer) {
            (Some(source), Some(producer)) => Ok((source, producer)),
            _ => Err(Fail::new(libc::ECONNRESET, "memsink lost its producer")),
        }
    }
}

impl MemsinkInterface {
    /// Resolves the sink the capability was published for.
    fn memsink(&self, sink: ObjectHandle) -> Result<Arc<MemsinkObject>, Fail> {
        match self.memsink.upgrade() {
            Some(memsink) if memsink.handle == sink => Ok(memsink),
            Some(_) => {
                let cause: String = format!("capability invoked for another object (object={:?})", sink);
                warn!("memsink(): {}", cause);
                Err(Fail::new(libc::ENODEV, &cause))
            },
            None => Err(Fail::new(libc::ENODEV, "memsink is gone")),
        }
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl TryFrom<u32> for MemsinkEvent {
    type Error = Fail;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            MEMSINK_EVENT_DATA_AVAILABLE => Ok(MemsinkEvent::DataAvailable),
            MEMSINK_EVENT_BUFFER_OVERFLOW => Ok(MemsinkEvent::BufferOverflow),
            _ => {
                let cause: String = format!("unknown memsink event (event={:#x})", value);
                error!("MemsinkEvent::try_from(): {}", cause);
                Err(Fail::new(libc::EINVAL, &cause))
            },
        }
    }
}

impl From<MemsinkEvent> for u32 {
    fn from(event: MemsinkEvent) -> Self {
        match event {
            MemsinkEvent::DataAvailable => MEMSINK_EVENT_DATA_AVAILABLE,
            MemsinkEvent::BufferOverflow => MEMSINK_EVENT_BUFFER_OVERFLOW,
        }
    }
}

impl PullSink for MemsinkInterface {
    fn connect(&self, src: ObjectHandle, sink: ObjectHandle, source: Arc<dyn PullSource>) -> Result<(), Fail> {
        self.memsink(sink)?.attach(src, PeerSource::Pull(source))
    }

    fn disconnect(&self, src: ObjectHandle, sink: ObjectHandle) -> Result<(), Fail> {
        self.memsink(sink)?.detach(src)
    }

    fn notify(&self, sink: ObjectHandle, event: u32) -> Result<(), Fail> {
        self.memsink(sink)?.notify(event)
    }

    fn mode(&self) -> IoMode {
        self.mode
    }

    fn alignment(&self) -> usize {
        self.alignment
    }

    fn max_transfer(&self) -> usize {
        self.max_transfer
    }

    fn domain(&self) -> MemoryDomain {
        self.domain
    }
}

impl PushSink for MemsinkInterface {
    fn connect(&self, src: ObjectHandle, sink: ObjectHandle) -> Result<(), Fail> {
        self.memsink(sink)?.attach(src, PeerSource::Staged)
    }

    fn disconnect(&self, src: ObjectHandle, sink: ObjectHandle) -> Result<(), Fail> {
        self.memsink(sink)?.detach(src)
    }

    fn push_data(&self, src: ObjectHandle, sink: ObjectHandle, blocks: &mut [DataBlock]) -> Result<usize, Fail> {
        self.memsink(sink)?.accept_push(src, blocks)
    }

    fn mode(&self) -> IoMode {
        self.mode
    }

    fn alignment(&self) -> usize {
        self.alignment
    }

    fn max_transfer(&self) -> usize {
        match self.max_transfer {
            0 => self.staging_capacity,
            max_transfer => max_transfer.min(self.staging_capacity),
        }
    }

    fn domain(&self) -> MemoryDomain {
        self.domain
    }
}

impl Drop for MemsinkObject {
    // Releases a sink that was never deleted.
    fn drop(&mut self) {
        let inner: &mut MemsinkInner = self.inner.get_mut().unwrap_or_else(PoisonError::into_inner);
        if inner.deleted {
            return;
        }
        warn!("memsink dropped without being deleted (name={:?})", self.name);
        if let Some(staging) = inner.staging.take() {
            staging.close();
        }
        if let Err(e) = self.runtime.registry().unregister(self.handle) {
            error!("drop(): failed to unregister memsink ({:?})", e);
        }
    }
}

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// Maps a compound control onto the selector understood by producers.
fn selector(control: CompoundControl) -> Result<u32, Fail> {
    match control {
        CompoundControl::SharedDataPool => {
            let cause: &str = "shared data pool is not supported";
            error!("selector(): {}", cause);
            Err(Fail::new(libc::ENOTSUP, cause))
        },
        CompoundControl::Opaque(selector) => Ok(selector),
    }
}
