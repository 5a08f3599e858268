// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

mod operation;
mod state;

//======================================================================================================================
// Exports
//======================================================================================================================

pub use self::state::MemsrcState;

//======================================================================================================================
// Imports
//======================================================================================================================

use self::{
    operation::MemsrcOp,
    state::MemsrcStateMachine,
};
use crate::runtime::{
    check_object_name,
    event::Event,
    fail::Fail,
    interface::{
        Capability,
        InterfaceType,
        PushNotify,
        PushSink,
        PUSH_NOTIFY_INTERFACE,
    },
    memory::{
        build_block_chain,
        release_block_chain,
        BlockChain,
    },
    types::{
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

/// Registry type of memory sources.
pub const MEMSRC_TYPE: &str = "memsrc";

/// The consumer is ready for more data.
pub const MEMSRC_EVENT_CONTINUE_INJECTION: u32 = 1 << 0;

/// The consumer ran out of data.
pub const MEMSRC_EVENT_BUFFER_UNDERFLOW: u32 = 1 << 1;

//======================================================================================================================
// Structures
//======================================================================================================================

/// Events a memory source forwards to its subscribers.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MemsrcEvent {
    ContinueInjection,
    BufferUnderflow,
}

/// Snapshot returned by [Memsrc::status].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct MemsrcStatus {
    pub state: MemsrcState,
    pub peer: Option<ObjectHandle>,
    pub bytes_pushed: u64,
}

/// Memory Source
///
/// Producer side of a push connection. Cloning yields another handle to the same source.
#[derive(Clone)]
pub struct Memsrc(Arc<MemsrcObject>);

struct MemsrcObject {
    name: String,
    handle: ObjectHandle,
    io_mode: IoMode,
    domain: MemoryDomain,
    runtime: MemioRuntime,
    /// State, peer, and the peer's capability table are only touched with this lock held.
    inner: Mutex<MemsrcInner>,
}

struct MemsrcInner {
    state: MemsrcStateMachine,
    peer: Option<ObjectHandle>,
    sink: Option<Arc<dyn PushSink>>,
    bytes_pushed: u64,
}

/// Push-notify capability published for a source. Holds no strong reference, so the registry never keeps a source
/// alive.
struct MemsrcNotifier {
    memsrc: Weak<MemsrcObject>,
}

/// Brings a source back to [MemsrcState::Ready] when a push ends, whatever its outcome.
struct PushGuard<'a> {
    memsrc: &'a MemsrcObject,
    bytes: usize,
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl Memsrc {
    /// Creates a memory source named `name` whose buffers live in `domain`.
    pub fn new(runtime: &MemioRuntime, name: &str, io_mode: IoMode, domain: MemoryDomain) -> Result<Self, Fail> {
        trace!("Memsrc::new() name={:?} io_mode={:?} domain={:?}", name, io_mode, domain);
        check_object_name(name)?;

        let typ: ObjectHandle = runtime.registry().register_type(MEMSRC_TYPE)?;
        let handle: ObjectHandle = runtime.registry().register_instance(typ, name)?;
        let object: Arc<MemsrcObject> = Arc::new(MemsrcObject {
            name: name.to_string(),
            handle,
            io_mode,
            domain,
            runtime: runtime.clone(),
            inner: Mutex::new(MemsrcInner {
                state: MemsrcStateMachine::new(),
                peer: None,
                sink: None,
                bytes_pushed: 0,
            }),
        });

        // On failure, dropping `object` unregisters the instance.
        let notifier: Arc<dyn PushNotify> = Arc::new(MemsrcNotifier {
            memsrc: Arc::downgrade(&object),
        });
        runtime
            .registry()
            .publish_attribute(handle, PUSH_NOTIFY_INTERFACE, Capability::PushNotify(notifier))?;

        Ok(Self(object))
    }

    /// Attaches to `consumer` through `interface`. Only push sinks can be attached to.
    pub fn attach(&self, consumer: ObjectHandle, interface: InterfaceType) -> Result<(), Fail> {
        trace!(
            "attach() memsrc={:?} consumer={:?} interface={:?}",
            self.0.handle,
            consumer,
            interface
        );
        // Hold the lock across connect() so that a concurrent attach cannot interleave.
        let mut inner: MutexGuard<MemsrcInner> = self.0.lock()?;
        inner.state.transition(MemsrcOp::Attach)?;
        let sink: Arc<dyn PushSink> = match self.0.connect(consumer, interface) {
            Ok(sink) => sink,
            Err(e) => {
                inner.state.transition(MemsrcOp::Detached)?;
                return Err(e);
            },
        };

        debug!(
            "attach(): consumer={:?} mode={:?} domain={:?} alignment={:?} max_transfer={:?}",
            consumer,
            sink.mode(),
            sink.domain(),
            sink.alignment(),
            sink.max_transfer()
        );
        if sink.mode() != self.0.io_mode {
            debug!("attach(): io mode mismatch (memsrc={:?}, consumer={:?})", self.0.io_mode, sink.mode());
        }

        inner.sink = Some(sink);
        inner.peer = Some(consumer);
        inner.state.transition(MemsrcOp::Attached)?;
        Ok(())
    }

    /// Detaches from the current consumer.
    pub fn detach(&self) -> Result<(), Fail> {
        trace!("detach() memsrc={:?}", self.0.handle);
        let mut inner: MutexGuard<MemsrcInner> = self.0.lock()?;
        inner.state.transition(MemsrcOp::Detach)?;
        if let (Some(sink), Some(peer)) = (inner.sink.take(), inner.peer.take()) {
            // The local side is torn down regardless; a consumer that fails here has nothing left to talk to.
            if let Err(e) = sink.disconnect(self.0.handle, peer) {
                warn!("detach(): consumer failed to disconnect (consumer={:?}, cause={:?})", peer, e);
            }
        }
        inner.state.transition(MemsrcOp::Detached)?;
        Ok(())
    }

    /// Pushes the `len` bytes at `addr` into the attached consumer. Returns the number of bytes it consumed, which may
    /// be less than `len`.
    pub fn push_data(&self, addr: usize, len: usize) -> Result<usize, Fail> {
        trace!("push_data() memsrc={:?} addr={:#x} len={:?}", self.0.handle, addr, len);
        let (sink, peer): (Arc<dyn PushSink>, ObjectHandle) = {
            let mut inner: MutexGuard<MemsrcInner> = self.0.lock()?;
            inner.state.transition(MemsrcOp::Push)?;
            match (inner.sink.clone(), inner.peer) {
                (Some(sink), Some(peer)) => (sink, peer),
                _ => {
                    inner.state.transition(MemsrcOp::Pushed)?;
                    return Err(Fail::new(libc::ECONNRESET, "memsrc lost its consumer"));
                },
            }
        };

        // The lock is not held while the consumer runs, so a slow consumer stalls this source only.
        let mut guard: PushGuard = PushGuard::new(&self.0);
        let bytes: usize = self.0.push_chain(&sink, peer, addr, len)?;
        guard.bytes = bytes;
        Ok(bytes)
    }

    /// Forwards event `event` to the subscribers of the target source.
    pub fn notify(&self, event: u32) -> Result<(), Fail> {
        trace!("notify() memsrc={:?} event={:#x}", self.0.handle, event);
        self.0.notify(event)
    }

    /// Reports the state of the target source.
    pub fn status(&self) -> Result<MemsrcStatus, Fail> {
        let mut inner: MutexGuard<MemsrcInner> = self.0.lock()?;
        let state: MemsrcState = inner.state.current();
        if state != MemsrcState::Ready {
            return Ok(MemsrcStatus {
                state,
                peer: inner.peer,
                bytes_pushed: inner.bytes_pushed,
            });
        }
        inner.state.transition(MemsrcOp::Report)?;
        let status: MemsrcStatus = MemsrcStatus {
            state,
            peer: inner.peer,
            bytes_pushed: inner.bytes_pushed,
        };
        inner.state.transition(MemsrcOp::Reported)?;
        Ok(status)
    }

    /// Deletes the target source. The source must be detached.
    pub fn delete(&self) -> Result<(), Fail> {
        trace!("delete() memsrc={:?}", self.0.handle);
        let mut inner: MutexGuard<MemsrcInner> = self.0.lock()?;
        inner.state.prepare(MemsrcOp::Exit)?;
        let registry = self.0.runtime.registry();
        if let Err(e) = registry.unpublish(self.0.handle, PUSH_NOTIFY_INTERFACE) {
            warn!("delete(): failed to unpublish capability ({:?})", e);
        }
        if let Err(e) = registry.unregister(self.0.handle) {
            error!("delete(): failed to unregister memsrc ({:?})", e);
            inner.state.abort();
            return Err(e);
        }
        inner.state.commit();
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

    pub fn io_mode(&self) -> IoMode {
        self.0.io_mode
    }

    pub fn state(&self) -> Result<MemsrcState, Fail> {
        Ok(self.0.lock()?.state.current())
    }
}

impl MemsrcObject {
    fn lock(&self) -> Result<MutexGuard<MemsrcInner>, Fail> {
        Ok(self.inner.lock()?)
    }

    /// Looks up the push-sink capability of `consumer` and connects to it.
    fn connect(&self, consumer: ObjectHandle, interface: InterfaceType) -> Result<Arc<dyn PushSink>, Fail> {
        if interface != InterfaceType::PushSink {
            let cause: String = format!("memsrc can only attach to push sinks (interface={:?})", interface);
            error!("attach(): {}", cause);
            return Err(Fail::new(libc::ENOTSUP, &cause));
        }

        let sink: Arc<dyn PushSink> = self
            .runtime
            .registry()
            .lookup_attribute(consumer, interface.tag())?
            .into_push_sink()?;
        if let Err(e) = sink.connect(self.handle, consumer) {
            let cause: String = format!("consumer refused connection (consumer={:?}, cause={:?})", consumer, e.cause);
            error!("attach(): {}", cause);
            return Err(Fail::new(libc::ECONNREFUSED, &cause));
        }
        Ok(sink)
    }

    /// Maps `[addr, addr + len)` and hands it to `sink`. The transfer is clamped to what the sink accepts at once.
    fn push_chain(&self, sink: &Arc<dyn PushSink>, peer: ObjectHandle, addr: usize, len: usize) -> Result<usize, Fail> {
        let max_transfer: usize = sink.max_transfer();
        let len: usize = if max_transfer != 0 && len > max_transfer {
            debug!("push_chain(): clamping transfer (len={:?}, max={:?})", len, max_transfer);
            max_transfer
        } else {
            len
        };

        let mut chain: BlockChain = build_block_chain(self.runtime.space(), self.domain, addr, len)?;
        let filled: usize = sink.push_data(self.handle, peer, chain.blocks_mut())?;
        let bytes: usize = chain.filled_len(filled);
        release_block_chain(chain);
        Ok(bytes)
    }

    fn notify(&self, event: u32) -> Result<(), Fail> {
        let event: MemsrcEvent = MemsrcEvent::try_from(event)?;
        if self.lock()?.state.current() == MemsrcState::Exited {
            return Err(Fail::new(libc::ENODEV, "memsrc was deleted"));
        }
        self.runtime.events().signal(Event {
            object: self.handle,
            id: event.into(),
        })
    }
}

impl<'a> PushGuard<'a> {
    fn new(memsrc: &'a MemsrcObject) -> Self {
        Self { memsrc, bytes: 0 }
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl TryFrom<u32> for MemsrcEvent {
    type Error = Fail;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            MEMSRC_EVENT_CONTINUE_INJECTION => Ok(MemsrcEvent::ContinueInjection),
            MEMSRC_EVENT_BUFFER_UNDERFLOW => Ok(MemsrcEvent::BufferUnderflow),
            _ => {
                let cause: String = format!("unknown memsrc event (event={:#x})", value);
                error!("MemsrcEvent::try_from(): {}", cause);
                Err(Fail::new(libc::EINVAL, &cause))
            },
        }
    }
}

impl From<MemsrcEvent> for u32 {
    fn from(event: MemsrcEvent) -> Self {
        match event {
            MemsrcEvent::ContinueInjection => MEMSRC_EVENT_CONTINUE_INJECTION,
            MemsrcEvent::BufferUnderflow => MEMSRC_EVENT_BUFFER_UNDERFLOW,
        }
    }
}

impl PushNotify for MemsrcNotifier {
    fn notify(&self, src: ObjectHandle, event: u32) -> Result<(), Fail> {
        match self.memsrc.upgrade() {
            Some(memsrc) if memsrc.handle == src => memsrc.notify(event),
            Some(_) => {
                let cause: String = format!("notification for another object (object={:?})", src);
                warn!("notify(): {}", cause);
                Err(Fail::new(libc::ENODEV, &cause))
            },
            None => Err(Fail::new(libc::ENODEV, "memsrc is gone")),
        }
    }
}

impl<'a> Drop for PushGuard<'a> {
    fn drop(&mut self) {
        let mut inner: MutexGuard<MemsrcInner> = self.memsrc.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.bytes_pushed += self.bytes as u64;
        if let Err(e) = inner.state.transition(MemsrcOp::Pushed) {
            error!("push_data(): failed to leave processing state ({:?})", e);
        }
    }
}

impl Drop for MemsrcObject {
    // Releases a source that was never deleted.
    fn drop(&mut self) {
        let inner: &mut MemsrcInner = self.inner.get_mut().unwrap_or_else(PoisonError::into_inner);
        if inner.state.current() == MemsrcState::Exited {
            return;
        }
        warn!("memsrc dropped without being deleted (name={:?})", self.name);
        if let (Some(sink), Some(peer)) = (inner.sink.take(), inner.peer.take()) {
            if let Err(e) = sink.disconnect(self.handle, peer) {
                warn!("drop(): consumer failed to disconnect ({:?})", e);
            }
        }
        if let Err(e) = self.runtime.registry().unregister(self.handle) {
            error!("drop(): failed to unregister memsrc ({:?})", e);
        }
    }
}
