// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use ::anyhow::Result;
use ::crossbeam_channel::{
    Receiver,
    Sender,
};
use ::std::{
    sync::Arc,
    thread,
};
use ::stkpi_memio::{
    ensure_eq,
    memsrc::{
        MEMSRC_EVENT_BUFFER_UNDERFLOW,
        MEMSRC_EVENT_CONTINUE_INJECTION,
    },
    runtime::{
        event::Event,
        fail::Fail,
        interface::{
            PushNotify,
            PUSH_NOTIFY_INTERFACE,
        },
        logging,
        registry::Registry,
    },
    test_helpers::{
        register_push_sink,
        StubBehavior,
        StubPushSink,
        TestRuntime,
        PAGE_SIZE,
    },
    InterfaceType,
    IoMode,
    MemoryDomain,
    Memsink,
    Memsrc,
    MemsrcState,
    MemsrcStatus,
    ObjectHandle,
};

//======================================================================================================================
// Helper Functions
//======================================================================================================================

fn expect_errno<T: std::fmt::Debug>(result: Result<T, Fail>, errno: i32) -> Result<()> {
    match result {
        Ok(value) => anyhow::bail!("operation should fail with errno {:?}, got {:?}", errno, value),
        Err(e) => {
            ensure_eq!(e.errno, errno);
            Ok(())
        },
    }
}

/// Creates a source in `domain` attached to a stub consumer.
fn attached_source(
    rt: &TestRuntime,
    domain: MemoryDomain,
    behavior: StubBehavior,
    max_transfer: usize,
) -> Result<(Memsrc, Arc<StubPushSink>, ObjectHandle)> {
    let memsrc: Memsrc = Memsrc::new(&rt.runtime, "p", IoMode::Blocking, domain)?;
    let stub: Arc<StubPushSink> = Arc::new(StubPushSink::new(behavior, IoMode::Blocking, max_transfer));
    let consumer: ObjectHandle = register_push_sink(&rt.runtime, "consumer", stub.clone())?;
    memsrc.attach(consumer, InterfaceType::PushSink)?;
    Ok((memsrc, stub, consumer))
}

/// Maps a kernel buffer holding `len` copies of `byte`.
fn kernel_buffer(rt: &TestRuntime, byte: u8, len: usize) -> Result<usize> {
    let addr: usize = rt.space.map_kernel(len);
    rt.space.write(addr, &vec![byte; len])?;
    Ok(addr)
}

//======================================================================================================================
// Tests
//======================================================================================================================

#[test]
fn push_consumed_in_full() -> Result<()> {
    logging::initialize();
    let rt: TestRuntime = TestRuntime::new();
    let (memsrc, stub, consumer) = attached_source(&rt, MemoryDomain::KernelDirect, StubBehavior::ConsumeAll, 0)?;
    let buf: usize = kernel_buffer(&rt, 0xaa, 100)?;

    ensure_eq!(memsrc.push_data(buf, 100)?, 100);
    ensure_eq!(stub.received(), vec![0xaa; 100]);
    ensure_eq!(
        memsrc.status()?,
        MemsrcStatus {
            state: MemsrcState::Ready,
            peer: Some(consumer),
            bytes_pushed: 100,
        }
    );
    Ok(())
}

#[test]
fn push_reports_partial_consumption() -> Result<()> {
    logging::initialize();
    let rt: TestRuntime = TestRuntime::new();
    let (memsrc, stub, _) = attached_source(&rt, MemoryDomain::KernelDirect, StubBehavior::ConsumeBytes(40), 0)?;
    let buf: usize = kernel_buffer(&rt, 0xaa, 100)?;

    ensure_eq!(memsrc.push_data(buf, 100)?, 40);
    ensure_eq!(stub.received().len(), 40);
    ensure_eq!(memsrc.state()?, MemsrcState::Ready);
    Ok(())
}

#[test]
fn push_from_user_memory_spans_pages() -> Result<()> {
    logging::initialize();
    let rt: TestRuntime = TestRuntime::new();
    let (memsrc, stub, _) = attached_source(&rt, MemoryDomain::UserPinned, StubBehavior::ConsumeAll, 0)?;
    let base: usize = rt.space.map_user(2 * PAGE_SIZE);
    let data: Vec<u8> = (0..200).map(|i| i as u8).collect();
    rt.space.write(base + PAGE_SIZE - 100, &data)?;

    ensure_eq!(memsrc.push_data(base + PAGE_SIZE - 100, 200)?, 200);
    ensure_eq!(stub.received(), data);
    ensure_eq!(rt.space.pin_count(), 2);
    ensure_eq!(rt.space.pinned_pages(), 0);
    Ok(())
}

#[test]
fn push_from_vmalloc_memory_does_not_unpin() -> Result<()> {
    logging::initialize();
    let rt: TestRuntime = TestRuntime::new();
    let (memsrc, stub, _) =
        attached_source(&rt, MemoryDomain::KernelVirtualNoncontiguous, StubBehavior::ConsumeAll, 0)?;
    let base: usize = rt.space.map_vmalloc(2 * PAGE_SIZE);
    rt.space.write(base, &vec![3; 2 * PAGE_SIZE])?;

    ensure_eq!(memsrc.push_data(base, 2 * PAGE_SIZE)?, 2 * PAGE_SIZE);
    ensure_eq!(stub.received().len(), 2 * PAGE_SIZE);
    ensure_eq!(rt.space.flush_count(), 2);
    ensure_eq!(rt.space.unpin_count(), 0);
    ensure_eq!(rt.space.bad_unpin_count(), 0);
    Ok(())
}

#[test]
fn partial_pin_failure_leaves_nothing_pinned() -> Result<()> {
    logging::initialize();
    let rt: TestRuntime = TestRuntime::new();
    let (memsrc, stub, _) = attached_source(&rt, MemoryDomain::UserPinned, StubBehavior::ConsumeAll, 0)?;
    let base: usize = rt.space.map_user(3 * PAGE_SIZE);
    rt.space.fail_pin_at(1);

    expect_errno(memsrc.push_data(base, 3 * PAGE_SIZE), libc::ENOMEM)?;
    ensure_eq!(rt.space.pin_count(), 1);
    ensure_eq!(rt.space.unpin_count(), 1);
    ensure_eq!(stub.pushes(), 0);
    ensure_eq!(memsrc.state()?, MemsrcState::Ready);

    // The source is still usable.
    ensure_eq!(memsrc.push_data(base, 3 * PAGE_SIZE)?, 3 * PAGE_SIZE);
    ensure_eq!(rt.space.pinned_pages(), 0);
    Ok(())
}

#[test]
fn push_is_clamped_to_max_transfer() -> Result<()> {
    logging::initialize();
    let rt: TestRuntime = TestRuntime::new();
    let (memsrc, stub, _) = attached_source(&rt, MemoryDomain::KernelDirect, StubBehavior::ConsumeAll, 64)?;
    let buf: usize = kernel_buffer(&rt, 1, 100)?;

    ensure_eq!(memsrc.push_data(buf, 100)?, 64);
    ensure_eq!(stub.received().len(), 64);
    Ok(())
}

#[test]
fn consumer_failure_is_propagated() -> Result<()> {
    logging::initialize();
    let rt: TestRuntime = TestRuntime::new();
    let (memsrc, _, _) = attached_source(&rt, MemoryDomain::KernelDirect, StubBehavior::FailPush(libc::EIO), 0)?;
    let buf: usize = kernel_buffer(&rt, 1, 100)?;

    expect_errno(memsrc.push_data(buf, 100), libc::EIO)?;
    ensure_eq!(memsrc.status()?.bytes_pushed, 0);
    ensure_eq!(memsrc.state()?, MemsrcState::Ready);
    Ok(())
}

#[test]
fn bad_push_requests_fail() -> Result<()> {
    logging::initialize();
    let rt: TestRuntime = TestRuntime::new();
    let memsrc: Memsrc = Memsrc::new(&rt.runtime, "p", IoMode::Blocking, MemoryDomain::KernelDirect)?;
    let buf: usize = kernel_buffer(&rt, 1, 100)?;

    // Not attached.
    expect_errno(memsrc.push_data(buf, 100), libc::EPERM)?;

    let stub: Arc<StubPushSink> = Arc::new(StubPushSink::new(StubBehavior::ConsumeAll, IoMode::Blocking, 0));
    let consumer: ObjectHandle = register_push_sink(&rt.runtime, "consumer", stub)?;
    memsrc.attach(consumer, InterfaceType::PushSink)?;
    expect_errno(memsrc.push_data(buf, 0), libc::EINVAL)?;
    expect_errno(memsrc.push_data(0, 100), libc::EINVAL)?;
    ensure_eq!(memsrc.state()?, MemsrcState::Ready);
    Ok(())
}

#[test]
fn physical_memory_is_not_supported() -> Result<()> {
    logging::initialize();
    let rt: TestRuntime = TestRuntime::new();
    let (memsrc, _, _) = attached_source(&rt, MemoryDomain::Physical, StubBehavior::ConsumeAll, 0)?;
    let buf: usize = kernel_buffer(&rt, 1, 100)?;
    expect_errno(memsrc.push_data(buf, 100), libc::ENOTSUP)?;
    ensure_eq!(memsrc.state()?, MemsrcState::Ready);
    Ok(())
}

#[test]
fn second_attach_is_busy() -> Result<()> {
    logging::initialize();
    let rt: TestRuntime = TestRuntime::new();
    let memsrc: Memsrc = Memsrc::new(&rt.runtime, "p", IoMode::Blocking, MemoryDomain::KernelDirect)?;
    let memsink: Memsink = Memsink::new(&rt.runtime, "s", IoMode::Blocking, MemoryDomain::KernelDirect)?;
    memsrc.attach(memsink.handle(), InterfaceType::PushSink)?;

    let stub: Arc<StubPushSink> = Arc::new(StubPushSink::new(StubBehavior::ConsumeAll, IoMode::Blocking, 0));
    let other: ObjectHandle = register_push_sink(&rt.runtime, "other", stub.clone())?;
    expect_errno(memsrc.attach(other, InterfaceType::PushSink), libc::EBUSY)?;

    ensure_eq!(memsrc.status()?.peer, Some(memsink.handle()));
    ensure_eq!(memsink.status()?.producer, Some(memsrc.handle()));
    ensure_eq!(stub.connects(), 0);
    Ok(())
}

#[test]
fn attached_source_is_busy_before_consumer_lookup() -> Result<()> {
    logging::initialize();
    let rt: TestRuntime = TestRuntime::new();
    let (memsrc, stub, consumer) = attached_source(&rt, MemoryDomain::KernelDirect, StubBehavior::ConsumeAll, 0)?;
    let gone: Memsink = Memsink::new(&rt.runtime, "gone", IoMode::Blocking, MemoryDomain::KernelDirect)?;
    gone.delete()?;

    expect_errno(memsrc.attach(gone.handle(), InterfaceType::PushSink), libc::EBUSY)?;
    expect_errno(memsrc.attach(consumer, InterfaceType::PullSink), libc::EBUSY)?;
    ensure_eq!(memsrc.status()?.peer, Some(consumer));
    ensure_eq!(stub.connects(), 1);
    Ok(())
}

#[test]
fn refused_attach_leaves_source_detached() -> Result<()> {
    logging::initialize();
    let rt: TestRuntime = TestRuntime::new();
    let memsrc: Memsrc = Memsrc::new(&rt.runtime, "p", IoMode::Blocking, MemoryDomain::KernelDirect)?;
    let refusing: Arc<StubPushSink> = Arc::new(StubPushSink::new(StubBehavior::RefuseConnect, IoMode::Blocking, 0));
    let consumer: ObjectHandle = register_push_sink(&rt.runtime, "refusing", refusing)?;

    expect_errno(memsrc.attach(consumer, InterfaceType::PushSink), libc::ECONNREFUSED)?;
    ensure_eq!(memsrc.state()?, MemsrcState::Detached);
    ensure_eq!(memsrc.status()?.peer, None);

    let stub: Arc<StubPushSink> = Arc::new(StubPushSink::new(StubBehavior::ConsumeAll, IoMode::Blocking, 0));
    let consumer: ObjectHandle = register_push_sink(&rt.runtime, "willing", stub.clone())?;
    memsrc.attach(consumer, InterfaceType::PushSink)?;
    ensure_eq!(stub.connected(), Some(memsrc.handle()));
    Ok(())
}

#[test]
fn attach_requires_a_push_sink() -> Result<()> {
    logging::initialize();
    let rt: TestRuntime = TestRuntime::new();
    let memsrc: Memsrc = Memsrc::new(&rt.runtime, "p", IoMode::Blocking, MemoryDomain::KernelDirect)?;
    let memsink: Memsink = Memsink::new(&rt.runtime, "s", IoMode::Blocking, MemoryDomain::KernelDirect)?;
    let other: Memsrc = Memsrc::new(&rt.runtime, "q", IoMode::Blocking, MemoryDomain::KernelDirect)?;

    expect_errno(memsrc.attach(memsink.handle(), InterfaceType::PullSink), libc::ENOTSUP)?;
    // A source publishes no push-sink capability.
    expect_errno(memsrc.attach(other.handle(), InterfaceType::PushSink), libc::ENODEV)?;
    ensure_eq!(memsrc.state()?, MemsrcState::Detached);
    Ok(())
}

#[test]
fn detach_disconnects_consumer() -> Result<()> {
    logging::initialize();
    let rt: TestRuntime = TestRuntime::new();
    let (memsrc, stub, consumer) = attached_source(&rt, MemoryDomain::KernelDirect, StubBehavior::ConsumeAll, 0)?;

    memsrc.detach()?;
    ensure_eq!(stub.disconnects(), 1);
    ensure_eq!(stub.connected(), None);
    ensure_eq!(memsrc.state()?, MemsrcState::Detached);
    expect_errno(memsrc.detach(), libc::EPERM)?;

    memsrc.attach(consumer, InterfaceType::PushSink)?;
    ensure_eq!(stub.connects(), 2);
    Ok(())
}

#[test]
fn concurrent_push_is_busy() -> Result<()> {
    logging::initialize();
    let rt: TestRuntime = TestRuntime::new();
    let (memsrc, stub, _) = attached_source(&rt, MemoryDomain::KernelDirect, StubBehavior::ConsumeAll, 0)?;
    let buf: usize = kernel_buffer(&rt, 9, 100)?;
    let (entered, release): (Receiver<()>, Sender<()>) = stub.hold_next_push();

    let pusher: Memsrc = memsrc.clone();
    let handle: thread::JoinHandle<Result<usize, Fail>> = thread::spawn(move || pusher.push_data(buf, 100));
    entered.recv()?;

    ensure_eq!(memsrc.state()?, MemsrcState::Processing);
    expect_errno(memsrc.push_data(buf, 100), libc::EBUSY)?;
    expect_errno(memsrc.detach(), libc::EBUSY)?;
    ensure_eq!(memsrc.status()?.state, MemsrcState::Processing);

    release.send(())?;
    let pushed: Result<usize, Fail> = handle.join().map_err(|_| anyhow::anyhow!("pusher panicked"))?;
    ensure_eq!(pushed?, 100);
    ensure_eq!(memsrc.state()?, MemsrcState::Ready);
    Ok(())
}

#[test]
fn notify_reaches_subscribers() -> Result<()> {
    logging::initialize();
    let rt: TestRuntime = TestRuntime::new();
    let memsrc: Memsrc = Memsrc::new(&rt.runtime, "p", IoMode::Blocking, MemoryDomain::KernelDirect)?;
    let rx: Receiver<Event> = rt.events.subscribe(
        memsrc.handle(),
        MEMSRC_EVENT_CONTINUE_INJECTION | MEMSRC_EVENT_BUFFER_UNDERFLOW,
    )?;

    memsrc.notify(MEMSRC_EVENT_CONTINUE_INJECTION)?;
    ensure_eq!(
        rx.try_recv()?,
        Event {
            object: memsrc.handle(),
            id: MEMSRC_EVENT_CONTINUE_INJECTION,
        }
    );

    // Consumers reach the source through its published push-notify capability.
    let notifier: Arc<dyn PushNotify> = rt
        .registry
        .lookup_attribute(memsrc.handle(), PUSH_NOTIFY_INTERFACE)?
        .into_push_notify()?;
    notifier.notify(memsrc.handle(), MEMSRC_EVENT_BUFFER_UNDERFLOW)?;
    ensure_eq!(rx.try_recv()?.id, MEMSRC_EVENT_BUFFER_UNDERFLOW);

    expect_errno(memsrc.notify(1 << 7), libc::EINVAL)?;
    anyhow::ensure!(rx.try_recv().is_err());
    Ok(())
}
