// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use ::anyhow::Result;
use ::rand::{
    rngs::SmallRng,
    Rng,
    SeedableRng,
};
use ::std::sync::Arc;
use ::stkpi_memio::{
    ensure_eq,
    memsrc::MEMSRC_EVENT_CONTINUE_INJECTION,
    runtime::{
        fail::Fail,
        interface::{
            PULL_SINK_INTERFACE,
            PUSH_NOTIFY_INTERFACE,
        },
        logging,
        registry::Registry,
    },
    test_helpers::{
        register_producer,
        register_push_sink,
        StubBehavior,
        StubPullSource,
        StubPushSink,
        TestRuntime,
        PAGE_SIZE,
    },
    Config,
    InterfaceType,
    IoMode,
    MemioConfig,
    MemoryDomain,
    Memsink,
    MemsinkState,
    Memsrc,
    MemsrcState,
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

//======================================================================================================================
// Tests
//======================================================================================================================

#[test]
fn object_names_are_checked() -> Result<()> {
    logging::initialize();
    let rt: TestRuntime = TestRuntime::new();
    let long: String = "x".repeat(65);
    expect_errno(
        Memsrc::new(&rt.runtime, "", IoMode::Blocking, MemoryDomain::KernelDirect).map(|m| m.handle()),
        libc::EINVAL,
    )?;
    expect_errno(
        Memsink::new(&rt.runtime, &long, IoMode::Blocking, MemoryDomain::KernelDirect).map(|m| m.handle()),
        libc::EINVAL,
    )?;
    anyhow::ensure!(rt.registry.is_empty());
    Ok(())
}

#[test]
fn attached_source_cannot_be_deleted() -> Result<()> {
    logging::initialize();
    let rt: TestRuntime = TestRuntime::new();
    let memsrc: Memsrc = Memsrc::new(&rt.runtime, "p", IoMode::Blocking, MemoryDomain::KernelDirect)?;
    let stub: Arc<StubPushSink> = Arc::new(StubPushSink::new(StubBehavior::ConsumeAll, IoMode::Blocking, 0));
    let consumer: ObjectHandle = register_push_sink(&rt.runtime, "consumer", stub)?;
    memsrc.attach(consumer, InterfaceType::PushSink)?;

    expect_errno(memsrc.delete(), libc::EBUSY)?;
    memsrc.detach()?;
    memsrc.delete()?;
    ensure_eq!(memsrc.state()?, MemsrcState::Exited);

    expect_errno(memsrc.attach(consumer, InterfaceType::PushSink), libc::ENODEV)?;
    expect_errno(memsrc.push_data(0x1000, 1), libc::ENODEV)?;
    expect_errno(memsrc.notify(MEMSRC_EVENT_CONTINUE_INJECTION), libc::ENODEV)?;
    expect_errno(memsrc.delete(), libc::ENODEV)?;
    expect_errno(
        rt.registry.lookup_attribute(memsrc.handle(), PUSH_NOTIFY_INTERFACE),
        libc::ENODEV,
    )?;
    Ok(())
}

#[test]
fn attached_sink_cannot_be_deleted() -> Result<()> {
    logging::initialize();
    let rt: TestRuntime = TestRuntime::new();
    let memsink: Memsink = Memsink::new(&rt.runtime, "s", IoMode::Blocking, MemoryDomain::KernelDirect)?;
    let producer: ObjectHandle = register_producer(&rt.runtime, "producer")?;
    memsink.attach_from_producer(producer, Arc::new(StubPullSource::new()))?;

    expect_errno(memsink.delete(), libc::EBUSY)?;
    ensure_eq!(memsink.status()?.state, MemsinkState::Attached);
    memsink.detach_from_producer(producer)?;
    memsink.delete()?;

    expect_errno(memsink.status(), libc::ENODEV)?;
    expect_errno(memsink.set_iomode(IoMode::NonBlocking), libc::ENODEV)?;
    expect_errno(
        rt.registry.lookup_attribute(memsink.handle(), PULL_SINK_INTERFACE),
        libc::ENODEV,
    )?;
    Ok(())
}

#[test]
fn dropped_objects_leave_the_registry() -> Result<()> {
    logging::initialize();
    let rt: TestRuntime = TestRuntime::new();
    {
        let memsrc: Memsrc = Memsrc::new(&rt.runtime, "p", IoMode::Blocking, MemoryDomain::KernelDirect)?;
        let memsink: Memsink = Memsink::new(&rt.runtime, "s", IoMode::Blocking, MemoryDomain::KernelDirect)?;
        memsrc.attach(memsink.handle(), InterfaceType::PushSink)?;
        // Two types and two instances.
        ensure_eq!(rt.registry.len(), 4);
    }
    // Types outlive their instances.
    ensure_eq!(rt.registry.len(), 2);
    Ok(())
}

#[test]
fn configured_limits_reach_the_source() -> Result<()> {
    logging::initialize();
    let config: Config = Config::from_yaml_str("memio:\n  staging_capacity: 256\n  max_transfer: 64\n")?;
    let rt: TestRuntime = TestRuntime::with_config(MemioConfig::new(&config)?);
    let memsrc: Memsrc = Memsrc::new(&rt.runtime, "p", IoMode::NonBlocking, MemoryDomain::KernelDirect)?;
    let memsink: Memsink = Memsink::new(&rt.runtime, "s", IoMode::NonBlocking, MemoryDomain::KernelDirect)?;
    memsrc.attach(memsink.handle(), InterfaceType::PushSink)?;
    let src: usize = rt.space.map_kernel(100);

    ensure_eq!(memsrc.push_data(src, 100)?, 64);
    ensure_eq!(memsrc.push_data(src, 100)?, 64);
    ensure_eq!(memsrc.push_data(src, 100)?, 64);
    ensure_eq!(memsrc.push_data(src, 100)?, 64);
    // The queue is full.
    ensure_eq!(memsrc.push_data(src, 100)?, 0);
    ensure_eq!(memsink.test_for_data()?, 256);
    Ok(())
}

/// Drives a source through random operation sequences, checking every outcome against a model of its state.
#[test]
fn random_operations_follow_the_state_model() -> Result<()> {
    logging::initialize();
    for seed in 0..8u64 {
        let mut rng: SmallRng = SmallRng::seed_from_u64(seed);
        let rt: TestRuntime = TestRuntime::new();
        let mut memsrc: Memsrc = Memsrc::new(&rt.runtime, "p", IoMode::Blocking, MemoryDomain::UserPinned)?;
        let stub: Arc<StubPushSink> = Arc::new(StubPushSink::new(StubBehavior::ConsumeAll, IoMode::Blocking, 0));
        let consumer: ObjectHandle = register_push_sink(&rt.runtime, "consumer", stub.clone())?;
        let base: usize = rt.space.map_user(4 * PAGE_SIZE);
        let mut attached: bool = false;
        let mut pushed: u64 = 0;
        let mut total: u64 = 0;

        for _ in 0..200 {
            match rng.gen_range(0..6) {
                0 => {
                    let result: Result<(), Fail> = memsrc.attach(consumer, InterfaceType::PushSink);
                    if attached {
                        expect_errno(result, libc::EBUSY)?;
                    } else {
                        result?;
                        attached = true;
                    }
                },
                1 => {
                    let result: Result<(), Fail> = memsrc.detach();
                    if attached {
                        result?;
                        attached = false;
                    } else {
                        expect_errno(result, libc::EPERM)?;
                    }
                },
                2 | 3 => {
                    let offset: usize = rng.gen_range(0..PAGE_SIZE);
                    let len: usize = rng.gen_range(1..3 * PAGE_SIZE);
                    let result: Result<usize, Fail> = memsrc.push_data(base + offset, len);
                    if attached {
                        ensure_eq!(result?, len);
                        pushed += len as u64;
                        total += len as u64;
                    } else {
                        expect_errno(result, libc::EPERM)?;
                    }
                },
                4 => {
                    let result: Result<(), Fail> = memsrc.delete();
                    if attached {
                        expect_errno(result, libc::EBUSY)?;
                    } else {
                        result?;
                        expect_errno(memsrc.push_data(base, 1), libc::ENODEV)?;
                        memsrc = Memsrc::new(&rt.runtime, "p", IoMode::Blocking, MemoryDomain::UserPinned)?;
                        pushed = 0;
                    }
                },
                _ => {
                    let expected: MemsrcState = if attached {
                        MemsrcState::Ready
                    } else {
                        MemsrcState::Detached
                    };
                    ensure_eq!(memsrc.status()?.state, expected);
                },
            }
            ensure_eq!(rt.space.pinned_pages(), 0);
        }

        ensure_eq!(memsrc.status()?.bytes_pushed, pushed);
        ensure_eq!(stub.received().len() as u64, total);
        ensure_eq!(stub.connects() - stub.disconnects(), attached as usize);
        ensure_eq!(rt.space.pin_count(), rt.space.unpin_count());
    }
    Ok(())
}
