// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

pub mod address_space;
pub mod peers;

pub use self::{
    address_space::SimulatedAddressSpace,
    peers::{
        register_producer,
        register_push_sink,
        StubBehavior,
        StubPullSource,
        StubPushSink,
    },
};

use crate::{
    config::MemioConfig,
    runtime::{
        event::EventBus,
        limits,
        registry::ObjectRegistry,
        MemioRuntime,
    },
};
use ::std::sync::Arc;

//==============================================================================
// Constants
//==============================================================================

pub const PAGE_SIZE: usize = limits::PAGE_SIZE;

//==============================================================================
// Structures
//==============================================================================

/// A [MemioRuntime] wired to in-memory collaborators, with direct access to each of them.
pub struct TestRuntime {
    pub runtime: MemioRuntime,
    pub space: Arc<SimulatedAddressSpace>,
    pub registry: Arc<ObjectRegistry>,
    pub events: Arc<EventBus>,
}

//==============================================================================
// Associated Functions
//==============================================================================

impl TestRuntime {
    pub fn new() -> Self {
        Self::with_config(MemioConfig::default())
    }

    pub fn with_config(config: MemioConfig) -> Self {
        let space: Arc<SimulatedAddressSpace> = Arc::new(SimulatedAddressSpace::new(PAGE_SIZE));
        let registry: Arc<ObjectRegistry> = Arc::new(ObjectRegistry::new());
        let events: Arc<EventBus> = Arc::new(EventBus::new());
        let runtime: MemioRuntime = MemioRuntime::new(config, space.clone(), registry.clone(), events.clone());
        Self {
            runtime,
            space,
            registry,
            events,
        }
    }
}

//==============================================================================
// Trait Implementations
//==============================================================================

impl Default for TestRuntime {
    fn default() -> Self {
        Self::new()
    }
}
