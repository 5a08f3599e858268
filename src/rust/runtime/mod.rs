// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Exports
//======================================================================================================================

pub mod event;
pub mod fail;
pub mod interface;
pub mod limits;
pub mod logging;
pub mod memory;
pub mod registry;
pub mod types;

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    config::MemioConfig,
    runtime::{
        event::EventSink,
        fail::Fail,
        memory::AddressSpace,
        registry::Registry,
    },
};
use ::std::sync::Arc;

//======================================================================================================================
// Structures
//======================================================================================================================

/// Collaborators shared by every memory source and sink: page services, the object registry, and the event
/// subsystem.
#[derive(Clone)]
pub struct MemioRuntime {
    config: MemioConfig,
    space: Arc<dyn AddressSpace>,
    registry: Arc<dyn Registry>,
    events: Arc<dyn EventSink>,
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl MemioRuntime {
    pub fn new(
        config: MemioConfig,
        space: Arc<dyn AddressSpace>,
        registry: Arc<dyn Registry>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            config,
            space,
            registry,
            events,
        }
    }

    pub fn config(&self) -> &MemioConfig {
        &self.config
    }

    pub fn space(&self) -> &Arc<dyn AddressSpace> {
        &self.space
    }

    pub fn registry(&self) -> &Arc<dyn Registry> {
        &self.registry
    }

    pub fn events(&self) -> &Arc<dyn EventSink> {
        &self.events
    }
}

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// Checks that `name` may be used to register a memory source or sink.
pub fn check_object_name(name: &str) -> Result<(), Fail> {
    if name.is_empty() {
        let cause: &str = "object name cannot be empty";
        error!("check_object_name(): {}", cause);
        return Err(Fail::new(libc::EINVAL, cause));
    }
    if name.len() > limits::NAME_LEN_MAX {
        let cause: String = format!("object name is too long (len={:?})", name.len());
        error!("check_object_name(): {}", cause);
        return Err(Fail::new(libc::EINVAL, &cause));
    }
    Ok(())
}
