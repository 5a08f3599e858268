// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    fail::Fail,
    types::ObjectHandle,
};
use ::crossbeam_channel::{
    Receiver,
    Sender,
};
use ::std::sync::Mutex;

//======================================================================================================================
// Structures
//======================================================================================================================

/// An asynchronous condition raised by an object.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Event {
    pub object: ObjectHandle,
    pub id: u32,
}

/// In-memory [EventSink] that fans events out to subscribers.
pub struct EventBus {
    subscribers: Mutex<Vec<Subscription>>,
}

struct Subscription {
    object: ObjectHandle,
    mask: u32,
    tx: Sender<Event>,
}

//======================================================================================================================
// Traits
//======================================================================================================================

/// Destination of the events raised by memory sources and sinks.
pub trait EventSink: Send + Sync {
    fn signal(&self, event: Event) -> Result<(), Fail>;
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Subscribes to the events of `object` whose id intersects `mask`. Dropping the receiver cancels the
    /// subscription.
    pub fn subscribe(&self, object: ObjectHandle, mask: u32) -> Result<Receiver<Event>, Fail> {
        trace!("subscribe() object={:?} mask={:#x}", object, mask);
        if mask == 0 {
            return Err(Fail::new(libc::EINVAL, "empty event mask"));
        }
        let (tx, rx): (Sender<Event>, Receiver<Event>) = crossbeam_channel::unbounded();
        self.subscribers.lock()?.push(Subscription { object, mask, tx });
        Ok(rx)
    }

    /// Number of live subscriptions.
    pub fn subscriptions(&self) -> usize {
        self.subscribers.lock().map(|subscribers| subscribers.len()).unwrap_or(0)
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for EventBus {
    fn signal(&self, event: Event) -> Result<(), Fail> {
        debug!("signal() object={:?} id={:#x}", event.object, event.id);
        let mut subscribers = self.subscribers.lock()?;
        // Sending only fails once the receiver is gone.
        subscribers.retain(|s| s.object != event.object || s.mask & event.id == 0 || s.tx.send(event).is_ok());
        Ok(())
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
