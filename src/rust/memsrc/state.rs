// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    memsrc::operation::MemsrcOp,
    runtime::fail::Fail,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// States of a memory source.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MemsrcState {
    /// Not attached to any consumer.
    Detached,
    /// Attaching to or detaching from a consumer.
    CheckingConnection,
    /// Attached and idle.
    Ready,
    /// A push is in flight.
    Processing,
    /// A status query is in flight.
    Reporting,
    /// Torn down.
    Exited,
}

/// Drives the state of a memory source.
pub struct MemsrcStateMachine {
    /// Current state.
    current: MemsrcState,
    /// Next state.
    next: Option<MemsrcState>,
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl MemsrcStateMachine {
    /// Constructs [self] with [MemsrcState::Detached] as starting state.
    pub fn new() -> Self {
        Self {
            current: MemsrcState::Detached,
            next: None,
        }
    }

    pub fn current(&self) -> MemsrcState {
        self.current
    }

    /// Prepares to move into the next state.
    pub fn prepare(&mut self, op: MemsrcOp) -> Result<(), Fail> {
        let next: MemsrcState = self.get_next_state(op)?;
        if self.next.is_some() {
            return Err(fail(op, "memsrc is busy", libc::EBUSY));
        }
        self.next = Some(next);
        Ok(())
    }

    /// Commits to moving into the prepared state.
    pub fn commit(&mut self) {
        if let Some(next) = self.next.take() {
            if next != self.current {
                debug!("commit(): {:?} -> {:?}", self.current, next);
            }
            self.current = next;
        }
    }

    /// Aborts prepared state.
    pub fn abort(&mut self) {
        self.next = None;
    }

    /// Prepares and commits a transition in one step.
    pub fn transition(&mut self, op: MemsrcOp) -> Result<(), Fail> {
        self.prepare(op)?;
        self.commit();
        Ok(())
    }

    // Get the next state for this memory source.
    fn get_next_state(&self, op: MemsrcOp) -> Result<MemsrcState, Fail> {
        match self.current {
            MemsrcState::Detached => self.from_detached(op),
            MemsrcState::CheckingConnection => self.from_checking_connection(op),
            MemsrcState::Ready => self.from_ready(op),
            MemsrcState::Processing => self.from_processing(op),
            MemsrcState::Reporting => self.from_reporting(op),
            MemsrcState::Exited => Err(fail(op, "memsrc was deleted", libc::ENODEV)),
        }
    }

    /// Attempts to transition from [MemsrcState::Detached].
    fn from_detached(&self, op: MemsrcOp) -> Result<MemsrcState, Fail> {
        match op {
            MemsrcOp::Attach => Ok(MemsrcState::CheckingConnection),
            MemsrcOp::Exit => Ok(MemsrcState::Exited),
            MemsrcOp::Detach | MemsrcOp::Push | MemsrcOp::Report => {
                Err(fail(op, "memsrc is not attached", libc::EPERM))
            },
            MemsrcOp::Attached | MemsrcOp::Detached | MemsrcOp::Pushed | MemsrcOp::Reported => {
                Err(fail(op, "no transition in progress", libc::EINVAL))
            },
        }
    }

    /// Attempts to transition from [MemsrcState::CheckingConnection].
    fn from_checking_connection(&self, op: MemsrcOp) -> Result<MemsrcState, Fail> {
        match op {
            MemsrcOp::Attached => Ok(MemsrcState::Ready),
            MemsrcOp::Detached => Ok(MemsrcState::Detached),
            MemsrcOp::Attach | MemsrcOp::Detach | MemsrcOp::Push | MemsrcOp::Report | MemsrcOp::Exit => {
                Err(fail(op, "memsrc is checking its connection", libc::EBUSY))
            },
            MemsrcOp::Pushed | MemsrcOp::Reported => Err(fail(op, "no transition in progress", libc::EINVAL)),
        }
    }

    /// Attempts to transition from [MemsrcState::Ready].
    fn from_ready(&self, op: MemsrcOp) -> Result<MemsrcState, Fail> {
        match op {
            MemsrcOp::Detach => Ok(MemsrcState::CheckingConnection),
            MemsrcOp::Push => Ok(MemsrcState::Processing),
            MemsrcOp::Report => Ok(MemsrcState::Reporting),
            MemsrcOp::Attach | MemsrcOp::Exit => Err(fail(op, "memsrc is attached", libc::EBUSY)),
            MemsrcOp::Attached | MemsrcOp::Detached | MemsrcOp::Pushed | MemsrcOp::Reported => {
                Err(fail(op, "no transition in progress", libc::EINVAL))
            },
        }
    }

    /// Attempts to transition from [MemsrcState::Processing].
    fn from_processing(&self, op: MemsrcOp) -> Result<MemsrcState, Fail> {
        match op {
            MemsrcOp::Pushed => Ok(MemsrcState::Ready),
            MemsrcOp::Attach | MemsrcOp::Detach | MemsrcOp::Push | MemsrcOp::Report | MemsrcOp::Exit => {
                Err(fail(op, "memsrc is pushing data", libc::EBUSY))
            },
            MemsrcOp::Attached | MemsrcOp::Detached | MemsrcOp::Reported => {
                Err(fail(op, "no transition in progress", libc::EINVAL))
            },
        }
    }

    /// Attempts to transition from [MemsrcState::Reporting].
    fn from_reporting(&self, op: MemsrcOp) -> Result<MemsrcState, Fail> {
        match op {
            MemsrcOp::Reported => Ok(MemsrcState::Ready),
            MemsrcOp::Attach | MemsrcOp::Detach | MemsrcOp::Push | MemsrcOp::Report | MemsrcOp::Exit => {
                Err(fail(op, "memsrc is reporting", libc::EBUSY))
            },
            MemsrcOp::Attached | MemsrcOp::Detached | MemsrcOp::Pushed => {
                Err(fail(op, "no transition in progress", libc::EINVAL))
            },
        }
    }
}

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// Constructs a [Fail] object from the given `op`, `cause`, and `errno`.
fn fail(op: MemsrcOp, cause: &str, errno: i32) -> Fail {
    warn!("{:?}(): {}", op, cause);
    Fail::new(errno, cause)
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
