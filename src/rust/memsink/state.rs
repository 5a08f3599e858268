// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    memsink::operation::MemsinkOp,
    runtime::fail::Fail,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// States of a memory sink.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MemsinkState {
    Detached,
    Attached,
}

/// Drives the state of a memory sink.
pub struct MemsinkStateMachine {
    current: MemsinkState,
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl MemsinkStateMachine {
    /// Constructs [self] with [MemsinkState::Detached] as starting state.
    pub fn new() -> Self {
        Self {
            current: MemsinkState::Detached,
        }
    }

    pub fn current(&self) -> MemsinkState {
        self.current
    }

    /// Asserts whether the target sink may pull data.
    pub fn may_pull(&self) -> Result<(), Fail> {
        self.ensure_attached("pull", libc::ECONNRESET)
    }

    /// Asserts whether the target sink may run a control operation.
    pub fn may_control(&self) -> Result<(), Fail> {
        self.ensure_attached("control", libc::EPERM)
    }

    /// Asserts whether the target sink may be deleted.
    pub fn may_delete(&self) -> Result<(), Fail> {
        if self.current == MemsinkState::Attached {
            let cause: &str = "memsink is attached";
            warn!("may_delete(): {}", cause);
            return Err(Fail::new(libc::EBUSY, cause));
        }
        Ok(())
    }

    /// Moves into the next state.
    pub fn transition(&mut self, op: MemsinkOp) -> Result<(), Fail> {
        let next: MemsinkState = match (self.current, op) {
            (MemsinkState::Detached, MemsinkOp::Attach) => MemsinkState::Attached,
            (MemsinkState::Attached, MemsinkOp::Detach) => MemsinkState::Detached,
            (MemsinkState::Attached, MemsinkOp::Attach) => {
                return Err(fail(op, "memsink is already attached", libc::EBUSY))
            },
            (MemsinkState::Detached, MemsinkOp::Detach) => return Err(fail(op, "memsink is not attached", libc::EPERM)),
        };
        debug!("transition(): {:?} -> {:?}", self.current, next);
        self.current = next;
        Ok(())
    }

    fn ensure_attached(&self, what: &str, errno: i32) -> Result<(), Fail> {
        if self.current != MemsinkState::Attached {
            let cause: String = format!("memsink is not attached ({})", what);
            warn!("ensure_attached(): {}", cause);
            return Err(Fail::new(errno, &cause));
        }
        Ok(())
    }
}

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// Constructs a [Fail] object from the given `op`, `cause`, and `errno`.
fn fail(op: MemsinkOp, cause: &str, errno: i32) -> Fail {
    warn!("{:?}(): {}", op, cause);
    Fail::new(errno, cause)
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
