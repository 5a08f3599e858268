// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

#![cfg_attr(feature = "strict", deny(warnings))]
#![deny(clippy::all)]

#[macro_use]
extern crate log;

pub mod config;
pub mod memsink;
pub mod memsrc;
pub mod runtime;
pub mod test_helpers;

pub use self::{
    config::{
        Config,
        MemioConfig,
    },
    memsink::{
        CompoundControl,
        Memsink,
        MemsinkEvent,
        MemsinkState,
        MemsinkStatus,
    },
    memsrc::{
        Memsrc,
        MemsrcEvent,
        MemsrcState,
        MemsrcStatus,
    },
    runtime::{
        fail::Fail,
        interface::InterfaceType,
        types::{
            IoMode,
            MemoryDomain,
            ObjectHandle,
        },
        MemioRuntime,
    },
};

/// Like `assert_eq!`, but bails out of the enclosing `anyhow::Result` function instead of panicking.
#[macro_export]
macro_rules! ensure_eq {
    ($left:expr, $right:expr) => {{
        match (&$left, &$right) {
            (left_val, right_val) => {
                if !(*left_val == *right_val) {
                    anyhow::bail!(
                        r#"ensure failed: `(left == right)`
   left: `{:?}`,
  right: `{:?}`"#,
                        left_val,
                        right_val
                    )
                }
            },
        }
    }};
}

/// Like `assert_ne!`, but bails out of the enclosing `anyhow::Result` function instead of panicking.
#[macro_export]
macro_rules! ensure_neq {
    ($left:expr, $right:expr) => {{
        match (&$left, &$right) {
            (left_val, right_val) => {
                if *left_val == *right_val {
                    anyhow::bail!(
                        r#"ensure failed: `(left != right)`
   left: `{:?}`,
  right: `{:?}`"#,
                        left_val,
                        right_val
                    )
                }
            },
        }
    }};
}
