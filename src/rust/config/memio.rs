// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    config::Config,
    runtime::{
        fail::Fail,
        limits,
    },
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Memory Source/Sink Configuration Descriptor
#[derive(Clone, Debug)]
pub struct MemioConfig {
    /// Capacity of the staging queue of a memsink that is pushed into, in bytes.
    staging_capacity: usize,
    /// Largest transfer advertised by memsinks. Zero means unlimited.
    max_transfer: usize,
    /// Buffer alignment advertised by memsinks.
    alignment: usize,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl MemioConfig {
    /// Creates a configuration descriptor, falling back to defaults for options that are not set.
    pub fn new(config: &Config) -> Result<Self, Fail> {
        let defaults: Self = Self::default();
        let staging_capacity: usize = config.staging_capacity()?.unwrap_or(defaults.staging_capacity);
        if staging_capacity == 0 {
            return Err(Fail::new(libc::EINVAL, "staging capacity cannot be zero"));
        }
        let alignment: usize = config.alignment()?.unwrap_or(defaults.alignment);
        if alignment != 0 && !alignment.is_power_of_two() {
            let cause: String = format!("alignment must be a power of two (alignment={:?})", alignment);
            return Err(Fail::new(libc::EINVAL, &cause));
        }
        Ok(Self {
            staging_capacity,
            max_transfer: config.max_transfer()?.unwrap_or(defaults.max_transfer),
            alignment,
        })
    }

    pub fn get_staging_capacity(&self) -> usize {
        self.staging_capacity
    }

    pub fn get_max_transfer(&self) -> usize {
        self.max_transfer
    }

    pub fn get_alignment(&self) -> usize {
        self.alignment
    }

    pub fn staging_capacity(mut self, value: usize) -> Self {
        assert!(value > 0);
        self.staging_capacity = value;
        self
    }

    pub fn max_transfer(mut self, value: usize) -> Self {
        self.max_transfer = value;
        self
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl Default for MemioConfig {
    fn default() -> Self {
        MemioConfig {
            staging_capacity: limits::STAGING_CAPACITY,
            max_transfer: 0,
            alignment: 0,
        }
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
