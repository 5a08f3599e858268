// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

mod memio;

//======================================================================================================================
// Exports
//======================================================================================================================

pub use self::memio::MemioConfig;

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::fail::Fail;
use ::std::{
    fs::File,
    io::Read,
    ops::Index,
    str::FromStr,
};
use ::yaml_rust::{
    Yaml,
    YamlLoader,
};

//======================================================================================================================
// Constants
//======================================================================================================================

// Memory source/sink options.
mod memio_config {
    pub const SECTION_NAME: &str = "memio";
    // Capacity of the staging queue of a memsink that is pushed into.
    pub const STAGING_CAPACITY: &str = "staging_capacity";
    // Largest transfer advertised by a memsink. Zero means unlimited.
    pub const MAX_TRANSFER: &str = "max_transfer";
    // Buffer alignment advertised by a memsink.
    pub const ALIGNMENT: &str = "alignment";
}

//======================================================================================================================
// Structures
//======================================================================================================================

/// Configuration file.
#[derive(Clone, Debug)]
pub struct Config(pub Yaml);

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl Config {
    /// Reads a configuration file into a [Config] object.
    pub fn new(config_path: &str) -> Result<Self, Fail> {
        let mut config_s: String = String::new();
        File::open(config_path)?.read_to_string(&mut config_s)?;
        Self::from_yaml_str(&config_s)
    }

    /// Parses a configuration document.
    pub fn from_yaml_str(config_s: &str) -> Result<Self, Fail> {
        let config: Vec<Yaml> = match YamlLoader::load_from_str(config_s) {
            Ok(config) => config,
            Err(e) => {
                let message: String = format!("malformed configuration ({:?})", e);
                return Err(Fail::new(libc::EINVAL, &message));
            },
        };
        let config_obj: &Yaml = match &config[..] {
            &[ref c] => c,
            _ => return Err(Fail::new(libc::EINVAL, "Wrong number of config objects")),
        };

        Ok(Self(config_obj.clone()))
    }

    fn get_memio_config(&self) -> Option<&Yaml> {
        match self.0.index(memio_config::SECTION_NAME) {
            Yaml::BadValue => None,
            section => Some(section),
        }
    }

    /// Reads the staging capacity from the environment first, then from the configuration file.
    pub fn staging_capacity(&self) -> Result<Option<usize>, Fail> {
        self.get_memio_usize(memio_config::STAGING_CAPACITY)
    }

    /// Reads the advertised maximum transfer from the environment first, then from the configuration file.
    pub fn max_transfer(&self) -> Result<Option<usize>, Fail> {
        self.get_memio_usize(memio_config::MAX_TRANSFER)
    }

    /// Reads the advertised alignment from the environment first, then from the configuration file.
    pub fn alignment(&self) -> Result<Option<usize>, Fail> {
        self.get_memio_usize(memio_config::ALIGNMENT)
    }

    //======================================================================================================================
    // Static Functions
    //======================================================================================================================

    fn get_memio_usize(&self, index: &str) -> Result<Option<usize>, Fail> {
        if let Some(value) = Self::get_typed_env_option(index)? {
            return Ok(Some(value));
        }
        match self.get_memio_config() {
            Some(section) => {
                let section: &Yaml = Self::ensure_subsection(section, memio_config::SECTION_NAME)?;
                Self::get_int_option(section, index)
            },
            None => Ok(None),
        }
    }

    /// Validates that `yaml` is a mapping.
    fn ensure_subsection<'a>(yaml: &'a Yaml, index: &str) -> Result<&'a Yaml, Fail> {
        match yaml {
            Yaml::Hash(_) => Ok(yaml),
            _ => {
                let message: String = format!("parameter \"{}\" has unexpected type", index);
                Err(Fail::new(libc::EINVAL, message.as_str()))
            },
        }
    }

    /// Get value where the environment value overrides the config file if it exists.
    fn get_typed_env_option<T: FromStr>(index: &str) -> Result<Option<T>, Fail> {
        // Check for the environment variable.
        if let Ok(var) = ::std::env::var(index.to_uppercase()) {
            if let Ok(value) = var.as_str().parse() {
                return Ok(Some(value));
            } else {
                let message: String = format!("parameter {} has unexpected type", index);
                return Err(Fail::new(libc::EINVAL, message.as_str()));
            }
        }
        Ok(None)
    }

    /// Reads an optional integer at `index`, verifying that the destination type may hold it.
    fn get_int_option<T: TryFrom<i64>>(yaml: &Yaml, index: &str) -> Result<Option<T>, Fail> {
        let val: i64 = match yaml.index(index) {
            Yaml::BadValue => return Ok(None),
            Yaml::Integer(val) => *val,
            _ => {
                let message: String = format!("parameter {} has unexpected type", index);
                return Err(Fail::new(libc::EINVAL, message.as_str()));
            },
        };
        match T::try_from(val) {
            Ok(val) => Ok(Some(val)),
            _ => {
                let message: String = format!("parameter \"{}\" is out of range", index);
                Err(Fail::new(libc::ERANGE, message.as_str()))
            },
        }
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
